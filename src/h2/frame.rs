//! HTTP/2 frame codec (RFC 9113 §4, §6).
//!
//! HTTP/2 frames have a fixed 9-byte header:
//! ```text
//!  +-----------------------------------------------+
//!  |                 Length (24)                     |
//!  +---------------+---------------+---------------+
//!  |   Type (8)    |   Flags (8)   |
//!  +-+-------------+---------------+------+--------+
//!  |R|                Stream Identifier (31)        |
//!  +-+----------------------------------------------+
//!  |                Frame Payload (0...)           ...
//!  +-----------------------------------------------+
//! ```
//!
//! Decoding checks everything visible in a single frame: lengths, stream-id
//! placement, padding and settings values. Violations come back as
//! [`H2Error`] carrying the scope RFC 9113 assigns them. Unknown frame types
//! decode to [`Frame::Unknown`].

use alloc::vec::Vec;

use super::settings::{MAX_WINDOW_SIZE, SettingsParams};
use crate::error::{Error, ErrorCode, H2Error};

// Frame type constants (RFC 9113 §6).
pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_PRIORITY: u8 = 0x2;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FRAME_PUSH_PROMISE: u8 = 0x5;
pub const FRAME_PING: u8 = 0x6;
pub const FRAME_GOAWAY: u8 = 0x7;
pub const FRAME_WINDOW_UPDATE: u8 = 0x8;
pub const FRAME_CONTINUATION: u8 = 0x9;

// Flag bits.
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

pub const FRAME_HEADER_LEN: usize = 9;

/// HTTP/2 frame header (9 bytes on wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,     // 24-bit payload length
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,  // 31-bit, reserved bit cleared
}

impl FrameHeader {
    /// Reject a declared length above `max_frame_size` before any payload
    /// byte is read.
    pub fn check_length(&self, max_frame_size: u32) -> Result<(), H2Error> {
        if self.length > max_frame_size {
            return Err(H2Error::frame_size("frame length exceeds SETTINGS_MAX_FRAME_SIZE"));
        }
        Ok(())
    }

    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Stream dependency carried by HEADERS and PRIORITY. Parsed for framing
/// correctness only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

/// Decoded HTTP/2 frame borrowing its payload from the input buffer.
///
/// `pad` keeps the PADDED pad length so flow control can count the whole
/// payload. Padding bytes are never exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Data {
        stream_id: u32,
        data: &'a [u8],
        end_stream: bool,
        pad: Option<u8>,
    },
    /// A self-dependent `priority` is left for the caller to reject after
    /// the field block has been decoded.
    Headers {
        stream_id: u32,
        fragment: &'a [u8],
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
        pad: Option<u8>,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        params: SettingsParams,
    },
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        fragment: &'a [u8],
        end_headers: bool,
    },
    Ping {
        data: [u8; 8],
        ack: bool,
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug: &'a [u8],
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: &'a [u8],
        end_headers: bool,
    },
    /// Unknown frame type (RFC 9113 §5.5).
    Unknown {
        frame_type: u8,
        stream_id: u32,
        flags: u8,
        payload: &'a [u8],
    },
}

impl Frame<'_> {
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Short type name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}

/// Payload length of a DATA frame as counted by flow control.
pub fn flow_controlled_len(data: &[u8], pad: Option<u8>) -> u32 {
    let padding = pad.map_or(0, |p| usize::from(p) + 1);
    (data.len() + padding) as u32
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a 9-byte frame header.
pub fn decode_frame_header(buf: &[u8]) -> Result<FrameHeader, Error> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(Error::BufferTooSmall { needed: FRAME_HEADER_LEN });
    }
    let length = (u32::from(buf[0]) << 16) | (u32::from(buf[1]) << 8) | u32::from(buf[2]);
    Ok(FrameHeader {
        length,
        frame_type: buf[3],
        flags: buf[4],
        stream_id: u32::from_be_bytes([buf[5] & 0x7f, buf[6], buf[7], buf[8]]),
    })
}

/// Decode one complete frame from the front of `buf`.
///
/// Returns `(frame, consumed)`. `BufferTooSmall` means more input is
/// needed. The length limit is enforced as soon as the header is present.
pub fn decode_frame(buf: &[u8], max_frame_size: u32) -> Result<(Frame<'_>, usize), Error> {
    let hdr = decode_frame_header(buf)?;
    hdr.check_length(max_frame_size)?;
    let total = FRAME_HEADER_LEN + hdr.length as usize;
    if buf.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }
    let frame = decode_frame_payload(&hdr, &buf[FRAME_HEADER_LEN..total])?;
    Ok((frame, total))
}

/// Decode the payload of a frame whose header was already read.
pub fn decode_frame_payload<'a>(hdr: &FrameHeader, payload: &'a [u8]) -> Result<Frame<'a>, H2Error> {
    let sid = hdr.stream_id;
    match hdr.frame_type {
        FRAME_DATA => {
            require_stream(hdr)?;
            let (data, pad) = strip_padding(payload, hdr.flags)?;
            Ok(Frame::Data {
                stream_id: sid,
                data,
                end_stream: hdr.has(FLAG_END_STREAM),
                pad,
            })
        }
        FRAME_HEADERS => {
            require_stream(hdr)?;
            let (body, pad) = strip_padding(payload, hdr.flags)?;
            let (priority, fragment) = if hdr.has(FLAG_PRIORITY) {
                if body.len() < 5 {
                    return Err(H2Error::frame_size("HEADERS too short for priority"));
                }
                (Some(read_priority(&body[..5])), &body[5..])
            } else {
                (None, body)
            };
            Ok(Frame::Headers {
                stream_id: sid,
                fragment,
                end_stream: hdr.has(FLAG_END_STREAM),
                end_headers: hdr.has(FLAG_END_HEADERS),
                priority,
                pad,
            })
        }
        FRAME_PRIORITY => {
            require_stream(hdr)?;
            if payload.len() != 5 {
                return Err(H2Error::stream(
                    sid,
                    ErrorCode::FrameSizeError,
                    "PRIORITY payload must be 5 bytes",
                ));
            }
            let priority = read_priority(payload);
            if priority.dependency == sid {
                return Err(H2Error::stream(
                    sid,
                    ErrorCode::ProtocolError,
                    "stream depends on itself",
                ));
            }
            Ok(Frame::Priority {
                stream_id: sid,
                priority,
            })
        }
        FRAME_RST_STREAM => {
            require_stream(hdr)?;
            if payload.len() != 4 {
                return Err(H2Error::frame_size("RST_STREAM payload must be 4 bytes"));
            }
            Ok(Frame::RstStream {
                stream_id: sid,
                error_code: ErrorCode::from_code(read_u32(payload)),
            })
        }
        FRAME_SETTINGS => {
            require_connection(hdr)?;
            let ack = hdr.has(FLAG_ACK);
            if ack && !payload.is_empty() {
                return Err(H2Error::frame_size("SETTINGS ACK with payload"));
            }
            if payload.len() % 6 != 0 {
                return Err(H2Error::frame_size("SETTINGS length not a multiple of 6"));
            }
            Ok(Frame::Settings {
                ack,
                params: SettingsParams::decode(payload)?,
            })
        }
        FRAME_PUSH_PROMISE => {
            require_stream(hdr)?;
            let (body, _) = strip_padding(payload, hdr.flags)?;
            if body.len() < 4 {
                return Err(H2Error::frame_size("PUSH_PROMISE too short"));
            }
            Ok(Frame::PushPromise {
                stream_id: sid,
                promised_id: read_u32(body) & MAX_WINDOW_SIZE,
                fragment: &body[4..],
                end_headers: hdr.has(FLAG_END_HEADERS),
            })
        }
        FRAME_PING => {
            require_connection(hdr)?;
            let data: [u8; 8] = payload
                .try_into()
                .map_err(|_| H2Error::frame_size("PING payload must be 8 bytes"))?;
            Ok(Frame::Ping {
                data,
                ack: hdr.has(FLAG_ACK),
            })
        }
        FRAME_GOAWAY => {
            require_connection(hdr)?;
            if payload.len() < 8 {
                return Err(H2Error::frame_size("GOAWAY payload shorter than 8 bytes"));
            }
            Ok(Frame::GoAway {
                last_stream_id: read_u32(payload) & MAX_WINDOW_SIZE,
                error_code: ErrorCode::from_code(read_u32(&payload[4..])),
                debug: &payload[8..],
            })
        }
        FRAME_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(H2Error::frame_size("WINDOW_UPDATE payload must be 4 bytes"));
            }
            let increment = read_u32(payload) & MAX_WINDOW_SIZE;
            if increment == 0 {
                return Err(if sid == 0 {
                    H2Error::protocol("WINDOW_UPDATE with zero increment")
                } else {
                    H2Error::stream(
                        sid,
                        ErrorCode::ProtocolError,
                        "WINDOW_UPDATE with zero increment",
                    )
                });
            }
            Ok(Frame::WindowUpdate {
                stream_id: sid,
                increment,
            })
        }
        FRAME_CONTINUATION => {
            require_stream(hdr)?;
            Ok(Frame::Continuation {
                stream_id: sid,
                fragment: payload,
                end_headers: hdr.has(FLAG_END_HEADERS),
            })
        }
        frame_type => Ok(Frame::Unknown {
            frame_type,
            stream_id: sid,
            flags: hdr.flags,
            payload,
        }),
    }
}

fn require_stream(hdr: &FrameHeader) -> Result<(), H2Error> {
    if hdr.stream_id == 0 {
        return Err(H2Error::protocol("frame type requires a stream id"));
    }
    Ok(())
}

fn require_connection(hdr: &FrameHeader) -> Result<(), H2Error> {
    if hdr.stream_id != 0 {
        return Err(H2Error::protocol("frame type must be sent on stream 0"));
    }
    Ok(())
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn read_priority(b: &[u8]) -> Priority {
    let raw = read_u32(b);
    Priority {
        exclusive: raw & 0x8000_0000 != 0,
        dependency: raw & MAX_WINDOW_SIZE,
        weight: b[4],
    }
}

/// Strip PADDED framing. The pad length must be smaller than the payload.
fn strip_padding(payload: &[u8], flags: u8) -> Result<(&[u8], Option<u8>), H2Error> {
    if flags & FLAG_PADDED == 0 {
        return Ok((payload, None));
    }
    let Some((&pad_len, rest)) = payload.split_first() else {
        return Err(H2Error::frame_size("PADDED frame without pad length"));
    };
    if usize::from(pad_len) >= payload.len() {
        return Err(H2Error::protocol("pad length exceeds payload"));
    }
    Ok((&rest[..rest.len() - usize::from(pad_len)], Some(pad_len)))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append a 9-byte frame header. The reserved bit is written as 0.
pub fn encode_frame_header(hdr: &FrameHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&hdr.length.to_be_bytes()[1..]);
    out.push(hdr.frame_type);
    out.push(hdr.flags);
    out.extend_from_slice(&(hdr.stream_id & MAX_WINDOW_SIZE).to_be_bytes());
}

fn header(out: &mut Vec<u8>, frame_type: u8, flags: u8, stream_id: u32, length: usize) {
    encode_frame_header(
        &FrameHeader {
            length: length as u32,
            frame_type,
            flags,
            stream_id,
        },
        out,
    );
}

fn flag(set: bool, bit: u8) -> u8 {
    if set { bit } else { 0 }
}

fn encode_priority(p: &Priority, out: &mut Vec<u8>) {
    let dep = (p.dependency & MAX_WINDOW_SIZE) | if p.exclusive { 0x8000_0000 } else { 0 };
    out.extend_from_slice(&dep.to_be_bytes());
    out.push(p.weight);
}

/// Append the wire form of `frame` to `out`. Returns the bytes written.
pub fn encode_frame(frame: &Frame<'_>, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    match frame {
        Frame::Data {
            stream_id,
            data,
            end_stream,
            pad,
        } => {
            let len = flow_controlled_len(data, *pad) as usize;
            let flags = flag(*end_stream, FLAG_END_STREAM) | flag(pad.is_some(), FLAG_PADDED);
            header(out, FRAME_DATA, flags, *stream_id, len);
            if let Some(p) = pad {
                out.push(*p);
            }
            out.extend_from_slice(data);
            out.resize(out.len() + pad.map_or(0, usize::from), 0);
        }
        Frame::Headers {
            stream_id,
            fragment,
            end_stream,
            end_headers,
            priority,
            pad,
        } => {
            let len = flow_controlled_len(fragment, *pad) as usize + priority.map_or(0, |_| 5);
            let flags = flag(*end_stream, FLAG_END_STREAM)
                | flag(*end_headers, FLAG_END_HEADERS)
                | flag(pad.is_some(), FLAG_PADDED)
                | flag(priority.is_some(), FLAG_PRIORITY);
            header(out, FRAME_HEADERS, flags, *stream_id, len);
            if let Some(p) = pad {
                out.push(*p);
            }
            if let Some(p) = priority {
                encode_priority(p, out);
            }
            out.extend_from_slice(fragment);
            out.resize(out.len() + pad.map_or(0, usize::from), 0);
        }
        Frame::Priority {
            stream_id,
            priority,
        } => {
            header(out, FRAME_PRIORITY, 0, *stream_id, 5);
            encode_priority(priority, out);
        }
        Frame::RstStream {
            stream_id,
            error_code,
        } => {
            header(out, FRAME_RST_STREAM, 0, *stream_id, 4);
            out.extend_from_slice(&error_code.to_code().to_be_bytes());
        }
        Frame::Settings { ack, params } => {
            let body = params.encode();
            header(out, FRAME_SETTINGS, flag(*ack, FLAG_ACK), 0, body.len());
            out.extend_from_slice(&body);
        }
        Frame::PushPromise {
            stream_id,
            promised_id,
            fragment,
            end_headers,
        } => {
            let flags = flag(*end_headers, FLAG_END_HEADERS);
            header(out, FRAME_PUSH_PROMISE, flags, *stream_id, 4 + fragment.len());
            out.extend_from_slice(&(promised_id & MAX_WINDOW_SIZE).to_be_bytes());
            out.extend_from_slice(fragment);
        }
        Frame::Ping { data, ack } => {
            header(out, FRAME_PING, flag(*ack, FLAG_ACK), 0, 8);
            out.extend_from_slice(data);
        }
        Frame::GoAway {
            last_stream_id,
            error_code,
            debug,
        } => {
            header(out, FRAME_GOAWAY, 0, 0, 8 + debug.len());
            out.extend_from_slice(&(last_stream_id & MAX_WINDOW_SIZE).to_be_bytes());
            out.extend_from_slice(&error_code.to_code().to_be_bytes());
            out.extend_from_slice(debug);
        }
        Frame::WindowUpdate {
            stream_id,
            increment,
        } => {
            header(out, FRAME_WINDOW_UPDATE, 0, *stream_id, 4);
            out.extend_from_slice(&(increment & MAX_WINDOW_SIZE).to_be_bytes());
        }
        Frame::Continuation {
            stream_id,
            fragment,
            end_headers,
        } => {
            let flags = flag(*end_headers, FLAG_END_HEADERS);
            header(out, FRAME_CONTINUATION, flags, *stream_id, fragment.len());
            out.extend_from_slice(fragment);
        }
        Frame::Unknown {
            frame_type,
            stream_id,
            flags,
            payload,
        } => {
            header(out, *frame_type, *flags, *stream_id, payload.len());
            out.extend_from_slice(payload);
        }
    }
    out.len() - start
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
