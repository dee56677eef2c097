//! HTTP/2 stream state machine (RFC 9113 §5.1) and request validation
//! (RFC 9113 §8.1.1, §8.3.1).

use alloc::vec::Vec;

use crate::error::{Error, ErrorCode, H2Error};
use crate::http::{FieldBlock, HeaderName, Method};

use super::flow_control::{FlowController, IncomingFlowController};

/// HTTP/2 stream states (RFC 9113 §5.1). The reserved states only exist
/// for server push, which this server never initiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H2StreamState {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Request pseudo-headers and framing facts pulled out of the first field
/// block of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    /// Absent only for CONNECT.
    pub scheme: Option<Vec<u8>>,
    /// Absent only for CONNECT.
    pub path: Option<Vec<u8>>,
    /// `:authority`, falling back to `host`.
    pub authority: Option<Vec<u8>>,
    pub content_length: Option<u64>,
}

/// An HTTP/2 stream.
#[derive(Debug)]
pub struct H2Stream {
    pub id: u32,
    pub state: H2StreamState,
    /// Credit the peer granted us for response DATA.
    pub send_flow: FlowController,
    /// Credit we granted the peer for request DATA.
    pub recv_flow: IncomingFlowController,
    pub request: Option<RequestHead>,
    body_received: u64,
    /// Set once either side sends RST_STREAM.
    pub reset_code: Option<ErrorCode>,
    /// Response HEADERS (non-informational) have been sent.
    pub response_started: bool,
    /// A send was cut short by flow control; emit `Writable` on new credit.
    pub send_blocked: bool,
}

impl H2Stream {
    pub fn new(id: u32, initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            id,
            state: H2StreamState::Idle,
            send_flow: FlowController::new(id, initial_send_window),
            recv_flow: IncomingFlowController::new(id, initial_recv_window),
            request: None,
            body_received: 0,
            reset_code: None,
            response_started: false,
            send_blocked: false,
        }
    }

    /// A complete field block arrived from the peer.
    ///
    /// The first block opens the stream. A later block is trailers and must
    /// end the stream.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<(), H2Error> {
        match self.state {
            H2StreamState::Idle => {
                self.state = H2StreamState::Open;
            }
            H2StreamState::Open | H2StreamState::HalfClosedLocal => {
                if !end_stream {
                    return Err(self.error(ErrorCode::ProtocolError, "trailers without END_STREAM"));
                }
            }
            H2StreamState::HalfClosedRemote | H2StreamState::Closed => {
                return Err(self.error(ErrorCode::StreamClosed, "HEADERS after END_STREAM"));
            }
        }
        if end_stream {
            self.recv_end_stream()?;
        }
        Ok(())
    }

    /// DATA arrived. `len` excludes padding.
    pub fn recv_data(&mut self, len: usize, end_stream: bool) -> Result<(), H2Error> {
        if !self.can_recv() {
            return Err(self.error(ErrorCode::StreamClosed, "DATA on closed stream"));
        }
        self.body_received += len as u64;
        if let Some(expected) = self.content_length() {
            if self.body_received > expected {
                return Err(self.error(ErrorCode::ProtocolError, "body longer than content-length"));
            }
        }
        if end_stream {
            self.recv_end_stream()?;
        }
        Ok(())
    }

    fn recv_end_stream(&mut self) -> Result<(), H2Error> {
        if let Some(expected) = self.content_length() {
            if self.body_received != expected {
                return Err(self.error(ErrorCode::ProtocolError, "body shorter than content-length"));
            }
        }
        self.state = match self.state {
            H2StreamState::HalfClosedLocal => H2StreamState::Closed,
            _ => H2StreamState::HalfClosedRemote,
        };
        Ok(())
    }

    /// Check that we may send a frame on this stream.
    pub fn check_send(&self) -> Result<(), Error> {
        if let Some(code) = self.reset_code {
            return Err(Error::StreamReset(code));
        }
        if !self.can_send() {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    /// Process an END_STREAM flag sent by us.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            H2StreamState::Open => H2StreamState::HalfClosedLocal,
            _ => H2StreamState::Closed,
        };
    }

    /// Whether the stream can receive data.
    pub fn can_recv(&self) -> bool {
        matches!(self.state, H2StreamState::Open | H2StreamState::HalfClosedLocal)
    }

    /// Whether the stream can send data.
    pub fn can_send(&self) -> bool {
        matches!(self.state, H2StreamState::Open | H2StreamState::HalfClosedRemote)
    }

    pub fn is_closed(&self) -> bool {
        self.state == H2StreamState::Closed
    }

    /// Reset this stream to Closed.
    pub fn reset(&mut self, code: ErrorCode) {
        self.state = H2StreamState::Closed;
        self.reset_code.get_or_insert(code);
    }

    /// Request body bytes received so far.
    pub fn body_received(&self) -> u64 {
        self.body_received
    }

    fn content_length(&self) -> Option<u64> {
        self.request.as_ref().and_then(|r| r.content_length)
    }

    fn error(&self, code: ErrorCode, message: &'static str) -> H2Error {
        H2Error::stream(self.id, code, message)
    }
}

/// Validate a request field block and extract its pseudo-headers.
///
/// Every failure is a stream PROTOCOL_ERROR.
pub fn validate_request(stream_id: u32, block: &FieldBlock) -> Result<RequestHead, H2Error> {
    let err = |message: &'static str| H2Error::stream(stream_id, ErrorCode::ProtocolError, message);

    let mut method = None;
    let mut scheme = None;
    let mut path = None;
    let mut authority = None;
    let mut host = None;
    let mut content_length: Option<u64> = None;
    let mut seen_regular = false;

    for line in block {
        if !line.name.is_valid_lowercase() {
            return Err(err("invalid header name"));
        }
        if line.name.is_pseudo() {
            if seen_regular {
                return Err(err("pseudo-header after regular header"));
            }
            let slot = match line.name {
                HeaderName::Method => &mut method,
                HeaderName::Scheme => &mut scheme,
                HeaderName::Path => &mut path,
                HeaderName::Authority => &mut authority,
                HeaderName::Status => return Err(err("response pseudo-header in request")),
                _ => return Err(err("unknown pseudo-header")),
            };
            if slot.replace(line.value.clone()).is_some() {
                return Err(err("duplicate pseudo-header"));
            }
            continue;
        }

        seen_regular = true;
        match &line.name {
            name if name.is_connection_specific() => {
                return Err(err("connection-specific header"));
            }
            HeaderName::Te if line.value != b"trailers" => {
                return Err(err("te other than trailers"));
            }
            HeaderName::Host => {
                if host.replace(line.value.clone()).is_some() {
                    return Err(err("duplicate host"));
                }
            }
            HeaderName::ContentLength => {
                let len = parse_content_length(&line.value).ok_or_else(|| err("content-length invalid"))?;
                if content_length.is_some_and(|cl| cl != len) {
                    return Err(err("multiple content-length lines"));
                }
                content_length = Some(len);
            }
            _ => {}
        }
    }

    let method = method.ok_or_else(|| err("missing required pseudo header"))?;
    let method = Method::from_bytes(&method).ok_or_else(|| err("invalid method"))?;
    if method == Method::CONNECT {
        if scheme.is_some() || path.is_some() || authority.is_none() {
            return Err(err("malformed CONNECT request"));
        }
    } else if scheme.is_none() || path.as_deref().is_none_or(<[u8]>::is_empty) {
        return Err(err("missing required pseudo header"));
    }

    Ok(RequestHead {
        method,
        scheme,
        path,
        authority: authority.or(host),
        content_length,
    })
}

/// Trailers carry no pseudo-headers and obey the same name rules.
pub fn validate_trailers(stream_id: u32, block: &FieldBlock) -> Result<(), H2Error> {
    for line in block {
        if line.name.is_pseudo() || !line.name.is_valid_lowercase() || line.name.is_connection_specific() {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "invalid trailer field",
            ));
        }
    }
    Ok(())
}

fn parse_content_length(value: &[u8]) -> Option<u64> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return None;
    }
    value
        .iter()
        .try_fold(0u64, |acc, &d| acc.checked_mul(10)?.checked_add(u64::from(d - b'0')))
}
