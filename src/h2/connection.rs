//! HTTP/2 server connection state machine (RFC 9113).
//!
//! Pure codec following the sans-IO pattern:
//! `feed_data()` → `poll_output()` → `poll_event()`
//!
//! The connection owns the stream table, both HPACK directions, both
//! connection-level flow control windows and the negotiated settings.
//! Frames are processed strictly in arrival order. A connection error
//! queues GOAWAY and closes the connection; a stream error queues
//! RST_STREAM and leaves every other stream running.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use tracing::{debug, info, trace, warn};

use super::config::{H2Config, UnknownFramePolicy};
use super::flow_control::{
    Credit, DEFAULT_CONNECTION_WINDOW_SIZE, FlowController, IncomingFlowController, withdraw_both,
};
use super::frame::{
    FRAME_CONTINUATION, FRAME_HEADER_LEN, FRAME_SETTINGS, FLAG_ACK, Frame, Priority,
    decode_frame_header, decode_frame_payload, encode_frame, flow_controlled_len,
};
use super::settings::{H2Settings, MAX_WINDOW_SIZE, SettingsParams};
use super::stream::{H2Stream, H2StreamState, RequestHead, validate_request, validate_trailers};
use crate::error::{Error, ErrorCode, H2Error};
use crate::hpack::table::DEFAULT_TABLE_SIZE;
use crate::hpack::{HpackDecoder, HpackEncoder};
use crate::http::{FieldBlock, FieldLine, HeaderName};

/// HTTP/2 connection preface (RFC 9113 §3.4).
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Number of reset stream ids remembered for STREAM_CLOSED handling.
const RECENTLY_RESET: usize = 32;

/// Events produced by the HTTP/2 connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H2Event {
    /// Connection settings exchanged, ready for requests.
    Connected,
    /// A complete field block arrived: the request head, or trailers when
    /// the stream already delivered one.
    Headers {
        stream_id: u32,
        fields: FieldBlock,
        end_stream: bool,
    },
    /// Request body bytes. Release them with `release_capacity` once consumed.
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
    },
    /// Peer reset a stream.
    StreamReset {
        stream_id: u32,
        error_code: ErrorCode,
    },
    /// Stream left the table: both sides ended it (`success`), or it was
    /// reset, refused mid-flight or cut off by connection shutdown.
    StreamComplete {
        stream_id: u32,
        success: bool,
    },
    /// Peer sent GOAWAY.
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
    },
    /// A stream that hit flow control can send again.
    Writable(u32),
    /// A timeout fired (idle or header timeout).
    Timeout,
}

/// Request counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub invalid_requests: u64,
    pub refused_streams: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum H2ConnState {
    /// Waiting for the client connection preface.
    WaitingPreface,
    /// Preface seen; the next frame must be SETTINGS.
    WaitingSettings,
    /// Connection is active.
    Active,
    /// Final GOAWAY queued or peer finished; nothing more is read.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shutdown {
    Running,
    /// Warning GOAWAY sent; in-flight streams may finish.
    Draining { deadline: Option<u64> },
}

/// A HEADERS block waiting for its CONTINUATION frames.
#[derive(Debug)]
struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    priority: Option<Priority>,
    block: Vec<u8>,
}

/// HTTP/2 server connection.
pub struct H2Connection {
    config: H2Config,
    state: H2ConnState,
    /// Settings we advertise. Limits that protect us apply immediately.
    local_settings: H2Settings,
    /// Our SETTINGS has been acknowledged by the peer.
    local_settings_acked: bool,
    peer_settings: H2Settings,
    streams: BTreeMap<u32, H2Stream>,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    // I/O accumulation
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
    send_offset: usize,
    // Flow control
    conn_send_flow: FlowController,
    conn_recv_flow: IncomingFlowController,
    events: VecDeque<H2Event>,
    /// Highest client stream id admitted; also the GOAWAY last-stream-id.
    highest_stream_id: u32,
    highest_completed_stream_id: u32,
    /// Refused and reset ids with their codes, oldest first.
    recently_reset: heapless::Deque<(u32, ErrorCode), RECENTLY_RESET>,
    continuation: Option<PendingHeaders>,
    preface_sent: bool,
    preface_bytes_seen: usize,
    shutdown: Shutdown,
    peer_goaway: Option<u32>,
    stats: ConnectionStats,
    // Timeout support
    last_activity: u64,
    connection_start: u64,
}

impl Default for H2Connection {
    fn default() -> Self {
        Self::new(H2Config::default())
    }
}

impl H2Connection {
    /// Create a server-side connection.
    pub fn new(config: H2Config) -> Self {
        let local_settings = config.settings;
        let decoder_table = (local_settings.header_table_size as usize).max(DEFAULT_TABLE_SIZE);
        let mut decoder = HpackDecoder::new(decoder_table);
        decoder.set_max_header_list_size(local_settings.max_header_list_size as usize);
        Self {
            config,
            state: H2ConnState::WaitingPreface,
            local_settings,
            local_settings_acked: false,
            peer_settings: H2Settings::RFC_DEFAULTS,
            streams: BTreeMap::new(),
            encoder: HpackEncoder::new(DEFAULT_TABLE_SIZE),
            decoder,
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
            send_offset: 0,
            conn_send_flow: FlowController::new(0, DEFAULT_CONNECTION_WINDOW_SIZE as u32),
            conn_recv_flow: IncomingFlowController::new(0, DEFAULT_CONNECTION_WINDOW_SIZE as u32),
            events: VecDeque::new(),
            highest_stream_id: 0,
            highest_completed_stream_id: 0,
            recently_reset: heapless::Deque::new(),
            continuation: None,
            preface_sent: false,
            preface_bytes_seen: 0,
            shutdown: Shutdown::Running,
            peer_goaway: None,
            stats: ConnectionStats::default(),
            last_activity: 0,
            connection_start: 0,
        }
    }

    /// Feed received TCP data into the connection.
    ///
    /// A connection error is returned after its GOAWAY has been queued;
    /// keep draining `poll_output` before closing the transport.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), Error> {
        // Server SETTINGS must be the first frame sent (RFC 9113 §3.4).
        self.generate_output();
        if self.state == H2ConnState::Closed {
            return Err(Error::Closed);
        }
        self.stats.bytes_received += data.len() as u64;
        self.recv_buf.extend_from_slice(data);

        match self.process_recv() {
            Ok(()) => {
                self.check_shutdown_progress();
                Ok(())
            }
            Err(err) => {
                self.fail_connection(&err);
                Err(Error::Http2(err))
            }
        }
    }

    /// Pull the next chunk of outgoing data.
    ///
    /// Returns `Some(slice)` with data to send, or `None` if nothing pending.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Option<&'a [u8]> {
        self.generate_output();

        if self.send_offset >= self.send_buf.len() {
            return None;
        }

        let avail = self.send_buf.len() - self.send_offset;
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.send_buf[self.send_offset..self.send_offset + n]);
        self.send_offset += n;
        self.stats.bytes_sent += n as u64;

        // If we've consumed everything, clear the buffer
        if self.send_offset >= self.send_buf.len() {
            self.send_buf.clear();
            self.send_offset = 0;
        }

        Some(&buf[..n])
    }

    /// Poll for the next event.
    pub fn poll_event(&mut self) -> Option<H2Event> {
        self.events.pop_front()
    }

    // ------------------------------------------------------------------
    // Application API
    // ------------------------------------------------------------------

    /// Send a field block (response head, informational head or trailers).
    ///
    /// The block is split into HEADERS + CONTINUATION frames by the peer's
    /// SETTINGS_MAX_FRAME_SIZE.
    pub fn send_headers(
        &mut self,
        stream_id: u32,
        fields: &FieldBlock,
        end_stream: bool,
    ) -> Result<(), Error> {
        self.check_open()?;
        let stream = self
            .streams
            .get(&stream_id)
            .ok_or_else(|| self.missing_stream(stream_id))?;
        stream.check_send()?;

        let informational = fields
            .get(&HeaderName::Status)
            .is_some_and(|status| status.first() == Some(&b'1'));
        if informational && end_stream {
            return Err(Error::InvalidState);
        }

        let fields: FieldBlock = fields
            .iter()
            .map(|line| FieldLine {
                name: line.name.to_lowercase(),
                ..line.clone()
            })
            .collect();
        let mut block = Vec::new();
        self.encoder.encode(&fields, &mut block);
        self.write_header_block(stream_id, &block, end_stream);

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if !informational {
                stream.response_started = true;
            }
            if end_stream {
                stream.send_end_stream();
            }
        }
        debug!(stream_id, end_stream, len = block.len(), "sent HEADERS");
        self.maybe_complete(stream_id);
        Ok(())
    }

    /// Send trailers, ending the stream. A response head must already be sent.
    pub fn send_trailers(&mut self, stream_id: u32, fields: &FieldBlock) -> Result<(), Error> {
        let started = self
            .streams
            .get(&stream_id)
            .ok_or_else(|| self.missing_stream(stream_id))?
            .response_started;
        if !started {
            return Err(Error::InvalidState);
        }
        self.send_headers(stream_id, fields, true)
    }

    /// Send response body bytes.
    ///
    /// Sends as much as both outgoing windows allow and returns the byte
    /// count. `end_stream` only takes effect if everything was sent. With no
    /// credit at all this is `WouldBlock`, and `H2Event::Writable` follows
    /// once the peer grants more.
    pub fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> Result<usize, Error> {
        self.check_open()?;
        if !self.streams.contains_key(&stream_id) {
            return Err(self.missing_stream(stream_id));
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(Error::UnknownStream(stream_id));
        };
        stream.check_send()?;

        let window = self
            .conn_send_flow
            .available()
            .min(stream.send_flow.available()) as usize;
        let n = data.len().min(window);
        if n == 0 && !data.is_empty() {
            stream.send_blocked = true;
            trace!(stream_id, "send blocked by flow control");
            return Err(Error::WouldBlock);
        }
        if !withdraw_both(&mut self.conn_send_flow, &mut stream.send_flow, n as u32) {
            return Err(Error::WouldBlock);
        }
        let fin = end_stream && n == data.len();
        stream.send_blocked = n < data.len();
        if fin {
            stream.send_end_stream();
        }

        let max_frame = self.peer_settings.max_frame_size as usize;
        let mut rest = &data[..n];
        loop {
            let (chunk, tail) = rest.split_at(rest.len().min(max_frame));
            rest = tail;
            self.queue_frame(&Frame::Data {
                stream_id,
                data: chunk,
                end_stream: fin && rest.is_empty(),
                pad: None,
            });
            if rest.is_empty() {
                break;
            }
        }
        trace!(stream_id, len = n, end_stream = fin, "sent DATA");
        self.maybe_complete(stream_id);
        Ok(n)
    }

    /// Hand `n` consumed request-body bytes back to the peer.
    ///
    /// WINDOW_UPDATE frames are batched until half a window is pending.
    pub fn release_capacity(&mut self, stream_id: u32, n: u32) -> Result<(), Error> {
        if let Some(increment) = self.conn_recv_flow.increment_credit(n)? {
            self.queue_window_update(0, increment);
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if stream.can_recv() {
                if let Some(increment) = stream.recv_flow.increment_credit(n)? {
                    self.queue_window_update(stream_id, increment);
                }
            }
        }
        Ok(())
    }

    /// Fail a stream with RST_STREAM, e.g. INTERNAL_ERROR after a handler
    /// failure.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), Error> {
        if !self.streams.contains_key(&stream_id) {
            return Err(self.missing_stream(stream_id));
        }
        self.reset_stream_inner(stream_id, error_code, false);
        self.check_shutdown_progress();
        Ok(())
    }

    /// Start a graceful shutdown.
    ///
    /// Sends GOAWAY(2^31-1, NO_ERROR) now. Once every in-flight stream is
    /// done, or the configured grace period has passed, the final GOAWAY
    /// names the highest completed stream and the connection closes.
    pub fn begin_shutdown(&mut self, now: u64) {
        self.generate_output();
        if self.state == H2ConnState::Closed || self.shutdown != Shutdown::Running {
            return;
        }
        self.queue_goaway(MAX_WINDOW_SIZE, ErrorCode::NoError, b"");
        let deadline = self.config.shutdown_grace_us.map(|grace| now.saturating_add(grace));
        self.shutdown = Shutdown::Draining { deadline };
        info!(in_flight = self.streams.len(), "graceful shutdown started");
        self.check_shutdown_progress();
    }

    /// Send GOAWAY with `error_code` and close immediately.
    pub fn send_goaway(&mut self, error_code: ErrorCode) {
        self.generate_output();
        if self.state == H2ConnState::Closed {
            return;
        }
        self.queue_goaway(self.highest_stream_id, error_code, b"");
        self.close_all_streams();
        self.state = H2ConnState::Closed;
    }

    /// Request head parsed from the stream's first field block.
    pub fn request_head(&self, stream_id: u32) -> Option<&RequestHead> {
        self.streams.get(&stream_id)?.request.as_ref()
    }

    /// Whether a final (non-1xx) response head has gone out on the stream.
    pub fn response_started(&self, stream_id: u32) -> Option<bool> {
        self.streams.get(&stream_id).map(|s| s.response_started)
    }

    pub fn stream_state(&self, stream_id: u32) -> Option<H2StreamState> {
        self.streams.get(&stream_id).map(|s| s.state)
    }

    /// Response bytes that could be sent on the stream right now.
    pub fn send_capacity(&self, stream_id: u32) -> Option<u32> {
        let stream = self.streams.get(&stream_id)?;
        Some(self.conn_send_flow.available().min(stream.send_flow.available()))
    }

    /// Streams currently counted against SETTINGS_MAX_CONCURRENT_STREAMS.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn local_settings(&self) -> &H2Settings {
        &self.local_settings
    }

    pub fn peer_settings(&self) -> &H2Settings {
        &self.peer_settings
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn config(&self) -> &H2Config {
        &self.config
    }

    // ------------------------------------------------------------------
    // Internal: output generation
    // ------------------------------------------------------------------

    fn generate_output(&mut self) {
        if self.preface_sent {
            return;
        }
        self.preface_sent = true;
        self.queue_frame(&Frame::Settings {
            ack: false,
            params: self.local_settings.to_params(),
        });
        // The connection window starts at 65535 whatever SETTINGS says.
        if let Some(increment) = self.conn_recv_flow.grow_to(self.local_settings.initial_window_size) {
            self.queue_window_update(0, increment);
        }
    }

    fn queue_frame(&mut self, frame: &Frame<'_>) {
        encode_frame(frame, &mut self.send_buf);
    }

    fn queue_window_update(&mut self, stream_id: u32, increment: u32) {
        trace!(stream_id, increment, "sending WINDOW_UPDATE");
        self.queue_frame(&Frame::WindowUpdate { stream_id, increment });
    }

    fn queue_goaway(&mut self, last_stream_id: u32, error_code: ErrorCode, debug: &[u8]) {
        debug!(last_stream_id, %error_code, "sending GOAWAY");
        self.queue_frame(&Frame::GoAway {
            last_stream_id,
            error_code,
            debug,
        });
    }

    fn write_header_block(&mut self, stream_id: u32, block: &[u8], end_stream: bool) {
        let max_frame = self.peer_settings.max_frame_size as usize;
        let (first, mut rest) = block.split_at(block.len().min(max_frame));
        self.queue_frame(&Frame::Headers {
            stream_id,
            fragment: first,
            end_stream,
            end_headers: rest.is_empty(),
            priority: None,
            pad: None,
        });
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(max_frame));
            rest = tail;
            self.queue_frame(&Frame::Continuation {
                stream_id,
                fragment: chunk,
                end_headers: rest.is_empty(),
            });
        }
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.state == H2ConnState::Closed {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal: receive processing
    // ------------------------------------------------------------------

    fn process_recv(&mut self) -> Result<(), H2Error> {
        if self.state == H2ConnState::WaitingPreface {
            self.validate_client_preface()?;
            if self.state == H2ConnState::WaitingPreface {
                return Ok(()); // Need more data
            }
        }

        // Frames borrow from the receive buffer while handlers mutate the
        // rest of the connection.
        let buf = core::mem::take(&mut self.recv_buf);
        let mut consumed = 0;
        let result = self.process_frames(&buf, &mut consumed);
        self.recv_buf = buf;
        self.recv_buf.drain(..consumed);
        result
    }

    fn process_frames(&mut self, buf: &[u8], consumed: &mut usize) -> Result<(), H2Error> {
        while self.state != H2ConnState::Closed {
            let rest = &buf[*consumed..];
            let Ok(hdr) = decode_frame_header(rest) else {
                break; // Need at least a frame header
            };
            hdr.check_length(self.local_settings.max_frame_size)?;

            // RFC 9113 §4.3: while a header block is open only CONTINUATION
            // for the same stream may arrive.
            if let Some(pending) = &self.continuation {
                if hdr.frame_type != FRAME_CONTINUATION || hdr.stream_id != pending.stream_id {
                    return Err(H2Error::protocol("expected CONTINUATION"));
                }
            }
            if self.state == H2ConnState::WaitingSettings
                && (hdr.frame_type != FRAME_SETTINGS || hdr.flags & FLAG_ACK != 0)
            {
                return Err(H2Error::protocol("first frame after preface must be SETTINGS"));
            }

            let total = FRAME_HEADER_LEN + hdr.length as usize;
            if rest.len() < total {
                break; // Incomplete frame
            }
            *consumed += total;

            let result = decode_frame_payload(&hdr, &rest[FRAME_HEADER_LEN..total])
                .and_then(|frame| self.handle_frame(frame));
            match result {
                Ok(()) => {}
                Err(err) if err.is_connection() => return Err(err),
                Err(err) => self.stream_error(err),
            }
        }
        Ok(())
    }

    fn validate_client_preface(&mut self) -> Result<(), H2Error> {
        let remaining_preface = &CONNECTION_PREFACE[self.preface_bytes_seen..];
        let check_len = remaining_preface.len().min(self.recv_buf.len());

        if self.recv_buf[..check_len] != remaining_preface[..check_len] {
            return Err(H2Error::protocol("invalid connection preface"));
        }

        self.preface_bytes_seen += check_len;
        self.recv_buf.drain(..check_len);

        if self.preface_bytes_seen == CONNECTION_PREFACE.len() {
            trace!("client preface received");
            self.state = H2ConnState::WaitingSettings;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame<'_>) -> Result<(), H2Error> {
        trace!(frame_type = frame.kind(), stream_id = frame.stream_id(), "received frame");
        match frame {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                pad,
            } => self.handle_data(stream_id, data, end_stream, pad),
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                priority,
                ..
            } => {
                if end_headers {
                    return self.handle_header_block(stream_id, fragment, end_stream, priority);
                }
                self.check_header_block_size(fragment.len())?;
                self.continuation = Some(PendingHeaders {
                    stream_id,
                    end_stream,
                    priority,
                    block: fragment.to_vec(),
                });
                Ok(())
            }
            Frame::Continuation {
                fragment,
                end_headers,
                ..
            } => {
                let Some(mut pending) = self.continuation.take() else {
                    return Err(H2Error::protocol("CONTINUATION without HEADERS"));
                };
                self.check_header_block_size(pending.block.len() + fragment.len())?;
                pending.block.extend_from_slice(fragment);
                if !end_headers {
                    self.continuation = Some(pending);
                    return Ok(());
                }
                self.handle_header_block(
                    pending.stream_id,
                    &pending.block,
                    pending.end_stream,
                    pending.priority,
                )
            }
            // Prioritization is not implemented.
            Frame::Priority { .. } => Ok(()),
            Frame::RstStream {
                stream_id,
                error_code,
            } => self.handle_rst_stream(stream_id, error_code),
            Frame::Settings { ack, params } => self.handle_settings(ack, &params),
            Frame::PushPromise { .. } => Err(H2Error::protocol("PUSH_PROMISE from client")),
            Frame::Ping { data, ack } => {
                if !ack {
                    self.queue_frame(&Frame::Ping { data, ack: true });
                }
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug: debug_data,
            } => {
                info!(
                    last_stream_id,
                    %error_code,
                    reason = %String::from_utf8_lossy(debug_data),
                    "peer sent GOAWAY"
                );
                self.peer_goaway = Some(last_stream_id);
                self.events.push_back(H2Event::GoAway {
                    last_stream_id,
                    error_code,
                });
                Ok(())
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.handle_window_update(stream_id, increment),
            Frame::Unknown {
                frame_type,
                stream_id,
                ..
            } => {
                if self.config.unknown_frame_policy == UnknownFramePolicy::RejectOnIdleStream
                    && stream_id != 0
                    && self.is_idle(stream_id)
                {
                    return Err(H2Error::protocol("unknown frame on idle stream"));
                }
                trace!(frame_type, stream_id, "ignoring unknown frame");
                Ok(())
            }
        }
    }

    fn check_header_block_size(&self, len: usize) -> Result<(), H2Error> {
        if len > self.config.max_header_block_size {
            return Err(H2Error::connection(
                ErrorCode::EnhanceYourCalm,
                "header block too large",
            ));
        }
        Ok(())
    }

    /// Never opened and not a refused or reset id we still remember.
    fn is_idle(&self, stream_id: u32) -> bool {
        stream_id > self.highest_stream_id
            && !self.streams.contains_key(&stream_id)
            && !self.was_reset(stream_id)
    }

    fn was_reset(&self, stream_id: u32) -> bool {
        self.reset_code(stream_id).is_some()
    }

    fn reset_code(&self, stream_id: u32) -> Option<ErrorCode> {
        self.recently_reset
            .iter()
            .find(|(id, _)| *id == stream_id)
            .map(|&(_, code)| code)
    }

    /// Error for an application call naming a stream not in the table.
    fn missing_stream(&self, stream_id: u32) -> Error {
        match self.reset_code(stream_id) {
            Some(code) => Error::StreamReset(code),
            None => Error::UnknownStream(stream_id),
        }
    }

    fn handle_header_block(
        &mut self,
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
        priority: Option<Priority>,
    ) -> Result<(), H2Error> {
        // Decode first, whatever happens to the stream, so the table stays
        // in step with the peer's encoder.
        let fields = match self.decoder.decode(block) {
            Ok(fields) => Ok(fields),
            Err(err) if err.is_connection() => return Err(err),
            Err(err) => Err(err.on_stream(stream_id)),
        };
        let self_dependent = priority.is_some_and(|p| p.dependency == stream_id);

        if let Some(stream) = self.streams.get_mut(&stream_id) {
            let fields = fields?;
            stream.recv_headers(end_stream)?;
            if self.config.validate_requests {
                validate_trailers(stream_id, &fields)?;
            }
            debug!(stream_id, "received trailers");
            self.events.push_back(H2Event::Headers {
                stream_id,
                fields,
                end_stream,
            });
            self.maybe_complete(stream_id);
            return Ok(());
        }

        if stream_id <= self.highest_stream_id {
            if self.was_reset(stream_id) {
                return Err(H2Error::stream(stream_id, ErrorCode::StreamClosed, "HEADERS on reset stream"));
            }
            return Err(H2Error::protocol("stream id reused or decreasing"));
        }
        if stream_id % 2 == 0 {
            return Err(H2Error::protocol("client stream id must be odd"));
        }

        if self.shutdown != Shutdown::Running || self.peer_goaway.is_some() {
            debug!(stream_id, "refusing stream during shutdown");
            return self.refuse_stream(stream_id);
        }
        if self.streams.len() >= self.local_settings.max_concurrent_streams as usize {
            debug!(stream_id, limit = self.local_settings.max_concurrent_streams, "refusing stream over concurrency limit");
            return self.refuse_stream(stream_id);
        }

        // Admitted: the id is consumed whether or not the request is valid.
        self.highest_stream_id = stream_id;
        let fields = fields?;
        if self_dependent {
            return Err(H2Error::stream(stream_id, ErrorCode::ProtocolError, "stream depends on itself"));
        }

        let request = if self.config.validate_requests {
            match validate_request(stream_id, &fields) {
                Ok(head) => Some(head),
                Err(err) => {
                    self.stats.invalid_requests += 1;
                    return Err(err);
                }
            }
        } else {
            None
        };

        let mut stream = H2Stream::new(
            stream_id,
            self.peer_settings.initial_window_size,
            self.recv_initial_window(),
        );
        stream.request = request;
        if let Err(err) = stream.recv_headers(end_stream) {
            self.stats.invalid_requests += 1;
            return Err(err);
        }
        self.streams.insert(stream_id, stream);
        debug!(stream_id, end_stream, fields = fields.len(), "stream opened");
        self.events.push_back(H2Event::Headers {
            stream_id,
            fields,
            end_stream,
        });
        Ok(())
    }

    fn refuse_stream(&mut self, stream_id: u32) -> Result<(), H2Error> {
        self.stats.refused_streams += 1;
        self.queue_frame(&Frame::RstStream {
            stream_id,
            error_code: ErrorCode::RefusedStream,
        });
        self.remember_reset(stream_id, ErrorCode::RefusedStream);
        Ok(())
    }

    /// Initial receive window for a new stream. Until the peer acknowledges
    /// our SETTINGS it may still assume the RFC default.
    fn recv_initial_window(&self) -> u32 {
        let local = self.local_settings.initial_window_size;
        if self.local_settings_acked {
            local
        } else {
            local.max(H2Settings::RFC_DEFAULTS.initial_window_size)
        }
    }

    fn handle_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        pad: Option<u8>,
    ) -> Result<(), H2Error> {
        let len = flow_controlled_len(data, pad);
        if !self.conn_recv_flow.withdraw_if_can(len) {
            return Err(H2Error::flow_control("DATA exceeds connection window"));
        }

        let result = self.deliver_data(stream_id, data, end_stream, len);
        if result.is_err() {
            // The stream will never release these bytes.
            self.refund_connection(len)?;
        }
        result
    }

    fn deliver_data(
        &mut self,
        stream_id: u32,
        data: &[u8],
        end_stream: bool,
        len: u32,
    ) -> Result<(), H2Error> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            if self.is_idle(stream_id) {
                return Err(H2Error::protocol("DATA on idle stream"));
            }
            return Err(H2Error::stream(stream_id, ErrorCode::StreamClosed, "DATA on closed stream"));
        };
        if !stream.recv_flow.withdraw_if_can(len) {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::FlowControlError,
                "DATA exceeds stream window",
            ));
        }
        stream.recv_data(data.len(), end_stream)?;

        // Padding is consumed on arrival.
        let padding = len - data.len() as u32;
        if padding > 0 {
            if let Some(increment) = stream.recv_flow.increment_credit(padding)? {
                self.queue_window_update(stream_id, increment);
            }
            self.refund_connection(padding)?;
        }

        trace!(stream_id, len = data.len(), end_stream, "received DATA");
        if !data.is_empty() || end_stream {
            self.events.push_back(H2Event::Data {
                stream_id,
                data: data.to_vec(),
                end_stream,
            });
        }
        self.maybe_complete(stream_id);
        Ok(())
    }

    fn refund_connection(&mut self, n: u32) -> Result<(), H2Error> {
        if let Some(increment) = self.conn_recv_flow.increment_credit(n)? {
            self.queue_window_update(0, increment);
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), H2Error> {
        if self.streams.contains_key(&stream_id) {
            debug!(stream_id, %error_code, "peer reset stream");
            self.reset_stream_inner(stream_id, error_code, true);
            return Ok(());
        }
        if self.is_idle(stream_id) {
            return Err(H2Error::protocol("RST_STREAM on idle stream"));
        }
        Ok(())
    }

    fn handle_settings(&mut self, ack: bool, params: &SettingsParams) -> Result<(), H2Error> {
        if ack {
            if !self.local_settings_acked {
                self.apply_local_settings_ack()?;
            }
            return Ok(());
        }

        let old = self.peer_settings;
        self.peer_settings.merge(params);
        debug!(?params, "peer SETTINGS");

        if params.header_table_size.is_some() {
            self.encoder
                .set_max_table_size(self.peer_settings.header_table_size as usize);
        }
        let new_window = self.peer_settings.initial_window_size;
        if new_window != old.initial_window_size {
            for stream in self.streams.values_mut() {
                stream
                    .send_flow
                    .apply_settings_change(old.initial_window_size, new_window)?;
            }
            if new_window > old.initial_window_size {
                self.notify_writable();
            }
        }

        self.queue_frame(&Frame::Settings {
            ack: true,
            params: SettingsParams::default(),
        });
        if self.state == H2ConnState::WaitingSettings {
            self.state = H2ConnState::Active;
            debug!("connection established");
            self.events.push_back(H2Event::Connected);
        }
        Ok(())
    }

    fn apply_local_settings_ack(&mut self) -> Result<(), H2Error> {
        let before = self.recv_initial_window();
        self.local_settings_acked = true;
        let after = self.recv_initial_window();
        if before != after {
            for stream in self.streams.values_mut() {
                stream.recv_flow.apply_settings_change(before, after)?;
            }
        }
        self.decoder
            .set_max_table_size(self.local_settings.header_table_size as usize);
        trace!("local SETTINGS acknowledged");
        Ok(())
    }

    fn handle_window_update(&mut self, stream_id: u32, increment: u32) -> Result<(), H2Error> {
        if stream_id == 0 {
            self.conn_send_flow.apply_window_update(increment)?;
            self.notify_writable();
            return Ok(());
        }
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_flow.apply_window_update(increment)?;
            if stream.send_blocked && stream.send_flow.available() > 0 && self.conn_send_flow.available() > 0 {
                stream.send_blocked = false;
                self.events.push_back(H2Event::Writable(stream_id));
            }
            return Ok(());
        }
        if self.is_idle(stream_id) {
            return Err(H2Error::protocol("WINDOW_UPDATE on idle stream"));
        }
        // Closed or reset: permitted and ignored.
        Ok(())
    }

    fn notify_writable(&mut self) {
        if self.conn_send_flow.available() == 0 {
            return;
        }
        for (&id, stream) in self.streams.iter_mut() {
            if stream.send_blocked && stream.send_flow.available() > 0 {
                stream.send_blocked = false;
                self.events.push_back(H2Event::Writable(id));
            }
        }
    }

    // ------------------------------------------------------------------
    // Stream lifecycle
    // ------------------------------------------------------------------

    fn stream_error(&mut self, err: H2Error) {
        debug!(stream_id = err.stream_id, error_code = %err.code, "stream error: {}", err.message);
        if err.stream_id == 0 {
            return;
        }
        if self.streams.contains_key(&err.stream_id) {
            self.reset_stream_inner(err.stream_id, err.code, false);
        } else {
            self.queue_frame(&Frame::RstStream {
                stream_id: err.stream_id,
                error_code: err.code,
            });
            self.remember_reset(err.stream_id, err.code);
        }
    }

    fn reset_stream_inner(&mut self, stream_id: u32, error_code: ErrorCode, by_peer: bool) {
        if !by_peer {
            self.queue_frame(&Frame::RstStream {
                stream_id,
                error_code,
            });
        }
        self.remember_reset(stream_id, error_code);
        let Some(mut stream) = self.streams.remove(&stream_id) else {
            return;
        };
        stream.reset(error_code);
        self.stats.failed_requests += 1;
        self.highest_completed_stream_id = self.highest_completed_stream_id.max(stream_id);
        if by_peer {
            self.events.push_back(H2Event::StreamReset {
                stream_id,
                error_code,
            });
        }
        self.events.push_back(H2Event::StreamComplete {
            stream_id,
            success: false,
        });
    }

    fn remember_reset(&mut self, stream_id: u32, error_code: ErrorCode) {
        if self.was_reset(stream_id) {
            return;
        }
        if self.recently_reset.is_full() {
            self.recently_reset.pop_front();
        }
        let _ = self.recently_reset.push_back((stream_id, error_code));
    }

    /// Evict a stream that both sides have ended.
    fn maybe_complete(&mut self, stream_id: u32) {
        let done = self
            .streams
            .get(&stream_id)
            .is_some_and(|s| s.is_closed() && s.reset_code.is_none());
        if !done {
            return;
        }
        self.streams.remove(&stream_id);
        self.stats.completed_requests += 1;
        self.highest_completed_stream_id = self.highest_completed_stream_id.max(stream_id);
        debug!(stream_id, "stream complete");
        self.events.push_back(H2Event::StreamComplete {
            stream_id,
            success: true,
        });
        self.check_shutdown_progress();
    }

    fn close_all_streams(&mut self) {
        let streams = core::mem::take(&mut self.streams);
        for (stream_id, _) in streams {
            self.stats.failed_requests += 1;
            self.events.push_back(H2Event::StreamComplete {
                stream_id,
                success: false,
            });
        }
    }

    fn check_shutdown_progress(&mut self) {
        if self.state == H2ConnState::Closed || !self.streams.is_empty() {
            return;
        }
        if let Shutdown::Draining { .. } = self.shutdown {
            self.queue_goaway(self.highest_completed_stream_id, ErrorCode::NoError, b"");
            self.state = H2ConnState::Closed;
            info!(last_stream_id = self.highest_completed_stream_id, "graceful shutdown complete");
        } else if self.peer_goaway.is_some() {
            self.state = H2ConnState::Closed;
            debug!("peer GOAWAY and no streams left, closing");
        }
    }

    fn fail_connection(&mut self, err: &H2Error) {
        warn!(
            error_code = %err.code,
            last_stream_id = self.highest_stream_id,
            "connection error: {}",
            err.message
        );
        if self.state == H2ConnState::Closed {
            return;
        }
        self.queue_goaway(self.highest_stream_id, err.code, err.message.as_bytes());
        self.close_all_streams();
        self.continuation = None;
        self.recv_buf.clear();
        self.state = H2ConnState::Closed;
    }

    // ------------------------------------------------------------------
    // Timeout + connection state API
    // ------------------------------------------------------------------

    /// Reset the timeout clocks. `now` is the current timestamp in
    /// microseconds; the configuration comes from `H2Config::timeouts`.
    pub fn set_timeouts(&mut self, config: super::config::TimeoutConfig, now: u64) {
        self.config.timeouts = config;
        self.last_activity = now;
        self.connection_start = now;
    }

    /// Return the earliest deadline (in µs) at which `handle_timeout` should be called,
    /// or `None` if no timeouts are configured.
    pub fn next_timeout(&self) -> Option<u64> {
        if self.state == H2ConnState::Closed {
            return None;
        }
        let timeouts = &self.config.timeouts;
        let header = timeouts
            .header_timeout_us
            .filter(|_| self.state != H2ConnState::Active)
            .map(|us| self.connection_start.saturating_add(us));
        let idle = timeouts
            .idle_timeout_us
            .map(|us| self.last_activity.saturating_add(us));
        let shutdown = match self.shutdown {
            Shutdown::Draining { deadline } => deadline,
            Shutdown::Running => None,
        };
        [header, idle, shutdown].into_iter().flatten().min()
    }

    /// Check timeouts. An idle or header timeout queues GOAWAY(NO_ERROR),
    /// closes the connection and emits `H2Event::Timeout`. A passed shutdown
    /// deadline abandons the remaining streams and sends the final GOAWAY.
    pub fn handle_timeout(&mut self, now: u64) {
        if self.state == H2ConnState::Closed {
            return;
        }

        if let Shutdown::Draining { deadline: Some(deadline) } = self.shutdown {
            if now >= deadline {
                info!(abandoned = self.streams.len(), "shutdown grace period elapsed");
                self.close_all_streams();
                self.check_shutdown_progress();
                return;
            }
        }

        let timeouts = self.config.timeouts;
        let header_expired = self.state != H2ConnState::Active
            && timeouts
                .header_timeout_us
                .is_some_and(|us| now >= self.connection_start.saturating_add(us));
        let idle_expired = timeouts
            .idle_timeout_us
            .is_some_and(|us| now >= self.last_activity.saturating_add(us));

        if header_expired || idle_expired {
            info!(header_expired, idle_expired, "connection timed out");
            self.send_goaway(ErrorCode::NoError);
            self.events.push_back(H2Event::Timeout);
        }
    }

    /// Feed data with timestamp tracking. Updates `last_activity` then calls `feed_data`.
    pub fn feed_data_timed(&mut self, data: &[u8], now: u64) -> Result<(), Error> {
        self.last_activity = now;
        self.feed_data(data)
    }

    /// Whether the connection has been closed (GOAWAY sent, peer done, or timeout).
    pub fn is_closed(&self) -> bool {
        self.state == H2ConnState::Closed
    }

    /// Whether the SETTINGS exchange is complete and the connection is usable.
    pub fn is_established(&self) -> bool {
        self.state == H2ConnState::Active
    }

    /// Whether a graceful shutdown is in progress or finished.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown != Shutdown::Running
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
