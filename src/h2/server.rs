//! HTTP/2 server wrapper.

use crate::error::{Error, ErrorCode};
use crate::http::{FieldBlock, FieldLine, HeaderName, StatusCode};

use super::config::{H2Config, TimeoutConfig};
use super::connection::{ConnectionStats, H2Connection, H2Event};
use super::stream::RequestHead;

/// Request-side callbacks driven by [`H2Server::dispatch`].
///
/// Each callback gets the server so it can answer on the spot. A callback
/// error is treated as a handler failure on that stream: a 500 goes out if
/// no response head was sent yet, otherwise the stream is reset with
/// INTERNAL_ERROR. The connection stays up either way.
pub trait H2Handler {
    /// A complete request head, or trailers if the stream already had one.
    fn on_headers_complete(
        &mut self,
        server: &mut H2Server,
        stream_id: u32,
        fields: FieldBlock,
        end_stream: bool,
    ) -> Result<(), Error>;

    /// Request body bytes. They stay charged against the peer's windows
    /// until released; [`H2Server::dispatch`] releases them after this
    /// returns.
    fn on_data(
        &mut self,
        _server: &mut H2Server,
        _stream_id: u32,
        _data: &[u8],
        _end_stream: bool,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn on_stream_reset(&mut self, _stream_id: u32, _error_code: ErrorCode) {}

    fn on_stream_complete(&mut self, _stream_id: u32, _success: bool) {}

    /// Flow control credit returned for a stream whose `send_data` fell short.
    fn on_writable(&mut self, _server: &mut H2Server, _stream_id: u32) -> Result<(), Error> {
        Ok(())
    }
}

/// HTTP/2 server: the connection plus response helpers.
pub struct H2Server {
    inner: H2Connection,
}

impl H2Server {
    /// Create a new HTTP/2 server connection.
    pub fn new(config: H2Config) -> Self {
        Self {
            inner: H2Connection::new(config),
        }
    }

    /// Feed received TCP data.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.inner.feed_data(data)
    }

    /// Pull outgoing data to send on TCP.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Option<&'a [u8]> {
        self.inner.poll_output(buf)
    }

    /// Poll for events.
    pub fn poll_event(&mut self) -> Option<H2Event> {
        self.inner.poll_event()
    }

    /// Drain pending events into `handler`. Returns how many were handled.
    pub fn dispatch<H: H2Handler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut handled = 0;
        while let Some(event) = self.inner.poll_event() {
            handled += 1;
            match event {
                H2Event::Headers {
                    stream_id,
                    fields,
                    end_stream,
                } => {
                    let result = handler.on_headers_complete(self, stream_id, fields, end_stream);
                    self.handler_result(stream_id, result);
                }
                H2Event::Data {
                    stream_id,
                    data,
                    end_stream,
                } => {
                    let result = handler.on_data(self, stream_id, &data, end_stream);
                    // Connection credit is owed even if the stream is gone.
                    if let Err(err) = self.inner.release_capacity(stream_id, data.len() as u32) {
                        tracing::warn!(stream_id, %err, "releasing request body credit failed");
                    }
                    self.handler_result(stream_id, result);
                }
                H2Event::StreamReset {
                    stream_id,
                    error_code,
                } => handler.on_stream_reset(stream_id, error_code),
                H2Event::StreamComplete { stream_id, success } => {
                    handler.on_stream_complete(stream_id, success)
                }
                H2Event::Writable(stream_id) => {
                    let result = handler.on_writable(self, stream_id);
                    self.handler_result(stream_id, result);
                }
                H2Event::Connected | H2Event::GoAway { .. } | H2Event::Timeout => {}
            }
        }
        handled
    }

    fn handler_result(&mut self, stream_id: u32, result: Result<(), Error>) {
        let Err(err) = result else {
            return;
        };
        tracing::warn!(stream_id, %err, "handler failed");
        match self.inner.response_started(stream_id) {
            Some(false) => {
                if self
                    .send_response(stream_id, StatusCode::INTERNAL_SERVER_ERROR, &FieldBlock::new(), true)
                    .is_err()
                {
                    let _ = self.inner.reset_stream(stream_id, ErrorCode::InternalError);
                }
            }
            Some(true) => {
                let _ = self.inner.reset_stream(stream_id, ErrorCode::InternalError);
            }
            None => {}
        }
    }

    /// Parsed pseudo-headers of an open request.
    pub fn request_head(&self, stream_id: u32) -> Option<&RequestHead> {
        self.inner.request_head(stream_id)
    }

    /// Send response headers. `:status` is prepended to `headers`.
    pub fn send_response(
        &mut self,
        stream_id: u32,
        status: StatusCode,
        headers: &FieldBlock,
        end_stream: bool,
    ) -> Result<(), Error> {
        if !status.is_valid() {
            return Err(Error::InvalidState);
        }
        let mut all_headers = FieldBlock::new();
        all_headers.push(FieldLine::new(HeaderName::Status, status.to_bytes()));
        for line in headers {
            if line.name.is_pseudo() {
                return Err(Error::InvalidState);
            }
            all_headers.push(line.clone());
        }
        self.inner.send_headers(stream_id, &all_headers, end_stream)
    }

    /// Send response body. Returns how much the flow control windows took.
    pub fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) -> Result<usize, Error> {
        self.inner.send_data(stream_id, data, end_stream)
    }

    /// Send trailers, ending the stream.
    pub fn send_trailers(&mut self, stream_id: u32, trailers: &FieldBlock) -> Result<(), Error> {
        self.inner.send_trailers(stream_id, trailers)
    }

    /// Release consumed request body bytes when not using `dispatch`.
    pub fn release_capacity(&mut self, stream_id: u32, n: u32) -> Result<(), Error> {
        self.inner.release_capacity(stream_id, n)
    }

    /// Fail one stream with RST_STREAM.
    pub fn reset_stream(&mut self, stream_id: u32, error_code: ErrorCode) -> Result<(), Error> {
        self.inner.reset_stream(stream_id, error_code)
    }

    /// Start the two-phase GOAWAY shutdown.
    pub fn begin_shutdown(&mut self, now: u64) {
        self.inner.begin_shutdown(now);
    }

    /// Send GOAWAY and close.
    pub fn send_goaway(&mut self, error_code: ErrorCode) {
        self.inner.send_goaway(error_code);
    }

    /// Configure timeouts. `now` is the current timestamp in microseconds.
    pub fn set_timeouts(&mut self, config: TimeoutConfig, now: u64) {
        self.inner.set_timeouts(config, now);
    }

    /// Return the earliest deadline (in µs) at which `handle_timeout` should be called.
    pub fn next_timeout(&self) -> Option<u64> {
        self.inner.next_timeout()
    }

    /// Check timeouts and emit events if they fire.
    pub fn handle_timeout(&mut self, now: u64) {
        self.inner.handle_timeout(now);
    }

    /// Feed data with timestamp tracking.
    pub fn feed_data_timed(&mut self, data: &[u8], now: u64) -> Result<(), Error> {
        self.inner.feed_data_timed(data, now)
    }

    pub fn stats(&self) -> &ConnectionStats {
        self.inner.stats()
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether the SETTINGS exchange is complete.
    pub fn is_established(&self) -> bool {
        self.inner.is_established()
    }

    pub fn connection(&self) -> &H2Connection {
        &self.inner
    }

    pub fn connection_mut(&mut self) -> &mut H2Connection {
        &mut self.inner
    }
}

impl Default for H2Server {
    fn default() -> Self {
        Self::new(H2Config::default())
    }
}
