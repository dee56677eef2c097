use alloc::borrow::Cow;
use core::fmt;

/// HTTP/2 error codes (RFC 9113 §7).
///
/// Unknown codes are carried through unchanged so that a GOAWAY or
/// RST_STREAM with an unassigned code can still be reported upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
    Http11Required,
    Unknown(u32),
}

impl ErrorCode {
    /// Convert an error code to its RFC 9113 wire value.
    pub const fn to_code(self) -> u32 {
        match self {
            Self::NoError => 0x0,
            Self::ProtocolError => 0x1,
            Self::InternalError => 0x2,
            Self::FlowControlError => 0x3,
            Self::SettingsTimeout => 0x4,
            Self::StreamClosed => 0x5,
            Self::FrameSizeError => 0x6,
            Self::RefusedStream => 0x7,
            Self::Cancel => 0x8,
            Self::CompressionError => 0x9,
            Self::ConnectError => 0xa,
            Self::EnhanceYourCalm => 0xb,
            Self::InadequateSecurity => 0xc,
            Self::Http11Required => 0xd,
            Self::Unknown(code) => code,
        }
    }

    /// Parse a wire value. Total: unassigned values map to `Unknown`.
    pub const fn from_code(code: u32) -> Self {
        match code {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
            Self::Unknown(code) => return write!(f, "UNKNOWN(0x{code:x})"),
        };
        f.write_str(name)
    }
}

/// Whether an error tears down the whole connection or only one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Connection,
    Stream,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Stream => f.write_str("stream"),
        }
    }
}

/// An HTTP/2 protocol error with its scope.
///
/// A connection-level error leads to GOAWAY with `code`; a stream-level
/// error leads to RST_STREAM on `stream_id` with `code`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP/2 {level} error on stream {stream_id} ({code}): {message}")]
pub struct H2Error {
    pub level: ErrorLevel,
    pub code: ErrorCode,
    /// 0 for connection-level errors.
    pub stream_id: u32,
    pub message: Cow<'static, str>,
}

impl H2Error {
    pub fn connection(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            level: ErrorLevel::Connection,
            code,
            stream_id: 0,
            message: message.into(),
        }
    }

    pub fn stream(
        stream_id: u32,
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            level: ErrorLevel::Stream,
            code,
            stream_id,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<Cow<'static, str>>) -> Self {
        Self::connection(ErrorCode::ProtocolError, message)
    }

    pub fn frame_size(message: impl Into<Cow<'static, str>>) -> Self {
        Self::connection(ErrorCode::FrameSizeError, message)
    }

    pub fn flow_control(message: impl Into<Cow<'static, str>>) -> Self {
        Self::connection(ErrorCode::FlowControlError, message)
    }

    pub fn compression(message: impl Into<Cow<'static, str>>) -> Self {
        Self::connection(ErrorCode::CompressionError, message)
    }

    pub fn is_connection(&self) -> bool {
        self.level == ErrorLevel::Connection
    }

    /// Attach a stream id to a stream-level error raised without one.
    pub fn on_stream(mut self, stream_id: u32) -> Self {
        if self.level == ErrorLevel::Stream {
            self.stream_id = stream_id;
        }
        self
    }
}

/// Top-level crate error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Protocol error detected on the wire.
    #[error(transparent)]
    Http2(#[from] H2Error),
    /// Caller-provided buffer too small, or not enough input buffered yet.
    #[error("buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
    /// No flow-control credit or stream capacity available right now.
    #[error("would block")]
    WouldBlock,
    /// Connection is closed.
    #[error("connection closed")]
    Closed,
    /// Invalid state for the requested operation.
    #[error("invalid state")]
    InvalidState,
    /// The stream was reset; further sends fail immediately.
    #[error("stream reset ({0})")]
    StreamReset(ErrorCode),
    /// No stream with this id is known to the connection.
    #[error("unknown stream {0}")]
    UnknownStream(u32),
}
