//! Connection configuration.

use super::settings::{DEFAULT_MAX_FRAME_SIZE, H2Settings, MAX_MAX_FRAME_SIZE, MAX_WINDOW_SIZE};

/// Timeout configuration. All values in microseconds; `None` disables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Close the connection after this long without received bytes.
    pub idle_timeout_us: Option<u64>,
    /// Close the connection if the preface and SETTINGS exchange has not
    /// finished within this long of `set_timeouts`.
    pub header_timeout_us: Option<u64>,
}

/// What to do with an unknown frame type addressed to a stream that was
/// never opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownFramePolicy {
    /// Discard the frame. No stream is created and the id is not consumed.
    #[default]
    Ignore,
    /// Treat the frame as connection PROTOCOL_ERROR.
    RejectOnIdleStream,
}

/// Server connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Config {
    /// Settings advertised in the server preface.
    pub settings: H2Settings,
    pub timeouts: TimeoutConfig,
    /// How long after `begin_shutdown` in-flight streams may keep running
    /// before the final GOAWAY is sent anyway.
    pub shutdown_grace_us: Option<u64>,
    pub unknown_frame_policy: UnknownFramePolicy,
    /// Cap on an accumulated HEADERS + CONTINUATION block, in bytes.
    pub max_header_block_size: usize,
    /// Reject malformed requests (RFC 9113 §8.1.1) with a stream error.
    pub validate_requests: bool,
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            settings: H2Settings::default(),
            timeouts: TimeoutConfig::default(),
            shutdown_grace_us: Some(30_000_000),
            unknown_frame_policy: UnknownFramePolicy::Ignore,
            max_header_block_size: 64 * 1024,
            validate_requests: true,
        }
    }
}

impl H2Config {
    pub fn with_max_concurrent_streams(mut self, n: u32) -> Self {
        self.settings.max_concurrent_streams = n.min(MAX_WINDOW_SIZE);
        self
    }

    /// Clamped to 2^31-1.
    pub fn with_initial_window_size(mut self, n: u32) -> Self {
        self.settings.initial_window_size = n.min(MAX_WINDOW_SIZE);
        self
    }

    /// Clamped to the range SETTINGS_MAX_FRAME_SIZE allows.
    pub fn with_max_frame_size(mut self, n: u32) -> Self {
        self.settings.max_frame_size = n.clamp(DEFAULT_MAX_FRAME_SIZE, MAX_MAX_FRAME_SIZE);
        self
    }

    pub fn with_header_table_size(mut self, n: u32) -> Self {
        self.settings.header_table_size = n.min(MAX_WINDOW_SIZE);
        self
    }

    pub fn with_max_header_list_size(mut self, n: u32) -> Self {
        self.settings.max_header_list_size = n.min(MAX_WINDOW_SIZE);
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_shutdown_grace(mut self, grace_us: Option<u64>) -> Self {
        self.shutdown_grace_us = grace_us;
        self
    }

    pub fn with_unknown_frame_policy(mut self, policy: UnknownFramePolicy) -> Self {
        self.unknown_frame_policy = policy;
        self
    }

    pub fn with_max_header_block_size(mut self, n: usize) -> Self {
        self.max_header_block_size = n;
        self
    }

    pub fn with_request_validation(mut self, enabled: bool) -> Self {
        self.validate_requests = enabled;
        self
    }
}
