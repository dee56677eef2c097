//! SETTINGS parameters (RFC 9113 §6.5).
//!
//! [`SettingsParams`] is the body of one SETTINGS frame: only the
//! parameters the frame names are present. [`H2Settings`] holds the full
//! set of values in effect for one side of a connection.

use crate::error::{ErrorCode, H2Error};

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
pub const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;

pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Largest encoded parameter block: five parameters of six bytes each.
pub const MAX_ENCODED_LEN: usize = 30;

/// Parameters carried by a single SETTINGS frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsParams {
    pub header_table_size: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl SettingsParams {
    /// Parse a SETTINGS payload.
    ///
    /// Length is validated by the frame codec. Values above `i32::MAX` for
    /// the size-like parameters are clamped. ENABLE_PUSH is checked for
    /// range but otherwise ignored, and unknown identifiers are skipped.
    pub fn decode(payload: &[u8]) -> Result<Self, H2Error> {
        let mut params = Self::default();
        for chunk in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            let clamped = value.min(MAX_WINDOW_SIZE);
            match id {
                SETTINGS_HEADER_TABLE_SIZE => params.header_table_size = Some(clamped),
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        return Err(H2Error::protocol("SETTINGS_ENABLE_PUSH must be 0 or 1"));
                    }
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => params.max_concurrent_streams = Some(clamped),
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > MAX_WINDOW_SIZE {
                        return Err(H2Error::connection(
                            ErrorCode::FlowControlError,
                            "SETTINGS_INITIAL_WINDOW_SIZE above 2^31-1",
                        ));
                    }
                    params.initial_window_size = Some(value);
                }
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(H2Error::protocol("SETTINGS_MAX_FRAME_SIZE out of range"));
                    }
                    params.max_frame_size = Some(value);
                }
                SETTINGS_MAX_HEADER_LIST_SIZE => params.max_header_list_size = Some(clamped),
                _ => {}
            }
        }
        Ok(params)
    }

    /// Encode the present parameters in identifier order.
    pub fn encode(&self) -> heapless::Vec<u8, MAX_ENCODED_LEN> {
        let mut out = heapless::Vec::new();
        let fields = [
            (SETTINGS_HEADER_TABLE_SIZE, self.header_table_size),
            (SETTINGS_MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size),
            (SETTINGS_MAX_FRAME_SIZE, self.max_frame_size),
            (SETTINGS_MAX_HEADER_LIST_SIZE, self.max_header_list_size),
        ];
        for (id, value) in fields {
            if let Some(value) = value {
                // Capacity covers all five parameters.
                let _ = out.extend_from_slice(&id.to_be_bytes());
                let _ = out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Settings in effect for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Settings {
    pub header_table_size: u32,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl H2Settings {
    /// Values assumed for a peer before its first SETTINGS frame arrives.
    pub const RFC_DEFAULTS: Self = Self {
        header_table_size: 4096,
        max_concurrent_streams: u32::MAX,
        initial_window_size: 65_535,
        max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        max_header_list_size: u32::MAX,
    };

    /// Overwrite only the parameters present in `params`.
    pub fn merge(&mut self, params: &SettingsParams) {
        if let Some(v) = params.header_table_size {
            self.header_table_size = v;
        }
        if let Some(v) = params.max_concurrent_streams {
            self.max_concurrent_streams = v;
        }
        if let Some(v) = params.initial_window_size {
            self.initial_window_size = v;
        }
        if let Some(v) = params.max_frame_size {
            self.max_frame_size = v;
        }
        if let Some(v) = params.max_header_list_size {
            self.max_header_list_size = v;
        }
    }

    /// Every value, for the SETTINGS frame that opens the connection.
    pub fn to_params(&self) -> SettingsParams {
        SettingsParams {
            header_table_size: Some(self.header_table_size),
            max_concurrent_streams: Some(self.max_concurrent_streams),
            initial_window_size: Some(self.initial_window_size),
            max_frame_size: Some(self.max_frame_size),
            max_header_list_size: Some(self.max_header_list_size),
        }
    }
}

/// Server defaults advertised in the connection preface.
impl Default for H2Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 8192,
        }
    }
}
