//! Response status codes (RFC 9110 §15).

/// HTTP response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const CONTINUE: Self = Self(100);
    pub const OK: Self = Self(200);
    pub const ACCEPTED: Self = Self(202);
    pub const NO_CONTENT: Self = Self(204);
    pub const NOT_MODIFIED: Self = Self(304);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    pub const URI_TOO_LONG: Self = Self(414);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: Self = Self(431);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);

    /// Three-digit codes only; anything else cannot be sent as `:status`.
    pub const fn is_valid(&self) -> bool {
        self.0 >= 100 && self.0 <= 999
    }

    /// 1xx responses precede the final response and never end a stream.
    pub const fn is_informational(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Format as the three ASCII digits used for `:status`.
    pub const fn to_bytes(&self) -> [u8; 3] {
        let d0 = (self.0 / 100 % 10) as u8;
        let d1 = ((self.0 / 10) % 10) as u8;
        let d2 = (self.0 % 10) as u8;
        [b'0' + d0, b'0' + d1, b'0' + d2]
    }
}
