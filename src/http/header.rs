//! Header names, field lines and ordered field blocks.
//!
//! Names on an HTTP/2 connection are lowercase on the wire; well-known ones
//! are interned as [`HeaderName`] variants, anything else is kept verbatim in
//! [`HeaderName::Custom`].

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::hash::{Hash, Hasher};

/// Per-entry overhead in the HPACK size accounting (RFC 7541 §4.1).
pub const ENTRY_OVERHEAD: usize = 32;

macro_rules! standard_headers {
    ($($variant:ident => $name:literal,)+) => {
        /// A header field name. Equality and hashing ignore ASCII case;
        /// `Custom` keeps the original bytes for re-encoding.
        #[derive(Debug, Clone)]
        pub enum HeaderName {
            $($variant,)+
            Custom(Vec<u8>),
        }

        impl HeaderName {
            /// Wire bytes of the name.
            pub fn as_bytes(&self) -> &[u8] {
                match self {
                    $(Self::$variant => &$name[..],)+
                    Self::Custom(name) => name,
                }
            }

            /// Intern `name`. Matching is exact: an uppercase name stays
            /// `Custom` so that request validation can reject it.
            pub fn from_bytes(name: &[u8]) -> Self {
                match name {
                    $($name => Self::$variant,)+
                    other => Self::Custom(other.to_vec()),
                }
            }
        }
    };
}

standard_headers! {
    Authority => b":authority",
    Method => b":method",
    Path => b":path",
    Scheme => b":scheme",
    Status => b":status",
    AcceptCharset => b"accept-charset",
    AcceptEncoding => b"accept-encoding",
    AcceptLanguage => b"accept-language",
    AcceptRanges => b"accept-ranges",
    Accept => b"accept",
    AccessControlAllowOrigin => b"access-control-allow-origin",
    Age => b"age",
    Allow => b"allow",
    Authorization => b"authorization",
    CacheControl => b"cache-control",
    Connection => b"connection",
    ContentDisposition => b"content-disposition",
    ContentEncoding => b"content-encoding",
    ContentLanguage => b"content-language",
    ContentLength => b"content-length",
    ContentLocation => b"content-location",
    ContentRange => b"content-range",
    ContentType => b"content-type",
    Cookie => b"cookie",
    Date => b"date",
    Etag => b"etag",
    Expect => b"expect",
    Expires => b"expires",
    From => b"from",
    Host => b"host",
    IfMatch => b"if-match",
    IfModifiedSince => b"if-modified-since",
    IfNoneMatch => b"if-none-match",
    IfRange => b"if-range",
    IfUnmodifiedSince => b"if-unmodified-since",
    KeepAlive => b"keep-alive",
    LastModified => b"last-modified",
    Link => b"link",
    Location => b"location",
    MaxForwards => b"max-forwards",
    ProxyAuthenticate => b"proxy-authenticate",
    ProxyAuthorization => b"proxy-authorization",
    ProxyConnection => b"proxy-connection",
    Range => b"range",
    Referer => b"referer",
    Refresh => b"refresh",
    RetryAfter => b"retry-after",
    Server => b"server",
    SetCookie => b"set-cookie",
    StrictTransportSecurity => b"strict-transport-security",
    Te => b"te",
    TransferEncoding => b"transfer-encoding",
    Upgrade => b"upgrade",
    UserAgent => b"user-agent",
    Vary => b"vary",
    Via => b"via",
    WwwAuthenticate => b"www-authenticate",
}

impl HeaderName {
    /// Names beginning with `:` are pseudo-header fields.
    pub fn is_pseudo(&self) -> bool {
        self.as_bytes().first() == Some(&b':')
    }

    /// Connection-specific fields that HTTP/2 forbids (RFC 9113 §8.2.2).
    /// `te` is handled separately since `te: trailers` is allowed.
    pub fn is_connection_specific(&self) -> bool {
        matches!(
            self,
            Self::Connection
                | Self::KeepAlive
                | Self::ProxyConnection
                | Self::TransferEncoding
                | Self::Upgrade
        )
    }

    /// Whether every byte is a valid lowercase field-name character.
    pub fn is_valid_lowercase(&self) -> bool {
        let bytes = self.as_bytes();
        let body = bytes.strip_prefix(b":").unwrap_or(bytes);
        !body.is_empty()
            && body
                .iter()
                .all(|&b| b.is_ascii_graphic() && !b.is_ascii_uppercase() && b != b':')
    }

    /// The name as HTTP/2 sends it: ASCII-lowercased, and interned when it
    /// matches a well-known name.
    pub fn to_lowercase(&self) -> Self {
        match self {
            Self::Custom(name) if name.iter().any(u8::is_ascii_uppercase) => {
                Self::from_bytes(&name.to_ascii_lowercase())
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes().eq_ignore_ascii_case(other.as_bytes())
    }
}

impl Eq for HeaderName {}

impl Hash for HeaderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.as_bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl From<&str> for HeaderName {
    fn from(name: &str) -> Self {
        Self::from_bytes(name.as_bytes())
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// One name/value pair of a field block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLine {
    pub name: HeaderName,
    pub value: Vec<u8>,
    /// Must never be added to a compression table (HPACK §6.2.3).
    pub never_index: bool,
}

impl FieldLine {
    pub fn new(name: impl Into<HeaderName>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            never_index: false,
        }
    }

    /// Size counted against header table and header list limits.
    pub fn size(&self) -> usize {
        self.name.as_bytes().len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// Ordered collection of field lines; duplicates are preserved in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldBlock {
    lines: Vec<FieldLine>,
}

impl FieldBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<HeaderName>, value: impl Into<Vec<u8>>) {
        self.lines.push(FieldLine::new(name, value));
    }

    /// Add a field that must stay out of every compression table.
    pub fn add_sensitive(&mut self, name: impl Into<HeaderName>, value: impl Into<Vec<u8>>) {
        let mut line = FieldLine::new(name, value);
        line.never_index = true;
        self.lines.push(line);
    }

    pub fn push(&mut self, line: FieldLine) {
        self.lines.push(line);
    }

    /// First value for `name`.
    pub fn get(&self, name: &HeaderName) -> Option<&[u8]> {
        self.lines
            .iter()
            .find(|line| &line.name == name)
            .map(|line| line.value.as_slice())
    }

    /// All values for `name`, in block order.
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.lines
            .iter()
            .filter(move |line| &line.name == name)
            .map(|line| line.value.as_slice())
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.lines.iter().any(|line| &line.name == name)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, FieldLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Header list size as defined for SETTINGS_MAX_HEADER_LIST_SIZE.
    pub fn header_list_size(&self) -> usize {
        self.lines.iter().map(FieldLine::size).sum()
    }
}

impl<'a> IntoIterator for &'a FieldBlock {
    type Item = &'a FieldLine;
    type IntoIter = core::slice::Iter<'a, FieldLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

impl FromIterator<FieldLine> for FieldBlock {
    fn from_iter<I: IntoIterator<Item = FieldLine>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names_are_interned() {
        assert_eq!(HeaderName::from_bytes(b":path"), HeaderName::Path);
        assert_eq!(HeaderName::from_bytes(b"content-length"), HeaderName::ContentLength);
        assert_eq!(HeaderName::ContentLength.as_bytes(), b"content-length");
        assert_eq!(
            HeaderName::from_bytes(b"x-trace"),
            HeaderName::Custom(b"x-trace".to_vec())
        );
    }

    #[test]
    fn uppercase_names_keep_bytes_but_compare_equal() {
        let name = HeaderName::from_bytes(b"Content-Length");
        assert!(matches!(name, HeaderName::Custom(_)));
        assert_eq!(name.as_bytes(), b"Content-Length");
        assert_eq!(name, HeaderName::ContentLength);
        assert!(!name.is_valid_lowercase());
        assert!(HeaderName::from("x-ok").is_valid_lowercase());
        assert!(HeaderName::Authority.is_valid_lowercase());
    }

    #[test]
    fn lowercasing_interns_known_names() {
        assert!(matches!(
            HeaderName::from_bytes(b"Content-Type").to_lowercase(),
            HeaderName::ContentType
        ));
        let custom = HeaderName::from_bytes(b"X-Custom").to_lowercase();
        assert_eq!(custom.as_bytes(), b"x-custom");
        assert!(custom.is_valid_lowercase());
        assert_eq!(HeaderName::Path.to_lowercase().as_bytes(), b":path");
    }

    #[test]
    fn pseudo_and_connection_specific() {
        assert!(HeaderName::Method.is_pseudo());
        assert!(HeaderName::from(":protocol").is_pseudo());
        assert!(!HeaderName::Host.is_pseudo());
        assert!(HeaderName::TransferEncoding.is_connection_specific());
        assert!(!HeaderName::Te.is_connection_specific());
    }

    #[test]
    fn block_keeps_order_and_duplicates() {
        let mut block = FieldBlock::new();
        block.add("cookie", "a=1");
        block.add("accept", "*/*");
        block.add("cookie", "b=2");
        let cookies: Vec<&[u8]> = block.get_all(&HeaderName::Cookie).collect();
        assert_eq!(cookies, [&b"a=1"[..], &b"b=2"[..]]);
        assert_eq!(block.get(&HeaderName::Accept), Some(&b"*/*"[..]));
        assert_eq!(block.len(), 3);
    }

    #[test]
    fn header_list_size_counts_overhead() {
        let mut block = FieldBlock::new();
        block.add(":method", "GET");
        block.add_sensitive("authorization", "secret");
        assert_eq!(block.header_list_size(), (7 + 3 + 32) + (13 + 6 + 32));
        assert!(block.iter().nth(1).unwrap().never_index);
    }
}
