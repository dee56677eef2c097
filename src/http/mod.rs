//! HTTP semantics shared by the HPACK codec and the HTTP/2 layer.

pub mod header;
pub mod method;
pub mod status;

pub use header::{FieldBlock, FieldLine, HeaderName};
pub use method::Method;
pub use status::StatusCode;
