#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(any(test, feature = "std"))]
extern crate std;

extern crate alloc;

pub mod error;
pub mod h2;
pub mod hpack;
pub mod http;

pub use error::{Error, ErrorCode, ErrorLevel, H2Error};
pub use h2::{H2Config, H2Connection, H2Event, H2Handler, H2Server};
pub use http::{FieldBlock, FieldLine, HeaderName, Method, StatusCode};
