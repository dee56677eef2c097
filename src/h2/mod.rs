//! HTTP/2 server protocol engine (RFC 9113).
//!
//! A pure-codec HTTP/2 stack: `feed_data()` → `poll_output()` →
//! `poll_event()`. Nothing here owns a socket, a thread or a clock.

pub mod config;
pub mod connection;
pub mod flow_control;
pub mod frame;
pub mod server;
pub mod settings;
pub mod stream;

pub use config::{H2Config, TimeoutConfig, UnknownFramePolicy};
pub use connection::{CONNECTION_PREFACE, ConnectionStats, H2Connection, H2Event};
pub use frame::{Frame, FrameHeader, Priority};
pub use server::{H2Handler, H2Server};
pub use settings::{H2Settings, SettingsParams};
pub use stream::{H2StreamState, RequestHead};
