//! HPACK header compression (RFC 7541).
//!
//! Layered bottom-up: prefix integers and Huffman strings, the static and
//! dynamic tables, then the field block encoder and decoder.

pub mod codec;
pub mod huffman;
pub mod integer;
pub mod static_table;
pub mod table;

pub use codec::{HpackDecoder, HpackEncoder};
pub use table::HpackTable;
