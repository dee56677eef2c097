//! HPACK field block encoder and decoder (RFC 7541 §6).
//!
//! Each direction of a connection owns one table: the decoder mirrors the
//! peer's encoder and the encoder mirrors the peer's decoder. Every block
//! must therefore be processed in arrival order, including blocks for
//! streams that end up refused or reset.

use alloc::vec::Vec;

use super::huffman;
use super::integer::{decode_integer, encode_integer};
use super::static_table::LookupResult;
use super::table::{DEFAULT_TABLE_SIZE, HpackTable};
use crate::error::{ErrorCode, H2Error};
use crate::http::header::{FieldBlock, FieldLine, HeaderName};

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct HpackDecoder {
    table: HpackTable,
    /// Bound from our SETTINGS_HEADER_TABLE_SIZE; size updates above it fail.
    max_table_size: usize,
    /// Header list size above which a block is refused.
    max_header_list_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HpackDecoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: HpackTable::new(max_table_size),
            max_table_size,
            max_header_list_size: usize::MAX,
        }
    }

    pub fn table(&self) -> &HpackTable {
        &self.table
    }

    /// Apply a new local SETTINGS_HEADER_TABLE_SIZE once the peer has
    /// acknowledged it.
    pub fn set_max_table_size(&mut self, max: usize) {
        self.max_table_size = max;
        if self.table.max_size() > max {
            self.table.set_max_size(max);
        }
    }

    pub fn set_max_header_list_size(&mut self, max: usize) {
        self.max_header_list_size = max;
    }

    /// Decode one complete field block.
    ///
    /// Errors in the representation are connection COMPRESSION_ERROR. A
    /// block whose header list size exceeds the configured limit is still
    /// decoded to the end so the table stays in sync, then reported as a
    /// stream-level PROTOCOL_ERROR with stream id 0; the caller fills in
    /// the stream via [`H2Error::on_stream`].
    pub fn decode(&mut self, src: &[u8]) -> Result<FieldBlock, H2Error> {
        let mut block = FieldBlock::new();
        let mut list_size = 0usize;
        let mut pos = 0;

        while pos < src.len() {
            let first = src[pos];

            let line = if first & 0b1000_0000 != 0 {
                // §6.1 indexed field line
                let (index, n) = decode_integer(&src[pos..], 7)?;
                pos += n;
                self.table.get(index as usize)?
            } else if first & 0b1100_0000 == 0b0100_0000 {
                // §6.2.1 literal with incremental indexing
                let (line, n) = self.decode_literal(&src[pos..], 6, false)?;
                pos += n;
                self.table.insert(line.name.clone(), line.value.clone());
                line
            } else if first & 0b1110_0000 == 0b0010_0000 {
                // §6.3 dynamic table size update, effective immediately
                let (size, n) = decode_integer(&src[pos..], 5)?;
                pos += n;
                if size as usize > self.max_table_size {
                    return Err(H2Error::compression(
                        "hpack table size update above settings limit",
                    ));
                }
                self.table.set_max_size(size as usize);
                continue;
            } else {
                // §6.2.2 without indexing (0000) or §6.2.3 never indexed (0001)
                let never_index = first & 0b0001_0000 != 0;
                let (line, n) = self.decode_literal(&src[pos..], 4, never_index)?;
                pos += n;
                line
            };

            list_size = list_size.saturating_add(line.size());
            if list_size <= self.max_header_list_size {
                block.push(line);
            }
        }

        if list_size > self.max_header_list_size {
            return Err(H2Error::stream(
                0,
                ErrorCode::ProtocolError,
                "header list too large",
            ));
        }
        Ok(block)
    }

    fn decode_literal(
        &self,
        src: &[u8],
        prefix_bits: u8,
        never_index: bool,
    ) -> Result<(FieldLine, usize), H2Error> {
        let (index, mut pos) = decode_integer(src, prefix_bits)?;
        let name = if index == 0 {
            let (raw, n) = decode_string(&src[pos..])?;
            pos += n;
            HeaderName::from_bytes(&raw)
        } else {
            self.table.get_name(index as usize)?
        };
        let (value, n) = decode_string(&src[pos..])?;
        pos += n;
        Ok((
            FieldLine {
                name,
                value,
                never_index,
            },
            pos,
        ))
    }
}

/// Decode a §5.2 string literal: H flag, 7-bit prefixed length, octets.
fn decode_string(src: &[u8]) -> Result<(Vec<u8>, usize), H2Error> {
    let Some(&first) = src.first() else {
        return Err(H2Error::compression("hpack string truncated"));
    };
    let (len, n) = decode_integer(src, 7)?;
    let len = len as usize;
    let raw = src
        .get(n..n + len)
        .ok_or_else(|| H2Error::compression("hpack string truncated"))?;
    let value = if first & 0x80 != 0 {
        let mut out = Vec::with_capacity(len + len / 2);
        huffman::decode(raw, &mut out)?;
        out
    } else {
        raw.to_vec()
    };
    Ok((value, n + len))
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

pub struct HpackEncoder {
    table: HpackTable,
    /// Cap on our table regardless of what the peer allows.
    size_limit: usize,
    /// Smallest size set since the last block, if a change is pending.
    pending_min_size: Option<usize>,
    use_huffman: bool,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HpackEncoder {
    pub fn new(size_limit: usize) -> Self {
        Self {
            table: HpackTable::new(size_limit.min(DEFAULT_TABLE_SIZE)),
            size_limit,
            pending_min_size: None,
            use_huffman: true,
        }
    }

    /// Disable Huffman coding of string literals.
    pub fn without_huffman(mut self) -> Self {
        self.use_huffman = false;
        self
    }

    pub fn table(&self) -> &HpackTable {
        &self.table
    }

    /// React to the peer's SETTINGS_HEADER_TABLE_SIZE. The change is
    /// announced with a size update at the start of the next block.
    pub fn set_max_table_size(&mut self, peer_max: usize) {
        let size = peer_max.min(self.size_limit);
        if size == self.table.max_size() && self.pending_min_size.is_none() {
            return;
        }
        self.table.set_max_size(size);
        let min = self.pending_min_size.map_or(size, |m| m.min(size));
        self.pending_min_size = Some(min);
    }

    /// Encode `block`, appending the representation to `out`.
    ///
    /// Exact table matches become indexed lines. Sensitive fields are
    /// never-indexed literals. Everything else is a literal with incremental
    /// indexing, so repeated fields compress on later blocks.
    pub fn encode(&mut self, block: &FieldBlock, out: &mut Vec<u8>) {
        if let Some(min) = self.pending_min_size.take() {
            let current = self.table.max_size();
            if min < current {
                encode_integer(min as u32, 5, 0b0010_0000, out);
            }
            encode_integer(current as u32, 5, 0b0010_0000, out);
        }

        for line in block {
            let found = self.table.find(&line.name, &line.value);

            if line.never_index {
                let name_index = match found {
                    LookupResult::ExactMatch(i) | LookupResult::NameMatch(i) => Some(i),
                    LookupResult::NotFound => None,
                };
                self.encode_literal(name_index, line, 4, 0b0001_0000, out);
                continue;
            }

            match found {
                LookupResult::ExactMatch(i) => encode_integer(i as u32, 7, 0b1000_0000, out),
                LookupResult::NameMatch(i) => {
                    self.encode_literal(Some(i), line, 6, 0b0100_0000, out);
                    self.table.insert(line.name.clone(), line.value.clone());
                }
                LookupResult::NotFound => {
                    self.encode_literal(None, line, 6, 0b0100_0000, out);
                    self.table.insert(line.name.clone(), line.value.clone());
                }
            }
        }
    }

    fn encode_literal(
        &self,
        name_index: Option<usize>,
        line: &FieldLine,
        prefix_bits: u8,
        mask: u8,
        out: &mut Vec<u8>,
    ) {
        match name_index {
            Some(i) => encode_integer(i as u32, prefix_bits, mask, out),
            None => {
                out.push(mask);
                self.encode_string(line.name.as_bytes(), out);
            }
        }
        self.encode_string(&line.value, out);
    }

    fn encode_string(&self, s: &[u8], out: &mut Vec<u8>) {
        let huff_len = huffman::encoded_len(s);
        if self.use_huffman && huff_len < s.len() {
            encode_integer(huff_len as u32, 7, 0x80, out);
            huffman::encode(s, out);
        } else {
            encode_integer(s.len() as u32, 7, 0x00, out);
            out.extend_from_slice(s);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn hex(s: &str) -> Vec<u8> {
        let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        digits
            .chunks(2)
            .map(|pair| {
                let text = core::str::from_utf8(pair).unwrap();
                u8::from_str_radix(text, 16).unwrap()
            })
            .collect()
    }

    fn pairs(block: &FieldBlock) -> Vec<(Vec<u8>, Vec<u8>)> {
        block
            .iter()
            .map(|l| (l.name.as_bytes().to_vec(), l.value.clone()))
            .collect()
    }

    fn block(lines: &[(&str, &str)]) -> FieldBlock {
        lines
            .iter()
            .map(|&(n, v)| FieldLine::new(n, v))
            .collect()
    }

    // ====== RFC 7541 C.3: requests without Huffman ======

    #[test]
    fn rfc_c3_request_sequence() {
        let mut dec = HpackDecoder::default();

        let first = dec
            .decode(&hex("828684410f7777772e6578616d706c652e636f6d"))
            .unwrap();
        assert_eq!(
            pairs(&first),
            vec![
                (b":method".to_vec(), b"GET".to_vec()),
                (b":scheme".to_vec(), b"http".to_vec()),
                (b":path".to_vec(), b"/".to_vec()),
                (b":authority".to_vec(), b"www.example.com".to_vec()),
            ]
        );
        assert_eq!(dec.table().size(), 57);

        let second = dec
            .decode(&hex("828684be58086e6f2d6361636865"))
            .unwrap();
        assert_eq!(second.get(&HeaderName::CacheControl), Some(&b"no-cache"[..]));
        assert_eq!(dec.table().size(), 110);

        let third = dec
            .decode(&hex(
                "828785bf400a637573746f6d2d6b65790c637573746f6d2d76616c7565",
            ))
            .unwrap();
        assert_eq!(third.get(&HeaderName::Path), Some(&b"/index.html"[..]));
        assert_eq!(
            third.get(&HeaderName::from("custom-key")),
            Some(&b"custom-value"[..])
        );
        assert_eq!(dec.table().size(), 164);
    }

    // ====== RFC 7541 C.4: requests with Huffman ======

    #[test]
    fn rfc_c4_encoder_output_is_exact() {
        let mut enc = HpackEncoder::default();
        let mut out = Vec::new();

        enc.encode(
            &block(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
            ]),
            &mut out,
        );
        assert_eq!(out, hex("828684418cf1e3c2e5f23a6ba0ab90f4ff"));

        out.clear();
        enc.encode(
            &block(&[
                (":method", "GET"),
                (":scheme", "http"),
                (":path", "/"),
                (":authority", "www.example.com"),
                ("cache-control", "no-cache"),
            ]),
            &mut out,
        );
        assert_eq!(out, hex("828684be5886a8eb10649cbf"));

        out.clear();
        enc.encode(
            &block(&[
                (":method", "GET"),
                (":scheme", "https"),
                (":path", "/index.html"),
                (":authority", "www.example.com"),
                ("custom-key", "custom-value"),
            ]),
            &mut out,
        );
        assert_eq!(out, hex("828785bf408825a849e95ba97d7f8925a849e95bb8e8b4bf"));
        assert_eq!(enc.table().size(), 164);
    }

    #[test]
    fn rfc_c4_decoder() {
        let mut dec = HpackDecoder::default();
        dec.decode(&hex("828684418cf1e3c2e5f23a6ba0ab90f4ff")).unwrap();
        dec.decode(&hex("828684be5886a8eb10649cbf")).unwrap();
        let third = dec
            .decode(&hex("828785bf408825a849e95ba97d7f8925a849e95bb8e8b4bf"))
            .unwrap();
        assert_eq!(third.get(&HeaderName::Authority), Some(&b"www.example.com"[..]));
        assert_eq!(dec.table().size(), 164);
    }

    // ====== Encoder/decoder pairing ======

    #[test]
    fn sensitive_fields_never_enter_tables() {
        let mut enc = HpackEncoder::default();
        let mut dec = HpackDecoder::default();
        let mut fields = FieldBlock::new();
        fields.add(":status", "202");
        fields.add_sensitive("authorization", "token");

        let mut out = Vec::new();
        enc.encode(&fields, &mut out);
        let decoded = dec.decode(&out).unwrap();

        assert_eq!(decoded, fields);
        assert_eq!(enc.table().len(), 1);
        assert_eq!(dec.table().len(), 1);
    }

    #[test]
    fn repeated_block_becomes_fully_indexed() {
        let mut enc = HpackEncoder::default();
        let fields = block(&[(":status", "202"), ("x-request-id", "abc")]);
        let mut first = Vec::new();
        enc.encode(&fields, &mut first);
        let mut second = Vec::new();
        enc.encode(&fields, &mut second);
        assert_eq!(second, [0x80 | 63, 0x80 | 62]);
    }

    #[test]
    fn table_size_change_is_signalled() {
        let mut enc = HpackEncoder::default();
        let mut dec = HpackDecoder::default();
        enc.set_max_table_size(0);
        enc.set_max_table_size(256);

        let mut out = Vec::new();
        enc.encode(&block(&[("x-a", "1")]), &mut out);
        // minimum (0) then final size (256)
        assert_eq!(&out[..3], &[0x20, 0x3f, 0xe1]);
        dec.decode(&out).unwrap();
        assert_eq!(dec.table().max_size(), 256);
        assert_eq!(dec.table().len(), 1);
    }

    // ====== Decoder errors ======

    #[test]
    fn index_zero_is_compression_error() {
        let err = HpackDecoder::default().decode(&[0x80]).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompressionError);
        assert!(err.is_connection());
    }

    #[test]
    fn index_past_table_is_compression_error() {
        let err = HpackDecoder::default().decode(&[0x80 | 62]).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompressionError);
    }

    #[test]
    fn size_update_above_limit_rejected() {
        let mut out = Vec::new();
        encode_integer(8192, 5, 0b0010_0000, &mut out);
        assert!(HpackDecoder::default().decode(&out).is_err());
    }

    #[test]
    fn size_update_mid_block_evicts_immediately() {
        // literal with indexing (x-a: 1), size update to 0, indexed :method GET
        let mut src = vec![0x40, 0x03, b'x', b'-', b'a', 0x01, b'1'];
        src.extend([0x20, 0x82]);
        let mut dec = HpackDecoder::default();
        let fields = dec.decode(&src).unwrap();
        assert_eq!(fields.len(), 2);
        assert!(dec.table().is_empty());
        assert_eq!(dec.table().max_size(), 0);
    }

    #[test]
    fn truncated_string_rejected() {
        // literal, new name, declares 5 bytes but carries 2
        assert!(HpackDecoder::default().decode(&[0x00, 0x05, b'a', b'b']).is_err());
    }

    #[test]
    fn oversized_list_is_stream_error_after_full_decode() {
        let mut enc = HpackEncoder::default();
        let mut out = Vec::new();
        enc.encode(&block(&[("x-big", "0123456789"), ("x-next", "v")]), &mut out);

        let mut dec = HpackDecoder::default();
        dec.set_max_header_list_size(40);
        let err = dec.decode(&out).unwrap_err();
        assert!(!err.is_connection());
        assert_eq!(err.code, ErrorCode::ProtocolError);
        // both literals were still indexed
        assert_eq!(dec.table().len(), 2);
    }
}
