//! HPACK prefix integer encoding (RFC 7541 §5.1).
//!
//! An integer is packed into the low N bits of a byte; if it does not fit,
//! the remainder follows as 7-bit continuation bytes, least significant
//! group first.

use alloc::vec::Vec;

use crate::error::H2Error;

/// Continuation bytes accepted after the prefix byte.
const MAX_CONTINUATION_BYTES: usize = 10;

/// Largest value a decoded integer may take.
const MAX_VALUE: u64 = i32::MAX as u64;

/// Append `value` using a `prefix_bits`-bit prefix (1..=8).
///
/// `first_byte_mask` carries the representation bits above the prefix.
pub fn encode_integer(value: u32, prefix_bits: u8, first_byte_mask: u8, out: &mut Vec<u8>) {
    debug_assert!((1..=8).contains(&prefix_bits));

    let max_prefix = (1u32 << prefix_bits) - 1;
    if value < max_prefix {
        out.push(first_byte_mask | value as u8);
        return;
    }

    out.push(first_byte_mask | max_prefix as u8);
    let mut remaining = value - max_prefix;
    while remaining >= 128 {
        out.push(0x80 | (remaining & 0x7f) as u8);
        remaining >>= 7;
    }
    out.push(remaining as u8);
}

/// Decode an integer with a `prefix_bits`-bit prefix (1..=8).
///
/// Returns `(value, bytes_consumed)`. Truncated input, more than ten
/// continuation bytes, and values above `i32::MAX` are COMPRESSION_ERROR.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<(u32, usize), H2Error> {
    debug_assert!((1..=8).contains(&prefix_bits));

    let Some(&first) = buf.first() else {
        return Err(H2Error::compression("hpack integer truncated"));
    };

    let max_prefix = (1u32 << prefix_bits) - 1;
    let prefix = u32::from(first) & max_prefix;
    if prefix < max_prefix {
        return Ok((prefix, 1));
    }

    let mut value = u64::from(max_prefix);
    let mut shift: u32 = 0;
    for (i, &byte) in buf[1..].iter().enumerate() {
        if i >= MAX_CONTINUATION_BYTES {
            return Err(H2Error::compression("hpack integer too long"));
        }
        let group = u64::from(byte & 0x7f);
        if group != 0 {
            if shift > 31 {
                return Err(H2Error::compression("hpack integer overflow"));
            }
            value += group << shift;
            if value > MAX_VALUE {
                return Err(H2Error::compression("hpack integer overflow"));
            }
        }
        if byte & 0x80 == 0 {
            return Ok((value as u32, i + 2));
        }
        shift += 7;
    }

    Err(H2Error::compression("hpack integer truncated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn enc(value: u32, prefix: u8, mask: u8) -> Vec<u8> {
        let mut out = Vec::new();
        encode_integer(value, prefix, mask, &mut out);
        out
    }

    #[test]
    fn small_value_fits_prefix() {
        // RFC 7541 C.1.1
        assert_eq!(enc(10, 5, 0b1010_0000), [0b1010_1010]);
        assert_eq!(decode_integer(&[0b1010_1010], 5).unwrap(), (10, 1));
    }

    #[test]
    fn rfc_1337_with_5_bit_prefix() {
        // RFC 7541 C.1.2
        assert_eq!(enc(1337, 5, 0), [0x1f, 0x9a, 0x0a]);
        assert_eq!(decode_integer(&[0x1f, 0x9a, 0x0a], 5).unwrap(), (1337, 3));
    }

    #[test]
    fn full_byte_prefix() {
        // RFC 7541 C.1.3
        assert_eq!(enc(42, 8, 0), [42]);
        assert_eq!(enc(255, 8, 0), [0xff, 0x00]);
        assert_eq!(decode_integer(&[0xff, 0x00], 8).unwrap(), (255, 2));
    }

    #[test]
    fn prefix_boundaries() {
        for prefix in 1..=8u8 {
            let max = (1u32 << prefix) - 1;
            for value in [0, max - 1, max, max + 1, max + 127, max + 128, 1 << 20, i32::MAX as u32] {
                let bytes = enc(value, prefix, 0);
                assert_eq!(decode_integer(&bytes, prefix).unwrap(), (value, bytes.len()));
            }
            // Continuation bytes after the prefix octet.
            assert_eq!(enc(max + 127, prefix, 0).len(), 2);
            assert_eq!(enc(max + 128, prefix, 0).len(), 3);
            assert_eq!(enc(i32::MAX as u32, prefix, 0).len(), 6);
        }
    }

    #[test]
    fn mask_bits_are_ignored_on_decode() {
        let bytes = enc(42, 5, 0b1110_0000);
        assert_eq!(bytes[0] & 0b1110_0000, 0b1110_0000);
        assert_eq!(decode_integer(&bytes, 5).unwrap().0, 42);
    }

    #[test]
    fn truncated_input() {
        assert!(decode_integer(&[], 5).is_err());
        let err = decode_integer(&[0x1f, 0x9a], 5).unwrap_err();
        assert_eq!(err.message, "hpack integer truncated");
    }

    #[test]
    fn above_i32_max_is_overflow() {
        let bytes = enc(i32::MAX as u32 + 1, 5, 0);
        let err = decode_integer(&bytes, 5).unwrap_err();
        assert_eq!(err.code, ErrorCode::CompressionError);
        assert_eq!(err.message, "hpack integer overflow");
    }

    #[test]
    fn too_many_continuation_bytes() {
        // Leading zero groups keep the value small but exceed the length cap.
        let mut bytes = alloc::vec![0x1f];
        bytes.extend([0x80; 11]);
        bytes.push(0x00);
        let err = decode_integer(&bytes, 5).unwrap_err();
        assert_eq!(err.message, "hpack integer too long");
    }

    #[test]
    fn large_shift_with_nonzero_group_is_overflow() {
        // Five zero groups push the shift to 35 before a non-zero group.
        let bytes = [0x1f, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = decode_integer(&bytes, 5).unwrap_err();
        assert_eq!(err.message, "hpack integer overflow");
    }
}
