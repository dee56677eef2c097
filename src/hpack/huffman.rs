//! HPACK Huffman coding (RFC 7541 Appendix B).
//!
//! The 257-symbol code (256 byte values plus EOS) is canonical: codes of a
//! given length are consecutive and ascend with the symbol value. The decoder
//! exploits that with a per-length index built at compile time, so decoding
//! needs no tree and no heap beyond the output vector.

use alloc::vec::Vec;

use crate::error::H2Error;

// ---------------------------------------------------------------------------
// Code table
// ---------------------------------------------------------------------------

/// Code bits (right-aligned) and bit length for one symbol.
#[derive(Clone, Copy)]
struct HuffSym {
    bits: u32,
    len: u8,
}

/// Index 0..=255 are the byte values, index 256 is EOS.
const HUFF_TABLE: [HuffSym; 257] = [
    HuffSym { bits: 0x1ff8, len: 13 },       //   0 (0x00)
    HuffSym { bits: 0x7fffd8, len: 23 },      //   1
    HuffSym { bits: 0xfffffe2, len: 28 },     //   2
    HuffSym { bits: 0xfffffe3, len: 28 },     //   3
    HuffSym { bits: 0xfffffe4, len: 28 },     //   4
    HuffSym { bits: 0xfffffe5, len: 28 },     //   5
    HuffSym { bits: 0xfffffe6, len: 28 },     //   6
    HuffSym { bits: 0xfffffe7, len: 28 },     //   7
    HuffSym { bits: 0xfffffe8, len: 28 },     //   8
    HuffSym { bits: 0xffffea, len: 24 },      //   9
    HuffSym { bits: 0x3ffffffc, len: 30 },    //  10
    HuffSym { bits: 0xfffffe9, len: 28 },     //  11
    HuffSym { bits: 0xfffffea, len: 28 },     //  12
    HuffSym { bits: 0x3ffffffd, len: 30 },    //  13
    HuffSym { bits: 0xfffffeb, len: 28 },     //  14
    HuffSym { bits: 0xfffffec, len: 28 },     //  15
    HuffSym { bits: 0xfffffed, len: 28 },     //  16
    HuffSym { bits: 0xfffffee, len: 28 },     //  17
    HuffSym { bits: 0xfffffef, len: 28 },     //  18
    HuffSym { bits: 0xffffff0, len: 28 },     //  19
    HuffSym { bits: 0xffffff1, len: 28 },     //  20
    HuffSym { bits: 0xffffff2, len: 28 },     //  21
    HuffSym { bits: 0x3ffffffe, len: 30 },    //  22
    HuffSym { bits: 0xffffff3, len: 28 },     //  23
    HuffSym { bits: 0xffffff4, len: 28 },     //  24
    HuffSym { bits: 0xffffff5, len: 28 },     //  25
    HuffSym { bits: 0xffffff6, len: 28 },     //  26
    HuffSym { bits: 0xffffff7, len: 28 },     //  27
    HuffSym { bits: 0xffffff8, len: 28 },     //  28
    HuffSym { bits: 0xffffff9, len: 28 },     //  29
    HuffSym { bits: 0xffffffa, len: 28 },     //  30
    HuffSym { bits: 0xffffffb, len: 28 },     //  31
    HuffSym { bits: 0x14, len: 6 },           //  32 ' '
    HuffSym { bits: 0x3f8, len: 10 },         //  33 '!'
    HuffSym { bits: 0x3f9, len: 10 },         //  34 '"'
    HuffSym { bits: 0xffa, len: 12 },         //  35 '#'
    HuffSym { bits: 0x1ff9, len: 13 },        //  36 '$'
    HuffSym { bits: 0x15, len: 6 },           //  37 '%'
    HuffSym { bits: 0xf8, len: 8 },           //  38 '&'
    HuffSym { bits: 0x7fa, len: 11 },         //  39 '\''
    HuffSym { bits: 0x3fa, len: 10 },         //  40 '('
    HuffSym { bits: 0x3fb, len: 10 },         //  41 ')'
    HuffSym { bits: 0xf9, len: 8 },           //  42 '*'
    HuffSym { bits: 0x7fb, len: 11 },         //  43 '+'
    HuffSym { bits: 0xfa, len: 8 },           //  44 ','
    HuffSym { bits: 0x16, len: 6 },           //  45 '-'
    HuffSym { bits: 0x17, len: 6 },           //  46 '.'
    HuffSym { bits: 0x18, len: 6 },           //  47 '/'
    HuffSym { bits: 0x0, len: 5 },            //  48 '0'
    HuffSym { bits: 0x1, len: 5 },            //  49 '1'
    HuffSym { bits: 0x2, len: 5 },            //  50 '2'
    HuffSym { bits: 0x19, len: 6 },           //  51 '3'
    HuffSym { bits: 0x1a, len: 6 },           //  52 '4'
    HuffSym { bits: 0x1b, len: 6 },           //  53 '5'
    HuffSym { bits: 0x1c, len: 6 },           //  54 '6'
    HuffSym { bits: 0x1d, len: 6 },           //  55 '7'
    HuffSym { bits: 0x1e, len: 6 },           //  56 '8'
    HuffSym { bits: 0x1f, len: 6 },           //  57 '9'
    HuffSym { bits: 0x5c, len: 7 },           //  58 ':'
    HuffSym { bits: 0xfb, len: 8 },           //  59 ';'
    HuffSym { bits: 0x7ffc, len: 15 },        //  60 '<'
    HuffSym { bits: 0x20, len: 6 },           //  61 '='
    HuffSym { bits: 0xffb, len: 12 },         //  62 '>'
    HuffSym { bits: 0x3fc, len: 10 },         //  63 '?'
    HuffSym { bits: 0x1ffa, len: 13 },        //  64 '@'
    HuffSym { bits: 0x21, len: 6 },           //  65 'A'
    HuffSym { bits: 0x5d, len: 7 },           //  66 'B'
    HuffSym { bits: 0x5e, len: 7 },           //  67 'C'
    HuffSym { bits: 0x5f, len: 7 },           //  68 'D'
    HuffSym { bits: 0x60, len: 7 },           //  69 'E'
    HuffSym { bits: 0x61, len: 7 },           //  70 'F'
    HuffSym { bits: 0x62, len: 7 },           //  71 'G'
    HuffSym { bits: 0x63, len: 7 },           //  72 'H'
    HuffSym { bits: 0x64, len: 7 },           //  73 'I'
    HuffSym { bits: 0x65, len: 7 },           //  74 'J'
    HuffSym { bits: 0x66, len: 7 },           //  75 'K'
    HuffSym { bits: 0x67, len: 7 },           //  76 'L'
    HuffSym { bits: 0x68, len: 7 },           //  77 'M'
    HuffSym { bits: 0x69, len: 7 },           //  78 'N'
    HuffSym { bits: 0x6a, len: 7 },           //  79 'O'
    HuffSym { bits: 0x6b, len: 7 },           //  80 'P'
    HuffSym { bits: 0x6c, len: 7 },           //  81 'Q'
    HuffSym { bits: 0x6d, len: 7 },           //  82 'R'
    HuffSym { bits: 0x6e, len: 7 },           //  83 'S'
    HuffSym { bits: 0x6f, len: 7 },           //  84 'T'
    HuffSym { bits: 0x70, len: 7 },           //  85 'U'
    HuffSym { bits: 0x71, len: 7 },           //  86 'V'
    HuffSym { bits: 0x72, len: 7 },           //  87 'W'
    HuffSym { bits: 0xfc, len: 8 },           //  88 'X'
    HuffSym { bits: 0x73, len: 7 },           //  89 'Y'
    HuffSym { bits: 0xfd, len: 8 },           //  90 'Z'
    HuffSym { bits: 0x1ffb, len: 13 },        //  91 '['
    HuffSym { bits: 0x7fff0, len: 19 },       //  92 '\\'
    HuffSym { bits: 0x1ffc, len: 13 },        //  93 ']'
    HuffSym { bits: 0x3ffc, len: 14 },        //  94 '^'
    HuffSym { bits: 0x22, len: 6 },           //  95 '_'
    HuffSym { bits: 0x7ffd, len: 15 },        //  96 '`'
    HuffSym { bits: 0x3, len: 5 },            //  97 'a'
    HuffSym { bits: 0x23, len: 6 },           //  98 'b'
    HuffSym { bits: 0x4, len: 5 },            //  99 'c'
    HuffSym { bits: 0x24, len: 6 },           // 100 'd'
    HuffSym { bits: 0x5, len: 5 },            // 101 'e'
    HuffSym { bits: 0x25, len: 6 },           // 102 'f'
    HuffSym { bits: 0x26, len: 6 },           // 103 'g'
    HuffSym { bits: 0x27, len: 6 },           // 104 'h'
    HuffSym { bits: 0x6, len: 5 },            // 105 'i'
    HuffSym { bits: 0x74, len: 7 },           // 106 'j'
    HuffSym { bits: 0x75, len: 7 },           // 107 'k'
    HuffSym { bits: 0x28, len: 6 },           // 108 'l'
    HuffSym { bits: 0x29, len: 6 },           // 109 'm'
    HuffSym { bits: 0x2a, len: 6 },           // 110 'n'
    HuffSym { bits: 0x7, len: 5 },            // 111 'o'
    HuffSym { bits: 0x2b, len: 6 },           // 112 'p'
    HuffSym { bits: 0x76, len: 7 },           // 113 'q'
    HuffSym { bits: 0x2c, len: 6 },           // 114 'r'
    HuffSym { bits: 0x8, len: 5 },            // 115 's'
    HuffSym { bits: 0x9, len: 5 },            // 116 't'
    HuffSym { bits: 0x2d, len: 6 },           // 117 'u'
    HuffSym { bits: 0x77, len: 7 },           // 118 'v'
    HuffSym { bits: 0x78, len: 7 },           // 119 'w'
    HuffSym { bits: 0x79, len: 7 },           // 120 'x'
    HuffSym { bits: 0x7a, len: 7 },           // 121 'y'
    HuffSym { bits: 0x7b, len: 7 },           // 122 'z'
    HuffSym { bits: 0x7ffe, len: 15 },        // 123 '{'
    HuffSym { bits: 0x7fc, len: 11 },         // 124 '|'
    HuffSym { bits: 0x3ffd, len: 14 },        // 125 '}'
    HuffSym { bits: 0x1ffd, len: 13 },        // 126 '~'
    HuffSym { bits: 0xffffffc, len: 28 },     // 127
    HuffSym { bits: 0xfffe6, len: 20 },       // 128
    HuffSym { bits: 0x3fffd2, len: 22 },      // 129
    HuffSym { bits: 0xfffe7, len: 20 },       // 130
    HuffSym { bits: 0xfffe8, len: 20 },       // 131
    HuffSym { bits: 0x3fffd3, len: 22 },      // 132
    HuffSym { bits: 0x3fffd4, len: 22 },      // 133
    HuffSym { bits: 0x3fffd5, len: 22 },      // 134
    HuffSym { bits: 0x7fffd9, len: 23 },      // 135
    HuffSym { bits: 0x3fffd6, len: 22 },      // 136
    HuffSym { bits: 0x7fffda, len: 23 },      // 137
    HuffSym { bits: 0x7fffdb, len: 23 },      // 138
    HuffSym { bits: 0x7fffdc, len: 23 },      // 139
    HuffSym { bits: 0x7fffdd, len: 23 },      // 140
    HuffSym { bits: 0x7fffde, len: 23 },      // 141
    HuffSym { bits: 0xffffeb, len: 24 },      // 142
    HuffSym { bits: 0x7fffdf, len: 23 },      // 143
    HuffSym { bits: 0xffffec, len: 24 },      // 144
    HuffSym { bits: 0xffffed, len: 24 },      // 145
    HuffSym { bits: 0x3fffd7, len: 22 },      // 146
    HuffSym { bits: 0x7fffe0, len: 23 },      // 147
    HuffSym { bits: 0xffffee, len: 24 },      // 148
    HuffSym { bits: 0x7fffe1, len: 23 },      // 149
    HuffSym { bits: 0x7fffe2, len: 23 },      // 150
    HuffSym { bits: 0x7fffe3, len: 23 },      // 151
    HuffSym { bits: 0x7fffe4, len: 23 },      // 152
    HuffSym { bits: 0x1fffdc, len: 21 },      // 153
    HuffSym { bits: 0x3fffd8, len: 22 },      // 154
    HuffSym { bits: 0x7fffe5, len: 23 },      // 155
    HuffSym { bits: 0x3fffd9, len: 22 },      // 156
    HuffSym { bits: 0x7fffe6, len: 23 },      // 157
    HuffSym { bits: 0x7fffe7, len: 23 },      // 158
    HuffSym { bits: 0xffffef, len: 24 },      // 159
    HuffSym { bits: 0x3fffda, len: 22 },      // 160
    HuffSym { bits: 0x1fffdd, len: 21 },      // 161
    HuffSym { bits: 0xfffe9, len: 20 },       // 162
    HuffSym { bits: 0x3fffdb, len: 22 },      // 163
    HuffSym { bits: 0x3fffdc, len: 22 },      // 164
    HuffSym { bits: 0x7fffe8, len: 23 },      // 165
    HuffSym { bits: 0x7fffe9, len: 23 },      // 166
    HuffSym { bits: 0x1fffde, len: 21 },      // 167
    HuffSym { bits: 0x7fffea, len: 23 },      // 168
    HuffSym { bits: 0x3fffdd, len: 22 },      // 169
    HuffSym { bits: 0x3fffde, len: 22 },      // 170
    HuffSym { bits: 0xfffff0, len: 24 },      // 171
    HuffSym { bits: 0x1fffdf, len: 21 },      // 172
    HuffSym { bits: 0x3fffdf, len: 22 },      // 173
    HuffSym { bits: 0x7fffeb, len: 23 },      // 174
    HuffSym { bits: 0x7fffec, len: 23 },      // 175
    HuffSym { bits: 0x1fffe0, len: 21 },      // 176
    HuffSym { bits: 0x1fffe1, len: 21 },      // 177
    HuffSym { bits: 0x3fffe0, len: 22 },      // 178
    HuffSym { bits: 0x1fffe2, len: 21 },      // 179
    HuffSym { bits: 0x7fffed, len: 23 },      // 180
    HuffSym { bits: 0x3fffe1, len: 22 },      // 181
    HuffSym { bits: 0x7fffee, len: 23 },      // 182
    HuffSym { bits: 0x7fffef, len: 23 },      // 183
    HuffSym { bits: 0xfffea, len: 20 },       // 184
    HuffSym { bits: 0x3fffe2, len: 22 },      // 185
    HuffSym { bits: 0x3fffe3, len: 22 },      // 186
    HuffSym { bits: 0x3fffe4, len: 22 },      // 187
    HuffSym { bits: 0x7ffff0, len: 23 },      // 188
    HuffSym { bits: 0x3fffe5, len: 22 },      // 189
    HuffSym { bits: 0x3fffe6, len: 22 },      // 190
    HuffSym { bits: 0x7ffff1, len: 23 },      // 191
    HuffSym { bits: 0x3ffffe0, len: 26 },     // 192
    HuffSym { bits: 0x3ffffe1, len: 26 },     // 193
    HuffSym { bits: 0xfffeb, len: 20 },       // 194
    HuffSym { bits: 0x7fff1, len: 19 },       // 195
    HuffSym { bits: 0x3fffe7, len: 22 },      // 196
    HuffSym { bits: 0x7ffff2, len: 23 },      // 197
    HuffSym { bits: 0x3fffe8, len: 22 },      // 198
    HuffSym { bits: 0x1ffffec, len: 25 },     // 199
    HuffSym { bits: 0x3ffffe2, len: 26 },     // 200
    HuffSym { bits: 0x3ffffe3, len: 26 },     // 201
    HuffSym { bits: 0x3ffffe4, len: 26 },     // 202
    HuffSym { bits: 0x7ffffde, len: 27 },     // 203
    HuffSym { bits: 0x7ffffdf, len: 27 },     // 204
    HuffSym { bits: 0x3ffffe5, len: 26 },     // 205
    HuffSym { bits: 0xfffff1, len: 24 },      // 206
    HuffSym { bits: 0x1ffffed, len: 25 },     // 207
    HuffSym { bits: 0x7fff2, len: 19 },       // 208
    HuffSym { bits: 0x1fffe3, len: 21 },      // 209
    HuffSym { bits: 0x3ffffe6, len: 26 },     // 210
    HuffSym { bits: 0x7ffffe0, len: 27 },     // 211
    HuffSym { bits: 0x7ffffe1, len: 27 },     // 212
    HuffSym { bits: 0x3ffffe7, len: 26 },     // 213
    HuffSym { bits: 0x7ffffe2, len: 27 },     // 214
    HuffSym { bits: 0xfffff2, len: 24 },      // 215
    HuffSym { bits: 0x1fffe4, len: 21 },      // 216
    HuffSym { bits: 0x1fffe5, len: 21 },      // 217
    HuffSym { bits: 0x3ffffe8, len: 26 },     // 218
    HuffSym { bits: 0x3ffffe9, len: 26 },     // 219
    HuffSym { bits: 0xffffffd, len: 28 },     // 220
    HuffSym { bits: 0x7ffffe3, len: 27 },     // 221
    HuffSym { bits: 0x7ffffe4, len: 27 },     // 222
    HuffSym { bits: 0x7ffffe5, len: 27 },     // 223
    HuffSym { bits: 0xfffec, len: 20 },       // 224
    HuffSym { bits: 0xfffff3, len: 24 },      // 225
    HuffSym { bits: 0xfffed, len: 20 },       // 226
    HuffSym { bits: 0x1fffe6, len: 21 },      // 227
    HuffSym { bits: 0x3fffe9, len: 22 },      // 228
    HuffSym { bits: 0x1fffe7, len: 21 },      // 229
    HuffSym { bits: 0x1fffe8, len: 21 },      // 230
    HuffSym { bits: 0x7ffff3, len: 23 },      // 231
    HuffSym { bits: 0x3fffea, len: 22 },      // 232
    HuffSym { bits: 0x3fffeb, len: 22 },      // 233
    HuffSym { bits: 0x1ffffee, len: 25 },     // 234
    HuffSym { bits: 0x1ffffef, len: 25 },     // 235
    HuffSym { bits: 0xfffff4, len: 24 },      // 236
    HuffSym { bits: 0xfffff5, len: 24 },      // 237
    HuffSym { bits: 0x3ffffea, len: 26 },     // 238
    HuffSym { bits: 0x7ffff4, len: 23 },      // 239
    HuffSym { bits: 0x3ffffeb, len: 26 },     // 240
    HuffSym { bits: 0x7ffffe6, len: 27 },     // 241
    HuffSym { bits: 0x3ffffec, len: 26 },     // 242
    HuffSym { bits: 0x3ffffed, len: 26 },     // 243
    HuffSym { bits: 0x7ffffe7, len: 27 },     // 244
    HuffSym { bits: 0x7ffffe8, len: 27 },     // 245
    HuffSym { bits: 0x7ffffe9, len: 27 },     // 246
    HuffSym { bits: 0x7ffffea, len: 27 },     // 247
    HuffSym { bits: 0x7ffffeb, len: 27 },     // 248
    HuffSym { bits: 0xffffffe, len: 28 },     // 249
    HuffSym { bits: 0x7ffffec, len: 27 },     // 250
    HuffSym { bits: 0x7ffffed, len: 27 },     // 251
    HuffSym { bits: 0x7ffffee, len: 27 },     // 252
    HuffSym { bits: 0x7ffffef, len: 27 },     // 253
    HuffSym { bits: 0x7fffff0, len: 27 },     // 254
    HuffSym { bits: 0x3ffffee, len: 26 },     // 255
    HuffSym { bits: 0x3fffffff, len: 30 },    // 256 (EOS)
];

const EOS: u16 = 256;
const MAX_CODE_LEN: usize = 30;

// ---------------------------------------------------------------------------
// Decode index
// ---------------------------------------------------------------------------

/// Symbols grouped by code length, plus the first code of each length.
struct DecodeIndex {
    symbols: [u16; 257],
    start: [u16; MAX_CODE_LEN + 1],
    count: [u16; MAX_CODE_LEN + 1],
    first_code: [u32; MAX_CODE_LEN + 1],
}

const fn build_index() -> DecodeIndex {
    let mut idx = DecodeIndex {
        symbols: [0; 257],
        start: [0; MAX_CODE_LEN + 1],
        count: [0; MAX_CODE_LEN + 1],
        first_code: [0; MAX_CODE_LEN + 1],
    };

    let mut sym = 0;
    while sym < 257 {
        idx.count[HUFF_TABLE[sym].len as usize] += 1;
        sym += 1;
    }

    let mut len = 1;
    let mut offset = 0;
    while len <= MAX_CODE_LEN {
        idx.start[len] = offset;
        offset += idx.count[len];
        len += 1;
    }

    let mut filled = [0u16; MAX_CODE_LEN + 1];
    sym = 0;
    while sym < 257 {
        let entry = HUFF_TABLE[sym];
        let len = entry.len as usize;
        if filled[len] == 0 {
            idx.first_code[len] = entry.bits;
        }
        idx.symbols[(idx.start[len] + filled[len]) as usize] = sym as u16;
        filled[len] += 1;
        sym += 1;
    }

    idx
}

static DECODE_INDEX: DecodeIndex = build_index();

/// Match the top `len` bits of a code against symbols of exactly that length.
fn lookup(code: u32, len: usize) -> Option<u16> {
    let count = DECODE_INDEX.count[len] as u32;
    if count == 0 {
        return None;
    }
    let offset = code.checked_sub(DECODE_INDEX.first_code[len])?;
    if offset >= count {
        return None;
    }
    let sym = DECODE_INDEX.symbols[DECODE_INDEX.start[len] as usize + offset as usize];
    (HUFF_TABLE[sym as usize].bits == code).then_some(sym)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode a Huffman-coded string, appending the bytes to `out`.
///
/// Per RFC 7541 §5.2 decoding fails with COMPRESSION_ERROR when padding is
/// longer than 7 bits, when padding is not a prefix of EOS (all ones), or
/// when the EOS symbol itself appears in the string.
pub fn decode(src: &[u8], out: &mut Vec<u8>) -> Result<(), H2Error> {
    let mut acc: u64 = 0;
    let mut acc_len: usize = 0;

    for &byte in src {
        acc = (acc << 8) | u64::from(byte);
        acc_len += 8;

        'symbols: while acc_len >= 5 {
            let max_len = acc_len.min(MAX_CODE_LEN);
            for len in 5..=max_len {
                let code = (acc >> (acc_len - len)) as u32;
                if let Some(sym) = lookup(code, len) {
                    if sym == EOS {
                        return Err(H2Error::compression("huffman: EOS in string"));
                    }
                    out.push(sym as u8);
                    acc_len -= len;
                    acc &= (1u64 << acc_len) - 1;
                    continue 'symbols;
                }
            }
            if acc_len >= MAX_CODE_LEN {
                return Err(H2Error::compression("huffman: invalid code"));
            }
            break;
        }
    }

    if acc_len > 7 {
        return Err(H2Error::compression("huffman: padding too long"));
    }
    let mask = (1u64 << acc_len) - 1;
    if acc & mask != mask {
        return Err(H2Error::compression("huffman: padding is not EOS prefix"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Huffman-encode `src`, appending to `out`. The last byte is padded with
/// the high bits of EOS.
pub fn encode(src: &[u8], out: &mut Vec<u8>) {
    let mut bit_buf: u64 = 0;
    let mut bit_count: u32 = 0;

    for &byte in src {
        let entry = HUFF_TABLE[byte as usize];
        bit_buf = (bit_buf << entry.len) | u64::from(entry.bits);
        bit_count += u32::from(entry.len);

        while bit_count >= 8 {
            bit_count -= 8;
            out.push((bit_buf >> bit_count) as u8);
        }
        bit_buf &= (1u64 << bit_count) - 1;
    }

    if bit_count > 0 {
        let pad = 8 - bit_count;
        out.push(((bit_buf << pad) | ((1u64 << pad) - 1)) as u8);
    }
}

/// Encoded length in bytes of `src`, padding included.
pub fn encoded_len(src: &[u8]) -> usize {
    let bits: usize = src
        .iter()
        .map(|&b| HUFF_TABLE[b as usize].len as usize)
        .sum();
    bits.div_ceil(8)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
