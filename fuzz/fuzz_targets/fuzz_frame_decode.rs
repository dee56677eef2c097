#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_h2::h2::frame::{decode_frame, encode_frame};

fuzz_target!(|data: &[u8]| {
    // Decode frames back to back until the input runs out or fails.
    let mut pos = 0;
    while pos < data.len() {
        match decode_frame(&data[pos..], 1 << 24) {
            Ok((frame, consumed)) => {
                // Anything accepted must re-encode without panicking.
                let mut out = Vec::new();
                encode_frame(&frame, &mut out);
                pos += consumed;
            }
            Err(_) => break,
        }
    }
});
