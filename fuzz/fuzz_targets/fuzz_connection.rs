#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_h2::h2::{CONNECTION_PREFACE, H2Server};

fuzz_target!(|data: &[u8]| {
    let mut server = H2Server::default();
    let mut out = [0u8; 4096];
    let _ = server.feed_data(CONNECTION_PREFACE);

    for chunk in data.chunks(97) {
        if server.feed_data(chunk).is_err() {
            break;
        }
        while server.poll_event().is_some() {}
        while server.poll_output(&mut out).is_some() {}
    }
    while server.poll_output(&mut out).is_some() {}
});
