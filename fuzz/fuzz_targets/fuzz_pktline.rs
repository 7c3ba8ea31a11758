//! Fuzz target for pkt-line decoding.
//!
//! Decodes packets back to back until the input runs out or is rejected.
//! Every accepted packet must consume bytes and stay within the buffer.

#![no_main]

use ballast_proto::PktLine;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut rest = data;
    for _ in 0..1000 {
        match PktLine::decode(rest) {
            Ok(Some((pkt, used))) => {
                assert!(used >= 4 && used <= rest.len());
                if let Some(payload) = pkt.data() {
                    assert_eq!(payload.len(), used - 4);
                }
                rest = &rest[used..];
            }
            Ok(None) | Err(_) => break,
        }
    }
});
