//! Fuzz target for standin decoding.
//!
//! Any record that decodes must re-encode to a record naming the same hash.

#![no_main]

use ballast_storage::standin::{decode_standin, encode_standin};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(hash) = decode_standin("fuzz.bin", data) {
        let record = encode_standin(&hash);
        assert_eq!(decode_standin("fuzz.bin", &record).ok(), Some(hash));
    }
});
