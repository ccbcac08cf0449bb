#![no_main]

use libfuzzer_sys::fuzz_target;

use chatpoll::polls::{decode_poll, encode_poll};

// Stored records come from disk and may be corrupt. Decoding must never
// panic, and anything that decodes must re-encode to an equal poll.
fuzz_target!(|data: &[u8]| {
    if let Ok(poll) = decode_poll(data) {
        let encoded = encode_poll(&poll);
        let decoded = decode_poll(&encoded).expect("re-encoded record must decode");
        assert_eq!(decoded, poll);
    }
});
