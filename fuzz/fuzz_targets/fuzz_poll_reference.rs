#![no_main]

use libfuzzer_sys::fuzz_target;

use chatpoll::polls::{decode_poll_reference, PollReference};

fuzz_target!(|data: &[u8]| {
    match decode_poll_reference(data) {
        Ok(PollReference::Remote(poll_id)) => assert!(poll_id.is_remote()),
        Ok(PollReference::Local { previous_id, .. }) => assert!(previous_id.is_local()),
        Err(_) => {}
    }
});
