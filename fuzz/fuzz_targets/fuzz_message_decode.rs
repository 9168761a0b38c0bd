//! Fuzz target: `Message::decode`
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - Whatever decodes re-encodes, and the re-encoding decodes to the same
//!   message
//!
//! cargo fuzz run fuzz_message_decode

#![no_main]

use cppm_broker::rpc::messages::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = Message::decode(data) else {
        return;
    };
    if let Ok(bytes) = msg.encode() {
        let again = Message::decode(&bytes).expect("re-encoded message must decode");
        assert_eq!(again, msg);
    }
});
