//! Fuzz target: `FrameDecoder::feed`
//!
//! The first byte picks a chunk size; the rest is fed in chunks of that
//! size, the way a socket would deliver it.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - Every emitted frame is non-empty and within `MAX_FRAME_SIZE`
//! - `feed` reports exactly the number of frames it emitted
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use cppm_broker::rpc::codec::{FrameDecoder, MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mut decoder = FrameDecoder::new();
    for piece in stream.chunks(chunk) {
        let mut seen = 0;
        let reported = decoder.feed(piece, |frame| {
            assert!(!frame.is_empty(), "empty frame emitted");
            assert!(frame.len() <= MAX_FRAME_SIZE, "oversized frame emitted");
            seen += 1;
        });
        assert_eq!(reported, seen);
    }
});
