//! Feed arbitrary byte streams to the framer in arbitrary chunks.
//!
//! The framer must never panic, never emit a body above the configured
//! limit, and every emitted frame's header must agree with its body length.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ptree_core::{Framer, FramerConfig, FramerEvent};

const MAX_BODY: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, stream)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mut framer = Framer::new(FramerConfig { max_body_size: MAX_BODY, max_idle_reads: 3 });
    for (i, piece) in stream.chunks(chunk).enumerate() {
        if i % 7 == 6 {
            let _ = framer.on_idle();
        }
        for event in framer.on_bytes(piece) {
            if let FramerEvent::Frame(frame) = event {
                assert!(frame.body.len() <= MAX_BODY);
                assert_eq!(frame.header.body_len().ok(), Some(frame.body.len()));
            }
        }
    }
});
