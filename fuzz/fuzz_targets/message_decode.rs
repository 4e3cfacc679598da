//! Decode arbitrary bodies under every message type.
//!
//! Decoding must never panic, and anything that decodes must encode back to
//! a body that decodes to the same message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ptree_proto::{Message, MessageType};

fuzz_target!(|data: &[u8]| {
    let Some((&tag, body)) = data.split_first() else {
        return;
    };
    let Ok(message_type) = MessageType::from_u8(tag) else {
        return;
    };
    let Ok(message) = Message::decode(message_type, body) else {
        return;
    };

    let frame = message.clone().into_frame(0).expect("decoded message re-encodes");
    let again = Message::from_frame(&frame).expect("re-encoded message decodes");
    assert_eq!(message, again);
});
