//! Fuzz target for Message::decode
//!
//! Engines decode every datagram that reaches their inbox, so decoding must
//! reject garbage without panicking.
//!
//! # Invariants
//!
//! - NEVER panic on arbitrary bytes
//! - A decoded message re-encodes, and the re-encoding decodes to the same
//!   message

#![no_main]

use conclave_core::Message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = Message::decode(data) else {
        return;
    };

    let encoded = message.encode().expect("decoded message must re-encode");
    let again = Message::decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(message, again);
});
