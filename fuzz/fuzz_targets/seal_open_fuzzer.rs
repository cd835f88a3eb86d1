//! Fuzz target for conversation sealing
//!
//! # Strategy
//!
//! - Arbitrary key-server secrets and conversation ids
//! - Arbitrary plaintexts and nonce suffixes
//! - Single-bit tampering of ciphertext and nonce
//! - Opening under the wrong conversation
//!
//! # Invariants
//!
//! - Seal then open returns the plaintext
//! - Any tampering makes open fail
//! - A message sealed for one conversation never opens in another
//! - NEVER panic on malformed nonces

#![no_main]

use arbitrary::Arbitrary;
use conclave_crypto::{
    derive_conversation_key, nonce_from_slice, open, seal, NONCE_RANDOM_SIZE,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Scenario {
    secret: Vec<u8>,
    conversation: u64,
    counter: u64,
    random_suffix: [u8; NONCE_RANDOM_SIZE],
    plaintext: Vec<u8>,
    tamper: Tamper,
    wire_nonce: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
enum Tamper {
    None,
    Ciphertext { index: usize, bit: u8 },
    Nonce { index: usize, bit: u8 },
    Conversation { other: u64 },
}

fuzz_target!(|scenario: Scenario| {
    let _ = nonce_from_slice(&scenario.wire_nonce);

    let key = derive_conversation_key(&scenario.secret, scenario.conversation);
    let mut sealed = seal(
        &scenario.plaintext,
        &key,
        scenario.conversation,
        scenario.counter,
        scenario.random_suffix,
    );

    match scenario.tamper {
        Tamper::None => {
            let opened = open(&sealed, &key).expect("untampered message must open");
            assert_eq!(opened, scenario.plaintext);
        }
        Tamper::Ciphertext { index, bit } => {
            let index = index % sealed.ciphertext.len();
            sealed.ciphertext[index] ^= 1 << (bit % 8);
            assert!(open(&sealed, &key).is_err());
        }
        Tamper::Nonce { index, bit } => {
            let index = index % sealed.nonce.len();
            sealed.nonce[index] ^= 1 << (bit % 8);
            assert!(open(&sealed, &key).is_err());
        }
        Tamper::Conversation { other } => {
            if other == scenario.conversation {
                return;
            }
            sealed.conversation = other;
            assert!(open(&sealed, &key).is_err());
            let other_key = derive_conversation_key(&scenario.secret, other);
            assert!(open(&sealed, &other_key).is_err());
        }
    }
});
