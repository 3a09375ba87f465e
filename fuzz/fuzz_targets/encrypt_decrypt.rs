//! Fuzz target for encryption/decryption with corrupted inputs
//!
//! Ensures decryption failures don't cause panics or memory unsafety

#![no_main]

use libfuzzer_sys::fuzz_target;
use x3dh_session::crypto::{aead_open, aead_seal, SymmetricKey, NONCE_SIZE};

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 + NONCE_SIZE + 1 {
        return;
    }

    let key = SymmetricKey::from_slice(&data[..32]).unwrap();
    let nonce: [u8; NONCE_SIZE] = data[32..32 + NONCE_SIZE].try_into().unwrap();
    let plaintext = &data[32 + NONCE_SIZE..];

    let ciphertext = aead_seal(&key, plaintext, &nonce).expect("sealing should succeed");

    let decrypted = aead_open(&key, &ciphertext, &nonce).expect("opening should succeed");
    assert_eq!(&decrypted, plaintext);

    // Any single corrupted byte must be rejected
    let position = usize::from(plaintext[0]) % ciphertext.len();
    let mut corrupted = ciphertext.clone();
    corrupted[position] ^= 1;
    assert!(aead_open(&key, &corrupted, &nonce).is_err());

    // The fuzz input itself as a ciphertext must not panic
    let _ = aead_open(&key, plaintext, &nonce);
});
