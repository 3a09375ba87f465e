//! HKDF chain ratchet.
//!
//! A [`Ratchet`] holds a chain key and a derived-key stream. Each extraction
//! folds new input into the chain key with HKDF-Extract and reads a fresh
//! message key and IV from an HKDF-Expand stream keyed by the new chain key:
//!
//! ```text
//! CK'      = HKDF-Extract(salt, CK || input)
//! MK || IV = HKDF-Expand(CK', "")[0..32] || [32..47]
//! ```
//!
//! The chain key after an extraction is a one-way function of every earlier
//! extraction, so a ratchet can only move forward.
//!
//! Extraction is split into [`Ratchet::step`], which computes a candidate
//! without touching the ratchet, and [`Ratchet::commit`], which applies it.
//! Callers that need to authenticate or persist before advancing use the two
//! halves; [`Ratchet::extract`] does both at once.

use crate::crypto::{SymmetricKey, KEY_SIZE_32, NONCE_SIZE};
use crate::error::{Error, Result};

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Longest output an HKDF-SHA256 expand stream can produce
const MAX_STREAM_LEN: usize = 255 * 32;

/// Bytes read from the stream by one extraction
const STEP_OUTPUT_LEN: usize = KEY_SIZE_32 + NONCE_SIZE;

/// Message key and IV produced by one extraction
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    key: SymmetricKey,
    iv: [u8; NONCE_SIZE],
}

impl MessageKeys {
    #[must_use]
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    #[must_use]
    pub fn iv(&self) -> &[u8; NONCE_SIZE] {
        &self.iv
    }
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageKeys([REDACTED])")
    }
}

/// A computed but not yet applied extraction.
///
/// Only commits onto the ratchet state it was computed from.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RatchetStep {
    parent: SymmetricKey,
    chain_key: SymmetricKey,
    keys: MessageKeys,
}

impl RatchetStep {
    /// Message keys this step will yield once committed
    #[must_use]
    pub fn keys(&self) -> &MessageKeys {
        &self.keys
    }

    /// Chain key the ratchet will hold after this step
    #[must_use]
    pub fn chain_key(&self) -> &SymmetricKey {
        &self.chain_key
    }

    /// Hex chain key as it will be persisted after this step
    #[must_use]
    pub fn encode(&self) -> String {
        self.chain_key.to_hex()
    }
}

impl std::fmt::Debug for RatchetStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RatchetStep([REDACTED])")
    }
}

/// HKDF chain state
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Ratchet {
    chain_key: SymmetricKey,
    /// Pseudorandom key the derived-key stream expands from
    stream_key: SymmetricKey,
    /// Bytes already read from the stream
    #[zeroize(skip)]
    cursor: usize,
}

impl Ratchet {
    /// Seeds a ratchet from a secret with no salt.
    #[must_use]
    pub fn seed(secret: &SymmetricKey) -> Self {
        Self::seed_with_salt(secret, None)
    }

    /// Seeds a ratchet from a secret.
    ///
    /// The chain key becomes `secret`. The stream is `HKDF(salt, secret)` with
    /// no info, read from the start.
    #[must_use]
    pub fn seed_with_salt(secret: &SymmetricKey, salt: Option<&[u8]>) -> Self {
        let (prk, _) = Hkdf::<Sha256>::extract(salt, secret.as_bytes());
        Self {
            chain_key: secret.clone(),
            stream_key: SymmetricKey::from_bytes(prk.into()),
            cursor: 0,
        }
    }

    /// Reads the next 32 bytes from the derived-key stream.
    ///
    /// Used to split a root ratchet into send and receive sub-secrets. Does
    /// not change the chain key.
    pub fn next_secret(&mut self) -> Result<SymmetricKey> {
        let end = self.cursor + KEY_SIZE_32;
        if end > MAX_STREAM_LEN {
            return Err(Error::RatchetExhausted);
        }

        let hkdf = Hkdf::<Sha256>::from_prk(self.stream_key.as_bytes())
            .map_err(|_| Error::RatchetExhausted)?;
        let mut output = Zeroizing::new(vec![0u8; end]);
        hkdf.expand(&[], &mut output)
            .map_err(|_| Error::RatchetExhausted)?;

        let secret = SymmetricKey::from_slice(&output[self.cursor..end])?;
        self.cursor = end;
        Ok(secret)
    }

    /// Computes the next extraction without advancing the ratchet.
    ///
    /// An empty `salt` is the HKDF default (a zero-filled salt).
    pub fn step(&self, input: &[u8], salt: &[u8]) -> Result<RatchetStep> {
        let mut ikm = Zeroizing::new(Vec::with_capacity(KEY_SIZE_32 + input.len()));
        ikm.extend_from_slice(self.chain_key.as_bytes());
        ikm.extend_from_slice(input);

        let salt = (!salt.is_empty()).then_some(salt);
        let (prk, hkdf) = Hkdf::<Sha256>::extract(salt, &ikm);

        let mut output = Zeroizing::new([0u8; STEP_OUTPUT_LEN]);
        hkdf.expand(&[], output.as_mut_slice())
            .map_err(|_| Error::RatchetExhausted)?;

        let key = SymmetricKey::from_slice(&output[..KEY_SIZE_32])?;
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&output[KEY_SIZE_32..]);

        Ok(RatchetStep {
            parent: self.chain_key.clone(),
            chain_key: SymmetricKey::from_bytes(prk.into()),
            keys: MessageKeys { key, iv },
        })
    }

    /// Applies a step computed by [`Ratchet::step`] on this exact state.
    ///
    /// # Errors
    /// Returns `Error::StaleRatchetStep` if the ratchet has moved since the
    /// step was computed.
    pub fn commit(&mut self, mut step: RatchetStep) -> Result<MessageKeys> {
        if step.parent != self.chain_key {
            return Err(Error::StaleRatchetStep);
        }

        self.chain_key = step.chain_key.clone();
        self.stream_key = step.chain_key.clone();
        self.cursor = STEP_OUTPUT_LEN;

        let keys = MessageKeys {
            key: step.keys.key.clone(),
            iv: step.keys.iv,
        };
        step.zeroize();
        Ok(keys)
    }

    /// Advances the ratchet and returns the fresh message key and IV.
    ///
    /// Not idempotent: every call moves the chain forward.
    pub fn extract(&mut self, input: &[u8], salt: &[u8]) -> Result<MessageKeys> {
        let step = self.step(input, salt)?;
        self.commit(step)
    }

    /// Current chain key
    #[must_use]
    pub fn chain_key(&self) -> &SymmetricKey {
        &self.chain_key
    }

    /// Hex chain key for the key store
    #[must_use]
    pub fn encode(&self) -> String {
        self.chain_key.to_hex()
    }

    /// Rebuilds a ratchet from a persisted chain key.
    ///
    /// The stored value is the chain key itself, so the ratchet is reseeded
    /// from it with the given salt rather than from the original secret.
    pub fn decode(encoded: &str, salt: Option<&[u8]>) -> Result<Self> {
        let chain_key = SymmetricKey::from_hex(encoded)?;
        Ok(Self::seed_with_salt(&chain_key, salt))
    }
}

impl std::fmt::Debug for Ratchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ratchet")
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seed() -> SymmetricKey {
        SymmetricKey::from_bytes([42u8; KEY_SIZE_32])
    }

    #[test]
    fn test_extract_advances_chain() {
        let mut ratchet = Ratchet::seed(&seed());

        let first = ratchet.extract(b"", b"").unwrap();
        let chain_after_first = ratchet.chain_key().clone();
        let second = ratchet.extract(b"", b"").unwrap();

        assert_ne!(first.key(), second.key());
        assert_ne!(first.iv(), second.iv());
        assert_ne!(&chain_after_first, ratchet.chain_key());
    }

    #[test]
    fn test_extract_matches_hkdf_definition() {
        let mut ratchet = Ratchet::seed(&seed());
        let keys = ratchet.extract(b"input", b"salt").unwrap();

        let mut ikm = seed().as_bytes().to_vec();
        ikm.extend_from_slice(b"input");
        let (prk, hkdf) = Hkdf::<Sha256>::extract(Some(b"salt".as_slice()), &ikm);
        let mut expected = [0u8; STEP_OUTPUT_LEN];
        hkdf.expand(&[], &mut expected).unwrap();

        assert_eq!(keys.key().as_bytes(), &expected[..KEY_SIZE_32]);
        assert_eq!(keys.iv(), &expected[KEY_SIZE_32..]);
        assert_eq!(ratchet.chain_key().as_bytes().as_slice(), prk.as_slice());
    }

    #[test]
    fn test_identical_seeds_stay_in_lockstep() {
        let mut alice = Ratchet::seed(&seed());
        let mut bob = Ratchet::seed(&seed());

        for i in 0u8..10 {
            let a = alice.extract(&[i], &[0xFF - i]).unwrap();
            let b = bob.extract(&[i], &[0xFF - i]).unwrap();
            assert_eq!(a.key(), b.key());
            assert_eq!(a.iv(), b.iv());
        }
    }

    #[test]
    fn test_step_does_not_mutate() {
        let ratchet = Ratchet::seed(&seed());
        let before = ratchet.encode();

        let step1 = ratchet.step(b"x", b"").unwrap();
        let step2 = ratchet.step(b"x", b"").unwrap();

        assert_eq!(ratchet.encode(), before);
        assert_eq!(step1.keys().key(), step2.keys().key());
    }

    #[test]
    fn test_stale_step_rejected() {
        let mut ratchet = Ratchet::seed(&seed());
        let stale = ratchet.step(b"", b"").unwrap();
        ratchet.extract(b"", b"").unwrap();

        assert_eq!(ratchet.commit(stale).unwrap_err(), Error::StaleRatchetStep);
    }

    #[test]
    fn test_commit_matches_extract() {
        let mut committed = Ratchet::seed(&seed());
        let mut extracted = Ratchet::seed(&seed());

        let step = committed.step(b"in", b"salt").unwrap();
        let encoded = step.encode();
        let from_commit = committed.commit(step).unwrap();
        let from_extract = extracted.extract(b"in", b"salt").unwrap();

        assert_eq!(from_commit.key(), from_extract.key());
        assert_eq!(committed.encode(), extracted.encode());
        assert_eq!(committed.encode(), encoded);
    }

    #[test]
    fn test_next_secret_reads_fresh_bytes() {
        let mut ratchet = Ratchet::seed(&seed());
        let chain = ratchet.encode();

        let first = ratchet.next_secret().unwrap();
        let second = ratchet.next_secret().unwrap();

        assert_ne!(first, second);
        assert_eq!(ratchet.encode(), chain);

        let mut other = Ratchet::seed(&seed());
        assert_eq!(other.next_secret().unwrap(), first);
        assert_eq!(other.next_secret().unwrap(), second);
    }

    #[test]
    fn test_next_secret_exhausts() {
        let mut ratchet = Ratchet::seed(&seed());
        for _ in 0..255 {
            ratchet.next_secret().unwrap();
        }
        assert_eq!(ratchet.next_secret().unwrap_err(), Error::RatchetExhausted);
    }

    #[test]
    fn test_encode_decode_continues_chain() {
        let mut original = Ratchet::seed(&seed());
        original.extract(b"a", b"").unwrap();

        let mut restored = Ratchet::decode(&original.encode(), Some(b"salt".as_slice())).unwrap();

        let a = original.extract(b"b", b"s").unwrap();
        let b = restored.extract(b"b", b"s").unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.iv(), b.iv());
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(Ratchet::decode("not hex", None).unwrap_err(), Error::InvalidEncoding);
        assert_eq!(Ratchet::decode("abcd", None).unwrap_err(), Error::InvalidSecretKey);
    }

    #[test]
    fn test_extract_never_repeats() {
        let mut ratchet = Ratchet::seed(&seed());
        let mut seen = HashSet::new();

        for _ in 0..(1 << 16) {
            let keys = ratchet.extract(b"", b"").unwrap();
            assert!(seen.insert(*keys.key().as_bytes()), "message key repeated");
        }
    }
}
