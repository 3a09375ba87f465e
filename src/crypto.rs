//! Symmetric cryptographic primitives for the handshake and message layers.
//!
//! Provides the X3DH key derivation, AES-256-GCM with the 15-byte nonce used
//! throughout the protocol, the per-message salt derivation and a thin bcrypt
//! wrapper for account passwords.

use crate::error::{Error, Result};
use crate::keys::DhOutput;

use aes_gcm::aead::consts::U15;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_SIZE_32: usize = 32;
pub const TAG_SIZE: usize = 16;

/// AES-GCM nonce length.
///
/// One byte short of a full block. Every IV emitted by the ratchet has this
/// length and peers reject anything else, so it must not change.
pub const NONCE_SIZE: usize = 15;

/// Default bcrypt cost for account passwords.
pub const DEFAULT_PASSWORD_COST: u32 = 13;

type Aes256Gcm15 = AesGcm<Aes256, U15>;

/// 256-bit symmetric key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE_32]);

impl SymmetricKey {
    /// Creates a symmetric key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Creates a symmetric key from a slice, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE_32] = bytes.try_into().map_err(|_| Error::InvalidSecretKey)?;
        Ok(Self(bytes))
    }

    /// Returns the key as a byte array reference.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    /// Hex encoding used by the key store.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Decodes a key previously written with [`SymmetricKey::to_hex`].
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SymmetricKey {}

/// X3DH key derivation.
///
/// Computes `SK = HKDF-SHA256(DH1 || DH2 || DH3 || DH4)` with no salt and no
/// info, 32 bytes of output. Both parties must pass their outputs in the
/// mirrored order described in [`crate::x3dh`].
pub fn derive_x3dh_secret(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: &DhOutput,
) -> Result<SymmetricKey> {
    let mut ikm = [0u8; KEY_SIZE_32 * 4];
    for (chunk, dh) in ikm.chunks_exact_mut(KEY_SIZE_32).zip([dh1, dh2, dh3, dh4]) {
        chunk.copy_from_slice(dh.as_bytes());
    }

    let hkdf = Hkdf::<Sha256>::new(None, &ikm);
    let mut output = [0u8; KEY_SIZE_32];
    let expanded = hkdf.expand(&[], &mut output);
    ikm.zeroize();
    expanded.map_err(|_| Error::Handshake)?;

    Ok(SymmetricKey(output))
}

/// Salt for a per-message ratchet step: the byte-wise complement of the
/// message DH secret.
#[must_use]
pub fn message_salt(secret: &[u8]) -> Vec<u8> {
    secret.iter().map(|byte| byte ^ 0xFF).collect()
}

/// Encrypts with AES-256-GCM using a 15-byte nonce and no associated data.
///
/// Returns the ciphertext with the 16-byte tag appended.
pub fn aead_seal(key: &SymmetricKey, plaintext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm15::new(Key::<Aes256Gcm15>::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::<U15>::from_slice(nonce), plaintext)
        .map_err(|_| Error::Encryption)
}

/// Decrypts and authenticates an [`aead_seal`] ciphertext.
///
/// # Errors
/// Returns `Error::Decryption` if the tag does not verify. No plaintext is
/// returned in that case.
pub fn aead_open(key: &SymmetricKey, ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm15::new(Key::<Aes256Gcm15>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::<U15>::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Decryption)
}

/// Hashes an account password with bcrypt.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost).map_err(|_| Error::PasswordHash)
}

/// Checks a password against a bcrypt hash.
///
/// A malformed hash is treated as a mismatch.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    match bcrypt::verify(password, hash) {
        Ok(matches) => matches,
        Err(err) => {
            tracing::debug!(target: "x3dh_session::crypto", error = %err, "password hash rejected");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretKey;
    use rand_core::OsRng;

    #[test]
    fn test_x3dh_derivation_matches_plain_hkdf() {
        let a = SecretKey::generate(&mut OsRng).unwrap();
        let b = SecretKey::generate(&mut OsRng).unwrap();
        let dh = a.diffie_hellman(&b.public_key());

        let secret = derive_x3dh_secret(&dh, &dh, &dh, &dh).unwrap();

        let mut ikm = Vec::new();
        for _ in 0..4 {
            ikm.extend_from_slice(dh.as_bytes());
        }
        let mut expected = [0u8; 32];
        Hkdf::<Sha256>::new(None, &ikm).expand(&[], &mut expected).unwrap();

        assert_eq!(secret.as_bytes(), &expected);
    }

    #[test]
    fn test_x3dh_derivation_is_order_sensitive() {
        let a = SecretKey::generate(&mut OsRng).unwrap();
        let b = SecretKey::generate(&mut OsRng).unwrap();
        let c = SecretKey::generate(&mut OsRng).unwrap();
        let dh_ab = a.diffie_hellman(&b.public_key());
        let dh_ac = a.diffie_hellman(&c.public_key());

        let first = derive_x3dh_secret(&dh_ab, &dh_ac, &dh_ab, &dh_ab).unwrap();
        let swapped = derive_x3dh_secret(&dh_ac, &dh_ab, &dh_ab, &dh_ab).unwrap();

        assert_ne!(first, swapped);
    }

    #[test]
    fn test_message_salt_is_complement() {
        assert_eq!(message_salt(&[0x00, 0xFF, 0x0F]), vec![0xFF, 0x00, 0xF0]);
    }

    #[test]
    fn test_seal_open() {
        let key = SymmetricKey::from_bytes([1u8; KEY_SIZE_32]);
        let nonce = [2u8; NONCE_SIZE];

        let ciphertext = aead_seal(&key, b"Hello, World!", &nonce).unwrap();
        assert_eq!(ciphertext.len(), b"Hello, World!".len() + TAG_SIZE);

        let plaintext = aead_open(&key, &ciphertext, &nonce).unwrap();
        assert_eq!(&plaintext, b"Hello, World!");
    }

    #[test]
    fn test_open_wrong_key() {
        let key1 = SymmetricKey::from_bytes([1u8; KEY_SIZE_32]);
        let key2 = SymmetricKey::from_bytes([2u8; KEY_SIZE_32]);
        let nonce = [3u8; NONCE_SIZE];

        let ciphertext = aead_seal(&key1, b"secret", &nonce).unwrap();
        assert_eq!(aead_open(&key2, &ciphertext, &nonce), Err(Error::Decryption));
    }

    #[test]
    fn test_open_wrong_nonce() {
        let key = SymmetricKey::from_bytes([1u8; KEY_SIZE_32]);
        let ciphertext = aead_seal(&key, b"secret", &[3u8; NONCE_SIZE]).unwrap();
        assert_eq!(aead_open(&key, &ciphertext, &[4u8; NONCE_SIZE]), Err(Error::Decryption));
    }

    #[test]
    fn test_symmetric_key_hex() {
        let key = SymmetricKey::from_bytes([0xAB; KEY_SIZE_32]);
        let decoded = SymmetricKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, decoded);

        assert_eq!(SymmetricKey::from_hex("abcd"), Err(Error::InvalidSecretKey));
        assert_eq!(SymmetricKey::from_hex("zz"), Err(Error::InvalidEncoding));
    }

    #[test]
    fn test_password_hash() {
        let hash = hash_password("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not a bcrypt hash"));
    }
}
