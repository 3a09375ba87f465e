//! P-256 key types with memory safety guarantees.
//!
//! Identity keys are ECDSA keys used for signing. Every other key (signed
//! prekey, one-time prekey, ephemeral key) is an ECDH key. The identity
//! scalar is also usable for key agreement, which is how the handshake and the
//! per-message DH fold the identity into the derived secrets.
//!
//! Encodings written to the key store and the wire:
//!
//! | key | encoding |
//! |---|---|
//! | ECDH public | hex of the uncompressed SEC1 point (65 bytes) |
//! | ECDH secret | hex of the raw 32-byte scalar |
//! | ECDSA public | hex of DER `SubjectPublicKeyInfo` |
//! | ECDSA secret | hex of PKCS#8 DER |

use crate::{
    crypto::KEY_SIZE_32,
    error::{Error, Result},
};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p256::FieldBytes;
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tag byte of an uncompressed SEC1 point
const UNCOMPRESSED_TAG: u8 = 0x04;

/// Scalars outside the curve order are rejected and redrawn this many times
/// before generation gives up.
const MAX_GENERATION_ATTEMPTS: usize = 8;

fn random_scalar<R: CryptoRngCore>(rng: &mut R) -> Result<p256::SecretKey> {
    let mut bytes = FieldBytes::default();
    for _ in 0..MAX_GENERATION_ATTEMPTS {
        if rng.try_fill_bytes(&mut bytes).is_err() {
            bytes.as_mut_slice().zeroize();
            return Err(Error::KeyGeneration);
        }
        if let Ok(secret) = p256::SecretKey::from_bytes(&bytes) {
            bytes.as_mut_slice().zeroize();
            return Ok(secret);
        }
    }
    bytes.as_mut_slice().zeroize();
    Err(Error::KeyGeneration)
}

fn diffie_hellman(secret: &p256::SecretKey, public: &p256::PublicKey) -> DhOutput {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut output = [0u8; KEY_SIZE_32];
    output.copy_from_slice(shared.raw_secret_bytes());
    DhOutput(output)
}

/// P-256 ECDH public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Size of the uncompressed encoding in bytes
    pub const SIZE: usize = 65;

    /// Parses an uncompressed SEC1 point.
    ///
    /// Compressed points and DER wrappers are rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE || bytes[0] != UNCOMPRESSED_TAG {
            return Err(Error::InvalidPublicKey);
        }
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidPublicKey)
    }

    /// Uncompressed SEC1 encoding
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(encoded)?)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "PublicKey({}...)", hex::encode(&bytes[1..9]))
    }
}

/// P-256 ECDH secret key, zeroized on drop
#[derive(Clone)]
pub struct SecretKey(p256::SecretKey);

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Result<Self> {
        random_scalar(rng).map(Self)
    }

    /// Create from a raw 32-byte scalar
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE_32 {
            return Err(Error::InvalidSecretKey);
        }
        p256::SecretKey::from_bytes(FieldBytes::from_slice(bytes))
            .map(Self)
            .map_err(|_| Error::InvalidSecretKey)
    }

    /// Hex of the raw scalar, for the owner's key store only
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0.to_bytes();
        let encoded = hex::encode(bytes.as_slice());
        bytes.as_mut_slice().zeroize();
        encoded
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded)?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }

    /// Get the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    /// Perform Diffie-Hellman key agreement
    #[must_use]
    pub fn diffie_hellman(&self, public: &PublicKey) -> DhOutput {
        diffie_hellman(&self.0, &public.0)
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Output of Diffie-Hellman operation (the 32-byte x-coordinate)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_SIZE_32]);

impl DhOutput {
    /// Returns a byte slice of the Diffie-Hellman operation output
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Long-term ECDSA identity key.
///
/// The same scalar doubles as an ECDH key for the handshake and for the
/// per-message DH.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: p256::SecretKey,
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new identity key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Result<Self> {
        random_scalar(rng).map(Self::from_secret)
    }

    fn from_secret(secret: p256::SecretKey) -> Self {
        let signing = SigningKey::from(&secret);
        Self { secret, signing }
    }

    /// Hex of the PKCS#8 DER encoding, for the owner's key store only
    pub fn to_hex(&self) -> Result<String> {
        let document = self
            .secret
            .to_pkcs8_der()
            .map_err(|_| Error::InvalidSecretKey)?;
        Ok(hex::encode(document.as_bytes()))
    }

    /// Decodes a PKCS#8 DER identity key.
    ///
    /// A raw scalar is rejected even if it would be a valid key.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let mut bytes = hex::decode(encoded)?;
        let secret = p256::SecretKey::from_pkcs8_der(&bytes).map_err(|_| Error::InvalidSecretKey);
        bytes.zeroize();
        secret.map(Self::from_secret)
    }

    /// Get the public identity key
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.secret.public_key())
    }

    /// ASN.1 DER ECDSA signature over SHA-256 of `message`
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature: Signature = self.signing.try_sign(message)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Key agreement using the identity scalar
    #[must_use]
    pub fn diffie_hellman(&self, public: &PublicKey) -> DhOutput {
        diffie_hellman(&self.secret, &public.0)
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKeyPair {{ public: {:?} }}", self.public_key())
    }
}

/// Public half of an identity key
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityPublicKey(p256::PublicKey);

impl IdentityPublicKey {
    /// DER `SubjectPublicKeyInfo` encoding
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.0
            .to_public_key_der()
            .map(|document| document.as_bytes().to_vec())
            .map_err(|_| Error::InvalidPublicKey)
    }

    /// Parses a DER `SubjectPublicKeyInfo`. Raw SEC1 points are rejected.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        p256::PublicKey::from_public_key_der(bytes)
            .map(Self)
            .map_err(|_| Error::InvalidPublicKey)
    }

    pub fn to_hex(&self) -> Result<String> {
        self.to_der().map(hex::encode)
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        Self::from_der(&hex::decode(encoded)?)
    }

    /// Verifies a DER signature produced by [`IdentityKeyPair::sign`].
    ///
    /// Returns `false` for malformed signatures instead of erroring.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_der(signature) else {
            return false;
        };
        VerifyingKey::from(&self.0).verify(message, &signature).is_ok()
    }

    /// The identity point as an ECDH public key
    #[must_use]
    pub fn as_dh_key(&self) -> PublicKey {
        PublicKey(self.0)
    }

    /// Hex SHA-256 of the DER encoding, for out-of-band comparison
    pub fn fingerprint(&self) -> Result<String> {
        let der = self.to_der()?;
        Ok(hex::encode(Sha256::digest(der)))
    }
}

impl std::fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityPublicKey({:?})", self.as_dh_key())
    }
}
