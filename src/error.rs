//! Error types for the handshake and session engine.

use thiserror::Error;

/// Result type alias for session engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during key management, handshakes and messaging
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The RNG or curve operation failed while generating a key.
    #[error("key generation failed")]
    KeyGeneration,

    /// The signed prekey signature in a peer bundle did not verify.
    ///
    /// No secret is ever derived from a bundle that fails this check.
    #[error("prekey bundle signature did not verify")]
    UntrustedBundle,

    /// Peer key material was malformed or a DH computation failed.
    #[error("handshake failed")]
    Handshake,

    /// AEAD sealing failed.
    #[error("encryption failed")]
    Encryption,

    /// AEAD authentication failed while opening a message.
    #[error("decryption failed")]
    Decryption,

    /// A key was requested before it was generated or negotiated.
    #[error("key material not initialised")]
    Uninitialised,

    /// Public key bytes are not a valid encoding for the expected key type
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Secret key bytes are not a valid encoding for the expected key type
    #[error("invalid secret key")]
    InvalidSecretKey,

    /// Signature could not be produced or parsed
    #[error("invalid signature")]
    InvalidSignature,

    /// Hex string could not be decoded
    #[error("invalid hex encoding")]
    InvalidEncoding,

    /// The key store holds an incomplete or undecodable identity.
    #[error("corrupt key store: {0}")]
    CorruptKeyStore(String),

    /// The key store rejected a read or write.
    #[error("storage error: {0}")]
    Storage(String),

    /// No session exists for the requested peer
    #[error("no session for peer")]
    UnknownSession,

    /// The handshake referenced a one-time prekey that has already been used
    #[error("one-time prekey already used")]
    OneTimePreKeyConsumed,

    /// The ratchet's derived-key stream has no bytes left to read
    #[error("ratchet key stream exhausted")]
    RatchetExhausted,

    /// A step was committed to a ratchet it was not derived from
    #[error("stale ratchet step")]
    StaleRatchetStep,

    /// JSON (de)serialization of a packet or config failed
    #[error("serialization error")]
    Serialization,

    /// bcrypt could not hash the password
    #[error("password hashing failed")]
    PasswordHash,
}

impl From<hex::FromHexError> for Error {
    fn from(_: hex::FromHexError) -> Self {
        Error::InvalidEncoding
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::Serialization
    }
}

impl From<p256::ecdsa::Error> for Error {
    fn from(_: p256::ecdsa::Error) -> Self {
        Error::InvalidSignature
    }
}
