//! X3DH handshake and HKDF ratchet engine for two-party end-to-end encrypted
//! messaging over P-256.
//!
//! Each party holds a long-term ECDSA identity key, a signed ECDH prekey and
//! a one-time ECDH prekey. A session is agreed with an X3DH handshake and then
//! carried by three HKDF chains per peer: a root chain that splits the shared
//! secret, a send chain and a receive chain. Every message advances one chain
//! by one step and is sealed with AES-256-GCM under the key and IV that step
//! yields.
//!
//! # Security Properties
//!
//! ## Authenticated Bundles
//! A bundle whose signed prekey signature does not verify under its identity
//! key is rejected before any DH is computed.
//!
//! ## Forward-Only Chains
//! Chain keys are one-way functions of every earlier step. A leaked chain key
//! does not reveal earlier message keys.
//!
//! ## Single-Use One-Time Prekeys
//! The one-time prekey is replaced after each completed handshake, so a
//! second initiation against the same bundle is refused.
//!
//! # Limitations
//!
//! - Messages must arrive in order. There is no skipped-message-key cache; a
//!   message that arrives early fails to decrypt and leaves the session as it
//!   was.
//! - There is no DH ratchet. The per-message DH input is derived from the two
//!   long-term identity keys, so compromise of both chain state and an
//!   identity key is not healed.
//!
//! # Protocol Flow
//!
//! ```rust
//! use x3dh_session::{Client, ClientConfig, MemoryKeyStore};
//! use uuid::Uuid;
//!
//! let alice = Client::initialise(MemoryKeyStore::new(), ClientConfig::ephemeral()).unwrap();
//! let bob = Client::initialise(MemoryKeyStore::new(), ClientConfig::ephemeral()).unwrap();
//! let (alice_id, bob_id) = (Uuid::new_v4(), Uuid::new_v4());
//!
//! // Bob publishes his bundle; Alice fetches it and initiates
//! let bundle = bob.prekey_packet().unwrap();
//! let handshake = alice.initiate(bob_id, &bundle).unwrap();
//!
//! // Bob completes the handshake from Alice's message
//! bob.complete(alice_id, &handshake).unwrap();
//!
//! let ciphertext = alice.send(&bob_id, "Hi Bob!!", &bob.identity_key()).unwrap();
//! let plaintext = bob.receive(&alice_id, &ciphertext, &alice.identity_key()).unwrap();
//! assert_eq!(plaintext, "Hi Bob!!");
//! ```
//!
//! # Modules
//!
//! - [`client`]: per-party engine tying identity, store and sessions together
//! - [`x3dh`]: Extended Triple Diffie-Hellman key agreement
//! - [`session`]: per-peer ratchet triple and message encryption
//! - [`ratchet`]: HKDF chain with two-phase step/commit
//! - [`identity`]: own identity and prekeys, load or generate
//! - [`crypto`]: symmetric primitives (KDF, AEAD, bcrypt)
//! - [`keys`]: P-256 key types with automatic zeroization
//! - [`storage`]: key store contract and an in-memory implementation
//! - [`packet`]: JSON wire packets
//! - [`config`]: client configuration
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod keys;
pub mod packet;
pub mod ratchet;
pub mod session;
pub mod storage;
pub mod x3dh;

// Re-export main types
pub use client::Client;
pub use config::ClientConfig;
pub use crypto::{hash_password, verify_password, SymmetricKey};
pub use error::{Error, Result};
pub use identity::Identity;
pub use keys::{IdentityKeyPair, IdentityPublicKey, PublicKey, SecretKey};
pub use packet::{EncryptedMessage, HandshakePacket, PrekeyPacket};
pub use ratchet::Ratchet;
pub use session::Session;
pub use storage::{KeyStore, MemoryKeyStore};
pub use x3dh::{HandshakeMessage, InitiatorResult, PreKeyBundle, PreKeyState, ResponderResult};
