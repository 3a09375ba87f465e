//! Persistence contract for key material and session state.
//!
//! Everything the engine persists is a hex string stored under a string key.
//! The store itself (a config file, a database row, ...) lives outside this
//! crate; it only has to implement [`KeyStore`].
//!
//! Own keys live at the top level:
//!
//! | key | value |
//! |---|---|
//! | `identity_key` | PKCS#8 DER identity key |
//! | `signed_prekey` | raw signed prekey scalar |
//! | `signed_key` | DER signature over the signed prekey |
//! | `onetime_prekey` | raw one-time prekey scalar |
//!
//! Per-peer session state lives under `contacts.<peer_id>.`:
//! `root_ratchet`, `send_ratchet`, `recv_ratchet` (chain keys) and `secret`.
//! A session completed from a peer's handshake also records that handshake's
//! `ephemeral_key`; it is empty for sessions this side initiated.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const IDENTITY_KEY: &str = "identity_key";
pub const SIGNED_PREKEY: &str = "signed_prekey";
pub const SIGNED_KEY: &str = "signed_key";
pub const ONETIME_PREKEY: &str = "onetime_prekey";

/// The four entries that together make up a persisted identity
pub const IDENTITY_ENTRIES: [&str; 4] = [IDENTITY_KEY, SIGNED_PREKEY, SIGNED_KEY, ONETIME_PREKEY];

/// Per-peer session entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactField {
    RootRatchet,
    SendRatchet,
    RecvRatchet,
    Secret,
    EphemeralKey,
}

impl ContactField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContactField::RootRatchet => "root_ratchet",
            ContactField::SendRatchet => "send_ratchet",
            ContactField::RecvRatchet => "recv_ratchet",
            ContactField::Secret => "secret",
            ContactField::EphemeralKey => "ephemeral_key",
        }
    }
}

/// Store key for a peer's session entry, e.g. `contacts.<uuid>.send_ratchet`
#[must_use]
pub fn contact_key(peer_id: &Uuid, field: ContactField) -> String {
    format!("contacts.{peer_id}.{}", field.as_str())
}

/// String key-value store the engine persists into.
///
/// Implementations must be thread-safe (`Send + Sync`): sessions for
/// different peers read and write concurrently.
pub trait KeyStore: Send + Sync {
    /// Reads a value. A missing key is `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a single value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Writes a batch of values all-or-nothing.
    ///
    /// On error none of the entries may be visible to later reads.
    fn set_all(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Thread-safe in-memory key store.
///
/// Clones share the same underlying map, so a clone handed to a second
/// client behaves like the same config file reopened after a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes an entry, returning its previous value.
    pub fn remove(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        Ok(entries.remove(key))
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("key store mutex poisoned".to_string()))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_all(&self, batch: &[(String, String)]) -> Result<()> {
        let mut entries = self.lock()?;
        entries.extend(batch.iter().cloned());
        Ok(())
    }
}
