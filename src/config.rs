//! Client configuration.

use crate::crypto::DEFAULT_PASSWORD_COST;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Behaviour switches for a [`crate::Client`].
///
/// Missing fields in a JSON config take their [`Default`] values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Read and write keys and session state through the key store.
    ///
    /// When false the client generates fresh keys, never touches the store
    /// and keeps sessions in memory only.
    pub persist: bool,

    /// bcrypt cost for [`crate::Client::hash_password`]
    pub password_cost: u32,

    /// Replace the one-time prekey after each completed handshake
    pub rotate_onetime_prekey: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            persist: true,
            password_cost: DEFAULT_PASSWORD_COST,
            rotate_onetime_prekey: true,
        }
    }
}

impl ClientConfig {
    /// In-memory configuration for tests and throwaway identities
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.persist);
        assert_eq!(config.password_cost, 13);
        assert!(config.rotate_onetime_prekey);
        assert!(!ClientConfig::ephemeral().persist);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ClientConfig::from_json(r#"{ "persist": false }"#).unwrap();
        assert_eq!(
            config,
            ClientConfig {
                persist: false,
                ..ClientConfig::default()
            }
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(ClientConfig::from_json("{ persist").is_err());
    }
}
