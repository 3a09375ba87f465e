//! Own long-term key material and its persisted form.

use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, IdentityPublicKey, SecretKey};
use crate::storage::{KeyStore, IDENTITY_ENTRIES, IDENTITY_KEY, ONETIME_PREKEY, SIGNED_KEY, SIGNED_PREKEY};
use crate::x3dh::{PreKeyBundle, PreKeyState};
use rand_core::CryptoRngCore;
use tracing::{debug, info, warn};

fn corrupt(key: &'static str) -> impl Fn(Error) -> Error {
    move |err| Error::CorruptKeyStore(format!("{key}: {err}"))
}

/// Identity key pair together with the prekeys published for it
#[derive(Debug)]
pub struct Identity {
    key_pair: IdentityKeyPair,
    prekeys: PreKeyState,
}

impl Identity {
    /// Generates a fresh identity key, signed prekey, signature and one-time
    /// prekey.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Result<Self> {
        let key_pair = IdentityKeyPair::generate(rng)?;
        let prekeys = PreKeyState::generate(rng, &key_pair)?;

        Ok(Self { key_pair, prekeys })
    }

    /// Loads the identity from `store`, generating and persisting one if the
    /// store holds none.
    ///
    /// With `persist` unset the store is neither read nor written and a fresh
    /// identity is returned.
    ///
    /// # Errors
    /// `Error::CorruptKeyStore` if only some identity entries are present or
    /// one of them does not decode.
    pub fn initialise<S, R>(store: &S, persist: bool, rng: &mut R) -> Result<Self>
    where
        S: KeyStore + ?Sized,
        R: CryptoRngCore,
    {
        if !persist {
            debug!(target: "x3dh_session::identity", "generating ephemeral identity");
            return Self::generate(rng);
        }

        if let Some(identity) = Self::load(store)? {
            info!(
                target: "x3dh_session::identity",
                identity = ?identity.public_key(),
                "loaded identity"
            );
            return Ok(identity);
        }

        let identity = Self::generate(rng)?;
        store.set_all(&identity.store_entries()?)?;
        info!(
            target: "x3dh_session::identity",
            identity = ?identity.public_key(),
            "generated identity"
        );
        Ok(identity)
    }

    /// Reads a persisted identity.
    ///
    /// Returns `Ok(None)` when none of the identity entries exist. Empty
    /// values count as missing.
    pub fn load<S: KeyStore + ?Sized>(store: &S) -> Result<Option<Self>> {
        let mut values = Vec::with_capacity(IDENTITY_ENTRIES.len());
        for key in IDENTITY_ENTRIES {
            values.push(store.get(key)?.filter(|value| !value.is_empty()));
        }

        if values.iter().all(Option::is_none) {
            return Ok(None);
        }

        let mut present = Vec::with_capacity(values.len());
        for (key, value) in IDENTITY_ENTRIES.iter().zip(values) {
            match value {
                Some(value) => present.push(value),
                None => {
                    warn!(target: "x3dh_session::identity", entry = *key, "identity entry missing");
                    return Err(Error::CorruptKeyStore(format!("missing {key}")));
                }
            }
        }

        let key_pair = IdentityKeyPair::from_hex(&present[0]).map_err(corrupt(IDENTITY_KEY))?;
        let signed_prekey = SecretKey::from_hex(&present[1]).map_err(corrupt(SIGNED_PREKEY))?;
        let signature = hex::decode(&present[2])
            .map_err(Error::from)
            .map_err(corrupt(SIGNED_KEY))?;
        let onetime_prekey = SecretKey::from_hex(&present[3]).map_err(corrupt(ONETIME_PREKEY))?;

        if !key_pair
            .public_key()
            .verify(&signed_prekey.public_key().to_bytes(), &signature)
        {
            return Err(Error::CorruptKeyStore(format!(
                "{SIGNED_KEY} does not match {SIGNED_PREKEY}"
            )));
        }

        Ok(Some(Self {
            key_pair,
            prekeys: PreKeyState::from_parts(signed_prekey, signature, onetime_prekey),
        }))
    }

    /// The four identity entries in their store encoding
    pub fn store_entries(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            (IDENTITY_KEY.to_string(), self.key_pair.to_hex()?),
            (SIGNED_PREKEY.to_string(), self.prekeys.signed_prekey().to_hex()),
            (SIGNED_KEY.to_string(), hex::encode(self.prekeys.signature())),
            (ONETIME_PREKEY.to_string(), self.prekeys.onetime_prekey().to_hex()),
        ])
    }

    #[must_use]
    pub fn key_pair(&self) -> &IdentityKeyPair {
        &self.key_pair
    }

    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        self.key_pair.public_key()
    }

    #[must_use]
    pub fn prekeys(&self) -> &PreKeyState {
        &self.prekeys
    }

    /// Splits into the key pair and the mutable prekey state
    #[must_use]
    pub fn into_parts(self) -> (IdentityKeyPair, PreKeyState) {
        (self.key_pair, self.prekeys)
    }

    /// Bundle to publish for peers that want to open a session
    #[must_use]
    pub fn bundle(&self) -> PreKeyBundle {
        self.prekeys.public_bundle(&self.public_key())
    }
}
