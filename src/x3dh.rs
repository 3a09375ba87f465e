//! X3DH (Extended Triple Diffie-Hellman) key agreement over P-256.
//!
//! Follows Signal's asynchronous key agreement:
//! <https://signal.org/docs/specifications/x3dh/>
//!
//! ## Bundle Authentication
//!
//! ```text
//! signature = ECDSA-P256-SHA256(IK, SPK)
//! ```
//!
//! `SPK` is the uncompressed SEC1 encoding of the signed prekey. The initiator
//! refuses to derive anything from a bundle whose signature does not verify
//! under the bundle's own identity key.
//!
//! ## Protocol Flow
//!
//! 1. **Responder (Bob)** publishes a prekey bundle containing:
//!    - Identity key (long-term ECDSA key, also used for DH)
//!    - Signed prekey (medium-term ECDH key)
//!    - Prekey signature
//!    - One-time prekey (replaced after it is used)
//!
//! 2. **Initiator (Alice)** fetches the bundle and computes:
//!    - DH1 = `DH(IK_A, SPK_B)`
//!    - DH2 = `DH(EK_A, IK_B)`
//!    - DH3 = `DH(EK_A, SPK_B)`
//!    - DH4 = `DH(EK_A, OPK_B)`
//!    - SK = HKDF(DH1 || DH2 || DH3 || DH4)
//!
//! 3. **Responder (Bob)** receives Alice's identity and ephemeral keys and
//!    computes the same SK with the mirrored operations.

use crate::crypto::{derive_x3dh_secret, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, IdentityPublicKey, PublicKey, SecretKey};
use crate::packet::{HandshakePacket, PrekeyPacket};
use rand_core::CryptoRngCore;
use tracing::{debug, warn};

/// Prekey bundle published by a user for others to initiate sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyBundle {
    /// Long-term identity key
    pub identity_key: IdentityPublicKey,

    /// Medium-term signed prekey
    pub signed_prekey: PublicKey,

    /// DER ECDSA signature over the signed prekey's SEC1 bytes
    pub signature: Vec<u8>,

    /// Single-use prekey
    pub onetime_prekey: PublicKey,
}

impl PreKeyBundle {
    /// Verifies the signature on the signed prekey.
    ///
    /// # Errors
    /// `Error::UntrustedBundle` if the signature is malformed or was not
    /// produced by the bundle's identity key over its signed prekey.
    pub fn verify_signature(&self) -> Result<()> {
        if self
            .identity_key
            .verify(&self.signed_prekey.to_bytes(), &self.signature)
        {
            Ok(())
        } else {
            Err(Error::UntrustedBundle)
        }
    }

    /// Decodes a wire packet. Malformed keys are a handshake failure.
    pub fn from_packet(packet: &PrekeyPacket) -> Result<Self> {
        Ok(Self {
            identity_key: IdentityPublicKey::from_hex(&packet.identity_key)
                .map_err(|_| Error::Handshake)?,
            signed_prekey: PublicKey::from_hex(&packet.signed_prekey).map_err(|_| Error::Handshake)?,
            signature: hex::decode(&packet.signed_key).map_err(|_| Error::Handshake)?,
            onetime_prekey: PublicKey::from_hex(&packet.onetime_prekey)
                .map_err(|_| Error::Handshake)?,
        })
    }

    pub fn to_packet(&self) -> Result<PrekeyPacket> {
        Ok(PrekeyPacket {
            identity_key: self.identity_key.to_hex()?,
            signed_prekey: self.signed_prekey.to_hex(),
            signed_key: hex::encode(&self.signature),
            onetime_prekey: self.onetime_prekey.to_hex(),
        })
    }
}

impl TryFrom<&PrekeyPacket> for PreKeyBundle {
    type Error = Error;

    fn try_from(packet: &PrekeyPacket) -> Result<Self> {
        Self::from_packet(packet)
    }
}

/// Prekey secrets held by a user (Bob) to respond to X3DH initiations.
pub struct PreKeyState {
    signed_prekey: SecretKey,
    signature: Vec<u8>,
    onetime_prekey: SecretKey,
}

impl PreKeyState {
    /// Generates a signed prekey, its signature and a one-time prekey.
    pub fn generate<R: CryptoRngCore>(rng: &mut R, identity: &IdentityKeyPair) -> Result<Self> {
        let signed_prekey = SecretKey::generate(rng)?;
        let signature = identity.sign(&signed_prekey.public_key().to_bytes())?;
        let onetime_prekey = SecretKey::generate(rng)?;

        Ok(Self {
            signed_prekey,
            signature,
            onetime_prekey,
        })
    }

    /// Reassembles state read back from the key store.
    #[must_use]
    pub fn from_parts(signed_prekey: SecretKey, signature: Vec<u8>, onetime_prekey: SecretKey) -> Self {
        Self {
            signed_prekey,
            signature,
            onetime_prekey,
        }
    }

    /// Returns the public prekey bundle for distribution.
    #[must_use]
    pub fn public_bundle(&self, identity: &IdentityPublicKey) -> PreKeyBundle {
        PreKeyBundle {
            identity_key: identity.clone(),
            signed_prekey: self.signed_prekey.public_key(),
            signature: self.signature.clone(),
            onetime_prekey: self.onetime_prekey.public_key(),
        }
    }

    /// Replaces the one-time prekey with a fresh one.
    ///
    /// Initiations that still name the old key are rejected afterwards.
    pub fn rotate_onetime_prekey<R: CryptoRngCore>(&mut self, rng: &mut R) -> Result<()> {
        self.onetime_prekey = SecretKey::generate(rng)?;
        Ok(())
    }

    #[must_use]
    pub fn signed_prekey(&self) -> &SecretKey {
        &self.signed_prekey
    }

    #[must_use]
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    #[must_use]
    pub fn onetime_prekey(&self) -> &SecretKey {
        &self.onetime_prekey
    }
}

impl std::fmt::Debug for PreKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreKeyState")
            .field("signed_prekey", &self.signed_prekey.public_key())
            .field("onetime_prekey", &self.onetime_prekey.public_key())
            .finish_non_exhaustive()
    }
}

/// Initial message sent by Alice to Bob to initiate X3DH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    /// Alice's identity public key
    pub identity_key: IdentityPublicKey,

    /// Alice's ephemeral public key
    pub ephemeral_key: PublicKey,

    /// Bob's one-time prekey that Alice used, if she reported it
    pub onetime_prekey: Option<PublicKey>,
}

impl HandshakeMessage {
    pub fn from_packet(packet: &HandshakePacket) -> Result<Self> {
        let identity_key =
            IdentityPublicKey::from_hex(&packet.identity_key).map_err(|_| Error::Handshake)?;
        let ephemeral_key = PublicKey::from_hex(&packet.ephemeral_key).map_err(|_| Error::Handshake)?;
        let onetime_prekey = packet
            .onetime_prekey
            .as_deref()
            .map(PublicKey::from_hex)
            .transpose()
            .map_err(|_| Error::Handshake)?;

        Ok(Self {
            identity_key,
            ephemeral_key,
            onetime_prekey,
        })
    }

    pub fn to_packet(&self) -> Result<HandshakePacket> {
        Ok(HandshakePacket {
            identity_key: self.identity_key.to_hex()?,
            ephemeral_key: self.ephemeral_key.to_hex(),
            onetime_prekey: self.onetime_prekey.as_ref().map(PublicKey::to_hex),
        })
    }
}

impl TryFrom<&HandshakePacket> for HandshakeMessage {
    type Error = Error;

    fn try_from(packet: &HandshakePacket) -> Result<Self> {
        Self::from_packet(packet)
    }
}

/// Result of X3DH initiation by Alice.
#[derive(Debug)]
pub struct InitiatorResult {
    /// Shared secret derived from the four DH outputs
    pub shared_secret: SymmetricKey,

    /// Initial message to send to Bob
    pub message: HandshakeMessage,
}

/// Result of X3DH response by Bob.
#[derive(Debug)]
pub struct ResponderResult {
    pub shared_secret: SymmetricKey,
}

/// Initiates X3DH key agreement (Alice's side).
///
/// The ephemeral secret is dropped (and zeroized) before returning; only its
/// public half travels in the [`HandshakeMessage`].
///
/// # Errors
/// `Error::UntrustedBundle` if the bundle signature does not verify, in
/// which case no DH is performed.
pub fn initiate<R: CryptoRngCore>(
    rng: &mut R,
    alice_identity: &IdentityKeyPair,
    bob_bundle: &PreKeyBundle,
) -> Result<InitiatorResult> {
    bob_bundle.verify_signature()?;

    let alice_ephemeral = SecretKey::generate(rng)?;
    let bob_identity_dh = bob_bundle.identity_key.as_dh_key();

    // DH1 = DH(IK_A, SPK_B)
    let dh1 = alice_identity.diffie_hellman(&bob_bundle.signed_prekey);
    // DH2 = DH(EK_A, IK_B)
    let dh2 = alice_ephemeral.diffie_hellman(&bob_identity_dh);
    // DH3 = DH(EK_A, SPK_B)
    let dh3 = alice_ephemeral.diffie_hellman(&bob_bundle.signed_prekey);
    // DH4 = DH(EK_A, OPK_B)
    let dh4 = alice_ephemeral.diffie_hellman(&bob_bundle.onetime_prekey);

    let shared_secret = derive_x3dh_secret(&dh1, &dh2, &dh3, &dh4)?;

    let message = HandshakeMessage {
        identity_key: alice_identity.public_key(),
        ephemeral_key: alice_ephemeral.public_key(),
        onetime_prekey: Some(bob_bundle.onetime_prekey.clone()),
    };

    debug!(
        target: "x3dh_session::x3dh",
        ephemeral_key = ?message.ephemeral_key,
        "initiated key agreement"
    );

    Ok(InitiatorResult {
        shared_secret,
        message,
    })
}

/// Responds to X3DH initiation (Bob's side).
///
/// Does not rotate the one-time prekey; the caller decides when the new key
/// becomes current.
///
/// A message that does not report which one-time prekey it used is answered
/// with the current one and a warning is logged. If that key has been
/// rotated since the initiator fetched the bundle, the two sides derive
/// different secrets and the first message fails to decrypt.
///
/// # Errors
/// `Error::OneTimePreKeyConsumed` if the message names a one-time prekey
/// other than the current one.
pub fn respond(
    bob_identity: &IdentityKeyPair,
    prekey_state: &PreKeyState,
    initial_message: &HandshakeMessage,
) -> Result<ResponderResult> {
    match &initial_message.onetime_prekey {
        Some(used) if *used != prekey_state.onetime_prekey.public_key() => {
            return Err(Error::OneTimePreKeyConsumed);
        }
        Some(_) => {}
        None => warn!(
            target: "x3dh_session::x3dh",
            ephemeral_key = ?initial_message.ephemeral_key,
            "one-time prekey not reported, assuming the current one"
        ),
    }

    let alice_identity_dh = initial_message.identity_key.as_dh_key();
    let alice_ephemeral = &initial_message.ephemeral_key;

    // DH1 = DH(SPK_B, IK_A)
    let dh1 = prekey_state.signed_prekey.diffie_hellman(&alice_identity_dh);
    // DH2 = DH(IK_B, EK_A)
    let dh2 = bob_identity.diffie_hellman(alice_ephemeral);
    // DH3 = DH(SPK_B, EK_A)
    let dh3 = prekey_state.signed_prekey.diffie_hellman(alice_ephemeral);
    // DH4 = DH(OPK_B, EK_A)
    let dh4 = prekey_state.onetime_prekey.diffie_hellman(alice_ephemeral);

    let shared_secret = derive_x3dh_secret(&dh1, &dh2, &dh3, &dh4)?;

    debug!(
        target: "x3dh_session::x3dh",
        ephemeral_key = ?alice_ephemeral,
        "completed key agreement"
    );

    Ok(ResponderResult { shared_secret })
}
