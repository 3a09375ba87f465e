//! Per-peer session state: the X3DH secret and its three ratchets.
//!
//! The root ratchet is seeded from the shared secret and its derived-key
//! stream is split into a send and a receive sub-secret. The initiator reads
//! its send secret first, the responder its receive secret first, so each
//! side's send chain is the other side's receive chain.
//!
//! Every message advances one chain by a DH input that both peers can
//! compute from their long-term identity keys:
//!
//! ```text
//! S    = DH(IK_self, IK_peer)
//! salt = S XOR 0xFF..
//! MK, IV = chain.extract(S, salt)
//! ```

use crate::crypto::{aead_open, aead_seal, message_salt, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{IdentityKeyPair, IdentityPublicKey, PublicKey};
use crate::ratchet::{Ratchet, RatchetStep};
use crate::storage::{contact_key, ContactField, KeyStore};
use crate::x3dh::HandshakeMessage;
use uuid::Uuid;

/// Which side of the handshake a session was established on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// How the in-memory session came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Initiated locally. `announced` is set once the handshake has ridden
    /// along with an outgoing envelope.
    Initiated {
        message: HandshakeMessage,
        announced: bool,
    },
    /// Completed from a peer's handshake
    Completed { ephemeral_key: PublicKey },
    /// Read back from the key store, initiated by this side or by an
    /// earlier process
    Restored,
}

/// A sealed or opened message whose ratchet step is not yet applied.
///
/// The output only becomes available through [`Session::commit_send`] or
/// [`Session::commit_receive`].
pub struct PendingMessage {
    output: Vec<u8>,
    step: RatchetStep,
}

impl std::fmt::Debug for PendingMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingMessage")
            .field("len", &self.output.len())
            .finish_non_exhaustive()
    }
}

impl PendingMessage {
    /// Chain key to persist before committing
    #[must_use]
    pub fn encoded_chain_key(&self) -> String {
        self.step.encode()
    }
}

/// Session with one peer
#[derive(Debug)]
pub struct Session {
    secret: SymmetricKey,
    root: Ratchet,
    send: Ratchet,
    recv: Ratchet,
    origin: Origin,
}

impl Session {
    /// Derives the three ratchets from a freshly agreed secret.
    pub fn establish(secret: SymmetricKey, role: Role, origin: Origin) -> Result<Self> {
        let mut root = Ratchet::seed(&secret);
        let first = root.next_secret()?;
        let second = root.next_secret()?;

        let (send_secret, recv_secret) = match role {
            Role::Initiator => (first, second),
            Role::Responder => (second, first),
        };

        Ok(Self {
            secret,
            root,
            send: Ratchet::seed(&send_secret),
            recv: Ratchet::seed(&recv_secret),
            origin,
        })
    }

    /// Reads a persisted session.
    ///
    /// Returns `Ok(None)` if nothing is stored for `peer_id`. The send and
    /// receive chains are reseeded with the complement of the secret as salt.
    /// A stored completing ephemeral key restores [`Origin::Completed`].
    ///
    /// # Errors
    /// `Error::CorruptKeyStore` if the entries are incomplete or undecodable.
    pub fn load<S: KeyStore + ?Sized>(store: &S, peer_id: &Uuid) -> Result<Option<Self>> {
        let read = |field| -> Result<Option<String>> {
            Ok(store
                .get(&contact_key(peer_id, field))?
                .filter(|value| !value.is_empty()))
        };

        let secret = read(ContactField::Secret)?;
        let root = read(ContactField::RootRatchet)?;
        let send = read(ContactField::SendRatchet)?;
        let recv = read(ContactField::RecvRatchet)?;
        let ephemeral_key = read(ContactField::EphemeralKey)?;

        let (secret, root, send, recv) = match (secret, root, send, recv) {
            (None, None, None, None) => return Ok(None),
            (Some(secret), Some(root), Some(send), Some(recv)) => (secret, root, send, recv),
            _ => {
                return Err(Error::CorruptKeyStore(format!(
                    "incomplete session for {peer_id}"
                )))
            }
        };

        let secret =
            SymmetricKey::from_hex(&secret).map_err(corrupt(peer_id, ContactField::Secret))?;
        let salt = message_salt(secret.as_bytes());
        let origin = match ephemeral_key {
            Some(encoded) => Origin::Completed {
                ephemeral_key: PublicKey::from_hex(&encoded)
                    .map_err(corrupt(peer_id, ContactField::EphemeralKey))?,
            },
            None => Origin::Restored,
        };

        Ok(Some(Self {
            root: Ratchet::decode(&root, None)
                .map_err(corrupt(peer_id, ContactField::RootRatchet))?,
            send: Ratchet::decode(&send, Some(salt.as_slice()))
                .map_err(corrupt(peer_id, ContactField::SendRatchet))?,
            recv: Ratchet::decode(&recv, Some(salt.as_slice()))
                .map_err(corrupt(peer_id, ContactField::RecvRatchet))?,
            secret,
            origin,
        }))
    }

    /// Every entry of this session in its store encoding.
    ///
    /// The ephemeral key entry is always written, empty unless the session
    /// was completed from a peer's handshake, so a later initiation clears
    /// the key left by an earlier completion.
    #[must_use]
    pub fn store_entries(&self, peer_id: &Uuid) -> Vec<(String, String)> {
        let ephemeral_key = match &self.origin {
            Origin::Completed { ephemeral_key } => ephemeral_key.to_hex(),
            _ => String::new(),
        };
        vec![
            (contact_key(peer_id, ContactField::Secret), self.secret.to_hex()),
            (contact_key(peer_id, ContactField::RootRatchet), self.root.encode()),
            (contact_key(peer_id, ContactField::SendRatchet), self.send.encode()),
            (contact_key(peer_id, ContactField::RecvRatchet), self.recv.encode()),
            (contact_key(peer_id, ContactField::EphemeralKey), ephemeral_key),
        ]
    }

    /// Encrypts without advancing the send chain.
    pub fn seal(
        &self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublicKey,
        plaintext: &[u8],
    ) -> Result<PendingMessage> {
        let step = message_step(&self.send, identity, peer)?;
        let output = aead_seal(step.keys().key(), plaintext, step.keys().iv())?;
        Ok(PendingMessage { output, step })
    }

    /// Decrypts without advancing the receive chain.
    ///
    /// # Errors
    /// `Error::Decryption` if the ciphertext does not authenticate under the
    /// next receive key. The session is unchanged.
    pub fn open(
        &self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublicKey,
        ciphertext: &[u8],
    ) -> Result<PendingMessage> {
        let step = message_step(&self.recv, identity, peer)?;
        let output = aead_open(step.keys().key(), ciphertext, step.keys().iv())?;
        Ok(PendingMessage { output, step })
    }

    /// Advances the send chain and releases the ciphertext.
    pub fn commit_send(&mut self, pending: PendingMessage) -> Result<Vec<u8>> {
        let PendingMessage { output, step } = pending;
        self.send.commit(step)?;
        Ok(output)
    }

    /// Advances the receive chain and releases the plaintext.
    pub fn commit_receive(&mut self, pending: PendingMessage) -> Result<Vec<u8>> {
        let PendingMessage { output, step } = pending;
        self.recv.commit(step)?;
        Ok(output)
    }

    /// Seals and commits in one go, for callers that do not persist.
    pub fn encrypt(
        &mut self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        let pending = self.seal(identity, peer, plaintext)?;
        self.commit_send(pending)
    }

    /// Opens and commits in one go, for callers that do not persist.
    pub fn decrypt(
        &mut self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublicKey,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let pending = self.open(identity, peer, ciphertext)?;
        self.commit_receive(pending)
    }

    #[must_use]
    pub fn secret(&self) -> &SymmetricKey {
        &self.secret
    }

    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Handshake this side initiated, if any
    #[must_use]
    pub fn handshake(&self) -> Option<&HandshakeMessage> {
        match &self.origin {
            Origin::Initiated { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Handshake still to be attached to the next outgoing envelope
    #[must_use]
    pub fn pending_announcement(&self) -> Option<&HandshakeMessage> {
        match &self.origin {
            Origin::Initiated {
                message,
                announced: false,
            } => Some(message),
            _ => None,
        }
    }

    pub fn mark_announced(&mut self) {
        if let Origin::Initiated { announced, .. } = &mut self.origin {
            *announced = true;
        }
    }

    /// Whether this session was completed from the handshake carrying
    /// `ephemeral_key`
    #[must_use]
    pub fn completed_with(&self, ephemeral_key: &PublicKey) -> bool {
        matches!(&self.origin, Origin::Completed { ephemeral_key: ours } if ours == ephemeral_key)
    }
}

fn corrupt(peer_id: &Uuid, field: ContactField) -> impl Fn(Error) -> Error + '_ {
    move |err| Error::CorruptKeyStore(format!("{}: {err}", contact_key(peer_id, field)))
}

fn message_step(
    chain: &Ratchet,
    identity: &IdentityKeyPair,
    peer: &IdentityPublicKey,
) -> Result<RatchetStep> {
    let shared = identity.diffie_hellman(&peer.as_dh_key());
    let salt = message_salt(shared.as_bytes());
    chain.step(shared.as_bytes(), &salt)
}
