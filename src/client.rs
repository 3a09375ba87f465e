//! Per-party engine: own identity, key store and one session per peer.

use crate::config::ClientConfig;
use crate::crypto::{self, SymmetricKey};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::keys::{IdentityKeyPair, IdentityPublicKey};
use crate::packet::{EncryptedMessage, HandshakePacket, PrekeyPacket};
use crate::session::{Origin, PendingMessage, Role, Session};
use crate::storage::{contact_key, ContactField, KeyStore, ONETIME_PREKEY};
use crate::x3dh::{self, HandshakeMessage, PreKeyBundle, PreKeyState};

use rand_core::OsRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sessions only change through whole-value assignment in `commit_*` and
/// `install`, so a panic while a lock was held cannot leave one half-updated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One party of the messaging protocol.
///
/// Operations on the same peer are serialized by a per-peer lock. Different
/// peers proceed in parallel.
pub struct Client<S: KeyStore> {
    store: S,
    config: ClientConfig,
    identity: IdentityKeyPair,
    prekeys: Mutex<PreKeyState>,
    sessions: Mutex<HashMap<Uuid, Arc<Mutex<Session>>>>,
}

impl<S: KeyStore> Client<S> {
    /// Loads or generates the identity and returns a client with no sessions.
    ///
    /// Existing sessions are read from `store` lazily, on first use.
    pub fn initialise(store: S, config: ClientConfig) -> Result<Self> {
        let identity = Identity::initialise(&store, config.persist, &mut OsRng)?;
        let (identity, prekeys) = identity.into_parts();

        Ok(Self {
            store,
            config,
            identity,
            prekeys: Mutex::new(prekeys),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Own identity public key, to hand to peers for `send`/`receive`
    #[must_use]
    pub fn identity_key(&self) -> IdentityPublicKey {
        self.identity.public_key()
    }

    /// Current prekey bundle
    #[must_use]
    pub fn bundle(&self) -> PreKeyBundle {
        lock(&self.prekeys).public_bundle(&self.identity.public_key())
    }

    /// Current prekey bundle in its wire form
    pub fn prekey_packet(&self) -> Result<PrekeyPacket> {
        self.bundle().to_packet()
    }

    /// Runs the initiator side of X3DH against `bundle` and installs the
    /// resulting session for `peer_id`, replacing any previous one.
    ///
    /// # Errors
    /// - `Error::Handshake` if the packet does not decode
    /// - `Error::UntrustedBundle` if its signature does not verify
    /// - `Error::Storage` if persisting failed. The session is installed
    ///   anyway and the handshake can be fetched again with
    ///   [`Client::handshake_message`].
    pub fn initiate(&self, peer_id: Uuid, bundle: &PrekeyPacket) -> Result<HandshakePacket> {
        let bundle = PreKeyBundle::from_packet(bundle)?;
        let result = x3dh::initiate(&mut OsRng, &self.identity, &bundle).map_err(|err| {
            warn!(target: "x3dh_session::client", peer = %peer_id, error = %err, "initiation rejected");
            err
        })?;

        let packet = result.message.to_packet()?;
        let session = Session::establish(
            result.shared_secret,
            Role::Initiator,
            Origin::Initiated {
                message: result.message,
                announced: false,
            },
        )?;

        let entries = session.store_entries(&peer_id);
        self.install(peer_id, session, &entries)?;

        info!(target: "x3dh_session::client", peer = %peer_id, "session initiated");
        Ok(packet)
    }

    /// Runs the responder side of X3DH and installs the resulting session.
    ///
    /// When `rotate_onetime_prekey` is set the one-time prekey is replaced
    /// and the new key is persisted in the same batch as the session.
    ///
    /// # Errors
    /// - `Error::Handshake` if the packet does not decode
    /// - `Error::OneTimePreKeyConsumed` if it names an old one-time prekey
    /// - `Error::Storage` if persisting failed. The session is installed anyway.
    pub fn complete(&self, peer_id: Uuid, handshake: &HandshakePacket) -> Result<()> {
        let message = HandshakeMessage::from_packet(handshake)?;

        let mut prekeys = lock(&self.prekeys);
        let result = x3dh::respond(&self.identity, &prekeys, &message).map_err(|err| {
            warn!(target: "x3dh_session::client", peer = %peer_id, error = %err, "handshake rejected");
            err
        })?;

        let session = Session::establish(
            result.shared_secret,
            Role::Responder,
            Origin::Completed {
                ephemeral_key: message.ephemeral_key,
            },
        )?;

        let mut entries = session.store_entries(&peer_id);
        if self.config.rotate_onetime_prekey {
            prekeys.rotate_onetime_prekey(&mut OsRng)?;
            entries.push((ONETIME_PREKEY.to_string(), prekeys.onetime_prekey().to_hex()));
            debug!(target: "x3dh_session::client", "one-time prekey rotated");
        }

        self.install(peer_id, session, &entries)?;

        info!(target: "x3dh_session::client", peer = %peer_id, "session completed");
        Ok(())
    }

    /// Encrypts a UTF-8 message and returns the hex ciphertext.
    pub fn send(&self, peer_id: &Uuid, plaintext: &str, peer_identity: &IdentityPublicKey) -> Result<String> {
        let ciphertext = self.send_bytes(peer_id, plaintext.as_bytes(), peer_identity)?;
        Ok(hex::encode(ciphertext))
    }

    /// Encrypts `plaintext` under the next send key.
    ///
    /// The advanced send chain is persisted before the ratchet moves. If
    /// that write fails the ratchet stays put and nothing is returned.
    pub fn send_bytes(
        &self,
        peer_id: &Uuid,
        plaintext: &[u8],
        peer_identity: &IdentityPublicKey,
    ) -> Result<Vec<u8>> {
        let slot = self.session(peer_id)?;
        let mut session = lock(&slot);
        self.send_locked(&mut session, peer_id, plaintext, peer_identity)
    }

    /// Decrypts a hex ciphertext produced by the peer's `send`.
    ///
    /// # Errors
    /// `Error::InvalidEncoding` if the input is not hex or the plaintext is
    /// not UTF-8, `Error::Decryption` if it does not authenticate.
    pub fn receive(
        &self,
        peer_id: &Uuid,
        ciphertext_hex: &str,
        peer_identity: &IdentityPublicKey,
    ) -> Result<String> {
        let ciphertext = hex::decode(ciphertext_hex)?;
        let plaintext = self.receive_bytes(peer_id, &ciphertext, peer_identity)?;
        String::from_utf8(plaintext).map_err(|_| Error::InvalidEncoding)
    }

    /// Decrypts `ciphertext` under the next receive key.
    ///
    /// The receive chain only advances once the message authenticates and
    /// the advanced chain key is persisted. A message that fails to decrypt
    /// leaves the session as it was.
    pub fn receive_bytes(
        &self,
        peer_id: &Uuid,
        ciphertext: &[u8],
        peer_identity: &IdentityPublicKey,
    ) -> Result<Vec<u8>> {
        let slot = self.session(peer_id)?;
        let mut session = lock(&slot);

        let pending = session
            .open(&self.identity, peer_identity, ciphertext)
            .map_err(|err| {
                warn!(target: "x3dh_session::client", peer = %peer_id, error = %err, "message rejected");
                err
            })?;
        self.persist_step(peer_id, ContactField::RecvRatchet, &pending)?;
        let plaintext = session.commit_receive(pending)?;

        debug!(target: "x3dh_session::client", peer = %peer_id, len = ciphertext.len(), "message received");
        Ok(plaintext)
    }

    /// Rebuilds the handshake this side sent to `peer_id`.
    ///
    /// # Errors
    /// `Error::Uninitialised` if the session was not initiated by this
    /// client in the current process.
    pub fn handshake_message(&self, peer_id: &Uuid) -> Result<HandshakePacket> {
        let slot = self.session(peer_id)?;
        let session = lock(&slot);
        let message = session.handshake().ok_or(Error::Uninitialised)?;
        message.to_packet()
    }

    /// The X3DH secret the session with `peer_id` was seeded from
    pub fn session_secret(&self, peer_id: &Uuid) -> Result<SymmetricKey> {
        let slot = self.session(peer_id)?;
        let secret = lock(&slot).secret().clone();
        Ok(secret)
    }

    pub fn has_session(&self, peer_id: &Uuid) -> Result<bool> {
        match self.session(peer_id) {
            Ok(_) => Ok(true),
            Err(Error::UnknownSession) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Encrypts into an envelope.
    ///
    /// The first envelope after [`Client::initiate`] also carries the
    /// handshake, so the peer can complete it from the envelope alone.
    pub fn seal_envelope(
        &self,
        peer_id: &Uuid,
        plaintext: &str,
        peer_identity: &IdentityPublicKey,
    ) -> Result<EncryptedMessage> {
        let slot = self.session(peer_id)?;
        let mut session = lock(&slot);

        let handshake = session
            .pending_announcement()
            .map(HandshakeMessage::to_packet)
            .transpose()?;
        let ciphertext = self.send_locked(&mut session, peer_id, plaintext.as_bytes(), peer_identity)?;
        if handshake.is_some() {
            session.mark_announced();
        }

        Ok(EncryptedMessage {
            ciphertext: hex::encode(ciphertext),
            handshake,
        })
    }

    /// Opens an envelope, completing its handshake first if it carries one
    /// this client has not completed yet.
    pub fn open_envelope(
        &self,
        peer_id: &Uuid,
        envelope: &EncryptedMessage,
        peer_identity: &IdentityPublicKey,
    ) -> Result<String> {
        if let Some(handshake) = &envelope.handshake {
            if self.needs_handshake(peer_id, handshake)? {
                self.complete(*peer_id, handshake)?;
            }
        }
        self.receive(peer_id, &envelope.ciphertext, peer_identity)
    }

    /// Hashes an account password with the configured bcrypt cost.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        crypto::hash_password(password, self.config.password_cost)
    }

    #[must_use]
    pub fn verify_password(password: &str, hash: &str) -> bool {
        crypto::verify_password(password, hash)
    }

    fn needs_handshake(&self, peer_id: &Uuid, handshake: &HandshakePacket) -> Result<bool> {
        let message = HandshakeMessage::from_packet(handshake)?;
        match self.session(peer_id) {
            Ok(slot) => {
                let session = lock(&slot);
                Ok(!session.completed_with(&message.ephemeral_key))
            }
            Err(Error::UnknownSession) => Ok(true),
            Err(err) => Err(err),
        }
    }

    fn send_locked(
        &self,
        session: &mut Session,
        peer_id: &Uuid,
        plaintext: &[u8],
        peer_identity: &IdentityPublicKey,
    ) -> Result<Vec<u8>> {
        let pending = session.seal(&self.identity, peer_identity, plaintext)?;
        self.persist_step(peer_id, ContactField::SendRatchet, &pending)?;
        let ciphertext = session.commit_send(pending)?;

        debug!(target: "x3dh_session::client", peer = %peer_id, len = ciphertext.len(), "message sent");
        Ok(ciphertext)
    }

    fn persist_step(&self, peer_id: &Uuid, field: ContactField, pending: &PendingMessage) -> Result<()> {
        if !self.config.persist {
            return Ok(());
        }
        self.store
            .set(&contact_key(peer_id, field), &pending.encoded_chain_key())
            .map_err(|err| {
                warn!(target: "x3dh_session::client", peer = %peer_id, error = %err, "ratchet not persisted");
                err
            })
    }

    /// Session for `peer_id`, read from the store if not yet in memory.
    fn session(&self, peer_id: &Uuid) -> Result<Arc<Mutex<Session>>> {
        let mut sessions = lock(&self.sessions);
        if let Some(slot) = sessions.get(peer_id) {
            return Ok(Arc::clone(slot));
        }

        if !self.config.persist {
            return Err(Error::UnknownSession);
        }

        let session = Session::load(&self.store, peer_id)?.ok_or(Error::UnknownSession)?;
        debug!(target: "x3dh_session::client", peer = %peer_id, "session restored");

        let slot = Arc::new(Mutex::new(session));
        sessions.insert(*peer_id, Arc::clone(&slot));
        Ok(slot)
    }

    /// Installs a new session, then persists `entries` while holding the
    /// peer's lock but not the session map.
    ///
    /// The in-memory session is replaced even if the write fails.
    fn install(&self, peer_id: Uuid, session: Session, entries: &[(String, String)]) -> Result<()> {
        let mut sessions = lock(&self.sessions);
        let existing = sessions.get(&peer_id).map(Arc::clone);
        if let Some(slot) = existing {
            drop(sessions);
            let mut current = lock(&slot);
            *current = session;
            return self.persist_session(&peer_id, entries);
        }

        let slot = Arc::new(Mutex::new(session));
        let _current = lock(&slot);
        sessions.insert(peer_id, Arc::clone(&slot));
        drop(sessions);
        self.persist_session(&peer_id, entries)
    }

    fn persist_session(&self, peer_id: &Uuid, entries: &[(String, String)]) -> Result<()> {
        if !self.config.persist {
            return Ok(());
        }
        self.store.set_all(entries).map_err(|err| {
            warn!(target: "x3dh_session::client", peer = %peer_id, error = %err, "session not persisted");
            err
        })
    }
}

impl<S: KeyStore> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
