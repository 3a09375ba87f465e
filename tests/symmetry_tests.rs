use rand_core::OsRng;
use x3dh_session::{
    crypto::message_salt,
    session::{Origin, Role},
    x3dh::{initiate, respond},
    Error, HandshakeMessage, IdentityKeyPair, PreKeyState, Ratchet, SecretKey, Session,
    SymmetricKey,
};

fn identity() -> IdentityKeyPair {
    IdentityKeyPair::generate(&mut OsRng).unwrap()
}

#[test]
fn test_x3dh_formal_symmetry_multiple_runs() {
    for _ in 0..50 {
        let alice_identity = identity();
        let bob_identity = identity();

        let bob_prekeys = PreKeyState::generate(&mut OsRng, &bob_identity).unwrap();
        let bundle = bob_prekeys.public_bundle(&bob_identity.public_key());

        let alice_x3dh = initiate(&mut OsRng, &alice_identity, &bundle).unwrap();
        let bob_x3dh = respond(&bob_identity, &bob_prekeys, &alice_x3dh.message).unwrap();

        assert_eq!(
            alice_x3dh.shared_secret, bob_x3dh.shared_secret,
            "X3DH symmetry violated"
        );
    }
}

#[test]
fn test_identity_substitution_breaks_agreement() {
    let alice_identity = identity();
    let bob_identity = identity();
    let attempter_identity = identity();

    let bob_prekeys = PreKeyState::generate(&mut OsRng, &bob_identity).unwrap();
    let mut modified_bundle = bob_prekeys.public_bundle(&bob_identity.public_key());
    modified_bundle.identity_key = attempter_identity.public_key();

    let result = initiate(&mut OsRng, &alice_identity, &modified_bundle);
    assert_eq!(result.unwrap_err(), Error::UntrustedBundle);
}

#[test]
fn test_dh_input_sensitivity() {
    let alice_identity = identity();
    let bob_identity = identity();

    let bob_prekeys = PreKeyState::generate(&mut OsRng, &bob_identity).unwrap();
    let bundle = bob_prekeys.public_bundle(&bob_identity.public_key());
    let alice_x3dh = initiate(&mut OsRng, &alice_identity, &bundle).unwrap();

    // Each substituted input must move the responder off the initiator's secret
    let substitutions = [
        HandshakeMessage {
            ephemeral_key: SecretKey::generate(&mut OsRng).unwrap().public_key(),
            ..alice_x3dh.message.clone()
        },
        HandshakeMessage {
            identity_key: identity().public_key(),
            ..alice_x3dh.message.clone()
        },
    ];

    for message in &substitutions {
        let bob_x3dh = respond(&bob_identity, &bob_prekeys, message).unwrap();
        assert_ne!(alice_x3dh.shared_secret, bob_x3dh.shared_secret);
    }
}

#[test]
fn test_root_chain_key_separation() {
    let secret = SymmetricKey::from_bytes([0x42; 32]);
    let mut root = Ratchet::seed(&secret);

    let first = root.next_secret().unwrap();
    let second = root.next_secret().unwrap();

    assert_ne!(first, second, "send and receive secrets must differ");
    assert_ne!(&first, &secret);
    assert_eq!(root.chain_key(), &secret, "stream reads do not move the chain key");
}

#[test]
fn test_session_role_mirroring() {
    let alice = identity();
    let bob = identity();
    let secret = SymmetricKey::from_bytes([0x11; 32]);

    let mut alice_session = Session::establish(secret.clone(), Role::Initiator, Origin::Restored).unwrap();
    let mut bob_session = Session::establish(secret, Role::Responder, Origin::Restored).unwrap();

    for i in 0..20u8 {
        let ct = alice_session.encrypt(&alice, &bob.public_key(), &[i; 40]).unwrap();
        assert_eq!(bob_session.decrypt(&bob, &alice.public_key(), &ct).unwrap(), vec![i; 40]);

        let ct = bob_session.encrypt(&bob, &alice.public_key(), &[i; 3]).unwrap();
        assert_eq!(alice_session.decrypt(&alice, &bob.public_key(), &ct).unwrap(), vec![i; 3]);
    }
}

#[test]
fn test_same_role_sessions_do_not_interoperate() {
    let alice = identity();
    let bob = identity();
    let secret = SymmetricKey::from_bytes([0x22; 32]);

    let mut alice_session = Session::establish(secret.clone(), Role::Initiator, Origin::Restored).unwrap();
    let mut bob_session = Session::establish(secret, Role::Initiator, Origin::Restored).unwrap();

    let ct = alice_session.encrypt(&alice, &bob.public_key(), b"hello").unwrap();
    assert_eq!(
        bob_session.decrypt(&bob, &alice.public_key(), &ct).unwrap_err(),
        Error::Decryption
    );
}

#[test]
fn test_message_dh_is_symmetric() {
    let alice = identity();
    let bob = identity();

    let from_alice = alice.diffie_hellman(&bob.public_key().as_dh_key());
    let from_bob = bob.diffie_hellman(&alice.public_key().as_dh_key());

    assert_eq!(from_alice.as_bytes(), from_bob.as_bytes());
    assert_eq!(
        message_salt(from_alice.as_bytes()),
        message_salt(from_bob.as_bytes())
    );
}

#[test]
fn test_ratchet_state_persistence() {
    let secret = SymmetricKey::from_bytes([0x33; 32]);
    let salt = message_salt(secret.as_bytes());
    let input = [0x44; 32];

    let mut sender = Ratchet::seed(&secret);
    let mut receiver = Ratchet::seed(&secret);

    for _ in 0..5 {
        let sent = sender.extract(&input, &salt).unwrap();
        let received = receiver.extract(&input, &salt).unwrap();
        assert_eq!(sent.key(), received.key());
        assert_eq!(sent.iv(), received.iv());
    }

    // Both sides restart from their persisted chain keys
    let mut sender = Ratchet::decode(&sender.encode(), Some(salt.as_slice())).unwrap();
    let mut receiver = Ratchet::decode(&receiver.encode(), Some(salt.as_slice())).unwrap();

    let sent = sender.extract(&input, &salt).unwrap();
    let received = receiver.extract(&input, &salt).unwrap();
    assert_eq!(sent.key(), received.key());
    assert_eq!(sent.iv(), received.iv());
}

#[test]
fn test_ratchet_serialization_determinism() {
    let secret = SymmetricKey::from_bytes([0x55; 32]);
    let mut ratchet = Ratchet::seed(&secret);
    ratchet.extract(b"input", b"salt").unwrap();

    let encoded1 = ratchet.encode();
    let encoded2 = ratchet.encode();
    assert_eq!(encoded1, encoded2);

    let restored = Ratchet::decode(&encoded1, None).unwrap();
    assert_eq!(restored.encode(), encoded1);
}
