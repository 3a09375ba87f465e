//! Fuzz target for rebuilding ratchets from stored strings

#![no_main]

use libfuzzer_sys::fuzz_target;
use x3dh_session::storage::{contact_key, ContactField};
use x3dh_session::{KeyStore, MemoryKeyStore, Ratchet, Session};

fuzz_target!(|data: &[u8]| {
    let Ok(encoded) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(mut ratchet) = Ratchet::decode(encoded, Some(data)) {
        let _ = ratchet.extract(data, data);
        let _ = ratchet.next_secret();
    }

    // A store holding garbage must load as an error or a session, never panic
    let store = MemoryKeyStore::new();
    let peer = uuid::Uuid::nil();
    for field in [
        ContactField::Secret,
        ContactField::RootRatchet,
        ContactField::SendRatchet,
        ContactField::RecvRatchet,
    ] {
        let _ = store.set(&contact_key(&peer, field), encoded);
    }
    let _ = Session::load(&store, &peer);
});
