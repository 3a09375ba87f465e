#![no_main]

use libfuzzer_sys::fuzz_target;
use x3dh_session::keys::{IdentityPublicKey, PublicKey};
use x3dh_session::x3dh::{HandshakeMessage, PreKeyBundle};
use x3dh_session::{HandshakePacket, PrekeyPacket};

fuzz_target!(|data: &[u8]| {
    // Raw key decoders must reject, never panic
    let _ = PublicKey::from_bytes(data);
    let _ = IdentityPublicKey::from_der(data);

    // Arbitrary JSON through the packet decoders
    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(packet) = PrekeyPacket::from_json(json) {
            if let Ok(bundle) = PreKeyBundle::from_packet(&packet) {
                // Verification may fail, must not panic
                let _ = bundle.verify_signature();
            }
        }
        if let Ok(packet) = HandshakePacket::from_json(json) {
            let _ = HandshakeMessage::from_packet(&packet);
        }
    }

    // Split the input into the four hex fields of a bundle
    let quarter = data.len() / 4;
    if quarter > 0 {
        let packet = PrekeyPacket {
            identity_key: hex::encode(&data[..quarter]),
            signed_prekey: hex::encode(&data[quarter..2 * quarter]),
            signed_key: hex::encode(&data[2 * quarter..3 * quarter]),
            onetime_prekey: hex::encode(&data[3 * quarter..]),
        };
        if let Ok(bundle) = PreKeyBundle::from_packet(&packet) {
            let _ = bundle.verify_signature();
        }
    }
});
