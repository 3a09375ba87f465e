use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand_core::OsRng;
use x3dh_session::keys::IdentityKeyPair;
use x3dh_session::x3dh::{initiate, respond, PreKeyState};

fn bench_key_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_generation");

    group.bench_function("identity_keypair", |b| {
        b.iter(|| black_box(IdentityKeyPair::generate(&mut OsRng).unwrap()));
    });

    group.bench_function("prekey_state", |b| {
        let identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
        b.iter(|| black_box(PreKeyState::generate(&mut OsRng, &identity).unwrap()));
    });

    group.finish();
}

fn bench_x3dh_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("x3dh_handshake");

    // Setup
    let alice_identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
    let bob_identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
    let bob_prekeys = PreKeyState::generate(&mut OsRng, &bob_identity).unwrap();
    let bundle = bob_prekeys.public_bundle(&bob_identity.public_key());

    group.bench_function("initiate", |b| {
        b.iter(|| black_box(initiate(&mut OsRng, &alice_identity, &bundle).unwrap()));
    });

    group.bench_function("respond", |b| {
        let init_result = initiate(&mut OsRng, &alice_identity, &bundle).unwrap();
        b.iter(|| black_box(respond(&bob_identity, &bob_prekeys, &init_result.message).unwrap()));
    });

    group.bench_function("full_handshake", |b| {
        b.iter(|| {
            let alice = IdentityKeyPair::generate(&mut OsRng).unwrap();
            let bob_identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
            let bob_state = PreKeyState::generate(&mut OsRng, &bob_identity).unwrap();
            let bundle = bob_state.public_bundle(&bob_identity.public_key());

            let init = initiate(&mut OsRng, &alice, &bundle).unwrap();
            let resp = respond(&bob_identity, &bob_state, &init.message).unwrap();

            black_box((init, resp))
        });
    });

    group.finish();
}

fn bench_signature_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("signature_verification");

    let identity = IdentityKeyPair::generate(&mut OsRng).unwrap();
    let prekeys = PreKeyState::generate(&mut OsRng, &identity).unwrap();
    let bundle = prekeys.public_bundle(&identity.public_key());

    group.bench_function("verify_bundle_signature", |b| {
        b.iter(|| black_box(bundle.verify_signature().unwrap()));
    });

    group.bench_function("bundle_from_packet", |b| {
        let packet = bundle.to_packet().unwrap();
        b.iter(|| black_box(x3dh_session::PreKeyBundle::from_packet(&packet).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_key_generation,
    bench_x3dh_handshake,
    bench_signature_verification
);

criterion_main!(benches);
