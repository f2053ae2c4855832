//! Integration tests for chunked import and export

mod common;

use ::common::crypto::sha256;
use ::common::device::{sw, Device, Instruction};
use ::common::host::ExportTrailer;
use ::common::record::{ExportPolicy, SecretType, STORE_TYPE_TAG};
use ::common::transfer::{Phase, TransportMode};

use common::{connect, long_payload, password_header, provisioned_device};

fn stored_bytes(device: &Device, id: u16) -> Vec<u8> {
    let store = device.store();
    let handle = store.find(STORE_TYPE_TAG, id).unwrap();
    store.data(&handle).unwrap().to_vec()
}

#[test]
fn test_generated_seed_exports_with_same_id_and_fingerprint() {
    let mut device = provisioned_device();
    let authentikey = device.authentikey();
    let mut card = connect(&mut device);

    let generated = card
        .generate_master_seed(32, ExportPolicy::Allowed, b"test")
        .unwrap();
    let exported = card.export_plain(generated.id).unwrap();
    assert_eq!(exported.id, generated.id);
    assert_eq!(exported.header.fingerprint, generated.fingerprint);
    assert_eq!(exported.header.secret_type, SecretType::MasterSeed);
    assert_eq!(exported.header.label(), b"test");
    assert_eq!(exported.header.counters.plain, 1);

    // [size | seed]
    assert_eq!(exported.payload.len(), 33);
    assert_eq!(exported.payload[0], 32);
    assert_eq!(&sha256(&exported.payload)[..4], &generated.fingerprint);
    exported.verify(&authentikey).unwrap();
}

#[test]
fn test_plain_round_trip() {
    let mut device = provisioned_device();
    let authentikey = device.authentikey();
    let mut card = connect(&mut device);

    for len in [0usize, 1, 15, 16, 17, 127, 128, 129, 250] {
        let payload = long_payload(len);
        let header = password_header(b"mail", ExportPolicy::Allowed);
        let imported = card.import_plain(&header, &payload, 128).unwrap();
        assert_eq!(&imported.fingerprint, &sha256(&payload)[..4]);

        let exported = card.export_plain(imported.id).unwrap();
        assert_eq!(&exported.payload[..], &payload[..]);
        assert_eq!(exported.header.fingerprint, imported.fingerprint);
        exported.verify(&authentikey).unwrap();
    }
}

#[test]
fn test_tampered_export_fails_verification() {
    let mut device = provisioned_device();
    let authentikey = device.authentikey();
    let mut card = connect(&mut device);
    let imported = card
        .import_plain(&password_header(b"", ExportPolicy::Allowed), b"hunter22", 128)
        .unwrap();
    let mut exported = card.export_plain(imported.id).unwrap();
    exported.payload[0] ^= 1;
    assert!(exported.verify(&authentikey).is_err());
}

#[test]
fn test_chunking_does_not_change_stored_record() {
    let mut device = provisioned_device();
    let payload = long_payload(200);
    let header = password_header(b"chunks", ExportPolicy::Allowed);

    let mut ids = Vec::new();
    {
        let mut card = connect(&mut device);
        for chunk_size in [1usize, 5, 16, 33, 128] {
            ids.push(card.import_plain(&header, &payload, chunk_size).unwrap().id);
        }
    }
    let reference = stored_bytes(&device, ids[0]);
    for id in &ids[1..] {
        assert_eq!(stored_bytes(&device, *id), reference);
    }
}

#[test]
fn test_relabelled_plain_import_keeps_fingerprint() {
    let mut device = provisioned_device();
    let mut card = connect(&mut device);
    let generated = card
        .generate_master_seed(16, ExportPolicy::Allowed, b"before")
        .unwrap();
    let mut exported = card.export_plain(generated.id).unwrap();
    exported.header.set_label(b"after").unwrap();

    let reimported = card
        .import_plain(&exported.header, &exported.payload, 128)
        .unwrap();
    assert_eq!(reimported.fingerprint, generated.fingerprint);
    let entries = card.list_headers().unwrap();
    let entry = entries.iter().find(|e| e.id == reimported.id).unwrap();
    assert_eq!(entry.header.label(), b"after");
}

#[test]
fn test_secure_peer_transfer_between_devices() {
    let mut alice = provisioned_device();
    let mut bob = provisioned_device();
    let (alice_key, bob_key) = (alice.authentikey(), bob.authentikey());

    let mut a = connect(&mut alice);
    let mut b = connect(&mut bob);
    let bob_on_alice = a.import_public_key(&bob_key, b"bob").unwrap();
    let alice_on_bob = b.import_public_key(&alice_key, b"alice").unwrap();

    let payload = long_payload(280);
    let header = password_header(b"shared", ExportPolicy::Allowed);
    let original = a.import_plain(&header, &payload, 100).unwrap();

    let mut exported = a.export_secure(original.id, bob_on_alice.id).unwrap();
    assert!(matches!(exported.trailer, ExportTrailer::Mac { .. }));
    assert_ne!(&exported.payload[..payload.len()], &payload[..]);
    assert_eq!(exported.header.counters.secure, 1);

    // the label travels outside the mac
    exported.header.set_label(b"renamed").unwrap();
    let received = b.import_secure(&exported, alice_on_bob.id).unwrap();
    assert_eq!(received.fingerprint, original.fingerprint);

    let on_bob = b.export_plain(received.id).unwrap();
    assert_eq!(&on_bob.payload[..], &payload[..]);
    assert_eq!(on_bob.header.label(), b"renamed");
    on_bob.verify(&bob_key).unwrap();

    let entries = a.list_headers().unwrap();
    let pubkey = entries.iter().find(|e| e.id == bob_on_alice.id).unwrap();
    assert_eq!(pubkey.header.counters.pubkey, 1);
}

#[test]
fn test_secure_import_rejects_tampering() {
    let mut alice = provisioned_device();
    let mut bob = provisioned_device();
    let (alice_key, bob_key) = (alice.authentikey(), bob.authentikey());
    let mut a = connect(&mut alice);
    let mut b = connect(&mut bob);
    let bob_on_alice = a.import_public_key(&bob_key, b"bob").unwrap();
    let alice_on_bob = b.import_public_key(&alice_key, b"alice").unwrap();

    let seed = a
        .generate_master_seed(64, ExportPolicy::SecureOnly, b"")
        .unwrap();
    let exported = a.export_secure(seed.id, bob_on_alice.id).unwrap();

    let mut flipped = exported.clone();
    flipped.payload[3] ^= 0x80;
    let err = b.import_secure(&flipped, alice_on_bob.id).unwrap_err();
    assert_eq!(err.status(), Some(sw::SECURE_IMPORT_WRONG_MAC));

    // the authenticated header is covered too
    let mut retyped = exported.clone();
    retyped.header.export_policy = ExportPolicy::Allowed;
    let err = b.import_secure(&retyped, alice_on_bob.id).unwrap_err();
    assert_eq!(err.status(), Some(sw::SECURE_IMPORT_WRONG_MAC));

    let stored = b.import_secure(&exported, alice_on_bob.id).unwrap();
    assert_eq!(stored.fingerprint, seed.fingerprint);
    // still secure-only on the receiving side
    let err = b.export_plain(stored.id).unwrap_err();
    assert_eq!(err.status(), Some(sw::EXPORT_NOT_ALLOWED));
}

#[test]
fn test_forbidden_records_never_leave() {
    let mut device = provisioned_device();
    let peer = provisioned_device().authentikey();
    let mut card = connect(&mut device);
    let peer_record = card.import_public_key(&peer, b"peer").unwrap();
    let secret = card.generate_2fa(ExportPolicy::Forbidden, b"otp").unwrap();

    for _ in 0..2 {
        let err = card.export_plain(secret.id).unwrap_err();
        assert_eq!(err.status(), Some(sw::EXPORT_NOT_ALLOWED));
        let err = card.export_secure(secret.id, peer_record.id).unwrap_err();
        assert_eq!(err.status(), Some(sw::EXPORT_NOT_ALLOWED));
    }
    let entries = card.list_headers().unwrap();
    let entry = entries.iter().find(|e| e.id == secret.id).unwrap();
    assert_eq!(entry.header.counters.plain, 0);
    assert_eq!(entry.header.counters.secure, 0);
}

#[test]
fn test_unrelated_command_breaks_the_lock() {
    let mut device = provisioned_device();
    let mut card = connect(&mut device);
    let plain = TransportMode::Plain as u8;
    let header = password_header(b"lock", ExportPolicy::Allowed).encode();

    let reply = card
        .transmit(Instruction::ImportSecret, plain, Phase::Init as u8, &header)
        .unwrap();
    assert!(reply.is_ok());
    let reply = card
        .transmit(Instruction::ListSecretHeaders, 0, 1, &[])
        .unwrap();
    assert_eq!(reply.status, sw::LOCK_ERROR);

    for phase in [Phase::Process, Phase::Finalize] {
        let reply = card
            .transmit(Instruction::ImportSecret, plain, phase as u8, &[0, 2, 0xAB, 0xCD])
            .unwrap();
        assert_eq!(reply.status, sw::LOCK_ERROR);
    }
    assert!(card.list_headers().unwrap().is_empty());
}

#[test]
fn test_mode_must_match_the_lock() {
    let mut device = provisioned_device();
    let mut card = connect(&mut device);
    let seed = card
        .generate_master_seed(32, ExportPolicy::Allowed, b"")
        .unwrap();
    let reply = card
        .transmit(
            Instruction::ExportSecret,
            TransportMode::Plain as u8,
            Phase::Init as u8,
            &seed.id.to_be_bytes(),
        )
        .unwrap();
    assert!(reply.is_ok());
    let reply = card
        .transmit(
            Instruction::ExportSecret,
            TransportMode::SecurePeer as u8,
            Phase::Process as u8,
            &[],
        )
        .unwrap();
    assert_eq!(reply.status, sw::INVALID_PARAMETER);
    assert!(!card.device().has_transfer_lock());
}

#[test]
fn test_missing_records() {
    let mut device = provisioned_device();
    let mut card = connect(&mut device);
    let err = card.export_plain(0x4242).unwrap_err();
    assert_eq!(err.status(), Some(sw::OBJECT_NOT_FOUND));

    let seed = card
        .generate_master_seed(32, ExportPolicy::Allowed, b"")
        .unwrap();
    // a secure export needs a stored counterpart key
    let err = card.export_secure(seed.id, 0x4242).unwrap_err();
    assert_eq!(err.status(), Some(sw::OBJECT_NOT_FOUND));
    let err = card.reset_secret(seed.id).unwrap_err();
    assert_eq!(err.status(), Some(sw::UNSUPPORTED));
}
