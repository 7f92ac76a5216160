//! S4: a v3+ request whose outer envelope id disagrees with the inner
//! load's id is rejected outright (spec §4.5 structural invariants, §8 S4).

use salt_master_core::crypto::{self, Crypticle};
use salt_master_core::wire::{EncMode, Envelope, EnvelopeLoad};

use crate::harness::{auth_frame, decode_reply, fixture_with, minion, token_for};

#[tokio::test]
async fn mismatched_outer_and_inner_id_is_rejected() {
    let fx = fixture_with(|c| c.auto_accept = true);
    let alice = minion();

    fx.master.handle_request(&auth_frame("alice", &alice, 3), 0).await;

    let tok = token_for(&alice);
    let secret = fx.master.vault.snapshot();
    // The decrypt key is derived from the *outer* envelope id, so to reach
    // the inner/outer id equality check the ciphertext must actually
    // decrypt — it's keyed on "alice" but claims to be from "mallory".
    let session_key = crypto::derive_session_key(&secret.aes, "alice");
    let load = serde_json::json!({ "cmd": "test.ping", "id": "mallory", "ts": 0, "tok": tok });
    let ciphertext = Crypticle::new(&session_key).dumps(&load, None).unwrap();

    let frame = Envelope {
        enc: EncMode::Aes,
        version: 3,
        id: Some("alice".to_string()),
        load: EnvelopeLoad::Cipher(ciphertext),
    }
    .encode()
    .unwrap();

    let reply = fx.master.handle_request(&frame, 0).await;
    assert_eq!(decode_reply(&reply), serde_json::json!("bad load"));
}
