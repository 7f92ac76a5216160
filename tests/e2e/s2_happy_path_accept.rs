//! S2: a fresh minion handshaking against an `auto_accept` master is
//! accepted in one round trip and receives a usable AES-wrapped cluster
//! secret (spec §4.4 happy path, §8 S2).

use salt_master_core::crypto::Crypticle;

use crate::harness::{auth_frame, decode_reply, fixture_with, minion};

#[tokio::test]
async fn auto_accept_minion_gets_an_aes_wrapped_secret() {
    let fx = fixture_with(|c| c.auto_accept = true);
    let alice = minion();

    let frame = auth_frame("alice", &alice, 3);
    let reply = fx.master.handle_request(&frame, 0).await;
    let reply = decode_reply(&reply);

    assert_eq!(reply["enc"], "pub");
    assert_eq!(
        fx.master.keystore.status("alice"),
        salt_master_core::keystore::MinionStatus::Accepted
    );

    let aes_b64 = reply["aes"].as_str().expect("reply carries a wrapped aes secret");
    let wrapped = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, aes_b64).unwrap();
    let secret = salt_master_core::crypto::oaep_unwrap(&alice.private_key, &wrapped).unwrap();
    assert_eq!(*fx.master.vault.snapshot().aes, secret);

    // The same secret now works to send a follow-up request.
    let tok = crate::harness::token_for(&alice);
    let req = crate::harness::request_frame(&fx.master.vault, 3, "alice", "test.ping", 0, Some(tok), serde_json::json!({}));
    let reply = fx.master.handle_request(&req, 0).await;
    let cluster_secret = fx.master.vault.snapshot();
    let decrypted = Crypticle::new(&cluster_secret.aes).loads(&reply).unwrap();
    assert_eq!(decrypted["ret"], true);
}
