//! S3: a v3+ request whose timestamp is older than `request_server_ttl`
//! is rejected (spec §4.5 freshness check, §8 S3).

use std::time::Duration;

use salt_master_core::crypto::Crypticle;

use crate::harness::{auth_frame, decode_reply, fixture_with, minion, request_frame, token_for};

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let fx = fixture_with(|c| {
        c.auto_accept = true;
        c.request_server_ttl = Duration::from_secs(60);
    });
    let alice = minion();

    let frame = auth_frame("alice", &alice, 3);
    fx.master.handle_request(&frame, 0).await;

    let tok = token_for(&alice);
    let now = 10_000i64;
    let stale_ts = now - 120; // older than the 60s ttl
    let req = request_frame(&fx.master.vault, 3, "alice", "test.ping", stale_ts, Some(tok), serde_json::json!({}));

    let reply = fx.master.handle_request(&req, now).await;
    assert_eq!(decode_reply(&reply), serde_json::json!("bad load"));
}

#[tokio::test]
async fn fresh_timestamp_within_ttl_is_accepted() {
    let fx = fixture_with(|c| {
        c.auto_accept = true;
        c.request_server_ttl = Duration::from_secs(60);
    });
    let alice = minion();

    let frame = auth_frame("alice", &alice, 3);
    fx.master.handle_request(&frame, 0).await;

    let tok = token_for(&alice);
    let now = 10_000i64;
    let fresh_ts = now - 10;
    let req = request_frame(&fx.master.vault, 3, "alice", "test.ping", fresh_ts, Some(tok), serde_json::json!({}));

    let reply = fx.master.handle_request(&req, now).await;
    let cluster_secret = fx.master.vault.snapshot();
    let decrypted = Crypticle::new(&cluster_secret.aes).loads(&reply).expect("reply decrypts under the cluster secret");
    assert_eq!(decrypted["ret"], true);
}
