//! S5: requests route to the configured pool by command name, and the
//! pool's dispatch counter reflects every request that landed there
//! (spec §4.6 routing rules, §8 S5).

use std::collections::BTreeMap;

use salt_master_core::crypto::Crypticle;
use salt_master_core::pools::PoolSpec;

use crate::harness::{auth_frame, fixture_with, minion, request_frame, token_for};

#[tokio::test]
async fn command_routes_to_its_configured_pool_and_increments_its_counter() {
    let pools = BTreeMap::from([
        ("fast".to_string(), PoolSpec { worker_count: 1, commands: vec!["test.ping".to_string()] }),
        ("default".to_string(), PoolSpec { worker_count: 1, commands: vec!["*".to_string()] }),
    ]);
    let fx = fixture_with(|c| {
        c.auto_accept = true;
        c.worker_pools = Some(pools);
    });
    let alice = minion();

    fx.master.handle_request(&auth_frame("alice", &alice, 3), 0).await;

    let tok = token_for(&alice);
    let req = request_frame(&fx.master.vault, 3, "alice", "test.ping", 0, Some(tok), serde_json::json!({}));
    let reply = fx.master.handle_request(&req, 0).await;

    let cluster_secret = fx.master.vault.snapshot();
    let decrypted = Crypticle::new(&cluster_secret.aes).loads(&reply).unwrap();
    assert_eq!(decrypted["ret"], true);

    assert_eq!(fx.master.pool_router.counter("fast"), 1);
    assert_eq!(fx.master.pool_router.counter("default"), 0);
}
