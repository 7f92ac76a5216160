//! S1: a pre-`minimum_auth_version` `_auth` handshake is rejected before
//! any key-store state changes (spec §4.4 step 1, §8 S1).

use crate::harness::{auth_frame, fixture, minion};

#[tokio::test]
async fn downgraded_handshake_is_rejected_and_writes_no_key() {
    let fx = fixture();
    let alice = minion();

    let frame = auth_frame("alice", &alice, 1); // minimum_auth_version defaults to 3
    let reply = fx.master.handle_request(&frame, 0).await;
    let reply = crate::harness::decode_reply(&reply);

    assert_eq!(reply, serde_json::json!("bad load"));
    assert_eq!(
        fx.master.keystore.status("alice"),
        salt_master_core::keystore::MinionStatus::Absent
    );
}
