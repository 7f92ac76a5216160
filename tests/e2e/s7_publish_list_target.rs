//! S7: publishing with an explicit `list` target forwards exactly those
//! ids as the transport's topic list, and the payload still round-trips
//! under the cluster secret (spec §4.9 step 5, §8 S7).

use salt_master_core::crypto::Crypticle;

use crate::harness::fixture;

#[tokio::test]
async fn list_target_publish_reaches_the_transport_with_its_topic_list() {
    let fx = fixture();

    fx.master
        .publisher
        .publish(serde_json::json!({"cmd": "state.apply", "tgt_type": "list", "tgt": ["web-01", "web-02"]}), &[])
        .await
        .unwrap();

    let sent = fx.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic_lst, Some(vec!["web-01".to_string(), "web-02".to_string()]));

    let framed: serde_json::Value = rmp_serde::from_slice(&sent[0].payload).unwrap();
    let outer_bytes =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, framed["payload"].as_str().unwrap())
            .unwrap();
    let outer: serde_json::Value = rmp_serde::from_slice(&outer_bytes).unwrap();
    let ciphertext =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, outer["load"].as_str().unwrap()).unwrap();

    let cluster_secret = fx.master.vault.snapshot();
    let decrypted = Crypticle::new(&cluster_secret.aes).loads(&ciphertext).unwrap();
    assert_eq!(decrypted["cmd"], "state.apply");
}
