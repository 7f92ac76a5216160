//! S6: a worker-pool configuration that maps the same command to two
//! pools aborts startup with a `ConfigError` rather than silently picking
//! one (spec §4.6 invariant, §8 S6).

use std::collections::BTreeMap;
use std::sync::Arc;

use salt_master_core::auth::MasterKeys;
use salt_master_core::config::MasterConfig;
use salt_master_core::crypto;
use salt_master_core::error::CoreError;
use salt_master_core::pools::PoolSpec;
use salt_master_core::publisher::RecordingTransport;
use salt_master_core::worker::CommandRegistry;
use salt_master_core::{null_sink, Master};

#[tokio::test]
async fn conflicting_pool_assignment_is_rejected_at_build_time() {
    let dir = tempfile::tempdir().unwrap();
    let pools = BTreeMap::from([
        ("a".to_string(), PoolSpec { worker_count: 1, commands: vec!["ping".to_string()] }),
        ("b".to_string(), PoolSpec { worker_count: 1, commands: vec!["ping".to_string()] }),
    ]);
    let config = MasterConfig {
        pki_dir: dir.path().to_path_buf(),
        worker_pool_default: Some("a".to_string()),
        worker_pools: Some(pools),
        ..Default::default()
    };

    let (priv_key, pub_key) = crypto::generate_keypair().unwrap();
    let master_keys = MasterKeys::new(priv_key, pub_key, None).unwrap();
    let registry = CommandRegistry::new();
    let transport = Arc::new(RecordingTransport::new(false));

    let err = Master::build(config, master_keys, registry, transport, null_sink()).unwrap_err();
    let CoreError::Config(messages) = err else { panic!("expected a Config error") };
    assert!(messages.iter().any(|m| m.contains("mapped to multiple pools")));
}
