//! Master configuration (spec §6 "Configuration options recognized").
//!
//! Grounded on `estuary-flow/crates/dekaf/src/main.rs`'s `Cli` struct:
//! a `clap::Parser` surface with `env` fallbacks for every flag, layered
//! in `main.rs` over a config struct that the rest of the crate consumes
//! directly (no global mutable config, per spec §9 DESIGN NOTES).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pools::{PoolsConfig, WorkerPoolsInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub pki_dir: PathBuf,
    pub open_mode: bool,
    pub auto_accept: bool,
    pub max_minions: usize,
    pub auth_mode: u32,
    pub auth_events: bool,
    pub master_sign_pubkey: bool,
    pub sign_pub_messages: bool,
    #[serde(with = "humantime_serde")]
    pub request_server_ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub publish_session: Duration,
    pub minimum_auth_version: u32,
    pub worker_pools_enabled: bool,
    pub worker_pools: Option<PoolsConfig>,
    pub worker_pool_default: Option<String>,
    pub worker_pools_optimized: bool,
    pub worker_threads: Option<usize>,
    pub presence_events: bool,
    pub max_connections: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            pki_dir: PathBuf::from("/etc/salt/pki/master"),
            open_mode: false,
            auto_accept: false,
            max_minions: 0,
            auth_mode: 1,
            auth_events: false,
            master_sign_pubkey: false,
            sign_pub_messages: false,
            request_server_ttl: Duration::from_secs(300),
            publish_session: Duration::from_secs(86_400),
            minimum_auth_version: 3,
            worker_pools_enabled: true,
            worker_pools: None,
            worker_pool_default: None,
            worker_pools_optimized: false,
            worker_threads: Some(5),
            presence_events: false,
            max_connections: 300,
        }
    }
}

impl MasterConfig {
    pub fn worker_pools_input(&self) -> WorkerPoolsInput {
        WorkerPoolsInput {
            worker_pools_enabled: self.worker_pools_enabled,
            worker_pools: self.worker_pools.clone(),
            worker_pools_optimized: self.worker_pools_optimized,
            worker_pool_default: self.worker_pool_default.clone(),
            worker_threads: self.worker_threads,
        }
    }
}
