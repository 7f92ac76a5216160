//! Worker-pool configuration and router (spec §3 WorkerPoolConfig, §4.6, C6).
//!
//! Grounded on `examples/original_source/salt/config/worker_pools.py`:
//! the same validation rules, the same `DEFAULT_WORKER_POOLS`/
//! `OPTIMIZED_WORKER_POOLS` layouts, and the same backward-compatibility
//! precedence (explicit `worker_pools` > `worker_pools_optimized` >
//! legacy `worker_threads` > built-in default).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::valid_pool_name;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub worker_count: usize,
    pub commands: Vec<String>,
}

pub type PoolsConfig = BTreeMap<String, PoolSpec>;

/// The single catchall pool used when nothing else is configured,
/// mirroring `worker_pools.py::DEFAULT_WORKER_POOLS`.
pub fn default_pools() -> PoolsConfig {
    BTreeMap::from([(
        "default".to_string(),
        PoolSpec { worker_count: 5, commands: vec![WILDCARD.to_string()] },
    )])
}

/// Opt-in performance-tiered layout, mirroring
/// `worker_pools.py::OPTIMIZED_WORKER_POOLS`.
pub fn optimized_pools() -> PoolsConfig {
    BTreeMap::from([
        (
            "lightweight".to_string(),
            PoolSpec {
                worker_count: 2,
                commands: [
                    "ping",
                    "get_token",
                    "mk_token",
                    "verify_minion",
                    "_master_opts",
                    "_master_tops",
                    "_file_hash",
                    "_file_hash_and_stat",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        ),
        (
            "medium".to_string(),
            PoolSpec {
                worker_count: 2,
                commands: [
                    "_mine_get",
                    "_mine",
                    "_mine_delete",
                    "_mine_flush",
                    "_file_find",
                    "_file_list",
                    "_file_list_emptydirs",
                    "_dir_list",
                    "_symlink_list",
                    "pub_ret",
                    "minion_pub",
                    "minion_publish",
                    "wheel",
                    "runner",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        ),
        (
            "heavy".to_string(),
            PoolSpec {
                worker_count: 1,
                commands: [
                    "publish",
                    "_pillar",
                    "_return",
                    "_syndic_return",
                    "_file_recv",
                    "_serve_file",
                    "minion_runner",
                    "revoke_auth",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        ),
    ])
}

/// Input to [`WorkerPoolRouter::build`], mirroring
/// `worker_pools.py::get_worker_pools_config`'s precedence.
#[derive(Debug, Clone, Default)]
pub struct WorkerPoolsInput {
    pub worker_pools_enabled: bool,
    pub worker_pools: Option<PoolsConfig>,
    pub worker_pools_optimized: bool,
    pub worker_pool_default: Option<String>,
    /// Legacy `worker_threads: N`, synthesized into a single catchall pool
    /// when no `worker_pools` are configured.
    pub worker_threads: Option<usize>,
}

fn resolve_pools(input: &WorkerPoolsInput) -> Option<PoolsConfig> {
    if !input.worker_pools_enabled {
        return None;
    }
    if let Some(pools) = &input.worker_pools {
        if !pools.is_empty() {
            return Some(pools.clone());
        }
    }
    if input.worker_pools_optimized {
        return Some(optimized_pools());
    }
    if let Some(count) = input.worker_threads {
        return Some(BTreeMap::from([(
            "default".to_string(),
            PoolSpec { worker_count: count, commands: vec![WILDCARD.to_string()] },
        )]));
    }
    Some(default_pools())
}

/// Validates a resolved pool configuration against every rule in spec
/// §4.6, aggregating every violation into one error (mirroring
/// `validate_worker_pools_config`'s "collect all errors, raise once").
fn validate(pools: &PoolsConfig, default_pool: Option<&str>) -> Result<(), CoreError> {
    let mut errors = Vec::new();

    if pools.is_empty() {
        errors.push("worker_pools cannot be empty".to_string());
        return Err(CoreError::Config(errors));
    }

    let mut cmd_to_pool: BTreeMap<&str, &str> = BTreeMap::new();
    let mut catchall_pool: Option<&str> = None;

    for (pool_name, spec) in pools {
        if !valid_pool_name(pool_name) {
            errors.push(format!("Pool '{pool_name}': invalid pool name"));
        }
        if spec.worker_count < 1 {
            errors.push(format!(
                "Pool '{pool_name}': worker_count must be integer >= 1, got {}",
                spec.worker_count
            ));
        }
        if spec.commands.is_empty() {
            errors.push(format!("Pool '{pool_name}': commands list cannot be empty"));
            continue;
        }
        for cmd in &spec.commands {
            if cmd == WILDCARD {
                if let Some(existing) = catchall_pool {
                    errors.push(format!(
                        "Multiple pools have catchall ('*'): '{existing}' and '{pool_name}'. \
                         Only one pool can use catchall."
                    ));
                } else {
                    catchall_pool = Some(pool_name);
                }
                continue;
            }
            if let Some(existing) = cmd_to_pool.get(cmd.as_str()) {
                errors.push(format!(
                    "Command '{cmd}' mapped to multiple pools: '{existing}' and '{pool_name}'"
                ));
            } else {
                cmd_to_pool.insert(cmd, pool_name);
            }
        }
    }

    if catchall_pool.is_none() {
        match default_pool {
            None => errors.push(
                "No catchall pool ('*') found and worker_pool_default not specified. \
                 Either use a catchall pool or specify worker_pool_default."
                    .to_string(),
            ),
            Some(name) if !pools.contains_key(name) => errors.push(format!(
                "No catchall pool ('*') found and default pool '{name}' not found in \
                 worker_pools. Available: {:?}",
                pools.keys().collect::<Vec<_>>()
            )),
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::Config(errors))
    }
}

/// Routes inbound commands to pools and tracks a lock-free per-pool
/// dispatch counter (spec §4.6).
#[derive(Debug)]
pub struct WorkerPoolRouter {
    pools: PoolsConfig,
    catchall: Option<String>,
    default_pool: Option<String>,
    cmd_to_pool: BTreeMap<String, String>,
    counters: BTreeMap<String, Arc<AtomicU64>>,
}

impl WorkerPoolRouter {
    /// Resolves, validates, and builds a router. Aborts (returns
    /// `Err(CoreError::Config)`) on any configuration violation; never
    /// partially applies a configuration.
    pub fn build(input: &WorkerPoolsInput) -> Result<Self, CoreError> {
        let pools = resolve_pools(input).ok_or_else(|| {
            CoreError::Config(vec!["worker pools are disabled but no legacy fallback is configured".into()])
        })?;
        validate(&pools, input.worker_pool_default.as_deref())?;

        let mut catchall = None;
        let mut cmd_to_pool = BTreeMap::new();
        for (pool_name, spec) in &pools {
            for cmd in &spec.commands {
                if cmd == WILDCARD {
                    catchall = Some(pool_name.clone());
                } else {
                    cmd_to_pool.insert(cmd.clone(), pool_name.clone());
                }
            }
        }

        let counters = pools.keys().map(|name| (name.clone(), Arc::new(AtomicU64::new(0)))).collect();

        Ok(WorkerPoolRouter {
            pools,
            catchall,
            default_pool: input.worker_pool_default.clone(),
            cmd_to_pool,
            counters,
        })
    }

    /// Routes `cmd` to a pool name: explicit mapping, else catchall, else
    /// the configured default (spec invariant 3).
    pub fn route(&self, cmd: &str) -> Option<&str> {
        if let Some(pool) = self.cmd_to_pool.get(cmd) {
            return Some(pool.as_str());
        }
        if let Some(pool) = &self.catchall {
            return Some(pool.as_str());
        }
        self.default_pool.as_deref()
    }

    /// Increments and returns the dispatch counter for `pool`, lock-free.
    pub fn record_dispatch(&self, pool: &str) -> u64 {
        match self.counters.get(pool) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed) + 1,
            None => 0,
        }
    }

    pub fn counter(&self, pool: &str) -> u64 {
        self.counters.get(pool).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn pools(&self) -> &PoolsConfig {
        &self.pools
    }
}
