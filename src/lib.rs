//! Authentication, request-routing, and publication core for a
//! minion-orchestration master.
//!
//! The modules below map onto the components named throughout the
//! module docs: key/crypto primitives ([`crypto`]), the on-disk key
//! store and shared cluster secret ([`keystore`], [`vault`]), the
//! `_auth` handshake state machine ([`auth`]), the request-server
//! channel that decodes/decrypts/dispatches every inbound frame
//! ([`channel`]), the worker-pool router, bounded dispatcher, and
//! workers that actually run commands ([`pools`], [`dispatcher`],
//! [`worker`]), the publisher channel and presence tracker
//! ([`publisher`], [`presence`]), and the ambient logging/metrics/event
//! stack ([`logging`], [`metrics`], [`events`]).

pub mod auth;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod ids;
pub mod keystore;
pub mod logging;
pub mod metrics;
pub mod pools;
pub mod presence;
pub mod publisher;
pub mod target;
pub mod vault;
pub mod wire;
pub mod worker;

use std::sync::Arc;

use crate::auth::{AuthEngine, MasterKeys};
use crate::channel::server::RequestServerChannel;
use crate::config::MasterConfig;
use crate::dispatcher::{PoolDispatchHandler, PoolDispatcher};
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::keystore::KeyStore;
use crate::pools::WorkerPoolRouter;
use crate::publisher::{PublishTransport, PublisherChannel};
use crate::vault::SecretVault;
use crate::worker::CommandRegistry;

/// Everything the process needs to serve requests and publishes, built
/// once at startup from a [`MasterConfig`] and handed to the transport
/// loop in `main` (spec §9 DESIGN NOTES: no global mutable config, pass
/// explicit dependencies instead).
pub struct Master {
    pub config: MasterConfig,
    pub keystore: KeyStore,
    pub master_keys: Arc<MasterKeys>,
    pub vault: Arc<SecretVault>,
    pub pool_router: Arc<WorkerPoolRouter>,
    pub dispatcher: Arc<PoolDispatcher>,
    pub request_channel: Arc<RequestServerChannel>,
    pub publisher: Arc<PublisherChannel>,
    pub sink: Arc<dyn EventSink>,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master").finish_non_exhaustive()
    }
}

impl Master {
    /// Builds the full component graph and spawns one task per
    /// configured worker-pool slot. `registry` supplies the command ->
    /// handler mapping consumed by every spawned worker; `transport`
    /// is the injected publish sink (spec §1: "networking libraries ...
    /// treated as abstract transports").
    pub fn build(
        config: MasterConfig,
        master_keys: MasterKeys,
        registry: CommandRegistry,
        transport: Arc<dyn PublishTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let keystore = KeyStore::open(&config.pki_dir)?;
        let master_keys = Arc::new(master_keys);
        let vault = Arc::new(SecretVault::new(crypto::generate_key_string()));

        let pool_router = Arc::new(WorkerPoolRouter::build(&config.worker_pools_input())?);
        let (dispatcher, receivers) = PoolDispatcher::build(pool_router.clone());
        let dispatcher = Arc::new(dispatcher);

        let registry = Arc::new(registry);
        let mut worker_handles = Vec::new();
        for (pool_name, rx) in receivers {
            let spec = &pool_router.pools()[&pool_name];
            worker_handles.extend(crate::worker::spawn_pool_workers(spec.worker_count, rx, registry.clone()));
        }

        let auth = AuthEngine::new(
            keystore.clone(),
            master_keys.clone(),
            vault.clone(),
            config.open_mode,
            config.auto_accept,
            config.max_minions,
            config.auth_mode,
            config.auth_events,
            config.minimum_auth_version,
            config.sign_pub_messages,
        );

        let handler = Box::new(PoolDispatchHandler::new(dispatcher.clone()));
        let request_channel = Arc::new(RequestServerChannel::new(
            keystore.clone(),
            vault.clone(),
            auth,
            master_keys.clone(),
            handler,
            sink.clone(),
            config.minimum_auth_version,
            config.request_server_ttl,
            config.sign_pub_messages,
        ));

        let publisher = Arc::new(PublisherChannel::new(
            vault.clone(),
            master_keys.clone(),
            keystore.clone(),
            config.sign_pub_messages,
            transport,
            sink.clone(),
        ));

        Ok(Master {
            config,
            keystore,
            master_keys,
            vault,
            pool_router,
            dispatcher,
            request_channel,
            publisher,
            sink,
            worker_handles,
        })
    }

    /// Handles one inbound request-server frame (spec §4.5). `now` is a
    /// caller-supplied unix timestamp.
    pub async fn handle_request(&self, raw: &[u8], now: i64) -> Vec<u8> {
        self.request_channel.handle_message(raw, now).await
    }

    /// Drops every strong reference to the dispatcher — including the
    /// clone held by the request channel's handler — so each pool's
    /// `mpsc::Sender`s close and every worker's `recv` loop exits, then
    /// waits for all spawned workers to drain their in-flight jobs and
    /// exit (spec §5 Shutdown: "stop accepting ... let in-flight work
    /// drain"). `request_channel` must be dropped too: it holds the
    /// `PoolDispatchHandler` clone from `build`, and a dispatcher `Arc`
    /// still reachable through it would keep the senders open forever.
    pub async fn shutdown(mut self) {
        drop(self.dispatcher);
        drop(self.request_channel);
        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
    }
}

/// Returns a [`Master`] builder preset with a no-op event sink, useful
/// when the caller doesn't care about events (spec §4.10 default).
pub fn null_sink() -> Arc<dyn EventSink> {
    Arc::new(NullEventSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::RecordingTransport;
    use crate::worker::PingHandler;

    fn config(dir: &std::path::Path) -> MasterConfig {
        MasterConfig {
            pki_dir: dir.to_path_buf(),
            worker_threads: Some(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn master_builds_and_answers_a_ping_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let (priv_key, pub_key) = crypto::generate_keypair().unwrap();
        let master_keys = MasterKeys::new(priv_key, pub_key, None).unwrap();
        let registry = CommandRegistry::new().register("test.ping", Arc::new(PingHandler));
        let transport = Arc::new(RecordingTransport::new(false));

        let master =
            Master::build(config(dir.path()), master_keys, registry, transport, null_sink()).unwrap();

        assert_eq!(master.pool_router.pools()["default"].worker_count, 1);
        master.shutdown().await;
    }
}
