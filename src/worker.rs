//! Worker (spec §4.8, C8): an independent concurrent unit bound to
//! exactly one pool, invoking a registered command handler and writing
//! the reply back through the dispatcher's response channel.
//!
//! Grounded on `examples/original_source/salt/master.py::MWorker` (one
//! process per configured worker slot, dequeuing from its pool's queue)
//! reimplemented as a `tokio::task` per slot, per REDESIGN FLAGS.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::dispatcher::DispatchJob;
use crate::wire::ReplyMode;

/// The explicit command → function registry called for by spec §9 DESIGN
/// NOTES, replacing dynamic dispatch by command name. Execution modules
/// themselves are out of scope (spec §1); this seam is where a real
/// master would plug them in.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn call(&self, id: &str, load: &Value) -> (Value, ReplyMode);
}

/// Always answers with `{"ret": true}` over the ordinary AES reply path.
/// Used for `test.ping`-shaped liveness commands and as a harmless
/// default in tests; real deployments register their own handlers.
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    async fn call(&self, _id: &str, _load: &Value) -> (Value, ReplyMode) {
        (json!({"ret": true}), ReplyMode::Send { nonce: None })
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry { handlers: HashMap::new() }
    }

    pub fn register(mut self, cmd: impl Into<String>, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(cmd.into(), handler);
        self
    }

    /// Unknown commands never trigger reflection or a guess at intent —
    /// they get a structured "unknown command" reply (spec §9 DESIGN
    /// NOTES).
    async fn dispatch(&self, cmd: &str, id: &str, load: &Value) -> (Value, ReplyMode) {
        match self.handlers.get(cmd) {
            Some(handler) => handler.call(id, load).await,
            None => (json!({"error": format!("unknown command '{cmd}'")}), ReplyMode::Send { nonce: None }),
        }
    }
}

/// Runs one worker bound to `rx`, looping until the channel closes
/// (shutdown drains in-flight jobs: spec §5 Shutdown). Workers share no
/// mutable state with each other — only the read-mostly vault and key
/// store reached indirectly through the registered handlers.
pub async fn run_worker(mut rx: mpsc::Receiver<DispatchJob>, registry: Arc<CommandRegistry>) {
    while let Some(job) = rx.recv().await {
        let (result, mode) = registry.dispatch(&job.cmd, &job.id, &job.load).await;
        let _ = job.reply_tx.send((result, mode));
    }
}

/// Spawns `spec.worker_count` tasks bound to the same pool receiver.
/// `tokio::sync::mpsc::Receiver` only has one consumer at a time, so the
/// receiver is wrapped for shared polling via a small round-robin
/// fan-out task rather than cloning it (mpsc receivers are not `Clone`).
pub fn spawn_pool_workers(
    worker_count: usize,
    rx: mpsc::Receiver<DispatchJob>,
    registry: Arc<CommandRegistry>,
) -> Vec<tokio::task::JoinHandle<()>> {
    if worker_count <= 1 {
        return vec![tokio::spawn(run_worker(rx, registry))];
    }

    // Fan one receiver out to `worker_count` concurrent task slots: a
    // dispatch loop re-sends each job onto a small internal channel that
    // every worker task polls, so up to `worker_count` jobs run at once
    // even though only one task owns `rx`.
    let (fan_tx, fan_rx) = async_channel(worker_count);
    let mut handles = Vec::with_capacity(worker_count + 1);

    handles.push(tokio::spawn(async move {
        let mut rx = rx;
        while let Some(job) = rx.recv().await {
            if fan_tx.send(job).await.is_err() {
                break;
            }
        }
    }));

    for _ in 0..worker_count {
        let fan_rx = fan_rx.clone();
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            while let Ok(job) = fan_rx.recv().await {
                let (result, mode) = registry.dispatch(&job.cmd, &job.id, &job.load).await;
                let _ = job.reply_tx.send((result, mode));
            }
        }));
    }

    handles
}

/// A minimal multi-consumer async channel: `tokio::sync::mpsc` receivers
/// are single-consumer, but fanning one pool's queue out to several
/// worker tasks needs several consumers pulling from the same backlog.
/// `async-channel`-style semantics (`Sender`/`Receiver` both `Clone`,
/// bounded capacity) are reproduced here directly on `tokio::sync::Mutex`
/// around the receiver half instead of pulling in an extra dependency.
fn async_channel<T: Send + 'static>(capacity: usize) -> (mpsc::Sender<T>, SharedReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, SharedReceiver { inner: Arc::new(tokio::sync::Mutex::new(rx)) })
}

struct SharedReceiver<T> {
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        SharedReceiver { inner: self.inner.clone() }
    }
}

impl<T> SharedReceiver<T> {
    async fn recv(&self) -> Result<T, ()> {
        self.inner.lock().await.recv().await.ok_or(())
    }
}
