//! Process-wide shared mutable secret (spec §4.3, C3).
//!
//! Modeled as an atomic pointer swap: readers take a cheap `Arc` snapshot
//! under a short read lock (never held across an `.await`), and the
//! rotation routine swaps in a new snapshot under a short write lock.
//! Grounded on the watch-channel snapshot pattern in
//! `estuary-flow/crates/dekaf/src/task_manager.rs::TaskStateListener`,
//! adapted from a broadcast-and-wait listener to a read-mostly snapshot
//! since nothing here needs to block on a secret becoming available.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct ClusterSecret {
    pub aes: Arc<Vec<u8>>,
}

/// Holds the current cluster secret and a monotonic publish serial.
pub struct SecretVault {
    current: RwLock<ClusterSecret>,
    serial: AtomicU64,
}

impl SecretVault {
    pub fn new(initial_secret: Vec<u8>) -> Self {
        SecretVault {
            current: RwLock::new(ClusterSecret { aes: Arc::new(initial_secret) }),
            serial: AtomicU64::new(0),
        }
    }

    /// A lock-free-ish snapshot: the read lock is only held long enough to
    /// clone an `Arc`, so a reader observes either the old or the new
    /// secret in entirety, never a torn view.
    pub fn snapshot(&self) -> ClusterSecret {
        self.current.read().expect("secret vault lock poisoned").clone()
    }

    /// Atomically replaces the cluster secret. Any component mid-decrypt
    /// on the old secret finishes that attempt against its own snapshot;
    /// a decrypt failure after a rotation triggers exactly one
    /// refresh-and-retry at the call site (spec §4.3, §7).
    pub fn rotate(&self, new_secret: Vec<u8>) {
        let mut guard = self.current.write().expect("secret vault lock poisoned");
        *guard = ClusterSecret { aes: Arc::new(new_secret) };
    }

    /// Injects the next serial for a published message. Strictly
    /// increasing across the master's lifetime (spec invariant 6).
    pub fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::SeqCst)
    }

    /// Reads the current serial without advancing it, for observability
    /// call sites (e.g. the `/metrics` scrape) that must not perturb the
    /// count of actually-published messages.
    pub fn current_serial(&self) -> u64 {
        self.serial.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_replaces_snapshot_atomically() {
        let vault = SecretVault::new(vec![1, 2, 3]);
        let before = vault.snapshot();
        vault.rotate(vec![4, 5, 6]);
        let after = vault.snapshot();
        assert_eq!(*before.aes, vec![1, 2, 3]);
        assert_eq!(*after.aes, vec![4, 5, 6]);
    }

    #[test]
    fn serial_is_strictly_increasing() {
        let vault = SecretVault::new(vec![]);
        let mut last = vault.next_serial();
        for _ in 0..100 {
            let next = vault.next_serial();
            assert!(next > last);
            last = next;
        }
    }
}
