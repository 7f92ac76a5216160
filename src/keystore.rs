//! Filesystem-backed minion key directory (spec §4.2, C2).
//!
//! Four directories under `pki_dir` hold PEM-encoded minion public keys:
//! `minions/` (accepted), `minions_pre/` (pending), `minions_rejected/`,
//! and `minions_denied/` (an archive of presented keys that never matched
//! an accepted key — orthogonal to the other three, per spec §3).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDir {
    Accepted,
    Pending,
    Rejected,
    Denied,
}

impl KeyDir {
    fn dirname(self) -> &'static str {
        match self {
            KeyDir::Accepted => "minions",
            KeyDir::Pending => "minions_pre",
            KeyDir::Rejected => "minions_rejected",
            KeyDir::Denied => "minions_denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinionStatus {
    Accepted,
    Pending,
    Rejected,
    Absent,
}

#[derive(Clone)]
pub struct KeyStore {
    pki_dir: PathBuf,
}

impl KeyStore {
    /// Opens the key store, creating the four directories if they do not
    /// already exist.
    pub fn open(pki_dir: impl Into<PathBuf>) -> Result<Self> {
        let pki_dir = pki_dir.into();
        for dir in [KeyDir::Accepted, KeyDir::Pending, KeyDir::Rejected, KeyDir::Denied] {
            fs::create_dir_all(pki_dir.join(dir.dirname()))
                .map_err(|e| CoreError::Key(format!("creating {}: {e}", dir.dirname())))?;
        }
        Ok(KeyStore { pki_dir })
    }

    fn path(&self, dir: KeyDir, id: &str) -> PathBuf {
        self.pki_dir.join(dir.dirname()).join(id)
    }

    /// Lookup order is accepted -> rejected -> pending, matching spec §4.2.
    pub fn status(&self, id: &str) -> MinionStatus {
        if self.path(KeyDir::Accepted, id).is_file() {
            MinionStatus::Accepted
        } else if self.path(KeyDir::Rejected, id).is_file() {
            MinionStatus::Rejected
        } else if self.path(KeyDir::Pending, id).is_file() {
            MinionStatus::Pending
        } else {
            MinionStatus::Absent
        }
    }

    pub fn load_pub(&self, id: &str, dir: KeyDir) -> Result<Option<String>> {
        let path = self.path(dir, id);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Key(format!("reading {}: {e}", path.display()))),
        }
    }

    /// Create-or-overwrite, atomically: write to a sibling temp file, then
    /// rename into place. Tolerates concurrent writers to other ids.
    pub fn store_pub(&self, id: &str, dir: KeyDir, pem: &str) -> Result<()> {
        let dest = self.path(dir, id);
        let parent = dest.parent().expect("key path always has a parent");
        let tmp = parent.join(format!(".{id}.tmp-{}", std::process::id()));

        let mut f = fs::File::create(&tmp)
            .map_err(|e| CoreError::Key(format!("creating temp key file: {e}")))?;
        f.write_all(pem.as_bytes())
            .map_err(|e| CoreError::Key(format!("writing temp key file: {e}")))?;
        f.sync_all()
            .map_err(|e| CoreError::Key(format!("syncing temp key file: {e}")))?;
        drop(f);

        fs::rename(&tmp, &dest).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CoreError::Key(format!("renaming key into place: {e}"))
        })
    }

    /// Atomic move between states. Falls back to copy+remove if the
    /// directories span filesystems.
    pub fn move_key(&self, id: &str, from: KeyDir, to: KeyDir) -> Result<()> {
        let src = self.path(from, id);
        let dest = self.path(to, id);
        if fs::rename(&src, &dest).is_err() {
            // Rename can fail when the directories span filesystems; fall
            // back to copy-then-remove rather than assuming same-device.
            fs::copy(&src, &dest)
                .map_err(|e| CoreError::Key(format!("copying key across devices: {e}")))?;
            fs::remove_file(&src)
                .map_err(|e| CoreError::Key(format!("removing source after copy: {e}")))?;
        }
        Ok(())
    }

    pub fn remove(&self, id: &str, dir: KeyDir) -> Result<()> {
        match fs::remove_file(self.path(dir, id)) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    /// Archives a presented key to `minions_denied/`. Never replaces an
    /// accepted key — it writes to a disjoint directory.
    pub fn archive_denied(&self, id: &str, pem: &str) -> Result<()> {
        self.store_pub(id, KeyDir::Denied, pem)
    }

    pub fn pki_dir(&self) -> &Path {
        &self.pki_dir
    }
}
