// Rate limit buckets persisted as one JSON snapshot on disk.
//
// Every cycle reads the whole file, mutates it in memory and writes it back
// while holding the store lock. Writes go through a temp file and a rename so
// a crash leaves either the old or the new snapshot, never half of one.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{FailurePolicy, RateLimitEntry, RateLimitStore};
use crate::error::{Error, Result};
use crate::metrics::STORE_ERRORS;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Snapshot {
    entries: HashMap<String, RateLimitEntry>,
}

impl Snapshot {
    // Returns true if anything was removed.
    fn evict(&mut self, cutoff: i64) -> bool {
        let mut changed = false;
        self.entries.retain(|_, entry| {
            let before = entry.len();
            entry.evict(cutoff);
            changed |= entry.len() != before || entry.is_empty();
            !entry.is_empty()
        });
        changed
    }
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    on_read_error: FailurePolicy,
    lock: Mutex<()>,
}

impl FileStore {
    // Fails open until the owning limiter applies its policy.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            on_read_error: FailurePolicy::FailOpen,
            lock: Mutex::new(()),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_read_error = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Snapshot> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(e) => return self.recover(Error::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Snapshot::default());
        }

        match serde_json::from_str(&content) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => self.recover(Error::CorruptStore(e.to_string())),
        }
    }

    fn recover(&self, err: Error) -> Result<Snapshot> {
        match self.on_read_error {
            FailurePolicy::FailOpen => {
                STORE_ERRORS.inc();
                warn!(path = ?self.path, error = %err, "rate limit store unreadable, starting from an empty snapshot");
                Ok(Snapshot::default())
            }
            FailurePolicy::FailClosed => {
                error!(
                    path = ?self.path,
                    error = %err,
                    "rate limit store unreadable, rejecting requests until the file is repaired or removed"
                );
                Err(err)
            }
        }
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_vec(snapshot)?;
        let temp_path = self.path.with_file_name(format!(
            "{}.tmp.{}",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id()
        ));

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    // Decisions already handed out stand even if the write fails.
    fn persist(&self, snapshot: &Snapshot) {
        if let Err(e) = self.save(snapshot) {
            STORE_ERRORS.inc();
            warn!(path = ?self.path, error = %e, "failed to persist rate limit store");
        }
    }
}

impl RateLimitStore for FileStore {
    fn with_entry<R, F>(&self, key: &str, cutoff: i64, f: F) -> Result<R>
    where
        F: FnOnce(&mut RateLimitEntry) -> (R, bool),
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = self.load()?;
        snapshot.evict(cutoff);

        let entry = snapshot.entries.entry(key.to_string()).or_default();
        let (out, changed) = f(&mut *entry);
        if entry.is_empty() {
            snapshot.entries.remove(key);
        }

        if changed {
            self.persist(&snapshot);
        }
        Ok(out)
    }

    fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.on_read_error = policy;
    }

    fn sweep(&self, cutoff: i64) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = self.load()?;
        if snapshot.evict(cutoff) {
            debug!(path = ?self.path, remaining = snapshot.entries.len(), "swept rate limit store");
            self.persist(&snapshot);
        }
        Ok(snapshot.entries.len())
    }
}
