// src/dedup.rs
//! Persistent deduplication store: a bounded, insertion-ordered set of
//! fingerprints mirrored to a newline-delimited file.
//!
//! `DedupStore` is the synchronous core; `SharedDedupStore` wraps it in a
//! `tokio::sync::Mutex` and implements the reservation protocol: membership
//! check and insertion for all of an item's keys happen as one atomic unit,
//! flushed before the lock is released, so concurrent items racing on the
//! same content can never both publish. A crash after the flush but before
//! the publish completes leaves a false-positive entry behind; that window is
//! accepted (single-process, best-effort rollback only).

use anyhow::{Context, Result};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Auto-flush once this many mutations accumulate since the last flush.
const FLUSH_EVERY_DIRTY_OPS: usize = 25;
const LOAD_RETRIES: u32 = 3;

#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    max_items: usize,
    items: VecDeque<String>,
    set: HashSet<String>,
    dirty: usize,
}

impl DedupStore {
    /// Load persisted state; a missing file is an empty store. Only the most
    /// recent `max_items` persisted entries are retained. Transient read
    /// failures are retried a few times before surfacing.
    pub fn load(path: impl Into<PathBuf>, max_items: usize) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            max_items,
            items: VecDeque::new(),
            set: HashSet::new(),
            dirty: 0,
        };

        if let Some(content) = read_with_retry(&store.path)? {
            let values: Vec<&str> = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            let start = values.len().saturating_sub(max_items);
            for value in &values[start..] {
                if store.set.insert(value.to_string()) {
                    store.items.push_back(value.to_string());
                }
            }
        }

        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    /// Idempotent insert with front eviction past capacity.
    pub fn add(&mut self, key: &str) -> Result<()> {
        if self.set.contains(key) {
            return Ok(());
        }

        self.items.push_back(key.to_string());
        self.set.insert(key.to_string());

        while self.items.len() > self.max_items {
            if let Some(evicted) = self.items.pop_front() {
                self.set.remove(&evicted);
            }
        }

        self.dirty += 1;
        if self.dirty >= FLUSH_EVERY_DIRTY_OPS {
            self.flush()?;
        }
        Ok(())
    }

    /// Idempotent removal; order of the remaining entries is preserved.
    pub fn remove(&mut self, key: &str) {
        if !self.set.remove(key) {
            return;
        }
        self.items.retain(|k| k != key);
        self.dirty += 1;
    }

    /// Rewrite the persisted file from the in-memory sequence, oldest first,
    /// one fingerprint per line. Creates the parent directory if missing and
    /// writes via a temp file + rename. Safe on an empty store.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("creating dedup store directory {}", parent.display())
                })?;
            }
        }

        let mut content = String::new();
        for key in &self.items {
            content.push_str(key);
            content.push('\n');
        }

        let tmp = self.path.with_extension("txt.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("writing dedup store to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing dedup store at {}", self.path.display()))?;

        self.dirty = 0;
        Ok(())
    }
}

fn read_with_retry(path: &Path) -> Result<Option<String>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fs::read_to_string(path) {
            Ok(s) => return Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if attempt < LOAD_RETRIES => {
                warn!(error = %e, attempt, path = %path.display(), "dedup store read failed, retrying");
                std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading dedup store from {}", path.display()))
            }
        }
    }
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// All keys were absent and are now recorded and flushed.
    Reserved,
    /// This key was already known; nothing was mutated.
    Duplicate(String),
}

/// Async guard around [`DedupStore`]. The only shared mutable resource in the
/// pipeline; every mutation goes through its lock.
#[derive(Clone)]
pub struct SharedDedupStore {
    inner: Arc<Mutex<DedupStore>>,
}

impl SharedDedupStore {
    pub fn new(store: DedupStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Check-all-then-insert-all under one lock, flushed before release.
    /// If any key is already present, nothing is mutated. A flush failure
    /// undoes the inserts and surfaces the error.
    pub async fn reserve(&self, keys: &[String]) -> Result<ReserveOutcome> {
        let mut store = self.inner.lock().await;

        for key in keys {
            if store.contains(key) {
                return Ok(ReserveOutcome::Duplicate(key.clone()));
            }
        }
        let mut added: Vec<&String> = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(e) = store.add(key) {
                for k in added {
                    store.remove(k);
                }
                return Err(e);
            }
            added.push(key);
        }
        if let Err(e) = store.flush() {
            for key in keys {
                store.remove(key);
            }
            return Err(e);
        }

        debug!(keys = keys.len(), size = store.len(), "reserved fingerprints");
        Ok(ReserveOutcome::Reserved)
    }

    /// Roll back a reservation: remove every key and flush.
    pub async fn release(&self, keys: &[String]) -> Result<()> {
        let mut store = self.inner.lock().await;
        for key in keys {
            store.remove(key);
        }
        store.flush()
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.lock().await.flush()
    }
}
