//! In-memory state store for development and testing.
//!
//! [`MemoryStore`] is a reference implementation of [`StateStore`] backed by a
//! `tokio::sync::RwLock`-guarded map. It is the template new backends (a database, object
//! storage) are expected to follow: register a persistent-group ordering up front via
//! [`MemoryStore::register_group`], then let the compiler's emitted `Loader`/`Dumper`/`Committer`
//! instructions drive `load`/`dump`/`commit` at run time.
//!
//! # When to Use
//!
//! - Unit and integration tests of pipelines.
//! - Local development before a durable backend is wired in.
//!
//! **Avoid for**: anything that must survive a process restart or be shared across machines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::traits::{Blob, Gid, StateId, StateStore};

/// Construction knobs for [`MemoryStore`], following the small-`Config`-struct-with-`Default`
/// pattern used throughout this crate's backends.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStoreConfig {
    /// The commit generation counter a fresh store starts from.
    pub initial_generation: u64,
    /// Pre-sizes the internal committed/offset maps when the expected group count is known.
    pub capacity_hint: Option<usize>,
}

impl MemoryStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_generation(mut self, generation: u64) -> Self {
        self.initial_generation = generation;
        self
    }

    pub fn with_capacity_hint(mut self, capacity: usize) -> Self {
        self.capacity_hint = Some(capacity);
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Committed state per group, keyed by group identity.
    committed: HashMap<Gid, Blob>,
    /// Dumped-but-not-yet-committed blobs, keyed by the id returned from `dump`.
    staged: HashMap<Uuid, Blob>,
    /// Canonical offset of each group in the persistent ordering, assigned on first sight.
    offsets: HashMap<Gid, usize>,
}

impl Inner {
    fn with_capacity(cap: usize) -> Self {
        Inner {
            committed: HashMap::with_capacity(cap),
            staged: HashMap::new(),
            offsets: HashMap::with_capacity(cap),
        }
    }
}

/// Reference [`StateStore`] implementation holding all state in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    generation: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create an empty store with no registered groups or state.
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create an empty store from an explicit [`MemoryStoreConfig`].
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        let inner = match config.capacity_hint {
            Some(cap) => Inner::with_capacity(cap),
            None => Inner::default(),
        };
        MemoryStore {
            inner: Arc::new(RwLock::new(inner)),
            generation: Arc::new(AtomicU64::new(config.initial_generation)),
        }
    }

    /// Assign (or look up) `gid`'s offset in the persistent ordering, registering it if this is
    /// the first time it has been seen. Mirrors how a durable registry would assign column
    /// positions to state groups the first time a pipeline including them is published.
    pub async fn register_group(&self, gid: Gid) -> usize {
        let mut inner = self.inner.write().await;
        let next = inner.offsets.len();
        *inner.offsets.entry(gid).or_insert(next)
    }

    /// Seed a group's committed state directly, bypassing `dump`/`commit`. Useful for tests that
    /// want to assert a loader finds prior state.
    pub async fn seed(&self, gid: Gid, blob: Blob) {
        let mut inner = self.inner.write().await;
        let next = inner.offsets.len();
        inner.offsets.entry(gid).or_insert(next);
        inner.committed.insert(gid, blob);
    }

    /// Current commit generation number, incremented on every successful [`StateStore::commit`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn contains(&self, key: Gid) -> bool {
        self.inner.read().await.committed.contains_key(&key)
    }

    async fn load(&self, key: Gid) -> Result<Blob> {
        self.inner
            .read()
            .await
            .committed
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::missing(key))
    }

    async fn dump(&self, blob: Blob) -> Result<StateId> {
        let id = Uuid::new_v4();
        self.inner.write().await.staged.insert(id, blob);
        Ok(StateId(id))
    }

    fn offset(&self, gid: Gid) -> Result<usize> {
        self.inner
            .try_read()
            .map_err(|_| StoreError::Backend("offset lookup contended".into()))?
            .offsets
            .get(&gid)
            .copied()
            .ok_or_else(|| StoreError::unknown_group(gid))
    }

    async fn commit(&self, state_ids: &[StateId]) -> Result<()> {
        let mut inner = self.inner.write().await;
        if state_ids.len() != inner.offsets.len() {
            return Err(StoreError::CommitArity {
                expected: inner.offsets.len(),
                actual: state_ids.len(),
            });
        }
        // Walk offsets in position order so each state id lands on the group it belongs to.
        let mut by_offset: Vec<(Gid, usize)> =
            inner.offsets.iter().map(|(g, o)| (*g, *o)).collect();
        by_offset.sort_by_key(|(_, o)| *o);
        for (gid, offset) in by_offset {
            let staged = state_ids[offset];
            let blob = inner
                .staged
                .remove(&staged.0)
                .ok_or_else(|| StoreError::missing(staged))?;
            inner.committed.insert(gid, blob);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(generation = self.generation(), "committed new state generation");
        Ok(())
    }
}
