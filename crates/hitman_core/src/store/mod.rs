//! # Hit Storage
//!
//! Durable mapping from [`HitId`] to [`Hit`], queryable by target and by age.
//! No business rules live here.
//!
//! Every operation is atomic with respect to every other operation on the
//! same store: implementations hold one lock across "write + commit + apply",
//! so a batch delete is either fully visible or not visible at all.
//!
//! Implementations:
//! - [`MemoryHitStore`]: non-durable, for tests and throwaway servers
//! - [`WalHitStore`]: append-only write-ahead log with CRC32 records

mod memory;
mod wal;

pub use memory::MemoryHitStore;
pub use wal::WalHitStore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{HitError, HitResult};
use crate::hit::{Hit, HitId, NewHit};

/// Storage backend for hit records.
///
/// Methods are blocking; the manager dispatches them to a worker thread.
pub trait HitStore: Send + Sync {
    /// Assigns a fresh id, persists the hit and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure.
    fn add(&self, hit: NewHit) -> HitResult<Hit>;

    /// Deletes one record. Returns the removed hit, or `None` if it was
    /// already gone (not an error).
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure.
    fn remove(&self, id: HitId) -> HitResult<Option<Hit>>;

    /// Deletes every listed record in one transaction and returns the ones
    /// that actually existed. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure; nothing is removed.
    fn remove_all(&self, ids: &[HitId]) -> HitResult<Vec<Hit>>;

    /// All hits on `target_player_id`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure.
    fn find_by_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>>;

    /// All hits with `time_placed < cutoff`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure.
    fn find_older_than(&self, cutoff: DateTime<Utc>) -> HitResult<Vec<Hit>>;

    /// Every stored hit, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `HitError::Persistence` on storage failure.
    fn list_all(&self) -> HitResult<Vec<Hit>>;
}

/// In-memory index shared by the store implementations.
///
/// Ids are assigned monotonically, so iterating the `BTreeMap` yields
/// insertion order.
#[derive(Debug, Default)]
pub(crate) struct HitIndex {
    hits: BTreeMap<HitId, Hit>,
    next_id: HitId,
}

impl HitIndex {
    pub(crate) fn new(next_id: HitId) -> Self {
        Self {
            hits: BTreeMap::new(),
            next_id: next_id.max(1),
        }
    }

    pub(crate) const fn next_id(&self) -> HitId {
        self.next_id
    }

    /// The id for the next new hit. `HitId::MAX` is never handed out, so an
    /// exhausted id space fails instead of reusing a live id.
    pub(crate) fn allocate_id(&self) -> HitResult<HitId> {
        if self.next_id == HitId::MAX {
            return Err(HitError::Persistence("hit id space exhausted".to_string()));
        }
        Ok(self.next_id)
    }

    /// Inserts a record with a known id (replay or fresh add).
    pub(crate) fn insert(&mut self, hit: Hit) {
        self.next_id = self.next_id.max(hit.id.saturating_add(1));
        self.hits.insert(hit.id, hit);
    }

    pub(crate) fn remove(&mut self, id: HitId) -> Option<Hit> {
        self.hits.remove(&id)
    }

    /// Ids from `ids` that are present, deduplicated, in the given order.
    pub(crate) fn existing(&self, ids: &[HitId]) -> Vec<HitId> {
        let mut seen = Vec::with_capacity(ids.len());
        for id in ids {
            if self.hits.contains_key(id) && !seen.contains(id) {
                seen.push(*id);
            }
        }
        seen
    }

    pub(crate) fn get(&self, id: HitId) -> Option<&Hit> {
        self.hits.get(&id)
    }

    pub(crate) fn by_target(&self, target_player_id: &str) -> Vec<Hit> {
        self.hits
            .values()
            .filter(|h| h.target_player_id == target_player_id)
            .cloned()
            .collect()
    }

    pub(crate) fn older_than(&self, cutoff: DateTime<Utc>) -> Vec<Hit> {
        self.hits
            .values()
            .filter(|h| h.time_placed < cutoff)
            .cloned()
            .collect()
    }

    pub(crate) fn all(&self) -> Vec<Hit> {
        self.hits.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.hits.len()
    }
}
