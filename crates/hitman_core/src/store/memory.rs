//! Non-durable hit store.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{HitIndex, HitStore};
use crate::error::HitResult;
use crate::hit::{Hit, HitId, NewHit};

/// Hit store that lives only in process memory.
#[derive(Debug)]
pub struct MemoryHitStore {
    index: RwLock<HitIndex>,
}

impl Default for MemoryHitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HitIndex::new(1)),
        }
    }

    /// Number of stored hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if no hits are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HitStore for MemoryHitStore {
    fn add(&self, hit: NewHit) -> HitResult<Hit> {
        let mut index = self.index.write();
        let stored = hit.with_id(index.allocate_id()?);
        index.insert(stored.clone());
        Ok(stored)
    }

    fn remove(&self, id: HitId) -> HitResult<Option<Hit>> {
        Ok(self.index.write().remove(id))
    }

    fn remove_all(&self, ids: &[HitId]) -> HitResult<Vec<Hit>> {
        let mut index = self.index.write();
        Ok(ids.iter().filter_map(|id| index.remove(*id)).collect())
    }

    fn find_by_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>> {
        Ok(self.index.read().by_target(target_player_id))
    }

    fn find_older_than(&self, cutoff: DateTime<Utc>) -> HitResult<Vec<Hit>> {
        Ok(self.index.read().older_than(cutoff))
    }

    fn list_all(&self) -> HitResult<Vec<Hit>> {
        Ok(self.index.read().all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bounty;
    use chrono::Duration;

    fn new_hit(target: &str, whole: u64) -> NewHit {
        NewHit::new(target, Bounty::from_whole(whole).unwrap(), None).unwrap()
    }

    #[test]
    fn test_ids_are_monotonic() {
        let store = MemoryHitStore::new();
        let a = store.add(new_hit("P1", 1)).unwrap();
        let b = store.add(new_hit("P2", 2)).unwrap();
        store.remove(b.id).unwrap();
        let c = store.add(new_hit("P3", 3)).unwrap();
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn test_find_by_target_keeps_insertion_order() {
        let store = MemoryHitStore::new();
        let a = store.add(new_hit("P1", 1)).unwrap();
        store.add(new_hit("P2", 2)).unwrap();
        let c = store.add(new_hit("P1", 3)).unwrap();

        let found = store.find_by_target("P1").unwrap();
        assert_eq!(found, vec![a, c]);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let store = MemoryHitStore::new();
        let a = store.add(new_hit("P1", 1)).unwrap();
        assert_eq!(store.remove(a.id).unwrap(), Some(a.clone()));
        assert_eq!(store.remove(a.id).unwrap(), None);
        assert!(store.remove_all(&[a.id, 999]).unwrap().is_empty());
    }

    #[test]
    fn test_find_older_than_is_strict() {
        let store = MemoryHitStore::new();
        let now = Utc::now();
        let old = NewHit::placed_at("P1", Bounty::ONE, None, now - Duration::hours(2)).unwrap();
        let edge = NewHit::placed_at("P2", Bounty::ONE, None, now).unwrap();
        let old = store.add(old).unwrap();
        store.add(edge).unwrap();

        assert_eq!(store.find_older_than(now).unwrap(), vec![old]);
    }

    #[test]
    fn test_exhausted_ids_are_not_reused() {
        let store = MemoryHitStore::new();
        let last = new_hit("P1", 1).with_id(HitId::MAX - 1);
        store.index.write().insert(last.clone());

        let err = store.add(new_hit("P2", 2)).unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(store.list_all().unwrap(), vec![last]);
    }
}
