//! # Hit Manager
//!
//! The orchestration core. Owns the transactional semantics of placing,
//! claiming, removing and expiring hits, and emits the domain events.
//!
//! ## Concurrency
//!
//! ```text
//! place(P1) ──┐                  ┌──> [P1 lock] ──┐
//! claim(P1) ──┼──> TargetLocks ──┤                ├──> spawn_blocking(store)
//! place(P2) ──┘                  └──> [P2 lock] ──┘
//! ```
//!
//! - Operations on the same target are linearized by an async per-target lock.
//! - Operations on different targets run in parallel.
//! - The expiry sweep locks every affected target in sorted order, so it
//!   cannot deadlock against single-target operations.
//! - Store calls run on the blocking pool, never on the caller's thread.
//!   A store call that was started always runs to completion, even if the
//!   awaiting future is dropped, so cancellation cannot half-apply a batch.
//! - The store is the source of truth; nothing is cached here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::aggregator;
use crate::bounty::Bounty;
use crate::error::{HitError, HitResult};
use crate::events::{EventBus, HitEvent};
use crate::hit::{validate_player_id, CombinedHit, Hit, NewHit, PlayerId};
use crate::store::HitStore;

/// Lock registry size above which idle entries are pruned.
const LOCK_PRUNE_THRESHOLD: usize = 256;

/// Registry of per-target async locks.
#[derive(Default)]
struct TargetLocks {
    locks: Mutex<HashMap<PlayerId, Arc<AsyncMutex<()>>>>,
}

impl TargetLocks {
    async fn acquire(&self, target_player_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                // Only the registry holds these: nobody owns or awaits them.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(target_player_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Locks several targets. `targets` must be sorted and deduplicated.
    async fn acquire_many(&self, targets: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(targets.len());
        for target in targets {
            guards.push(self.acquire(target).await);
        }
        guards
    }
}

/// Orchestrates the hit store, aggregation and domain events.
pub struct HitManager {
    store: Arc<dyn HitStore>,
    events: Arc<EventBus>,
    locks: TargetLocks,
}

impl HitManager {
    /// Creates a manager over `store`, emitting on `events`.
    #[must_use]
    pub fn new(store: Arc<dyn HitStore>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            events,
            locks: TargetLocks::default(),
        }
    }

    /// The event bus this manager emits on.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Runs a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> HitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HitStore) -> HitResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| HitError::Persistence(format!("storage worker failed: {e}")))?
    }

    /// Places a hit on `target_player_id`, timestamped now.
    ///
    /// `hirer_player_id` is `None` for console-issued hits.
    ///
    /// # Errors
    ///
    /// - `HitError::InvalidArgument` for an empty target or hirer id
    /// - `HitError::Persistence` if the store fails
    pub async fn place_hit(
        &self,
        target_player_id: &str,
        bounty: Bounty,
        hirer_player_id: Option<&str>,
    ) -> HitResult<Hit> {
        let new_hit = NewHit::new(target_player_id, bounty, hirer_player_id.map(str::to_owned))?;

        let _guard = self.locks.acquire(target_player_id).await;
        let hit = self.with_store(move |store| store.add(new_hit)).await?;

        debug!(
            "Placed hit {} on {} by {} for {}",
            hit.id,
            hit.target_player_id,
            hit.hirer_label(),
            hit.bounty
        );
        self.events.emit(&HitEvent::HitPlaced(hit.clone()));
        Ok(hit)
    }

    /// Current combined hit on `target_player_id`, or `None` when there are
    /// no hits (never a zero-valued view).
    ///
    /// # Errors
    ///
    /// - `HitError::InvalidArgument` for an empty target id
    /// - `HitError::Persistence` if the store fails
    /// - `HitError::ArithmeticOverflow` if the sum leaves the bounty range
    pub async fn get_combined_hit(&self, target_player_id: &str) -> HitResult<Option<CombinedHit>> {
        validate_player_id("target player id", target_player_id)?;

        let _guard = self.locks.acquire(target_player_id).await;
        let target = target_player_id.to_owned();
        let hits = self
            .with_store(move |store| store.find_by_target(&target))
            .await?;

        if hits.is_empty() {
            return Ok(None);
        }
        aggregator::combine(target_player_id, &hits).map(Some)
    }

    /// Snapshot of every target with at least one active hit, highest bounty
    /// first. The UI truncates to its own top N.
    ///
    /// # Errors
    ///
    /// `HitError::Persistence` or `HitError::ArithmeticOverflow`.
    pub async fn get_all_combined_hits(&self) -> HitResult<Vec<CombinedHit>> {
        let hits = self.with_store(|store| store.list_all()).await?;
        let mut combined: Vec<_> = aggregator::combine_all(&hits)?.into_values().collect();
        aggregator::sort_for_leaderboard(&mut combined);
        Ok(combined)
    }

    /// Deletes exactly `hit`. Deleting an already-removed hit is a no-op.
    ///
    /// # Errors
    ///
    /// `HitError::Persistence` if the store fails.
    pub async fn remove_hit(&self, hit: &Hit) -> HitResult<()> {
        let _guard = self.locks.acquire(&hit.target_player_id).await;
        let id = hit.id;
        if let Some(removed) = self.with_store(move |store| store.remove(id)).await? {
            self.events.emit(&HitEvent::HitRemoved(removed));
        }
        Ok(())
    }

    /// Deletes every hit on `target_player_id` in one transaction and returns
    /// the removed hits. Either all are removed or none are.
    ///
    /// # Errors
    ///
    /// - `HitError::InvalidArgument` for an empty target id
    /// - `HitError::Persistence` if the store fails (nothing removed)
    pub async fn remove_all_hits_on_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>> {
        validate_player_id("target player id", target_player_id)?;

        let _guard = self.locks.acquire(target_player_id).await;
        let target = target_player_id.to_owned();
        let removed = self
            .with_store(move |store| {
                let ids: Vec<_> = store.find_by_target(&target)?.iter().map(|h| h.id).collect();
                store.remove_all(&ids)
            })
            .await?;

        for hit in &removed {
            self.events.emit(&HitEvent::HitRemoved(hit.clone()));
        }
        Ok(removed)
    }

    /// Reads, aggregates and removes the hits on `target_player_id` under one
    /// lock: the completion path's point of no return.
    ///
    /// Returns `None` (and removes nothing) when there are no hits or the
    /// combined bounty is zero. The returned view covers exactly the rows
    /// that were removed, so a concurrent placement is either paid out here
    /// or left in place, never lost.
    ///
    /// # Errors
    ///
    /// - `HitError::InvalidArgument` for an empty target id
    /// - `HitError::Persistence` if the store fails (nothing removed)
    pub async fn claim_combined_hit(&self, target_player_id: &str) -> HitResult<Option<CombinedHit>> {
        validate_player_id("target player id", target_player_id)?;

        let _guard = self.locks.acquire(target_player_id).await;
        let target = target_player_id.to_owned();
        self.with_store(move |store| {
            let hits = store.find_by_target(&target)?;
            if hits.is_empty() {
                return Ok(None);
            }
            let combined = aggregator::combine(&target, &hits)?;
            if combined.bounty.is_zero() {
                return Ok(None);
            }

            let removed = store.remove_all(&combined.hit_ids)?;
            if removed.is_empty() {
                return Ok(None);
            }
            aggregator::combine(&target, &removed).map(Some)
        })
        .await
    }

    /// Deletes every hit placed more than `max_age` ago in one batch and emits
    /// one `HitExpired` per removed hit after the batch commits.
    ///
    /// # Errors
    ///
    /// - `HitError::InvalidArgument` if `max_age` is out of range
    /// - `HitError::Persistence` if the store fails (nothing removed)
    pub async fn clear_expired_hits(&self, max_age: Duration) -> HitResult<Vec<Hit>> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| HitError::InvalidArgument(format!("hit duration {max_age:?} out of range")))?;

        let candidates = self.with_store(move |store| store.find_older_than(cutoff)).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut targets: Vec<&str> = candidates.iter().map(|h| h.target_player_id.as_str()).collect();
        targets.sort_unstable();
        targets.dedup();
        let _guards = self.locks.acquire_many(&targets).await;

        // Re-query under the locks: one snapshot, one batch delete.
        let removed = self
            .with_store(move |store| {
                let ids: Vec<_> = store.find_older_than(cutoff)?.iter().map(|h| h.id).collect();
                store.remove_all(&ids)
            })
            .await?;

        for hit in &removed {
            info!(
                "Expiring hit on player {} placed by {} for {}",
                hit.target_player_id,
                hit.hirer_label(),
                hit.bounty
            );
            self.events.emit(&HitEvent::HitExpired(hit.clone()));
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryHitStore;

    fn manager() -> (HitManager, Arc<MemoryHitStore>, crate::events::EventReceiver) {
        let store = Arc::new(MemoryHitStore::new());
        let bus = Arc::new(EventBus::new(64));
        let rx = bus.subscribe();
        (HitManager::new(store.clone(), bus), store, rx)
    }

    fn bounty(text: &str) -> Bounty {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_stacked_hits_combine() {
        let (manager, _, rx) = manager();
        manager.place_hit("P1", bounty("50"), Some("H1")).await.unwrap();
        manager.place_hit("P1", bounty("25"), None).await.unwrap();

        let combined = manager.get_combined_hit("P1").await.unwrap().unwrap();
        assert_eq!(combined.bounty, bounty("75"));
        assert_eq!(rx.drain().len(), 2);
    }

    #[tokio::test]
    async fn test_absent_not_zero() {
        let (manager, _, _) = manager();
        assert_eq!(manager.get_combined_hit("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_place_rejects_empty_target() {
        let (manager, store, rx) = manager();
        let err = manager.place_hit("", bounty("1"), None).await.unwrap_err();
        assert!(matches!(err, HitError::InvalidArgument(_)));
        assert!(store.is_empty());
        assert_eq!(rx.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_hit_idempotent() {
        let (manager, _, rx) = manager();
        let a = manager.place_hit("P1", bounty("10"), None).await.unwrap();
        let b = manager.place_hit("P1", bounty("5"), None).await.unwrap();
        let _ = rx.drain();

        manager.remove_hit(&a).await.unwrap();
        manager.remove_hit(&a).await.unwrap();

        assert_eq!(rx.drain(), vec![HitEvent::HitRemoved(a)]);
        let combined = manager.get_combined_hit("P1").await.unwrap().unwrap();
        assert_eq!(combined.hit_ids, vec![b.id]);
    }

    #[tokio::test]
    async fn test_remove_all_hits_on_target() {
        let (manager, store, _) = manager();
        manager.place_hit("P1", bounty("10"), None).await.unwrap();
        manager.place_hit("P1", bounty("20"), None).await.unwrap();
        manager.place_hit("P2", bounty("30"), None).await.unwrap();

        let removed = manager.remove_all_hits_on_target("P1").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(manager.get_combined_hit("P1").await.unwrap(), None);
        assert!(store.find_by_target("P1").unwrap().is_empty());
        assert_eq!(store.len(), 1);

        // Second call after the first completed: nothing left, no error.
        assert!(manager.remove_all_hits_on_target("P1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_skips_zero_bounty() {
        let (manager, store, _) = manager();
        manager.place_hit("P1", Bounty::ZERO, None).await.unwrap();
        assert_eq!(manager.claim_combined_hit("P1").await.unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_claim_removes_and_returns_combined() {
        let (manager, store, _) = manager();
        manager.place_hit("P1", bounty("50"), None).await.unwrap();
        manager.place_hit("P1", bounty("25"), None).await.unwrap();

        let claimed = manager.claim_combined_hit("P1").await.unwrap().unwrap();
        assert_eq!(claimed.bounty, bounty("75"));
        assert!(store.is_empty());
        assert_eq!(manager.claim_combined_hit("P1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_all_combined_sorted_descending() {
        let (manager, _, _) = manager();
        manager.place_hit("low", bounty("1"), None).await.unwrap();
        manager.place_hit("high", bounty("100"), None).await.unwrap();
        manager.place_hit("mid", bounty("30"), None).await.unwrap();
        manager.place_hit("mid", bounty("30"), None).await.unwrap();

        let all = manager.get_all_combined_hits().await.unwrap();
        let order: Vec<_> = all.iter().map(|c| c.target_player_id.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
        assert_eq!(all[1].bounty, bounty("60"));
    }

    #[tokio::test]
    async fn test_clear_expired_hits_exact() {
        let (manager, store, rx) = manager();
        let now = Utc::now();
        let old = store
            .add(NewHit::placed_at("P1", bounty("10"), None, now - chrono::Duration::hours(25)).unwrap())
            .unwrap();
        let fresh = store
            .add(NewHit::placed_at("P1", bounty("20"), None, now - chrono::Duration::hours(1)).unwrap())
            .unwrap();

        let removed = manager
            .clear_expired_hits(Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(removed, vec![old.clone()]);
        assert_eq!(store.list_all().unwrap(), vec![fresh]);
        assert_eq!(rx.drain(), vec![HitEvent::HitExpired(old)]);
    }

    #[tokio::test]
    async fn test_clear_expired_rejects_absurd_duration() {
        let (manager, _, _) = manager();
        let err = manager.clear_expired_hits(Duration::MAX).await.unwrap_err();
        assert!(matches!(err, HitError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_lock_registry_prunes_idle_entries() {
        let (manager, _, _) = manager();
        for i in 0..(LOCK_PRUNE_THRESHOLD + 10) {
            manager.place_hit(&format!("P{i}"), bounty("1"), None).await.unwrap();
        }
        assert!(manager.locks.locks.lock().len() <= LOCK_PRUNE_THRESHOLD + 1);
    }

    /// Store whose writes fail while `writes_down` is set. Reads keep working.
    #[derive(Default)]
    struct ReadOnlyOutage {
        inner: MemoryHitStore,
        writes_down: std::sync::atomic::AtomicBool,
    }

    impl ReadOnlyOutage {
        fn check_writes(&self) -> HitResult<()> {
            if self.writes_down.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(HitError::Persistence("database offline".into()));
            }
            Ok(())
        }
    }

    impl HitStore for ReadOnlyOutage {
        fn add(&self, hit: NewHit) -> HitResult<Hit> {
            self.check_writes()?;
            self.inner.add(hit)
        }
        fn remove(&self, id: crate::hit::HitId) -> HitResult<Option<Hit>> {
            self.check_writes()?;
            self.inner.remove(id)
        }
        fn remove_all(&self, ids: &[crate::hit::HitId]) -> HitResult<Vec<Hit>> {
            self.check_writes()?;
            self.inner.remove_all(ids)
        }
        fn find_by_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>> {
            self.inner.find_by_target(target_player_id)
        }
        fn find_older_than(&self, cutoff: chrono::DateTime<Utc>) -> HitResult<Vec<Hit>> {
            self.inner.find_older_than(cutoff)
        }
        fn list_all(&self) -> HitResult<Vec<Hit>> {
            self.inner.list_all()
        }
    }

    fn outage_manager() -> (HitManager, Arc<ReadOnlyOutage>, crate::events::EventReceiver) {
        let store = Arc::new(ReadOnlyOutage::default());
        let bus = Arc::new(EventBus::new(64));
        let rx = bus.subscribe();
        (HitManager::new(store.clone(), bus), store, rx)
    }

    #[tokio::test]
    async fn test_storage_outage_removes_nothing() {
        let (manager, store, rx) = outage_manager();
        manager.place_hit("P1", bounty("50"), Some("H1")).await.unwrap();
        manager.place_hit("P1", bounty("25"), None).await.unwrap();
        let _ = rx.drain();
        store.writes_down.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = manager.remove_all_hits_on_target("P1").await.unwrap_err();
        assert!(err.is_persistence());
        let err = manager.claim_combined_hit("P1").await.unwrap_err();
        assert!(err.is_persistence());
        let placed = manager.get_all_combined_hits().await.unwrap();
        assert_eq!(placed[0].bounty, bounty("75"));

        assert_eq!(store.find_by_target("P1").unwrap().len(), 2);
        assert!(rx.drain().is_empty());

        // Back online: the same hits are still claimable.
        store.writes_down.store(false, std::sync::atomic::Ordering::SeqCst);
        let claimed = manager.claim_combined_hit("P1").await.unwrap().unwrap();
        assert_eq!(claimed.bounty, bounty("75"));
    }

    #[tokio::test]
    async fn test_place_surfaces_storage_outage() {
        let (manager, store, rx) = outage_manager();
        store.writes_down.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = manager.place_hit("P1", bounty("10"), None).await.unwrap_err();
        assert!(matches!(err, HitError::Persistence(_)));
        assert!(store.list_all().unwrap().is_empty());
        assert!(rx.drain().is_empty());
    }
}
