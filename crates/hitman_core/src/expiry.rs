//! # Expiry Scheduler
//!
//! One background task per process:
//!
//! ```text
//! loop {
//!     sweep(duration)                       // errors logged, loop continues
//!     select! { sleep(check_interval), shutdown }
//!     if config changed { reload both durations }
//! }
//! ```
//!
//! Shutdown interrupts the sleep. A sweep in progress is allowed to finish:
//! its batch delete is atomic either way, and finishing keeps the
//! `HitExpired` events in step with the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HitmanConfig;
use crate::manager::HitManager;

/// Handle to the running expiry loop.
///
/// Dropping the handle without calling [`ExpiryScheduler::stop`] also ends
/// the loop at its next sleep.
pub struct ExpiryScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpiryScheduler {
    /// Spawns the loop on the current tokio runtime.
    ///
    /// The first sweep runs immediately.
    #[must_use]
    pub fn spawn(manager: Arc<HitManager>, config: watch::Receiver<Arc<HitmanConfig>>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(manager, config, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Returns true while the loop task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(self) {
        // Err means the loop already exited and dropped its receiver.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Expiry task ended abnormally: {}", e);
        }
    }
}

/// `(check_interval, duration)` from a snapshot.
fn timings(config: &HitmanConfig) -> (Duration, Duration) {
    (config.hits.check_interval, config.hits.duration)
}

async fn run(
    manager: Arc<HitManager>,
    mut config: watch::Receiver<Arc<HitmanConfig>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut check_interval, mut duration) = timings(&config.borrow_and_update());
    info!(
        "Expiry scheduler started: interval {:?}, duration {:?}",
        check_interval, duration
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        match manager.clear_expired_hits(duration).await {
            Ok(removed) if !removed.is_empty() => debug!("Expired {} hits", removed.len()),
            Ok(_) => {}
            Err(e) => error!("Expiry sweep failed: {}", e),
        }

        tokio::select! {
            () = tokio::time::sleep(check_interval) => {}
            // Signalled, or the handle was dropped.
            _ = shutdown.changed() => break,
        }

        if config.has_changed().unwrap_or(false) {
            (check_interval, duration) = timings(&config.borrow_and_update());
            info!(
                "Expiry scheduler reloaded: interval {:?}, duration {:?}",
                check_interval, duration
            );
        }
    }

    info!("Expiry scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;
    use crate::error::{HitError, HitResult};
    use crate::events::{EventBus, HitEvent};
    use crate::hit::{Hit, HitId, NewHit};
    use crate::store::{HitStore, MemoryHitStore};
    use crate::Bounty;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(duration: Duration) -> SharedConfig {
        let mut config = HitmanConfig::default();
        config.hits.check_interval = Duration::from_millis(20);
        config.hits.duration = duration;
        SharedConfig::new(config).unwrap()
    }

    fn hit_aged(hours: i64) -> NewHit {
        NewHit::placed_at("P1", Bounty::ONE, None, Utc::now() - chrono::Duration::hours(hours)).unwrap()
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_sweeps_expired_hits() {
        let store = Arc::new(MemoryHitStore::new());
        let old = store.add(hit_aged(25)).unwrap();
        store.add(hit_aged(1)).unwrap();

        let bus = Arc::new(EventBus::new(16));
        let rx = bus.subscribe();
        let manager = Arc::new(HitManager::new(store.clone(), bus));
        let config = fast_config(Duration::from_secs(24 * 3600));

        let scheduler = ExpiryScheduler::spawn(manager, config.subscribe());
        assert!(wait_until(|| store.len() == 1).await);
        scheduler.stop().await;

        assert_eq!(rx.drain(), vec![HitEvent::HitExpired(old)]);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let manager = Arc::new(HitManager::new(
            Arc::new(MemoryHitStore::new()),
            Arc::new(EventBus::default()),
        ));
        let mut config = HitmanConfig::default();
        config.hits.check_interval = Duration::from_secs(3600);
        let config = SharedConfig::new(config).unwrap();

        let scheduler = ExpiryScheduler::spawn(manager, config.subscribe());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.is_running());

        tokio::time::timeout(Duration::from_secs(2), scheduler.stop())
            .await
            .expect("stop must not wait out the check interval");
    }

    #[tokio::test]
    async fn test_reloads_duration() {
        let store = Arc::new(MemoryHitStore::new());
        store.add(hit_aged(2)).unwrap();
        let manager = Arc::new(HitManager::new(store.clone(), Arc::new(EventBus::default())));
        let config = fast_config(Duration::from_secs(24 * 3600));

        let scheduler = ExpiryScheduler::spawn(manager, config.subscribe());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.len(), 1);

        let mut shorter = (*config.current()).clone();
        shorter.hits.duration = Duration::from_secs(3600);
        config.replace(shorter).unwrap();

        assert!(wait_until(|| store.is_empty()).await);
        scheduler.stop().await;
    }

    /// Fails the first `failures` age queries, then delegates.
    struct FlakyStore {
        inner: MemoryHitStore,
        failures: AtomicU32,
    }

    impl HitStore for FlakyStore {
        fn add(&self, hit: NewHit) -> HitResult<Hit> {
            self.inner.add(hit)
        }
        fn remove(&self, id: HitId) -> HitResult<Option<Hit>> {
            self.inner.remove(id)
        }
        fn remove_all(&self, ids: &[HitId]) -> HitResult<Vec<Hit>> {
            self.inner.remove_all(ids)
        }
        fn find_by_target(&self, target_player_id: &str) -> HitResult<Vec<Hit>> {
            self.inner.find_by_target(target_player_id)
        }
        fn find_older_than(&self, cutoff: DateTime<Utc>) -> HitResult<Vec<Hit>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(HitError::Persistence("database offline".into()));
            }
            self.inner.find_older_than(cutoff)
        }
        fn list_all(&self) -> HitResult<Vec<Hit>> {
            self.inner.list_all()
        }
    }

    #[tokio::test]
    async fn test_failed_sweep_keeps_looping() {
        let store = Arc::new(FlakyStore {
            inner: MemoryHitStore::new(),
            failures: AtomicU32::new(3),
        });
        store.add(hit_aged(48)).unwrap();
        let manager = Arc::new(HitManager::new(store.clone(), Arc::new(EventBus::default())));
        let config = fast_config(Duration::from_secs(24 * 3600));

        let scheduler = ExpiryScheduler::spawn(manager, config.subscribe());
        assert!(wait_until(|| store.inner.is_empty()).await);
        assert!(scheduler.is_running());
        scheduler.stop().await;
    }
}
