//! Integration tests for the hit lifecycle.
//!
//! Runs the end-to-end scenarios against both store backends.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hitman_core::{
    Bounty, Collaborators, CompletionHandler, CompletionOutcome, EventBus, HitEvent, HitManager,
    HitStore, KillEvent, LedgerEconomy, MemoryHitStore, NewHit, Participant, RecordingNotifier,
    SharedConfig, StaticDirectory, StaticPermissions, WalHitStore,
};

fn temp_wal_path(tag: &str) -> std::path::PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("test_hit_lifecycle_{tag}_{id}.wal"))
}

fn bounty(text: &str) -> Bounty {
    text.parse().unwrap()
}

fn manager_over(store: Arc<dyn HitStore>) -> (Arc<HitManager>, hitman_core::EventReceiver) {
    let bus = Arc::new(EventBus::new(4096));
    let rx = bus.subscribe();
    (Arc::new(HitManager::new(store, bus)), rx)
}

async fn check_stacking(store: Arc<dyn HitStore>) {
    let (manager, _rx) = manager_over(store);
    manager.place_hit("P1", bounty("50"), Some("H1")).await.unwrap();
    manager.place_hit("P1", bounty("25"), None).await.unwrap();

    let combined = manager.get_combined_hit("P1").await.unwrap().unwrap();
    assert_eq!(combined.bounty, bounty("75"));
    assert_eq!(combined.hit_ids.len(), 2);
}

#[tokio::test]
async fn test_stacking_memory() {
    check_stacking(Arc::new(MemoryHitStore::new())).await;
}

#[tokio::test]
async fn test_stacking_wal() {
    let path = temp_wal_path("stacking");
    check_stacking(Arc::new(WalHitStore::open(&path).unwrap())).await;
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn test_sum_is_order_independent() {
    let amounts = ["0.01", "19.99", "1000000.50", "3.33", "0.67"];

    let (forward, _) = manager_over(Arc::new(MemoryHitStore::new()));
    for amount in amounts {
        forward.place_hit("P1", bounty(amount), None).await.unwrap();
    }
    let (backward, _) = manager_over(Arc::new(MemoryHitStore::new()));
    for amount in amounts.iter().rev() {
        backward.place_hit("P1", bounty(amount), None).await.unwrap();
    }

    let a = forward.get_combined_hit("P1").await.unwrap().unwrap();
    let b = backward.get_combined_hit("P1").await.unwrap().unwrap();
    assert_eq!(a.bounty, b.bounty);
    assert_eq!(a.bounty.to_string(), "1000024.50");
}

#[tokio::test]
async fn test_expiry_scenario_wal() {
    let path = temp_wal_path("expiry");
    let store = Arc::new(WalHitStore::open(&path).unwrap());
    let now = Utc::now();
    let old = store
        .add(NewHit::placed_at("P1", bounty("10"), Some("H1".into()), now - chrono::Duration::hours(25)).unwrap())
        .unwrap();
    let fresh = store
        .add(NewHit::placed_at("P1", bounty("20"), None, now - chrono::Duration::hours(1)).unwrap())
        .unwrap();

    let (manager, rx) = manager_over(store.clone());
    let removed = manager
        .clear_expired_hits(Duration::from_secs(24 * 3600))
        .await
        .unwrap();

    assert_eq!(removed, vec![old.clone()]);
    assert_eq!(rx.drain(), vec![HitEvent::HitExpired(old)]);
    drop(manager);
    drop(store);

    // The expiry survives a restart.
    let reopened = WalHitStore::open(&path).unwrap();
    assert_eq!(reopened.list_all().unwrap(), vec![fresh]);
    drop(reopened);
    std::fs::remove_file(&path).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_placements_on_different_targets() {
    let (manager, _rx) = manager_over(Arc::new(MemoryHitStore::new()));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .place_hit(&format!("P{i}"), Bounty::from_whole(i + 1).unwrap(), None)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for i in 0..32u64 {
        let combined = manager.get_combined_hit(&format!("P{i}")).await.unwrap().unwrap();
        assert_eq!(combined.bounty, Bounty::from_whole(i + 1).unwrap());
    }
    assert_eq!(manager.get_all_combined_hits().await.unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_remove_all_on_same_target() {
    let (manager, _rx) = manager_over(Arc::new(MemoryHitStore::new()));
    for _ in 0..10 {
        manager.place_hit("P1", Bounty::ONE, None).await.unwrap();
    }

    let a = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.remove_all_hits_on_target("P1").await }
    });
    let b = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.remove_all_hits_on_target("P1").await }
    });

    let removed_a = a.await.unwrap().unwrap();
    let removed_b = b.await.unwrap().unwrap();

    // Exactly one call saw the rows; neither errored.
    assert_eq!(removed_a.len() + removed_b.len(), 10);
    assert!(removed_a.is_empty() || removed_b.is_empty());
    assert_eq!(manager.get_combined_hit("P1").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_racing_placements_never_lose_bounty() {
    let (manager, _rx) = manager_over(Arc::new(MemoryHitStore::new()));
    let placements = 200u64;

    let placer = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move {
            for _ in 0..placements {
                manager.place_hit("P1", Bounty::ONE, None).await.unwrap();
            }
        }
    });
    let claimer = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move {
            let mut paid = Bounty::ZERO;
            for _ in 0..50 {
                if let Some(claimed) = manager.claim_combined_hit("P1").await.unwrap() {
                    paid = paid.safe_add(claimed.bounty).unwrap();
                }
                tokio::task::yield_now().await;
            }
            paid
        }
    });

    placer.await.unwrap();
    let paid = claimer.await.unwrap();
    let left = manager
        .get_combined_hit("P1")
        .await
        .unwrap()
        .map_or(Bounty::ZERO, |c| c.bounty);

    assert_eq!(paid.safe_add(left).unwrap(), Bounty::from_whole(placements).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_kill_pays_once() {
    let (manager, rx) = manager_over(Arc::new(MemoryHitStore::new()));
    manager.place_hit("V", bounty("75"), None).await.unwrap();

    let directory = Arc::new(StaticDirectory::new());
    for (id, name) in [("V", "Victor"), ("K1", "Kira"), ("K2", "Kai")] {
        directory.join(Participant::new(id, name));
    }
    let economy = Arc::new(LedgerEconomy::default());
    let handler = Arc::new(CompletionHandler::new(
        Arc::clone(&manager),
        SharedConfig::default(),
        Collaborators {
            economy: economy.clone(),
            directory,
            permissions: Arc::new(StaticPermissions::allow_all()),
            notifier: Arc::new(RecordingNotifier::new()),
        },
    ));

    let first = tokio::spawn({
        let handler = Arc::clone(&handler);
        async move { handler.handle_kill(&KillEvent::combat("V", "K1")).await }
    });
    let second = tokio::spawn({
        let handler = Arc::clone(&handler);
        async move { handler.handle_kill(&KillEvent::combat("V", "K2")).await }
    });
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, CompletionOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);

    let total = economy.balance("K1").safe_add(economy.balance("K2")).unwrap();
    assert_eq!(total, bounty("75"));

    let completions = rx
        .drain()
        .into_iter()
        .filter(|e| matches!(e, HitEvent::HitCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_wal_survives_restart_through_manager() {
    let path = temp_wal_path("restart");
    {
        let (manager, _rx) = manager_over(Arc::new(WalHitStore::open(&path).unwrap()));
        manager.place_hit("P1", bounty("12.34"), Some("H1")).await.unwrap();
        manager.place_hit("P2", bounty("5"), None).await.unwrap();
        manager.remove_all_hits_on_target("P2").await.unwrap();
    }

    let (manager, _rx) = manager_over(Arc::new(WalHitStore::open(&path).unwrap()));
    let all = manager.get_all_combined_hits().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].target_player_id, "P1");
    assert_eq!(all[0].bounty, bounty("12.34"));

    let next = manager.place_hit("P3", Bounty::ONE, None).await.unwrap();
    assert_eq!(next.id, 3);

    drop(manager);
    std::fs::remove_file(&path).ok();
}
