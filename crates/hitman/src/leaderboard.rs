//! # Leaderboard
//!
//! The UI side of the hit list: top bounties with display names.
//!
//! Call [`Leaderboard::tick`] once per UI frame. It drains the event channel
//! and only hits the store when something changed the list.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use hitman_core::{
    Bounty, EventBus, EventReceiver, HitManager, HitResult, Participant, ParticipantDirectory,
    PermissionChecker, PlayerId, SharedConfig, UI_PERMISSION,
};
use tracing::{debug, warn};

/// One leaderboard row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Target player id.
    pub target_player_id: PlayerId,
    /// Name to show; the raw id when the target is offline.
    pub display_name: String,
    /// Combined bounty.
    pub bounty: Bounty,
}

/// Cached top-N projection of the hit list.
pub struct Leaderboard {
    manager: Arc<HitManager>,
    config: SharedConfig,
    directory: Arc<dyn ParticipantDirectory>,
    permissions: Arc<dyn PermissionChecker>,
    events: EventReceiver,
    entries: Vec<LeaderboardEntry>,
    stale: bool,
}

impl Leaderboard {
    /// Creates a leaderboard subscribed to `bus`. The first tick loads it.
    #[must_use]
    pub fn new(
        manager: Arc<HitManager>,
        bus: &EventBus,
        config: SharedConfig,
        directory: Arc<dyn ParticipantDirectory>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Self {
            manager,
            config,
            directory,
            permissions,
            events: bus.subscribe(),
            entries: Vec::new(),
            stale: true,
        }
    }

    /// Drains pending events and refreshes if the list changed.
    ///
    /// Returns true if the entries were rebuilt.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the next tick retries.
    pub async fn tick(&mut self) -> HitResult<bool> {
        let updates = self
            .events
            .drain()
            .iter()
            .filter(|e| e.is_list_update())
            .count();
        if updates > 0 {
            debug!("Leaderboard saw {} list updates", updates);
            self.stale = true;
        }
        if !self.stale {
            return Ok(false);
        }

        self.refresh().await?;
        Ok(true)
    }

    /// Rebuilds the entries from the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures and leaves the leaderboard stale.
    pub async fn refresh(&mut self) -> HitResult<()> {
        self.stale = true;
        let max_entries = self.config.current().ui.max_entries;
        let mut combined = self.manager.get_all_combined_hits().await?;
        combined.truncate(max_entries);

        let names: HashMap<PlayerId, String> = self
            .directory
            .online_participants()
            .into_iter()
            .map(|p| (p.id, p.display_name))
            .collect();

        self.entries = combined
            .into_iter()
            .map(|c| LeaderboardEntry {
                display_name: names
                    .get(&c.target_player_id)
                    .cloned()
                    .unwrap_or_else(|| c.target_player_id.clone()),
                target_player_id: c.target_player_id,
                bounty: c.bounty,
            })
            .collect();
        self.stale = false;
        Ok(())
    }

    /// Current rows, highest bounty first.
    #[must_use]
    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    /// Whether `participant` may see the leaderboard.
    ///
    /// A failing permission backend hides it.
    #[must_use]
    pub fn visible_to(&self, participant: &Participant) -> bool {
        match self.permissions.check_permission(participant, UI_PERMISSION) {
            Ok(grant) => grant.is_granted(),
            Err(e) => {
                warn!("Permission check for {} failed: {}", participant.id, e);
                false
            }
        }
    }

    /// Text rendering, one `rank. name  symbol+bounty` row per line.
    #[must_use]
    pub fn render(&self, currency_symbol: &str) -> String {
        if self.entries.is_empty() {
            return "No active hits.".to_owned();
        }
        let mut out = String::new();
        for (rank, entry) in self.entries.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>2}. {:<24} {}{}",
                rank + 1,
                entry.display_name,
                currency_symbol,
                entry.bounty
            );
        }
        out
    }

    /// Unsubscribes from `bus`.
    pub fn close(self, bus: &EventBus) {
        bus.unsubscribe(self.events.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitman_core::{HitmanConfig, MemoryHitStore, PermissionGrant, StaticDirectory, StaticPermissions};

    struct Fixture {
        bus: Arc<EventBus>,
        manager: Arc<HitManager>,
        directory: Arc<StaticDirectory>,
        permissions: Arc<StaticPermissions>,
        config: SharedConfig,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(EventBus::new(64));
        let manager = Arc::new(HitManager::new(Arc::new(MemoryHitStore::new()), bus.clone()));
        Fixture {
            bus,
            manager,
            directory: Arc::new(StaticDirectory::new()),
            permissions: Arc::new(StaticPermissions::allow_all()),
            config: SharedConfig::default(),
        }
    }

    fn leaderboard(f: &Fixture) -> Leaderboard {
        Leaderboard::new(
            f.manager.clone(),
            &f.bus,
            f.config.clone(),
            f.directory.clone(),
            f.permissions.clone(),
        )
    }

    #[tokio::test]
    async fn test_refreshes_only_on_change() {
        let f = fixture();
        let mut board = leaderboard(&f);

        assert!(board.tick().await.unwrap());
        assert!(!board.tick().await.unwrap());

        f.manager.place_hit("P1", Bounty::ONE, None).await.unwrap();
        assert!(board.tick().await.unwrap());
        assert_eq!(board.entries().len(), 1);
        assert!(!board.tick().await.unwrap());
    }

    #[tokio::test]
    async fn test_truncates_and_orders() {
        let f = fixture();
        let mut config = HitmanConfig::default();
        config.ui.max_entries = 3;
        f.config.replace(config).unwrap();

        for i in 1..=5u64 {
            f.manager
                .place_hit(&format!("P{i}"), Bounty::from_whole(i * 10).unwrap(), None)
                .await
                .unwrap();
        }

        let mut board = leaderboard(&f);
        board.tick().await.unwrap();
        let ids: Vec<_> = board.entries().iter().map(|e| e.target_player_id.as_str()).collect();
        assert_eq!(ids, vec!["P5", "P4", "P3"]);
    }

    #[tokio::test]
    async fn test_display_name_fallback() {
        let f = fixture();
        f.directory.join(Participant::new("P1", "Alice"));
        f.manager.place_hit("P1", Bounty::ONE, None).await.unwrap();
        f.manager.place_hit("P2", Bounty::ONE, None).await.unwrap();

        let mut board = leaderboard(&f);
        board.tick().await.unwrap();
        let names: Vec<_> = board.entries().iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "P2"]);
    }

    #[tokio::test]
    async fn test_render() {
        let f = fixture();
        let mut board = leaderboard(&f);
        board.tick().await.unwrap();
        assert_eq!(board.render("$"), "No active hits.");

        f.manager.place_hit("P1", "75".parse().unwrap(), None).await.unwrap();
        board.tick().await.unwrap();
        assert!(board.render("$").contains("$75.00"));
    }

    #[test]
    fn test_visibility() {
        let f = fixture();
        f.permissions.set("P1", UI_PERMISSION, PermissionGrant::Denied);
        let board = leaderboard(&f);

        assert!(!board.visible_to(&Participant::new("P1", "Alice")));
        assert!(board.visible_to(&Participant::new("P2", "Bob")));
    }

    #[test]
    fn test_close_unsubscribes() {
        let f = fixture();
        let board = leaderboard(&f);
        assert_eq!(f.bus.subscriber_count(), 1);
        board.close(&f.bus);
        assert_eq!(f.bus.subscriber_count(), 0);
    }
}
