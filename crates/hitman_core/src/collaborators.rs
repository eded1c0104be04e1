//! # Collaborator Traits
//!
//! Interfaces the hit lifecycle needs from the rest of the game server.
//! The core never transfers currency, tracks who is online, computes
//! permissions or renders chat itself; the host implements these traits.
//!
//! ```text
//! hitman_core defines:        host implements:
//! ┌──────────────────────┐    ┌──────────────────────┐
//! │ trait EconomyProvider│ ←─ │ impl EconomyProvider │
//! └──────────────────────┘    └──────────────────────┘
//! ```
//!
//! Calls are synchronous and are expected to return quickly. Kill handling
//! runs on a runtime task, never on the game thread that reported the kill.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::bounty::Bounty;
use crate::error::{HitError, HitResult};
use crate::hit::PlayerId;

/// Permission needed to collect a bounty.
pub const CLAIM_PERMISSION: &str = "hitman";

/// Permission needed to see the leaderboard.
pub const UI_PERMISSION: &str = "ui";

/// An online player as seen by the participant directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Stable player id.
    pub id: PlayerId,
    /// Name shown in chat and on the leaderboard.
    pub display_name: String,
    /// Elevated privilege (admin).
    pub is_privileged: bool,
}

impl Participant {
    /// Creates a non-privileged participant.
    pub fn new(id: impl Into<PlayerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_privileged: false,
        }
    }

    /// Marks the participant as privileged.
    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.is_privileged = true;
        self
    }
}

/// Result of a permission query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionGrant {
    /// Allowed.
    Granted,
    /// Not allowed.
    Denied,
}

impl PermissionGrant {
    /// Returns true if granted.
    #[must_use]
    pub const fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

// ============================================================================
// ECONOMY
// ============================================================================

/// Interface to the economy ledger.
pub trait EconomyProvider: Send + Sync {
    /// Credits `amount` to `player_id` with a human-readable memo.
    ///
    /// # Errors
    ///
    /// `HitError::Collaborator` if the ledger rejects the transaction.
    fn update_balance(&self, player_id: &str, amount: Bounty, memo: &str) -> HitResult<()>;

    /// Currency name, e.g. "credits".
    fn currency_name(&self) -> &str;

    /// Currency symbol, e.g. "$".
    fn currency_symbol(&self) -> &str;
}

// ============================================================================
// PARTICIPANTS
// ============================================================================

/// Interface to the list of connected players.
pub trait ParticipantDirectory: Send + Sync {
    /// Everyone currently online.
    fn online_participants(&self) -> Vec<Participant>;

    /// Finds an online participant by id.
    fn find_online(&self, player_id: &str) -> Option<Participant> {
        self.online_participants()
            .into_iter()
            .find(|p| p.id == player_id)
    }
}

// ============================================================================
// PERMISSIONS
// ============================================================================

/// Interface to the permission system.
pub trait PermissionChecker: Send + Sync {
    /// Checks whether `participant` holds `permission_key`.
    ///
    /// # Errors
    ///
    /// `HitError::Collaborator` if the permission backend is unavailable.
    fn check_permission(&self, participant: &Participant, permission_key: &str)
        -> HitResult<PermissionGrant>;
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// Interface to player chat.
pub trait Notifier: Send + Sync {
    /// Sends `text` to `participant`.
    ///
    /// # Errors
    ///
    /// `HitError::Collaborator` if delivery fails.
    fn send_message(&self, participant: &Participant, text: &str) -> HitResult<()>;
}

/// The host services the hit lifecycle talks to, wired once at startup.
#[derive(Clone)]
pub struct Collaborators {
    /// Pays out bounties.
    pub economy: Arc<dyn EconomyProvider>,
    /// Resolves online players.
    pub directory: Arc<dyn ParticipantDirectory>,
    /// Answers permission queries.
    pub permissions: Arc<dyn PermissionChecker>,
    /// Delivers chat messages.
    pub notifier: Arc<dyn Notifier>,
}

// ============================================================================
// IN-PROCESS IMPLEMENTATIONS (tests, standalone server)
// ============================================================================

/// One credited transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Credited player.
    pub player_id: PlayerId,
    /// Amount credited.
    pub amount: Bounty,
    /// Transaction memo.
    pub memo: String,
}

/// Economy that keeps balances in memory.
pub struct LedgerEconomy {
    currency_name: String,
    currency_symbol: String,
    balances: Mutex<HashMap<PlayerId, Bounty>>,
    entries: Mutex<Vec<LedgerEntry>>,
}

impl LedgerEconomy {
    /// Creates an empty ledger.
    pub fn new(currency_name: impl Into<String>, currency_symbol: impl Into<String>) -> Self {
        Self {
            currency_name: currency_name.into(),
            currency_symbol: currency_symbol.into(),
            balances: Mutex::new(HashMap::new()),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Current balance of `player_id` (zero if never credited).
    #[must_use]
    pub fn balance(&self, player_id: &str) -> Bounty {
        self.balances
            .lock()
            .get(player_id)
            .copied()
            .unwrap_or(Bounty::ZERO)
    }

    /// Every credited transaction, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }
}

impl Default for LedgerEconomy {
    fn default() -> Self {
        Self::new("credits", "$")
    }
}

impl EconomyProvider for LedgerEconomy {
    fn update_balance(&self, player_id: &str, amount: Bounty, memo: &str) -> HitResult<()> {
        let mut balances = self.balances.lock();
        let balance = balances.entry(player_id.to_owned()).or_default();
        *balance = balance.safe_add(amount)?;

        self.entries.lock().push(LedgerEntry {
            player_id: player_id.to_owned(),
            amount,
            memo: memo.to_owned(),
        });
        Ok(())
    }

    fn currency_name(&self) -> &str {
        &self.currency_name
    }

    fn currency_symbol(&self) -> &str {
        &self.currency_symbol
    }
}

/// Directory backed by an explicit join/leave list.
#[derive(Default)]
pub struct StaticDirectory {
    participants: RwLock<Vec<Participant>>,
}

impl StaticDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an online participant.
    pub fn join(&self, participant: Participant) {
        let mut participants = self.participants.write();
        participants.retain(|p| p.id != participant.id);
        participants.push(participant);
    }

    /// Removes a participant. Unknown ids are ignored.
    pub fn leave(&self, player_id: &str) {
        self.participants.write().retain(|p| p.id != player_id);
    }
}

impl ParticipantDirectory for StaticDirectory {
    fn online_participants(&self) -> Vec<Participant> {
        self.participants.read().clone()
    }
}

/// Permission table with a default answer and per-player overrides.
pub struct StaticPermissions {
    default_grant: PermissionGrant,
    overrides: RwLock<HashMap<(PlayerId, String), PermissionGrant>>,
}

impl StaticPermissions {
    /// Everyone holds every permission unless overridden.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::with_default(PermissionGrant::Granted)
    }

    /// Nobody holds any permission unless overridden.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::with_default(PermissionGrant::Denied)
    }

    fn with_default(default_grant: PermissionGrant) -> Self {
        Self {
            default_grant,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the answer for one player and key.
    pub fn set(&self, player_id: impl Into<PlayerId>, permission_key: impl Into<String>, grant: PermissionGrant) {
        self.overrides
            .write()
            .insert((player_id.into(), permission_key.into()), grant);
    }
}

impl PermissionChecker for StaticPermissions {
    fn check_permission(&self, participant: &Participant, permission_key: &str)
        -> HitResult<PermissionGrant>
    {
        let grant = self
            .overrides
            .read()
            .get(&(participant.id.clone(), permission_key.to_owned()))
            .copied()
            .unwrap_or(self.default_grant);
        Ok(grant)
    }
}

/// Notifier that records every message.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(PlayerId, String)>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(recipient, text)` pairs, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<(PlayerId, String)> {
        self.messages.lock().clone()
    }

    /// Messages received by one player.
    #[must_use]
    pub fn messages_for(&self, player_id: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(to, _)| to == player_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn send_message(&self, participant: &Participant, text: &str) -> HitResult<()> {
        if participant.id.is_empty() {
            return Err(HitError::Collaborator("message recipient has no id".into()));
        }
        self.messages.lock().push((participant.id.clone(), text.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_accumulates() {
        let economy = LedgerEconomy::default();
        economy.update_balance("K", Bounty::from_whole(50).unwrap(), "a").unwrap();
        economy.update_balance("K", Bounty::from_whole(25).unwrap(), "b").unwrap();
        assert_eq!(economy.balance("K"), Bounty::from_whole(75).unwrap());
        assert_eq!(economy.entries().len(), 2);
        assert_eq!(economy.balance("nobody"), Bounty::ZERO);
    }

    #[test]
    fn test_ledger_overflow_rejected() {
        let economy = LedgerEconomy::default();
        economy.update_balance("K", Bounty::MAX, "max").unwrap();
        let err = economy.update_balance("K", Bounty::ONE, "one").unwrap_err();
        assert_eq!(err, HitError::ArithmeticOverflow);
        assert_eq!(economy.entries().len(), 1);
    }

    #[test]
    fn test_directory_join_leave() {
        let directory = StaticDirectory::new();
        directory.join(Participant::new("A", "Alice"));
        directory.join(Participant::new("A", "Alice Renamed").privileged());
        assert_eq!(directory.online_participants().len(), 1);
        assert!(directory.find_online("A").unwrap().is_privileged);

        directory.leave("A");
        assert_eq!(directory.find_online("A"), None);
    }

    #[test]
    fn test_permission_overrides() {
        let permissions = StaticPermissions::allow_all();
        let alice = Participant::new("A", "Alice");
        permissions.set("A", CLAIM_PERMISSION, PermissionGrant::Denied);

        assert!(!permissions.check_permission(&alice, CLAIM_PERMISSION).unwrap().is_granted());
        assert!(permissions.check_permission(&alice, UI_PERMISSION).unwrap().is_granted());
    }
}
