//! # Hit Completion
//!
//! Turns a "player killed" signal into a payout.
//!
//! ```text
//! KillEvent
//!    │ self-kill / suicide ─────────────> Skipped
//!    │ victim or killer offline ────────> Skipped
//!    │ privileged && admins_claim_hits ─> Skipped
//!    │ no "hitman" permission ──────────> Skipped
//!    ▼
//! claim_combined_hit(victim) ─ none ───> Skipped
//!    │ (hits removed: point of no return)
//!    ▼
//! credit killer ─ error ───────────────> Failed (logged)
//!    ▼
//! notify killer / others / victim
//!    ▼
//! emit HitCompleted ───────────────────> Completed
//! ```
//!
//! `handle_kill` never returns an error. The kill pipeline has no caller that
//! could act on one, so every failure is logged and reported as an outcome.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, Participant, CLAIM_PERMISSION};
use crate::config::{MessageContext, SharedConfig};
use crate::error::HitResult;
use crate::events::HitEvent;
use crate::hit::{CombinedHit, PlayerId};
use crate::manager::HitManager;

/// How the victim died.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeathCause {
    /// Killed by another player.
    Combat,
    /// Self-inflicted.
    Suicide,
    /// Anything else (fall, zombie, vehicle).
    Other,
}

/// A death reported by the game server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KillEvent {
    /// Player who died.
    pub victim_id: PlayerId,
    /// Player credited with the kill, `None` for environmental deaths.
    pub killer_id: Option<PlayerId>,
    /// Cause classification.
    pub cause: DeathCause,
    /// Killer privilege as seen by the game engine.
    pub killer_is_privileged: bool,
}

impl KillEvent {
    /// A player-on-player kill.
    pub fn combat(victim_id: impl Into<PlayerId>, killer_id: impl Into<PlayerId>) -> Self {
        Self {
            victim_id: victim_id.into(),
            killer_id: Some(killer_id.into()),
            cause: DeathCause::Combat,
            killer_is_privileged: false,
        }
    }
}

/// Why a kill did not pay out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Killer is the victim, or the death was a suicide.
    SelfInflicted,
    /// Nobody was credited with the kill.
    NoKiller,
    /// Victim or killer is not online.
    ParticipantOffline,
    /// Privileged killers may not claim hits.
    PrivilegedKiller,
    /// Killer lacks the claim permission.
    PermissionDenied,
    /// No active hit, or its combined bounty is zero.
    NoBounty,
}

/// Result of handling one kill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Bounty paid out; carries the consumed hits.
    Completed(CombinedHit),
    /// Not eligible; nothing changed.
    Skipped(SkipReason),
    /// An error was logged. If the claim already ran, the hits stay consumed.
    Failed(String),
}

/// Reacts to kills and drives the completion transition.
pub struct CompletionHandler {
    manager: Arc<HitManager>,
    config: SharedConfig,
    collaborators: Collaborators,
}

impl CompletionHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(manager: Arc<HitManager>, config: SharedConfig, collaborators: Collaborators) -> Self {
        Self {
            manager,
            config,
            collaborators,
        }
    }

    /// Handles one kill. Never fails; see [`CompletionOutcome`].
    pub async fn handle_kill(&self, event: &KillEvent) -> CompletionOutcome {
        match self.complete(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Error occurred while completing hit on {} (killer {:?}): {}",
                    event.victim_id, event.killer_id, e
                );
                CompletionOutcome::Failed(e.to_string())
            }
        }
    }

    async fn complete(&self, event: &KillEvent) -> HitResult<CompletionOutcome> {
        let Some(killer_id) = event.killer_id.as_deref() else {
            return Ok(CompletionOutcome::Skipped(SkipReason::NoKiller));
        };
        if killer_id == event.victim_id || event.cause == DeathCause::Suicide {
            return Ok(CompletionOutcome::Skipped(SkipReason::SelfInflicted));
        }

        let directory = &self.collaborators.directory;
        let (Some(victim), Some(killer)) =
            (directory.find_online(&event.victim_id), directory.find_online(killer_id))
        else {
            return Ok(CompletionOutcome::Skipped(SkipReason::ParticipantOffline));
        };

        let config = self.config.current();
        let privileged = event.killer_is_privileged || killer.is_privileged;
        if privileged && config.hits.admins_claim_hits {
            return Ok(CompletionOutcome::Skipped(SkipReason::PrivilegedKiller));
        }

        let grant = self
            .collaborators
            .permissions
            .check_permission(&killer, CLAIM_PERMISSION)?;
        if !grant.is_granted() {
            return Ok(CompletionOutcome::Skipped(SkipReason::PermissionDenied));
        }

        let Some(combined) = self.manager.claim_combined_hit(&victim.id).await? else {
            return Ok(CompletionOutcome::Skipped(SkipReason::NoBounty));
        };

        let economy = &self.collaborators.economy;
        let context = MessageContext {
            killer: &killer.display_name,
            target: &victim.display_name,
            bounty: combined.bounty,
            currency_name: economy.currency_name(),
            currency_symbol: economy.currency_symbol(),
        };

        let memo = context.render(&config.messages.transaction_memo);
        if let Err(e) = economy.update_balance(&killer.id, combined.bounty, &memo) {
            error!(
                "Payout of {} to {} failed after hits {:?} on {} were consumed: {}",
                combined.bounty, killer.id, combined.hit_ids, victim.id, e
            );
            return Err(e);
        }

        self.notify(&killer, &context.render(&config.messages.killer));
        if config.hits.completed.announce {
            let announcement = context.render(&config.messages.announce);
            for participant in directory.online_participants() {
                if participant.id == killer.id || participant.id == victim.id {
                    continue;
                }
                self.notify(&participant, &announcement);
            }
        }
        if config.hits.completed.tell_target {
            self.notify(&victim, &context.render(&config.messages.target));
        }

        info!(
            "Hit on {} completed by {} for {}",
            victim.id, killer.id, combined.bounty
        );
        self.manager.events().emit(&HitEvent::HitCompleted {
            combined: combined.clone(),
            killer_player_id: killer.id.clone(),
        });

        Ok(CompletionOutcome::Completed(combined))
    }

    /// Best-effort delivery: one recipient failing does not stop the rest.
    fn notify(&self, participant: &Participant, text: &str) {
        match self.collaborators.notifier.send_message(participant, text) {
            Ok(()) => debug!("Notified {}", participant.id),
            Err(e) => warn!("Failed to notify {}: {}", participant.id, e),
        }
    }
}
