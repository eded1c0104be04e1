//! # Hit Records
//!
//! A `Hit` is one bounty placement. Records are immutable once stored:
//! there is no update, only insert and delete. Several hits may target the
//! same player at once (stacked bounties from different hirers).
//!
//! ## Persisted Schema
//!
//! ```text
//! Hits
//!   HitId          integer auto-increment primary key
//!   TargetPlayerId text          not null
//!   HirerPlayerId  text          null      (null = placed by console)
//!   Bounty         decimal(18,2) not null
//!   TimePlaced     timestamp     not null  (UTC)
//! ```

use chrono::{DateTime, Utc};

use crate::bounty::Bounty;
use crate::error::{HitError, HitResult};

/// Surrogate key assigned by the store, monotonically increasing.
pub type HitId = u32;

/// Player identifier as reported by the game server.
pub type PlayerId = String;

/// Label used in logs for hits without a hirer.
pub const CONSOLE_HIRER: &str = "Console";

/// A stored bounty placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hit {
    /// Unique id assigned by the store.
    pub id: HitId,
    /// Player the bounty is on. Never empty.
    pub target_player_id: PlayerId,
    /// Player who placed it, `None` for console-issued hits.
    pub hirer_player_id: Option<PlayerId>,
    /// Amount paid to whoever completes the hit.
    pub bounty: Bounty,
    /// Creation time.
    pub time_placed: DateTime<Utc>,
}

impl Hit {
    /// Hirer id, or `"Console"` for server-issued hits.
    #[must_use]
    pub fn hirer_label(&self) -> &str {
        self.hirer_player_id.as_deref().unwrap_or(CONSOLE_HIRER)
    }
}

/// A hit that has not been stored yet (no id).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewHit {
    /// Player the bounty is on.
    pub target_player_id: PlayerId,
    /// Player who placed it, `None` for console-issued hits.
    pub hirer_player_id: Option<PlayerId>,
    /// Amount.
    pub bounty: Bounty,
    /// Creation time.
    pub time_placed: DateTime<Utc>,
}

impl NewHit {
    /// Creates a new hit placed now.
    ///
    /// # Errors
    ///
    /// Returns `HitError::InvalidArgument` if `target_player_id` is empty or
    /// `hirer_player_id` is present but empty.
    pub fn new(
        target_player_id: impl Into<PlayerId>,
        bounty: Bounty,
        hirer_player_id: Option<PlayerId>,
    ) -> HitResult<Self> {
        Self::placed_at(target_player_id, bounty, hirer_player_id, Utc::now())
    }

    /// Creates a new hit with an explicit placement time.
    ///
    /// # Errors
    ///
    /// Same as [`NewHit::new`].
    pub fn placed_at(
        target_player_id: impl Into<PlayerId>,
        bounty: Bounty,
        hirer_player_id: Option<PlayerId>,
        time_placed: DateTime<Utc>,
    ) -> HitResult<Self> {
        let target_player_id = target_player_id.into();
        validate_player_id("target player id", &target_player_id)?;
        if let Some(hirer) = &hirer_player_id {
            validate_player_id("hirer player id", hirer)?;
        }

        Ok(Self {
            target_player_id,
            hirer_player_id,
            bounty,
            time_placed,
        })
    }

    /// Attaches the id assigned by the store.
    #[must_use]
    pub fn with_id(self, id: HitId) -> Hit {
        Hit {
            id,
            target_player_id: self.target_player_id,
            hirer_player_id: self.hirer_player_id,
            bounty: self.bounty,
            time_placed: self.time_placed,
        }
    }
}

/// Rejects empty (or whitespace-only) player ids.
pub(crate) fn validate_player_id(what: &str, id: &str) -> HitResult<()> {
    if id.trim().is_empty() {
        return Err(HitError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Player-facing view of every active hit on one target. Derived, never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedHit {
    /// Grouping key.
    pub target_player_id: PlayerId,
    /// Exact sum of the constituent bounties.
    pub bounty: Bounty,
    /// Ids of the hits that were summed, ascending.
    pub hit_ids: Vec<HitId>,
}
