//! # Hitman Core
//!
//! The hit lifecycle for an in-game bounty system: players (or the console)
//! place bounties on other players, whoever kills the target collects the
//! combined bounty, and unclaimed hits expire.
//!
//! ## Design Principles
//!
//! 1. **Zero floating point** - bounties are decimal(18,2) fixed-point
//! 2. **Store is the truth** - combined views are recomputed on every call
//! 3. **Per-target linearization** - no lost bounty, no double payout
//! 4. **All-or-nothing batches** - a batch delete is one WAL transaction
//!
//! ## Example
//!
//! ```rust,ignore
//! use hitman_core::{EventBus, HitManager, MemoryHitStore};
//!
//! let manager = HitManager::new(Arc::new(MemoryHitStore::new()), Arc::new(EventBus::default()));
//! manager.place_hit("P1", "50".parse()?, Some("H1")).await?;
//! manager.place_hit("P1", "25".parse()?, None).await?;
//!
//! let combined = manager.get_combined_hit("P1").await?.unwrap();
//! assert_eq!(combined.bounty.to_string(), "75.00");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod aggregator;
pub mod bounty;
pub mod collaborators;
pub mod completion;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod hit;
pub mod manager;
pub mod store;

pub use bounty::Bounty;
pub use collaborators::{
    Collaborators, EconomyProvider, LedgerEconomy, LedgerEntry, Notifier, Participant,
    ParticipantDirectory, PermissionChecker, PermissionGrant, RecordingNotifier, StaticDirectory,
    StaticPermissions, CLAIM_PERMISSION, UI_PERMISSION,
};
pub use completion::{CompletionHandler, CompletionOutcome, DeathCause, KillEvent, SkipReason};
pub use config::{
    parse_duration, CompletedConfig, HitmanConfig, HitsConfig, MessageContext, MessageTemplates,
    SharedConfig, UiConfig,
};
pub use error::{HitError, HitResult};
pub use events::{EventBus, EventReceiver, HitEvent, SubscriptionId};
pub use expiry::ExpiryScheduler;
pub use hit::{CombinedHit, Hit, HitId, NewHit, PlayerId, CONSOLE_HIRER};
pub use manager::HitManager;
pub use store::{HitStore, MemoryHitStore, WalHitStore};
