//! # Hitman
//!
//! Process-level wiring for the hit lifecycle in `hitman_core`:
//!
//! - [`HitmanService`]: constructor-style startup and orderly shutdown
//! - [`Leaderboard`]: the UI's top-N projection
//! - [`Console`]: user-initiated commands
//! - [`ConsoleNotifier`]: chat delivery for the standalone server

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod commands;
pub mod leaderboard;
pub mod notifier;
pub mod service;

pub use commands::{Command, CommandError, Console, HELP};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
pub use notifier::ConsoleNotifier;
pub use service::HitmanService;
