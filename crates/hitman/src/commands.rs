//! # Console Commands
//!
//! User-initiated operations. Unlike the event-driven paths, every failure
//! here is reported back to whoever typed the command.
//!
//! ```text
//! place <target> <amount> [hirer]   place a hit (no hirer = console hit)
//! list                              leaderboard
//! check <target>                    combined bounty on one player
//! remove <target>                   remove every hit on one player
//! kill <victim> <killer>            report a player death
//! join <id> <name> [admin]          mark a player online
//! leave <id>                        mark a player offline
//! reload                            re-read the config file
//! help
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use hitman_core::{
    Bounty, CompletionOutcome, HitError, KillEvent, Participant, PlayerId, StaticDirectory,
};
use thiserror::Error;

use crate::leaderboard::Leaderboard;
use crate::service::HitmanService;

/// Help text.
pub const HELP: &str = "\
place <target> <amount> [hirer]   place a hit (no hirer = console hit)
list                              show the leaderboard
check <target>                    show the combined bounty on a player
remove <target>                   remove every hit on a player
kill <victim> <killer>            report a player death
join <id> <name> [admin]          mark a player online
leave <id>                        mark a player offline
reload                            re-read the config file
help                              show this text";

/// Errors reported to the console user.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Unrecognized command word.
    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),

    /// Wrong arguments.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// The hit system rejected the operation.
    #[error(transparent)]
    Hit(#[from] HitError),
}

/// A parsed console command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Place a hit.
    Place {
        /// Target player.
        target: PlayerId,
        /// Amount.
        bounty: Bounty,
        /// Hirer, `None` for a console hit.
        hirer: Option<PlayerId>,
    },
    /// Show the leaderboard.
    List,
    /// Show one target's combined bounty.
    Check {
        /// Target player.
        target: PlayerId,
    },
    /// Remove all hits on a target.
    Remove {
        /// Target player.
        target: PlayerId,
    },
    /// Report a death.
    Kill {
        /// Player who died.
        victim: PlayerId,
        /// Player credited with the kill.
        killer: PlayerId,
    },
    /// Mark a player online.
    Join {
        /// Player id.
        id: PlayerId,
        /// Display name.
        name: String,
        /// Privileged player.
        admin: bool,
    },
    /// Mark a player offline.
    Leave {
        /// Player id.
        id: PlayerId,
    },
    /// Re-read the config file.
    Reload,
    /// Show help.
    Help,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = words.split_first() else {
            return Err(CommandError::Usage("help"));
        };

        match (verb.to_ascii_lowercase().as_str(), args) {
            ("place", [target, amount]) => Ok(Self::Place {
                target: (*target).to_owned(),
                bounty: amount.parse()?,
                hirer: None,
            }),
            ("place", [target, amount, hirer]) => Ok(Self::Place {
                target: (*target).to_owned(),
                bounty: amount.parse()?,
                hirer: Some((*hirer).to_owned()),
            }),
            ("place", _) => Err(CommandError::Usage("place <target> <amount> [hirer]")),
            ("list", []) => Ok(Self::List),
            ("check", [target]) => Ok(Self::Check {
                target: (*target).to_owned(),
            }),
            ("check", _) => Err(CommandError::Usage("check <target>")),
            ("remove", [target]) => Ok(Self::Remove {
                target: (*target).to_owned(),
            }),
            ("remove", _) => Err(CommandError::Usage("remove <target>")),
            ("kill", [victim, killer]) => Ok(Self::Kill {
                victim: (*victim).to_owned(),
                killer: (*killer).to_owned(),
            }),
            ("kill", _) => Err(CommandError::Usage("kill <victim> <killer>")),
            ("join", [id, name]) => Ok(Self::Join {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
                admin: false,
            }),
            ("join", [id, name, flag]) if flag.eq_ignore_ascii_case("admin") => Ok(Self::Join {
                id: (*id).to_owned(),
                name: (*name).to_owned(),
                admin: true,
            }),
            ("join", _) => Err(CommandError::Usage("join <id> <name> [admin]")),
            ("leave", [id]) => Ok(Self::Leave {
                id: (*id).to_owned(),
            }),
            ("leave", _) => Err(CommandError::Usage("leave <id>")),
            ("reload", []) => Ok(Self::Reload),
            ("help", _) => Ok(Self::Help),
            ("list" | "reload", _) => Err(CommandError::Usage("takes no arguments")),
            (other, _) => Err(CommandError::Unknown(other.to_owned())),
        }
    }
}

/// Executes console commands against a running service.
pub struct Console {
    leaderboard: Leaderboard,
    directory: Arc<StaticDirectory>,
    config_path: PathBuf,
}

impl Console {
    /// Creates a console. `directory` must be the one the service was started with.
    #[must_use]
    pub fn new(service: &HitmanService, directory: Arc<StaticDirectory>, config_path: PathBuf) -> Self {
        Self {
            leaderboard: service.leaderboard(),
            directory,
            config_path,
        }
    }

    /// Runs one command and returns the text to print.
    ///
    /// # Errors
    ///
    /// Any rejection by the hit system, surfaced to the user.
    pub async fn execute(&mut self, service: &HitmanService, command: Command) -> Result<String, CommandError> {
        let symbol = service.collaborators().economy.currency_symbol().to_owned();
        match command {
            Command::Place {
                target,
                bounty,
                hirer,
            } => {
                let hit = service
                    .manager()
                    .place_hit(&target, bounty, hirer.as_deref())
                    .await?;
                Ok(format!(
                    "Placed hit #{} on {} for {}{}",
                    hit.id, hit.target_player_id, symbol, hit.bounty
                ))
            }
            Command::List => {
                self.leaderboard.tick().await?;
                Ok(self.leaderboard.render(&symbol))
            }
            Command::Check { target } => Ok(match service.manager().get_combined_hit(&target).await? {
                Some(combined) => format!(
                    "{} has {}{} on their head from {} hits",
                    target,
                    symbol,
                    combined.bounty,
                    combined.hit_ids.len()
                ),
                None => format!("No hits on {target}"),
            }),
            Command::Remove { target } => {
                let removed = service.manager().remove_all_hits_on_target(&target).await?;
                Ok(format!("Removed {} hits on {}", removed.len(), target))
            }
            Command::Kill { victim, killer } => {
                let outcome = service
                    .on_player_death(&KillEvent::combat(victim, killer))
                    .await;
                Ok(match outcome {
                    CompletionOutcome::Completed(combined) => format!(
                        "Hit on {} completed for {}{}",
                        combined.target_player_id, symbol, combined.bounty
                    ),
                    CompletionOutcome::Skipped(reason) => format!("No payout: {reason:?}"),
                    CompletionOutcome::Failed(e) => format!("Completion failed: {e}"),
                })
            }
            Command::Join { id, name, admin } => {
                let participant = Participant::new(id.clone(), name);
                self.directory.join(if admin {
                    participant.privileged()
                } else {
                    participant
                });
                Ok(format!("{id} is online"))
            }
            Command::Leave { id } => {
                self.directory.leave(&id);
                Ok(format!("{id} is offline"))
            }
            Command::Reload => {
                service.config().reload_from_file(&self.config_path)?;
                Ok(format!("Reloaded {}", self.config_path.display()))
            }
            Command::Help => Ok(HELP.to_owned()),
        }
    }

    /// Unsubscribes the console's leaderboard.
    pub fn close(self, service: &HitmanService) {
        self.leaderboard.close(service.bus());
    }
}
