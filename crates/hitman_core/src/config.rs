//! # Hitman Configuration
//!
//! Loaded from TOML. Every key is optional:
//!
//! ```toml
//! [hits]
//! check_interval = "1m"
//! duration = "1d"
//! admins_claim_hits = true
//!
//! [hits.completed]
//! announce = true
//! tell_target = true
//!
//! [ui]
//! max_entries = 10
//!
//! [messages]
//! killer = "You completed the hit on {target} and earned {currency_symbol}{bounty} {currency_name}."
//! ```
//!
//! Durations are unit strings (`"1d 2h 30m 15s"`, `"500ms"`) or time spans
//! (`"hh:mm:ss"`, `"d.hh:mm:ss"`).
//!
//! [`SharedConfig`] publishes snapshots over a `tokio::sync::watch` channel so
//! the expiry loop and the completion handler see reloads without restarting.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio::sync::watch;
use tracing::info;

use crate::bounty::Bounty;
use crate::error::{HitError, HitResult};

/// Complete configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HitmanConfig {
    /// `[hits]`
    pub hits: HitsConfig,
    /// `[ui]`
    pub ui: UiConfig,
    /// `[messages]`
    pub messages: MessageTemplates,
}

/// `[hits]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HitsConfig {
    /// How often the expiry sweep runs. Must be non-zero.
    #[serde(deserialize_with = "deserialize_duration")]
    pub check_interval: Duration,
    /// Maximum hit age before expiry.
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// When true, privileged killers are refused hit payouts.
    pub admins_claim_hits: bool,
    /// `[hits.completed]`
    pub completed: CompletedConfig,
}

impl HitsConfig {
    const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
    const DEFAULT_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
}

impl Default for HitsConfig {
    fn default() -> Self {
        Self {
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            duration: Self::DEFAULT_DURATION,
            admins_claim_hits: true,
            completed: CompletedConfig::default(),
        }
    }
}

/// `[hits.completed]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompletedConfig {
    /// Broadcast completions to everyone else online.
    pub announce: bool,
    /// Tell the victim who collected their bounty.
    pub tell_target: bool,
}

impl Default for CompletedConfig {
    fn default() -> Self {
        Self {
            announce: true,
            tell_target: true,
        }
    }
}

/// `[ui]` section.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Leaderboard rows.
    pub max_entries: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { max_entries: 10 }
    }
}

/// `[messages]` section: chat templates.
///
/// Placeholders: `{killer}`, `{target}`, `{bounty}`, `{currency_name}`,
/// `{currency_symbol}`. Unknown placeholders are left as written.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    /// Economy transaction memo.
    pub transaction_memo: String,
    /// Sent to the killer.
    pub killer: String,
    /// Broadcast to everyone except the killer and the victim.
    pub announce: String,
    /// Sent to the victim.
    pub target: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            transaction_memo: "Completed hit on {target}".into(),
            killer: "You completed the hit on {target} and earned {currency_symbol}{bounty} {currency_name}."
                .into(),
            announce: "{killer} completed the hit on {target} for {currency_symbol}{bounty} {currency_name}."
                .into(),
            target: "{killer} collected the {currency_symbol}{bounty} {currency_name} bounty on your head."
                .into(),
        }
    }
}

/// Values substituted into a [`MessageTemplates`] entry.
#[derive(Clone, Debug)]
pub struct MessageContext<'a> {
    /// Killer display name.
    pub killer: &'a str,
    /// Victim display name.
    pub target: &'a str,
    /// Collected amount.
    pub bounty: Bounty,
    /// Economy currency name.
    pub currency_name: &'a str,
    /// Economy currency symbol.
    pub currency_symbol: &'a str,
}

impl MessageContext<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "killer" => Some(self.killer.to_owned()),
            "target" => Some(self.target.to_owned()),
            "bounty" => Some(self.bounty.to_string()),
            "currency_name" => Some(self.currency_name.to_owned()),
            "currency_symbol" => Some(self.currency_symbol.to_owned()),
            _ => None,
        }
    }

    /// Fills `template` in a single pass; substituted values are not rescanned.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 32);
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };

            let key = &after[..close];
            match self.lookup(key) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }
}

impl HitmanConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> HitResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| HitError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from a TOML file, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` if the file is unreadable or invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HitResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .map_err(|e| HitError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks value constraints.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` for a zero check interval.
    pub fn validate(&self) -> HitResult<()> {
        if self.hits.check_interval.is_zero() {
            return Err(HitError::InvalidConfig("hits.check_interval must be non-zero".into()));
        }
        Ok(())
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

/// Parses a duration string.
///
/// Accepts unit tokens (`"1d 2h 30m 15s"`, `"1h30m"`, `"500ms"`) or time
/// spans (`"01:30:00"`, `"2.00:00:00"`, `"05:00"` as hh:mm).
///
/// # Errors
///
/// `HitError::InvalidConfig` on any malformed or overflowing input.
pub fn parse_duration(text: &str) -> HitResult<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HitError::InvalidConfig("empty duration".into()));
    }
    if text.contains(':') {
        parse_time_span(text)
    } else {
        parse_unit_tokens(text)
    }
}

fn invalid(text: &str) -> HitError {
    HitError::InvalidConfig(format!("invalid duration '{text}'"))
}

fn parse_time_span(text: &str) -> HitResult<Duration> {
    let (days, clock) = match text.split_once('.') {
        Some((days, clock)) if !days.contains(':') => {
            (days.parse::<u64>().map_err(|_| invalid(text))?, clock)
        }
        _ => (0, text),
    };

    let parts = clock
        .split(':')
        .map(|p| {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(text));
            }
            p.parse::<u64>().map_err(|_| invalid(text))
        })
        .collect::<HitResult<Vec<_>>>()?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid(text)),
    };
    if hours >= 24 || minutes >= 60 || seconds >= 60 {
        return Err(invalid(text));
    }

    days.checked_mul(86_400)
        .and_then(|d| d.checked_add(hours * 3600 + minutes * 60 + seconds))
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(text))
}

fn parse_unit_tokens(text: &str) -> HitResult<Duration> {
    let mut total = Duration::ZERO;
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut number = String::new();
        while let Some(c) = chars.next_if(char::is_ascii_digit) {
            number.push(c);
        }
        let mut unit = String::new();
        while let Some(c) = chars.next_if(char::is_ascii_alphabetic) {
            unit.push(c);
        }
        if number.is_empty() || unit.is_empty() {
            return Err(invalid(text));
        }

        let value: u64 = number.parse().map_err(|_| invalid(text))?;
        let part = match unit.to_ascii_lowercase().as_str() {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(3600).map(Duration::from_secs),
            "d" => value.checked_mul(86_400).map(Duration::from_secs),
            _ => return Err(invalid(text)),
        };
        total = part
            .and_then(|p| total.checked_add(p))
            .ok_or_else(|| invalid(text))?;
    }

    Ok(total)
}

/// Live configuration handle.
///
/// Cloning shares the same channel; every clone sees every replacement.
#[derive(Clone)]
pub struct SharedConfig {
    sender: Arc<watch::Sender<Arc<HitmanConfig>>>,
}

impl SharedConfig {
    /// Wraps a validated configuration.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` if `config` fails validation.
    pub fn new(config: HitmanConfig) -> HitResult<Self> {
        config.validate()?;
        let (sender, _) = watch::channel(Arc::new(config));
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<HitmanConfig> {
        Arc::clone(&self.sender.borrow())
    }

    /// Receiver that reports changes via `has_changed`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<HitmanConfig>> {
        self.sender.subscribe()
    }

    /// Publishes a new snapshot. An invalid config leaves the current one in place.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` if `config` fails validation.
    pub fn replace(&self, config: HitmanConfig) -> HitResult<()> {
        config.validate()?;
        self.sender.send_replace(Arc::new(config));
        Ok(())
    }

    /// Re-reads `path` and publishes it.
    ///
    /// # Errors
    ///
    /// `HitError::InvalidConfig` if the file is unreadable or invalid.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> HitResult<()> {
        let path = path.as_ref();
        let config = HitmanConfig::load_from(path)?;
        self.replace(config)?;
        info!("Reloaded configuration from {}", path.display());
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        let (sender, _) = watch::channel(Arc::new(HitmanConfig::default()));
        Self {
            sender: Arc::new(sender),
        }
    }
}
