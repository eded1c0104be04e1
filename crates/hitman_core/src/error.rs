//! # Hit Error Types
//!
//! All errors that can occur in the hit lifecycle.
//!
//! `InvalidArgument` and `EmptyInput` are contract violations and fail fast.
//! `Persistence` is the only kind expected at runtime (database outage); the
//! event-driven entry points (kill handler, expiry sweep) log it and carry on.

use thiserror::Error;

/// Errors that can occur in the hit system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HitError {
    /// Bad caller input: empty target id, malformed or negative bounty.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage unavailable or the transaction failed. Nothing was applied.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Aggregation was asked to combine zero hits.
    #[error("cannot combine an empty set of hits")]
    EmptyInput,

    /// A bounty sum left the decimal(18,2) range.
    #[error("arithmetic overflow in bounty calculation")]
    ArithmeticOverflow,

    /// Invalid configuration file or value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external collaborator (economy, notifier, permissions) failed.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl HitError {
    /// Returns true for storage failures.
    #[must_use]
    pub const fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    pub(crate) fn io(context: &str, err: &std::io::Error) -> Self {
        Self::Persistence(format!("{context}: {err}"))
    }
}

/// Result type for hit operations.
pub type HitResult<T> = Result<T, HitError>;
