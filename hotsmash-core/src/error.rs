/// Error types, one enum per concern.
///
/// Rate-limit denials are not errors: they come back as
/// [`Decision::Denied`](crate::limiter::Decision) values.
use thiserror::Error;

use crate::types::EntityId;

/// Invalid input to the rating engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RatingError {
    #[error("invalid rating input: winner={winner}, loser={loser}, k={k_factor}")]
    InvalidRating {
        winner: f64,
        loser: f64,
        k_factor: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("need at least two distinct founders to form a pair, got {available}")]
    InsufficientCandidates { available: usize },

    /// Every combination has already been judged by this voter.
    #[error("no unjudged pairs remaining")]
    NoUnjudgedPairsRemaining,
}

/// A vote that is rejected locally and never reaches the remote store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("winner and loser must differ (both {0})")]
    SameEntity(EntityId),

    #[error("unknown founder id: {0}")]
    UnknownEntity(EntityId),

    #[error(transparent)]
    Rating(#[from] RatingError),
}

/// Failures reported by a [`PersistenceGateway`](crate::gateway::PersistenceGateway).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// A referenced founder does not exist (any more).
    #[error("not found: {0}")]
    NotFound(String),

    /// The transaction was already applied, or its preconditions no longer hold.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The remote refused the vote outright (validation, server-side rate limit).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or availability failure.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Whether the outbox should try this mutation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

/// Local key/value persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}
