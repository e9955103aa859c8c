//! Error taxonomy for the orchestration core.
//!
//! Every failure surfaced across a component boundary is one of these
//! variants; retries and fallbacks happen locally inside the execution
//! engine, never implicitly across components.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Classification of a provider adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Network,
    #[serde(rename = "rateLimited")]
    RateLimited,
    Auth,
    Server,
    BadInput,
}

impl ProviderErrorKind {
    /// Canonical wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rateLimited",
            Self::Auth => "auth",
            Self::Server => "server",
            Self::BadInput => "bad_input",
        }
    }
}

/// Failure label carried on outcome records: either a provider error kind
/// or a cooperative cancellation, which is not a provider fault and must
/// stay distinguishable from one in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeErrorKind {
    Network,
    #[serde(rename = "rateLimited")]
    RateLimited,
    Auth,
    Server,
    BadInput,
    Cancelled,
}

impl OutcomeErrorKind {
    /// Canonical string form used in the feedback ledger's `errorKind` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rateLimited",
            Self::Auth => "auth",
            Self::Server => "server",
            Self::BadInput => "bad_input",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<ProviderErrorKind> for OutcomeErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::Network => Self::Network,
            ProviderErrorKind::RateLimited => Self::RateLimited,
            ProviderErrorKind::Auth => Self::Auth,
            ProviderErrorKind::Server => Self::Server,
            ProviderErrorKind::BadInput => Self::BadInput,
        }
    }
}

/// Failure reported by a provider adapter.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("provider error ({}): {message}", .kind.as_str())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub retriable: bool,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, retriable: bool, message: impl Into<String>) -> Self {
        Self {
            kind,
            retriable,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, true, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, true, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Auth, false, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Server, true, message)
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::BadInput, false, message)
    }
}

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Registry filtering returned no candidate after health gating.
    #[error("no provider available for {needed}")]
    NoProviderAvailable { needed: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Ensemble deadline elapsed before the response quorum was met.
    #[error("ensemble under quorum: {responded}/{required} responses before deadline")]
    EnsembleUnderQuorum { responded: usize, required: usize },

    /// A validation stage hard-failed or exhausted its retries.
    #[error("validation failed at {stage}: {reason}")]
    ValidationFailed { stage: String, reason: String },

    #[error("execution cancelled")]
    Cancelled,

    /// Scheduler is stopped; mode transitions and new plans are refused.
    #[error("scheduler locked")]
    SchedulerLocked,

    /// Rejected at the config-update boundary; the old version stays active.
    #[error("invalid config update {domain}.{key}: {reason}")]
    ConfigInvalid {
        domain: String,
        key: String,
        reason: String,
    },

    /// Outcome referencing a plan the ledger has never seen.
    #[error("outcome references unknown plan {plan_id}")]
    OrphanOutcome { plan_id: Uuid },

    #[error("invalid plan: {0}")]
    PlanInvalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
