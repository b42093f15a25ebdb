//! Error types for the suggestion engine
//!
//! Errors are classified by blast radius:
//! - Candidate-scoped: validation failures, strategy failures and timeouts.
//!   Logged, the batch continues.
//! - Suggestion-scoped: stale or missing targets, illegal transitions.
//!   Surfaced to the reviewer; the suggestion parks in `error` where relevant.
//! - Fatal: invariant breaches (duplicate pending suggestion). Halt and page.

use thiserror::Error;

use crate::db::DbError;

/// Error types for suggestion generation, review and application.
#[derive(Debug, Error)]
pub enum SuggestError {
    // Candidate-scoped
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Strategy '{strategy}' timed out after {timeout_ms} ms")]
    ExternalStrategyTimeout { strategy: String, timeout_ms: u64 },

    #[error("Strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },

    #[error("Pattern confidence {value:.3} outside [{floor:.2}, {ceiling:.2}]")]
    PatternBounds { value: f64, floor: f64, ceiling: f64 },

    // Suggestion-scoped
    #[error("Target {target} changed since scoring (expected v{expected}, found v{actual})")]
    StaleTarget {
        target: String,
        expected: i64,
        actual: i64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Suggestion {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    // Fatal
    #[error("Duplicate pending suggestion for signal {signal_id} -> {target}")]
    DuplicateSuggestion { signal_id: String, target: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for SuggestError {
    fn from(err: rusqlite::Error) -> Self {
        SuggestError::Db(DbError::Sqlite(err))
    }
}

impl SuggestError {
    /// Invariant breaches: data-integrity risk, must halt the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SuggestError::DuplicateSuggestion { .. })
    }

    /// Errors that only affect one candidate or one strategy run.
    pub fn is_candidate_scoped(&self) -> bool {
        matches!(
            self,
            SuggestError::Validation(_)
                | SuggestError::ExternalStrategyTimeout { .. }
                | SuggestError::Strategy { .. }
                | SuggestError::PatternBounds { .. }
        )
    }

    /// Errors that concern one suggestion and go back to its reviewer.
    pub fn is_suggestion_scoped(&self) -> bool {
        matches!(
            self,
            SuggestError::StaleTarget { .. }
                | SuggestError::NotFound(_)
                | SuggestError::InvalidTransition { .. }
        )
    }

    /// Apply-time failures that park a suggestion in `error` for triage.
    pub fn parks_suggestion(&self) -> bool {
        matches!(
            self,
            SuggestError::StaleTarget { .. } | SuggestError::NotFound(_)
        )
    }

    /// Short machine-readable kind for the review surface.
    pub fn kind(&self) -> &'static str {
        match self {
            SuggestError::Validation(_) => "validation",
            SuggestError::ExternalStrategyTimeout { .. } => "strategy_timeout",
            SuggestError::Strategy { .. } => "strategy_failed",
            SuggestError::PatternBounds { .. } => "pattern_bounds",
            SuggestError::StaleTarget { .. } => "stale_target",
            SuggestError::NotFound(_) => "not_found",
            SuggestError::InvalidTransition { .. } => "invalid_transition",
            SuggestError::DuplicateSuggestion { .. } => "duplicate_suggestion",
            SuggestError::Db(_) => "storage",
        }
    }

    /// Get a reviewer-facing recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SuggestError::Validation(_) => "The candidate was malformed and has been skipped.",
            SuggestError::ExternalStrategyTimeout { .. } => {
                "The classifier was slow; the signal will still be linked by other strategies."
            }
            SuggestError::Strategy { .. } => "Check the strategy logs for details.",
            SuggestError::PatternBounds { .. } => "The value was clamped to the allowed range.",
            SuggestError::StaleTarget { .. } => {
                "The record changed after this suggestion was made. Review it, then retry."
            }
            SuggestError::NotFound(_) => {
                "The linked record no longer exists. Reject the suggestion or correct the target."
            }
            SuggestError::InvalidTransition { .. } => "Refresh the queue; this suggestion was already handled.",
            SuggestError::DuplicateSuggestion { .. } => {
                "Suggestion store integrity check failed. Stop processing and contact an engineer."
            }
            SuggestError::Db(_) => "Check disk space and database permissions.",
        }
    }
}

/// Serializable error representation for the review surface
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewError {
    pub message: String,
    pub kind: String,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

/// `can_retry` starts false: only the review layer knows whether the
/// suggestion actually sits in `error`, and sets it from there.
impl From<&SuggestError> for ReviewError {
    fn from(err: &SuggestError) -> Self {
        ReviewError {
            message: err.to_string(),
            kind: err.kind().to_string(),
            can_retry: false,
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
