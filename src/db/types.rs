//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::{ProposedAction, RollbackSnapshot, SuggestionType};
use crate::entity::TargetRef;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Corrupt {column} in row {id}: {message}")]
    Corrupt {
        column: &'static str,
        id: String,
        message: String,
    },
}

/// Lifecycle state of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
    Expired,
    RolledBack,
    /// Apply failed (stale or missing target); waiting for human triage.
    Error,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Approved => "approved",
            SuggestionStatus::Rejected => "rejected",
            SuggestionStatus::Modified => "modified",
            SuggestionStatus::Expired => "expired",
            SuggestionStatus::RolledBack => "rolled_back",
            SuggestionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SuggestionStatus::Pending),
            "approved" => Some(SuggestionStatus::Approved),
            "rejected" => Some(SuggestionStatus::Rejected),
            "modified" => Some(SuggestionStatus::Modified),
            "expired" => Some(SuggestionStatus::Expired),
            "rolled_back" => Some(SuggestionStatus::RolledBack),
            "error" => Some(SuggestionStatus::Error),
            _ => None,
        }
    }

    /// The lifecycle graph. Nothing re-enters `pending`; `approved ->
    /// rolled_back` is the only move out of a terminal state; `error` is a
    /// triage state that resolves to a human decision.
    pub fn can_transition_to(&self, next: SuggestionStatus) -> bool {
        use SuggestionStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Modified)
                | (Pending, Expired)
                | (Pending, Error)
                | (Error, Approved)
                | (Error, Rejected)
                | (Approved, RolledBack)
        )
    }
}

/// Review priority, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    Urgent,
    NeedsAttention,
    Fyi,
}

impl PriorityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityBucket::Urgent => "urgent",
            PriorityBucket::NeedsAttention => "needs_attention",
            PriorityBucket::Fyi => "fyi",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(PriorityBucket::Urgent),
            "needs_attention" => Some(PriorityBucket::NeedsAttention),
            "fyi" => Some(PriorityBucket::Fyi),
            _ => None,
        }
    }
}

/// What a decision record says happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approved,
    Rejected,
    Modified,
    Expired,
    RolledBack,
    Retried,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Approved => "approved",
            DecisionKind::Rejected => "rejected",
            DecisionKind::Modified => "modified",
            DecisionKind::Expired => "expired",
            DecisionKind::RolledBack => "rolled_back",
            DecisionKind::Retried => "retried",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(DecisionKind::Approved),
            "rejected" => Some(DecisionKind::Rejected),
            "modified" => Some(DecisionKind::Modified),
            "expired" => Some(DecisionKind::Expired),
            "rolled_back" => Some(DecisionKind::RolledBack),
            "retried" => Some(DecisionKind::Retried),
            _ => None,
        }
    }
}

/// Reviewer's pointer to the record a suggestion should have named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub target: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A row from the `suggestions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSuggestion {
    pub id: String,
    pub suggestion_type: SuggestionType,
    pub priority_bucket: PriorityBucket,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub proposed_action: ProposedAction,
    pub status: SuggestionStatus,
    pub created_at: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub rollback_snapshot: Option<RollbackSnapshot>,
    pub originating_pattern_id: Option<String>,
    pub expires_at: String,
    pub signal_id: String,
    pub thread_id: Option<String>,
    pub target: TargetRef,
    pub strategy: String,
    pub pattern_type: String,
    pub pattern_key: String,
    /// Normalized sender address; decisions also teach the sender pattern.
    pub sender_key: String,
    /// Target version observed when the suggestion was scored.
    pub target_version: i64,
    pub content_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub updated_at: String,
}

/// A row from the `patterns` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPattern {
    pub id: String,
    pub pattern_type: String,
    pub pattern_key: String,
    pub target: TargetRef,
    pub confidence: f64,
    pub times_used: u32,
    pub times_correct: u32,
    pub times_rejected: u32,
    pub active: bool,
    pub auto_apply_eligible: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl DbPattern {
    /// Fraction of decisions that confirmed the pattern; 0 when unused.
    pub fn approval_rate(&self) -> f64 {
        if self.times_used == 0 {
            0.0
        } else {
            self.times_correct as f64 / self.times_used as f64
        }
    }
}

/// A row from the append-only `decision_records` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDecisionRecord {
    pub seq: i64,
    pub suggestion_id: String,
    pub decision: DecisionKind,
    pub reason: Option<String>,
    pub correction_payload: Option<Correction>,
    pub actor: String,
    pub created_at: String,
}

/// A row from `signal_links`: a confirmed signal -> target relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSignalLink {
    pub signal_id: String,
    pub target: TargetRef,
    pub thread_id: Option<String>,
    pub suggestion_id: String,
    pub linked_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_returns_to_pending() {
        use SuggestionStatus::*;
        for s in [Pending, Approved, Rejected, Modified, Expired, RolledBack, Error] {
            assert!(!s.can_transition_to(Pending), "{:?} -> pending", s);
            assert_eq!(SuggestionStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_only_approved_can_roll_back() {
        use SuggestionStatus::*;
        assert!(Approved.can_transition_to(RolledBack));
        for s in [Pending, Rejected, Modified, Expired, RolledBack, Error] {
            assert!(!s.can_transition_to(RolledBack), "{:?}", s);
        }
        for next in [Approved, Rejected, Modified, Expired, Error] {
            assert!(!RolledBack.can_transition_to(next));
            assert!(!Expired.can_transition_to(next));
        }
    }

    #[test]
    fn test_error_resolves_to_decision_only() {
        use SuggestionStatus::*;
        assert!(Error.can_transition_to(Approved));
        assert!(Error.can_transition_to(Rejected));
        assert!(!Error.can_transition_to(Expired));
        assert!(!Error.can_transition_to(Modified));
    }

    #[test]
    fn test_approval_rate() {
        let p = DbPattern {
            id: "pat-1".into(),
            pattern_type: "sender_history".into(),
            pattern_key: "ana@client.com".into(),
            target: TargetRef::project("p1"),
            confidence: 0.8,
            times_used: 4,
            times_correct: 3,
            times_rejected: 1,
            active: true,
            auto_apply_eligible: false,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!((p.approval_rate() - 0.75).abs() < 1e-9);
    }
}
