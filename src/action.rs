//! Proposed actions and their rollback snapshots.
//!
//! Both are tagged variants keyed by action type, so a stored suggestion can
//! only ever describe a mutation the application engine knows how to apply
//! and, just as importantly, how to undo.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityState, TargetRef, TargetType};
use crate::error::SuggestError;

/// What kind of change a suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionType {
    /// Link an email/transcript to a project or proposal.
    SignalLink,
    /// Link an email/transcript to a contact.
    ContactLink,
    /// File a signal under a category.
    CategoryAssignment,
}

impl SuggestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionType::SignalLink => "signal_link",
            SuggestionType::ContactLink => "contact_link",
            SuggestionType::CategoryAssignment => "category_assignment",
        }
    }

    pub fn parse(s: &str) -> Result<Self, SuggestError> {
        match s {
            "signal_link" => Ok(SuggestionType::SignalLink),
            "contact_link" => Ok(SuggestionType::ContactLink),
            "category_assignment" => Ok(SuggestionType::CategoryAssignment),
            other => Err(SuggestError::Validation(format!(
                "unknown suggestion type '{}'",
                other
            ))),
        }
    }
}

/// The mutation a suggestion will perform when approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProposedAction {
    /// Attach a signal to a project, proposal or contact.
    LinkSignal { signal_id: String, target: TargetRef },
    /// File a signal under a category.
    AssignCategory { signal_id: String, category: TargetRef },
}

impl ProposedAction {
    /// Build the natural action for linking `signal_id` to `target`.
    pub fn for_target(signal_id: &str, target: &TargetRef) -> Self {
        match target.target_type {
            TargetType::Category => ProposedAction::AssignCategory {
                signal_id: signal_id.to_string(),
                category: target.clone(),
            },
            _ => ProposedAction::LinkSignal {
                signal_id: signal_id.to_string(),
                target: target.clone(),
            },
        }
    }

    pub fn suggestion_type(&self) -> SuggestionType {
        match self {
            ProposedAction::LinkSignal { target, .. } if target.target_type == TargetType::Contact => {
                SuggestionType::ContactLink
            }
            ProposedAction::LinkSignal { .. } => SuggestionType::SignalLink,
            ProposedAction::AssignCategory { .. } => SuggestionType::CategoryAssignment,
        }
    }

    pub fn target(&self) -> &TargetRef {
        match self {
            ProposedAction::LinkSignal { target, .. } => target,
            ProposedAction::AssignCategory { category, .. } => category,
        }
    }

    pub fn signal_id(&self) -> &str {
        match self {
            ProposedAction::LinkSignal { signal_id, .. }
            | ProposedAction::AssignCategory { signal_id, .. } => signal_id,
        }
    }

    /// Schema check for the variant: ids present and target type allowed.
    pub fn validate(&self) -> Result<(), SuggestError> {
        if self.signal_id().trim().is_empty() {
            return Err(SuggestError::Validation("action has empty signal id".into()));
        }
        self.target().validate()?;
        match self {
            ProposedAction::LinkSignal { target, .. } if target.target_type == TargetType::Category => {
                Err(SuggestError::Validation(
                    "link_signal cannot target a category; use assign_category".into(),
                ))
            }
            ProposedAction::AssignCategory { category, .. }
                if category.target_type != TargetType::Category =>
            {
                Err(SuggestError::Validation(format!(
                    "assign_category requires a category target, got {}",
                    category
                )))
            }
            _ => Ok(()),
        }
    }

    /// The same action aimed at a corrected target. The variant follows the
    /// new target's type, so a correction from a project to a category
    /// becomes a category assignment.
    pub fn retarget(&self, target: &TargetRef) -> Self {
        Self::for_target(self.signal_id(), target)
    }

    /// Pure state transition. Target repositories use this so every store
    /// applies actions identically.
    pub fn apply_to(&self, state: &EntityState) -> EntityState {
        let mut next = state.clone();
        match self {
            ProposedAction::LinkSignal { signal_id, .. } => {
                next.linked_signals.insert(signal_id.clone());
            }
            ProposedAction::AssignCategory { signal_id, .. } => {
                next.categorized_signals.insert(signal_id.clone());
            }
        }
        next
    }
}

/// Pre-mutation capture stored on an applied suggestion.
///
/// `applied_version` is the version the target reached after the mutation;
/// rollback refuses to run if the target has moved past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollbackSnapshot {
    LinkSignal {
        target: TargetRef,
        signal_id: String,
        prior: EntityState,
        prior_version: i64,
        applied_version: i64,
    },
    AssignCategory {
        category: TargetRef,
        signal_id: String,
        prior: EntityState,
        prior_version: i64,
        applied_version: i64,
    },
}

impl RollbackSnapshot {
    /// Capture for `action` given the state before and the version after.
    pub fn capture(
        action: &ProposedAction,
        prior: EntityState,
        prior_version: i64,
        applied_version: i64,
    ) -> Self {
        match action {
            ProposedAction::LinkSignal { signal_id, target } => RollbackSnapshot::LinkSignal {
                target: target.clone(),
                signal_id: signal_id.clone(),
                prior,
                prior_version,
                applied_version,
            },
            ProposedAction::AssignCategory {
                signal_id,
                category,
            } => RollbackSnapshot::AssignCategory {
                category: category.clone(),
                signal_id: signal_id.clone(),
                prior,
                prior_version,
                applied_version,
            },
        }
    }

    pub fn target(&self) -> &TargetRef {
        match self {
            RollbackSnapshot::LinkSignal { target, .. } => target,
            RollbackSnapshot::AssignCategory { category, .. } => category,
        }
    }

    pub fn prior(&self) -> &EntityState {
        match self {
            RollbackSnapshot::LinkSignal { prior, .. }
            | RollbackSnapshot::AssignCategory { prior, .. } => prior,
        }
    }

    pub fn prior_version(&self) -> i64 {
        match self {
            RollbackSnapshot::LinkSignal { prior_version, .. }
            | RollbackSnapshot::AssignCategory { prior_version, .. } => *prior_version,
        }
    }

    pub fn applied_version(&self) -> i64 {
        match self {
            RollbackSnapshot::LinkSignal { applied_version, .. }
            | RollbackSnapshot::AssignCategory { applied_version, .. } => *applied_version,
        }
    }

    /// Check that the snapshot and the action describe the same mutation.
    pub fn matches(&self, action: &ProposedAction) -> bool {
        match (self, action) {
            (
                RollbackSnapshot::LinkSignal { target, signal_id, .. },
                ProposedAction::LinkSignal {
                    target: t,
                    signal_id: s,
                },
            ) => target == t && signal_id == s,
            (
                RollbackSnapshot::AssignCategory {
                    category, signal_id, ..
                },
                ProposedAction::AssignCategory {
                    category: c,
                    signal_id: s,
                },
            ) => category == c && signal_id == s,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_target_picks_variant_by_target_type() {
        let a = ProposedAction::for_target("s1", &TargetRef::project("p1"));
        assert_eq!(a.suggestion_type(), SuggestionType::SignalLink);
        let b = ProposedAction::for_target("s1", &TargetRef::contact("c1"));
        assert_eq!(b.suggestion_type(), SuggestionType::ContactLink);
        let c = ProposedAction::for_target("s1", &TargetRef::category("invoices"));
        assert_eq!(c.suggestion_type(), SuggestionType::CategoryAssignment);
        assert!(a.validate().is_ok() && b.validate().is_ok() && c.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_variants() {
        let bad = ProposedAction::LinkSignal {
            signal_id: "s1".into(),
            target: TargetRef::category("invoices"),
        };
        assert!(matches!(bad.validate(), Err(SuggestError::Validation(_))));
        let bad = ProposedAction::AssignCategory {
            signal_id: "s1".into(),
            category: TargetRef::project("p1"),
        };
        assert!(bad.validate().is_err());
        let empty = ProposedAction::for_target("", &TargetRef::project("p1"));
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_action_serializes_tagged() {
        let a = ProposedAction::for_target("s1", &TargetRef::project("p1"));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "link_signal");
        assert_eq!(json["target"]["targetType"], "project");
        let back: ProposedAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_apply_to_and_snapshot_match() {
        let action = ProposedAction::for_target("s9", &TargetRef::proposal("pr-2"));
        let before = EntityState {
            name: "Harbour House".into(),
            ..Default::default()
        };
        let after = action.apply_to(&before);
        assert!(after.linked_signals.contains("s9"));
        assert!(!before.linked_signals.contains("s9"));

        let snap = RollbackSnapshot::capture(&action, before.clone(), 3, 4);
        assert!(snap.matches(&action));
        assert_eq!(snap.prior(), &before);
        assert_eq!(snap.applied_version(), 4);
        assert!(!snap.matches(&action.retarget(&TargetRef::proposal("pr-3"))));
    }
}
