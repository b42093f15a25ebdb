//! Application engine: turns an approved suggestion into a target mutation
//! and back.
//!
//! Mutations are compare-and-swap against the version captured at scoring.
//! A record that moved in the meantime is never overwritten; the suggestion
//! parks in `error` for a human to look at instead.

use crate::action::{ProposedAction, RollbackSnapshot};
use crate::db::{DbSuggestion, SuggestionDb};
use crate::entity::VersionedEntity;
use crate::error::SuggestError;
use crate::learning;
use crate::targets::TargetRepository;
use crate::types::LearningPolicy;

/// Result of a successful mutation.
#[derive(Debug, Clone)]
pub struct Applied {
    pub snapshot: RollbackSnapshot,
    pub new_version: i64,
}

/// Execute `action` against its target if the target is still at
/// `expected_version`, capturing the pre-mutation state.
pub fn apply(
    targets: &dyn TargetRepository,
    action: &ProposedAction,
    expected_version: i64,
) -> Result<Applied, SuggestError> {
    action.validate()?;
    let target = action.target();
    if !targets.exists(target) {
        return Err(SuggestError::NotFound(format!("target {}", target)));
    }
    let outcome = targets.apply_mutation(target, action, expected_version)?;
    let snapshot = RollbackSnapshot::capture(
        action,
        outcome.old.state,
        outcome.old.version,
        outcome.new.version,
    );
    Ok(Applied {
        snapshot,
        new_version: outcome.new.version,
    })
}

/// Whether `steps` lead from version `from` to `to` one apply at a time,
/// i.e. nothing but this engine touched the target in between.
pub fn only_engine_bumps(steps: &[(i64, i64)], from: i64, to: i64) -> bool {
    let mut version = from;
    while version < to {
        match steps.iter().find(|(prior, _)| *prior == version) {
            Some((_, next)) if *next > version => version = *next,
            _ => return false,
        }
    }
    version == to
}

/// Apply against the scored version. If the target moved only because this
/// engine applied other suggestions to it, apply against the current version
/// instead; links to different signals do not conflict.
pub fn apply_rebased(
    db: &SuggestionDb,
    targets: &dyn TargetRepository,
    action: &ProposedAction,
    expected_version: i64,
) -> Result<Applied, SuggestError> {
    match apply(targets, action, expected_version) {
        Err(SuggestError::StaleTarget {
            target,
            expected,
            actual,
        }) => {
            let steps = db.applied_version_steps(action.target())?;
            if only_engine_bumps(&steps, expected, actual) {
                log::debug!("Rebasing apply on {} from v{} to v{}", target, expected, actual);
                apply(targets, action, actual)
            } else {
                Err(SuggestError::StaleTarget {
                    target,
                    expected,
                    actual,
                })
            }
        }
        other => other,
    }
}

/// Put the target back to its snapshot state. Refuses if the target has been
/// edited since the apply.
pub fn restore(
    targets: &dyn TargetRepository,
    snapshot: &RollbackSnapshot,
) -> Result<VersionedEntity, SuggestError> {
    targets.restore(snapshot.target(), snapshot.prior(), snapshot.applied_version())
}

/// Undo a mutation whose bookkeeping could not be committed. Failure here
/// leaves the target and the store disagreeing, so it is logged loudly.
pub fn compensate(targets: &dyn TargetRepository, applied: &Applied, suggestion_id: &str) {
    match restore(targets, &applied.snapshot) {
        Ok(_) => log::warn!(
            "Reverted mutation of {} for suggestion {} after failed commit",
            applied.snapshot.target(),
            suggestion_id
        ),
        Err(e) => log::error!(
            "FATAL: could not revert mutation of {} for suggestion {}: {}",
            applied.snapshot.target(),
            suggestion_id,
            e
        ),
    }
}

/// Pending suggestions whose originating pattern clears the auto-apply gate
/// under the current policy.
pub fn auto_apply_candidates(
    db: &SuggestionDb,
    policy: &LearningPolicy,
) -> Result<Vec<DbSuggestion>, SuggestError> {
    let mut out = Vec::new();
    for suggestion in db.list_auto_apply_candidates()? {
        let Some(pattern_id) = suggestion.originating_pattern_id.as_deref() else {
            continue;
        };
        let Some(pattern) = db.get_pattern_by_id(pattern_id)? else {
            continue;
        };
        if learning::eligible_for_auto_apply(&pattern, policy) {
            out.push(suggestion);
        }
    }
    Ok(out)
}
