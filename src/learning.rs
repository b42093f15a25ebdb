//! Pattern learning store.
//!
//! Every confidence change goes through [`adjust`]: approvals promote by a
//! small step, rejections demote by a larger one, and rollbacks take back
//! the approval count. Bounds come from the learning policy.
//!
//! Auto-apply eligibility is gated on sample size and approval rate as well
//! as confidence. A confident pattern with a handful of decisions behind it
//! is never eligible.

use uuid::Uuid;

use crate::db::patterns::PatternFilter;
use crate::db::{DbError, DbPattern, SuggestionDb};
use crate::entity::TargetRef;
use crate::error::SuggestError;
use crate::types::LearningPolicy;

/// Decimal places kept for confidences (stored and scored).
pub const CONFIDENCE_DECIMALS: i32 = 3;

/// What happened to a suggestion that a pattern backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approved,
    Rejected,
    /// An approval was undone by rollback.
    RolledBack,
}

/// `(pattern_type, pattern_key)` plus target: identifies one pattern row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternKey {
    pub pattern_type: String,
    pub pattern_key: String,
    pub target: TargetRef,
}

impl PatternKey {
    pub fn new(pattern_type: &str, pattern_key: &str, target: &TargetRef) -> Self {
        Self {
            pattern_type: pattern_type.to_string(),
            pattern_key: pattern_key.to_string(),
            target: target.clone(),
        }
    }
}

pub fn round_confidence(value: f64) -> f64 {
    let factor = 10f64.powi(CONFIDENCE_DECIMALS);
    (value * factor).round() / factor
}

/// The single confidence-update rule. Mutates `pattern` in place and
/// refreshes its auto-apply flag.
pub fn adjust(pattern: &mut DbPattern, outcome: Outcome, policy: &LearningPolicy) {
    let current = clamp_logged(pattern, pattern.confidence, policy);
    match outcome {
        Outcome::Approved => {
            pattern.confidence = round_confidence((current + policy.promote_delta).min(policy.confidence_ceiling));
            pattern.times_used += 1;
            pattern.times_correct += 1;
        }
        Outcome::Rejected => {
            pattern.confidence = round_confidence((current - policy.demote_delta).max(policy.confidence_floor));
            pattern.times_used += 1;
            pattern.times_rejected += 1;
        }
        Outcome::RolledBack => {
            pattern.confidence = current;
            pattern.times_correct = pattern.times_correct.saturating_sub(1);
        }
    }
    pattern.auto_apply_eligible = eligible_for_auto_apply(pattern, policy);
}

/// Sample size, confidence and approval rate must all clear the policy.
pub fn eligible_for_auto_apply(pattern: &DbPattern, policy: &LearningPolicy) -> bool {
    pattern.active
        && pattern.times_used >= policy.min_sample_size
        && pattern.confidence >= policy.auto_apply_threshold
        && pattern.approval_rate() >= policy.target_approval_rate
}

/// Clamp into policy bounds; an out-of-range input is reported, not fatal.
fn clamp_logged(pattern: &DbPattern, value: f64, policy: &LearningPolicy) -> f64 {
    let clamped = policy.clamp(value);
    if (clamped - value).abs() > f64::EPSILON {
        let err = SuggestError::PatternBounds {
            value,
            floor: policy.confidence_floor,
            ceiling: policy.confidence_ceiling,
        };
        log::warn!("Pattern {}: {}; clamping to {:.3}", pattern.id, err, clamped);
    }
    clamped
}

/// Active pattern for `(type, key, target)`. Inactive patterns are invisible
/// to scoring and generation.
pub fn lookup(db: &SuggestionDb, key: &PatternKey) -> Result<Option<DbPattern>, DbError> {
    Ok(db
        .get_pattern(&key.pattern_type, &key.pattern_key, &key.target)?
        .filter(|p| p.active))
}

/// Apply an outcome to the stored pattern. An approval of an unknown pattern
/// seeds it; any other outcome on an unknown pattern is a no-op.
pub fn record_outcome(
    db: &SuggestionDb,
    policy: &LearningPolicy,
    key: &PatternKey,
    outcome: Outcome,
    now: &str,
) -> Result<Option<DbPattern>, DbError> {
    match db.get_pattern(&key.pattern_type, &key.pattern_key, &key.target)? {
        Some(mut pattern) => {
            adjust(&mut pattern, outcome, policy);
            pattern.updated_at = now.to_string();
            db.update_pattern_stats(&pattern)?;
            log::debug!(
                "Pattern {} ({} {} -> {}) {:?}: confidence {:.3}, used {}, correct {}",
                pattern.id,
                pattern.pattern_type,
                pattern.pattern_key,
                pattern.target,
                outcome,
                pattern.confidence,
                pattern.times_used,
                pattern.times_correct
            );
            Ok(Some(pattern))
        }
        None if outcome == Outcome::Approved => {
            let mut pattern = DbPattern {
                id: format!("pat-{}", Uuid::new_v4()),
                pattern_type: key.pattern_type.clone(),
                pattern_key: key.pattern_key.clone(),
                target: key.target.clone(),
                confidence: round_confidence(policy.seed_confidence),
                times_used: 1,
                times_correct: 1,
                times_rejected: 0,
                active: true,
                auto_apply_eligible: false,
                created_at: now.to_string(),
                updated_at: now.to_string(),
            };
            pattern.auto_apply_eligible = eligible_for_auto_apply(&pattern, policy);
            db.insert_pattern(&pattern)?;
            log::info!(
                "Seeded pattern {} ({} {} -> {}) at {:.3}",
                pattern.id,
                pattern.pattern_type,
                pattern.pattern_key,
                pattern.target,
                pattern.confidence
            );
            Ok(Some(pattern))
        }
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Pattern plus derived stats for admin tooling.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternView {
    #[serde(flatten)]
    pub pattern: DbPattern,
    pub approval_rate: f64,
    pub eligible: bool,
}

pub fn list_patterns(
    db: &SuggestionDb,
    policy: &LearningPolicy,
    filter: &PatternFilter,
) -> Result<Vec<PatternView>, DbError> {
    Ok(db
        .list_patterns(filter)?
        .into_iter()
        .map(|pattern| PatternView {
            approval_rate: pattern.approval_rate(),
            eligible: eligible_for_auto_apply(&pattern, policy),
            pattern,
        })
        .collect())
}

/// Manual override. Out-of-range values are clamped (and logged), never
/// rejected.
pub fn set_pattern_confidence(
    db: &SuggestionDb,
    policy: &LearningPolicy,
    pattern_id: &str,
    confidence: f64,
    now: &str,
) -> Result<DbPattern, SuggestError> {
    if !confidence.is_finite() {
        return Err(SuggestError::Validation(format!(
            "confidence must be a number, got {}",
            confidence
        )));
    }
    let mut pattern = db
        .get_pattern_by_id(pattern_id)?
        .ok_or_else(|| SuggestError::NotFound(format!("pattern {}", pattern_id)))?;
    pattern.confidence = round_confidence(clamp_logged(&pattern, confidence, policy));
    pattern.auto_apply_eligible = eligible_for_auto_apply(&pattern, policy);
    pattern.updated_at = now.to_string();
    db.update_pattern_stats(&pattern)?;
    log::info!("Pattern {} confidence set to {:.3}", pattern.id, pattern.confidence);
    Ok(pattern)
}

/// Enable or disable a pattern. Disabled patterns keep their stats but are
/// never used for scoring, sender history or auto-apply.
pub fn set_pattern_active(
    db: &SuggestionDb,
    policy: &LearningPolicy,
    pattern_id: &str,
    active: bool,
    now: &str,
) -> Result<DbPattern, SuggestError> {
    if !db.set_pattern_active(pattern_id, active, now)? {
        return Err(SuggestError::NotFound(format!("pattern {}", pattern_id)));
    }
    let mut pattern = db
        .get_pattern_by_id(pattern_id)?
        .ok_or_else(|| SuggestError::NotFound(format!("pattern {}", pattern_id)))?;
    pattern.auto_apply_eligible = eligible_for_auto_apply(&pattern, policy);
    db.update_pattern_stats(&pattern)?;
    log::info!(
        "Pattern {} {}",
        pattern.id,
        if active { "reactivated" } else { "deactivated" }
    );
    Ok(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    const NOW: &str = "2026-03-02T09:00:00Z";

    fn key() -> PatternKey {
        PatternKey::new("sender_history", "ana@client.com", &TargetRef::project("p1"))
    }

    #[test]
    fn test_first_approval_seeds_and_promotes_to_ceiling() {
        let db = test_db();
        let policy = LearningPolicy::default();
        let mut last = None;
        for _ in 0..5 {
            last = record_outcome(&db, &policy, &key(), Outcome::Approved, NOW).unwrap();
        }
        let p = last.unwrap();
        assert!((p.confidence - 0.95).abs() < 1e-9);
        assert_eq!((p.times_used, p.times_correct), (5, 5));
        assert!(p.auto_apply_eligible);

        let p = record_outcome(&db, &policy, &key(), Outcome::Approved, NOW).unwrap().unwrap();
        assert!((p.confidence - 0.95).abs() < 1e-9, "capped at ceiling");
    }

    #[test]
    fn test_rejecting_unknown_pattern_creates_nothing() {
        let db = test_db();
        let policy = LearningPolicy::default();
        assert!(record_outcome(&db, &policy, &key(), Outcome::Rejected, NOW).unwrap().is_none());
        assert!(record_outcome(&db, &policy, &key(), Outcome::RolledBack, NOW).unwrap().is_none());
        assert!(db.list_patterns(&PatternFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_rejection_demotes_and_respects_floor() {
        let db = test_db();
        let policy = LearningPolicy::default();
        record_outcome(&db, &policy, &key(), Outcome::Approved, NOW).unwrap();
        let p = record_outcome(&db, &policy, &key(), Outcome::Rejected, NOW).unwrap().unwrap();
        assert!((p.confidence - 0.65).abs() < 1e-9);
        assert_eq!(p.times_rejected, 1);
        for _ in 0..5 {
            record_outcome(&db, &policy, &key(), Outcome::Rejected, NOW).unwrap();
        }
        let p = lookup(&db, &key()).unwrap().unwrap();
        assert!((p.confidence - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_stays_in_bounds_for_any_sequence() {
        let policy = LearningPolicy::default();
        let mut pattern = DbPattern {
            id: "pat-x".into(),
            pattern_type: "identifier_code".into(),
            pattern_key: "HH-2041".into(),
            target: TargetRef::project("p1"),
            confidence: policy.seed_confidence,
            times_used: 1,
            times_correct: 1,
            times_rejected: 0,
            active: true,
            auto_apply_eligible: false,
            created_at: NOW.into(),
            updated_at: NOW.into(),
        };
        // Deterministic pseudo-random walk over outcomes.
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..500 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let outcome = match state % 3 {
                0 => Outcome::Approved,
                1 => Outcome::Rejected,
                _ => Outcome::RolledBack,
            };
            adjust(&mut pattern, outcome, &policy);
            assert!(pattern.confidence >= policy.confidence_floor - 1e-9);
            assert!(pattern.confidence <= policy.confidence_ceiling + 1e-9);
            assert!(pattern.times_correct <= pattern.times_used);
        }
    }

    #[test]
    fn test_auto_apply_needs_sample_size_not_just_confidence() {
        let policy = LearningPolicy::default();
        let mut pattern = DbPattern {
            id: "pat-x".into(),
            pattern_type: "sender_history".into(),
            pattern_key: "ana@client.com".into(),
            target: TargetRef::project("p1"),
            confidence: 0.95,
            times_used: 4,
            times_correct: 4,
            times_rejected: 0,
            active: true,
            auto_apply_eligible: false,
            created_at: NOW.into(),
            updated_at: NOW.into(),
        };
        assert!(!eligible_for_auto_apply(&pattern, &policy));
        pattern.times_used = 5;
        pattern.times_correct = 3;
        assert!(!eligible_for_auto_apply(&pattern, &policy), "approval rate 0.6");
        pattern.times_correct = 5;
        assert!(eligible_for_auto_apply(&pattern, &policy));
        pattern.active = false;
        assert!(!eligible_for_auto_apply(&pattern, &policy));
    }

    #[test]
    fn test_rollback_takes_back_one_correct() {
        let db = test_db();
        let policy = LearningPolicy::default();
        for _ in 0..5 {
            record_outcome(&db, &policy, &key(), Outcome::Approved, NOW).unwrap();
        }
        let p = record_outcome(&db, &policy, &key(), Outcome::RolledBack, NOW).unwrap().unwrap();
        assert_eq!((p.times_used, p.times_correct), (5, 4));
        assert!(p.auto_apply_eligible, "4 of 5 still meets the 0.80 target");

        let p = record_outcome(&db, &policy, &key(), Outcome::RolledBack, NOW).unwrap().unwrap();
        assert_eq!(p.times_correct, 3);
        assert!(!p.auto_apply_eligible);
    }

    #[test]
    fn test_manual_override_clamps_and_deactivate_hides() {
        let db = test_db();
        let policy = LearningPolicy::default();
        let p = record_outcome(&db, &policy, &key(), Outcome::Approved, NOW).unwrap().unwrap();

        let p = set_pattern_confidence(&db, &policy, &p.id, 1.4, NOW).unwrap();
        assert!((p.confidence - 0.95).abs() < 1e-9);
        assert!(set_pattern_confidence(&db, &policy, "missing", 0.7, NOW).is_err());
        assert!(set_pattern_confidence(&db, &policy, &p.id, f64::NAN, NOW).is_err());

        set_pattern_active(&db, &policy, &p.id, false, NOW).unwrap();
        assert!(lookup(&db, &key()).unwrap().is_none());
        let views = list_patterns(&db, &policy, &PatternFilter::default()).unwrap();
        assert_eq!(views.len(), 1);
        assert!(!views[0].eligible);

        set_pattern_active(&db, &policy, &p.id, true, NOW).unwrap();
        assert!(lookup(&db, &key()).unwrap().is_some());
    }
}
