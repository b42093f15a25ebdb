//! Confidence scoring: blend a candidate's raw confidence with what the
//! pattern store has learned about the same `(type, key, target)`.

use crate::candidates::CandidateLink;
use crate::db::{DbError, DbPattern, SuggestionDb};
use crate::learning::{self, PatternKey};
use crate::types::LearningPolicy;

/// A candidate with its final confidence and the pattern (if any) behind it.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: CandidateLink,
    pub confidence: f64,
    pub pattern: Option<DbPattern>,
}

/// Combine raw and learned confidence.
///
/// Learned confidence takes over (weighted by `learned_weight`) once the
/// pattern has `min_sample_size` decisions behind it; before that, and with
/// no pattern at all, the raw value passes through unchanged.
pub fn combine(raw: f64, pattern: Option<&DbPattern>, policy: &LearningPolicy) -> f64 {
    let blended = match pattern {
        Some(p) if p.active && p.times_used >= policy.min_sample_size => {
            policy.learned_weight * p.confidence + (1.0 - policy.learned_weight) * raw
        }
        _ => raw,
    };
    normalize(blended)
}

/// Clamp to `[0, 1]` and round to the stored precision.
pub fn normalize(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    learning::round_confidence(value.clamp(0.0, 1.0))
}

pub fn score(
    db: &SuggestionDb,
    candidate: CandidateLink,
    policy: &LearningPolicy,
) -> Result<ScoredCandidate, DbError> {
    let key = PatternKey::new(&candidate.pattern_type, &candidate.pattern_key, &candidate.target);
    let pattern = learning::lookup(db, &key)?;
    let confidence = combine(candidate.raw_confidence, pattern.as_ref(), policy);
    Ok(ScoredCandidate {
        candidate,
        confidence,
        pattern,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::TargetRef;

    fn pattern(confidence: f64, times_used: u32) -> DbPattern {
        DbPattern {
            id: "pat-1".into(),
            pattern_type: "sender_history".into(),
            pattern_key: "ana@client.com".into(),
            target: TargetRef::project("p1"),
            confidence,
            times_used,
            times_correct: times_used,
            times_rejected: 0,
            active: true,
            auto_apply_eligible: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_no_pattern_passes_raw_through() {
        let policy = LearningPolicy::default();
        assert!((combine(0.90, None, &policy) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_below_sample_size_has_no_effect() {
        let policy = LearningPolicy::default();
        let p = pattern(0.95, 4);
        assert!((combine(0.60, Some(&p), &policy) - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_learned_confidence_dominates_once_sampled() {
        let policy = LearningPolicy::default();
        let p = pattern(0.95, 5);
        // 0.75 * 0.95 + 0.25 * 0.80
        let c = combine(0.80, Some(&p), &policy);
        assert!((0.912..=0.913).contains(&c), "{}", c);

        let mut off = pattern(0.95, 9);
        off.active = false;
        assert!((combine(0.80, Some(&off), &policy) - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_clamps_and_rounds() {
        assert!((normalize(1.3) - 1.0).abs() < 1e-9);
        assert!((normalize(-0.2)).abs() < 1e-9);
        assert!((normalize(0.12345) - 0.123).abs() < 1e-9);
        assert!((normalize(f64::NAN)).abs() < 1e-9);
    }
}
