//! Sender identity lookup.
//!
//! Three sources, strongest first:
//! - the sender address belongs to a known contact (0.85)
//! - learned sender history: "this sender -> this project" patterns (0.80)
//! - display-name fallback when the address is unknown (jaro_winkler >= 0.85)

use super::{CandidateLink, CandidateStrategy, StrategyContext};
use crate::error::SuggestError;
use crate::signal::Signal;

pub const STRATEGY: &str = "sender";
pub const CONTACT_PATTERN: &str = "sender_contact";
pub const HISTORY_PATTERN: &str = "sender_history";
pub const NAME_PATTERN: &str = "sender_name";

const NAME_MATCH_THRESHOLD: f64 = 0.85;

pub struct SenderStrategy;

impl CandidateStrategy for SenderStrategy {
    fn generate(
        &self,
        signal: &Signal,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<CandidateLink>, SuggestError> {
        let sender = signal.sender_key();
        if sender.is_empty() {
            return Ok(Vec::new());
        }
        let baselines = &ctx.config.candidates;
        let mut candidates = Vec::new();

        let contact = ctx.targets.find_contact_by_email(&sender);
        if let Some(ref contact) = contact {
            candidates.push(CandidateLink::new(
                signal,
                contact.clone(),
                STRATEGY,
                baselines.sender_contact_confidence,
                format!("Sender {} is a known contact", sender),
                CONTACT_PATTERN,
                &sender,
            ));
        }

        let history = ctx
            .db
            .active_patterns_for_key(HISTORY_PATTERN, &sender)
            .map_err(|e| SuggestError::Strategy {
                strategy: STRATEGY.to_string(),
                message: e.to_string(),
            })?;
        for pattern in history {
            if pattern.times_correct == 0 {
                continue;
            }
            if !ctx.targets.exists(&pattern.target) {
                log::debug!(
                    "Sender pattern {} points at missing {}; skipping",
                    pattern.id,
                    pattern.target
                );
                continue;
            }
            candidates.push(CandidateLink::new(
                signal,
                pattern.target.clone(),
                STRATEGY,
                baselines.sender_history_confidence,
                format!(
                    "Sender {} linked to {} based on {} previous approvals",
                    sender,
                    pattern.target,
                    pattern.times_correct
                ),
                HISTORY_PATTERN,
                &sender,
            ));
        }

        if contact.is_none() {
            if let Some(candidate) = name_fallback(signal, ctx) {
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }
}

/// Best contact whose name resembles the sender's display name.
fn name_fallback(signal: &Signal, ctx: &StrategyContext<'_>) -> Option<CandidateLink> {
    let display = normalize_name(signal.sender_name.as_deref()?);
    if display.len() < 3 {
        return None;
    }

    let mut best: Option<(f64, crate::entity::TargetRef, String)> = None;
    for (reference, name) in ctx.targets.contacts() {
        let score = strsim::jaro_winkler(&display, &normalize_name(&name));
        if score < NAME_MATCH_THRESHOLD {
            continue;
        }
        if best.as_ref().is_none_or(|(s, _, _)| score > *s) {
            best = Some((score, reference, name));
        }
    }

    let (_, reference, name) = best?;
    Some(CandidateLink::new(
        signal,
        reference,
        STRATEGY,
        ctx.config.candidates.sender_name_confidence,
        format!("Sender name \"{}\" resembles contact {}", display, name),
        NAME_PATTERN,
        &display,
    ))
}

/// Lowercase, letters and single spaces only.
fn normalize_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbPattern;
    use crate::entity::TargetRef;
    use crate::signal::fixtures::email;
    use crate::targets::MemoryTargetRepository;
    use crate::types::EngineConfig;

    fn history(id: &str, target: TargetRef, times_correct: u32, active: bool) -> DbPattern {
        DbPattern {
            id: id.to_string(),
            pattern_type: HISTORY_PATTERN.into(),
            pattern_key: "ana@client.com".into(),
            target,
            confidence: 0.95,
            times_used: times_correct,
            times_correct,
            times_rejected: 0,
            active,
            auto_apply_eligible: false,
            created_at: "2026-03-01T00:00:00Z".into(),
            updated_at: "2026-03-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_known_contact_and_history() {
        let db = test_db();
        let repo = MemoryTargetRepository::new();
        repo.insert(TargetRef::contact("c1"), "Ana Reyes");
        repo.insert(TargetRef::project("p1"), "Harbour House");
        repo.insert(TargetRef::project("p2"), "Mill Lane");
        repo.add_contact_email("ana@client.com", TargetRef::contact("c1"));
        db.insert_pattern(&history("pat-1", TargetRef::project("p1"), 5, true)).unwrap();
        db.insert_pattern(&history("pat-2", TargetRef::project("p2"), 3, false)).unwrap();

        let config = EngineConfig::default();
        let ctx = StrategyContext {
            db: &db,
            targets: &repo,
            config: &config,
        };
        let signal = email("s1", "Ana@Client.com", "Tiles", "");
        let candidates = SenderStrategy.generate(&signal, &ctx).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].target, TargetRef::contact("c1"));
        assert!((candidates[0].raw_confidence - 0.85).abs() < 1e-9);
        assert_eq!(candidates[1].target, TargetRef::project("p1"));
        assert!((candidates[1].raw_confidence - 0.80).abs() < 1e-9);
        assert_eq!(candidates[1].pattern_type, HISTORY_PATTERN);
        assert!(candidates[1].evidence[0].contains("based on 5 previous approvals"));
    }

    #[test]
    fn test_name_fallback_for_unknown_address() {
        let db = test_db();
        let repo = MemoryTargetRepository::new();
        repo.insert(TargetRef::contact("c1"), "Ana Reyes");
        repo.insert(TargetRef::contact("c2"), "Tom Okafor");
        let config = EngineConfig::default();
        let ctx = StrategyContext {
            db: &db,
            targets: &repo,
            config: &config,
        };

        let mut signal = email("s1", "a.reyes@gmail.com", "Tiles", "");
        signal.sender_name = Some("Ana Reyes.".into());
        let candidates = SenderStrategy.generate(&signal, &ctx).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].target, TargetRef::contact("c1"));
        assert_eq!(candidates[0].pattern_type, NAME_PATTERN);
        assert!((candidates[0].raw_confidence - 0.65).abs() < 1e-9);

        signal.sender_name = Some("Zed".into());
        assert!(SenderStrategy.generate(&signal, &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Ana   REYES (Studio) "), "ana reyes studio");
    }
}
