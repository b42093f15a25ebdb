//! Candidate generation: a fixed, ordered cascade of link strategies.
//!
//! Strategies (registration order, highest baseline first):
//! 1. Identifier extraction (project codes in subject/body)
//! 2. Sender identity (known contact, learned sender history, name fallback)
//! 3. Thread propagation (sibling message already linked)
//! 4. Content classification (external classifier, deadline-bound)
//!
//! Generation only reads: the pattern store, the confirmed-link registry and
//! the target directory. Candidates from different strategies that agree on
//! a target are merged into one, with an agreement bonus.

use std::sync::Arc;

use crate::db::SuggestionDb;
use crate::entity::TargetRef;
use crate::error::SuggestError;
use crate::signal::Signal;
use crate::targets::TargetRepository;
use crate::types::{CandidateConfig, EngineConfig};

pub mod classification;
pub mod identifier;
pub mod sender;
pub mod thread;

pub use classification::{ClassificationStrategy, Classification, ContentClassifier};
pub use identifier::IdentifierStrategy;
pub use sender::SenderStrategy;
pub use thread::ThreadStrategy;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// An unpersisted proposed association between a signal and a target.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLink {
    pub signal_id: String,
    pub target: TargetRef,
    /// Strategy that produced the strongest evidence for this target.
    pub strategy: String,
    pub raw_confidence: f64,
    pub evidence: Vec<String>,
    /// Pattern the scorer consults and decisions teach.
    pub pattern_type: String,
    pub pattern_key: String,
    /// Other strategies that pointed at the same target.
    pub supporting: Vec<String>,
}

impl CandidateLink {
    pub fn new(
        signal: &Signal,
        target: TargetRef,
        strategy: &str,
        raw_confidence: f64,
        evidence: String,
        pattern_type: &str,
        pattern_key: &str,
    ) -> Self {
        Self {
            signal_id: signal.id.clone(),
            target,
            strategy: strategy.to_string(),
            raw_confidence,
            evidence: vec![evidence],
            pattern_type: pattern_type.to_string(),
            pattern_key: pattern_key.to_string(),
            supporting: Vec::new(),
        }
    }

    /// Reject malformed candidates before they reach the scorer.
    pub fn validate(&self) -> Result<(), SuggestError> {
        if self.signal_id.trim().is_empty() {
            return Err(SuggestError::Validation("candidate has empty signal id".into()));
        }
        self.target.validate()?;
        if !self.raw_confidence.is_finite() || !(0.0..=1.0).contains(&self.raw_confidence) {
            return Err(SuggestError::Validation(format!(
                "candidate confidence {} outside [0, 1]",
                self.raw_confidence
            )));
        }
        if self.pattern_type.is_empty() || self.pattern_key.trim().is_empty() {
            return Err(SuggestError::Validation(format!(
                "candidate for {} has no pattern key",
                self.target
            )));
        }
        if self.evidence.iter().all(|e| e.trim().is_empty()) {
            return Err(SuggestError::Validation(format!(
                "candidate for {} has no evidence",
                self.target
            )));
        }
        Ok(())
    }
}

/// Read-only collaborators handed to every strategy.
pub struct StrategyContext<'a> {
    pub db: &'a SuggestionDb,
    pub targets: &'a dyn TargetRepository,
    pub config: &'a EngineConfig,
}

/// One link strategy. Implementations must not mutate anything.
pub trait CandidateStrategy: Send + Sync {
    fn generate(
        &self,
        signal: &Signal,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<CandidateLink>, SuggestError>;
}

/// A strategy that failed or timed out for one signal.
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: String,
    pub signal_id: String,
    pub message: String,
    pub timed_out: bool,
}

/// Output of running the cascade over one signal.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub candidates: Vec<CandidateLink>,
    pub failures: Vec<StrategyFailure>,
    /// Candidates dropped by validation.
    pub rejected: usize,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered registration table of strategies, resolved once at startup.
pub struct StrategyRegistry {
    strategies: Vec<(String, Box<dyn CandidateStrategy>)>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Register a named strategy. Order of registration is evaluation order
    /// and the tie-break when merging equal-confidence candidates.
    pub fn register(&mut self, name: &str, strategy: Box<dyn CandidateStrategy>) {
        self.strategies.push((name.to_string(), strategy));
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Run every strategy over `signal`. A failing strategy is logged and
    /// skipped; the others still contribute.
    pub fn generate(&self, signal: &Signal, ctx: &StrategyContext<'_>) -> Generation {
        let mut generation = Generation::default();
        let mut raw = Vec::new();

        for (name, strategy) in &self.strategies {
            match strategy.generate(signal, ctx) {
                Ok(candidates) => {
                    for candidate in candidates {
                        match candidate.validate() {
                            Ok(()) => raw.push(candidate),
                            Err(e) => {
                                log::warn!(
                                    "Dropping candidate from {} for signal {}: {}",
                                    name,
                                    signal.id,
                                    e
                                );
                                generation.rejected += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Strategy {} failed for signal {}: {}", name, signal.id, e);
                    generation.failures.push(StrategyFailure {
                        strategy: name.clone(),
                        signal_id: signal.id.clone(),
                        message: e.to_string(),
                        timed_out: matches!(e, SuggestError::ExternalStrategyTimeout { .. }),
                    });
                }
            }
        }

        generation.candidates = merge_agreeing(
            raw,
            ctx.config.candidates.agreement_bonus,
            ctx.config.learning.confidence_ceiling,
        );
        generation
    }
}

/// Construct the registry with the default strategy cascade. The classifier
/// is optional: without one, the classification step is simply absent.
pub fn default_registry(
    config: &CandidateConfig,
    classifier: Option<Arc<dyn ContentClassifier>>,
) -> Result<StrategyRegistry, SuggestError> {
    let mut registry = StrategyRegistry::new();

    registry.register(
        identifier::STRATEGY,
        Box::new(IdentifierStrategy::new(&config.project_code_pattern)?),
    );
    registry.register(sender::STRATEGY, Box::new(SenderStrategy));
    registry.register(thread::STRATEGY, Box::new(ThreadStrategy));
    if let Some(classifier) = classifier {
        registry.register(
            classification::STRATEGY,
            Box::new(ClassificationStrategy::new(classifier).with_max_in_flight(config.classifier_max_in_flight)),
        );
    }

    Ok(registry)
}

/// Combine candidates that point at the same target. The strongest one
/// leads (its strategy and pattern key are kept); when two or more distinct
/// strategies agree, confidence becomes `max + bonus`, capped at `ceiling`.
pub fn merge_agreeing(candidates: Vec<CandidateLink>, bonus: f64, ceiling: f64) -> Vec<CandidateLink> {
    let mut merged: Vec<CandidateLink> = Vec::new();

    for candidate in candidates {
        match merged.iter_mut().find(|m| m.target == candidate.target) {
            None => merged.push(candidate),
            Some(existing) => {
                let distinct = existing.strategy != candidate.strategy
                    && !existing.supporting.contains(&candidate.strategy);
                if candidate.raw_confidence > existing.raw_confidence {
                    let mut lead = candidate;
                    std::mem::swap(existing, &mut lead);
                    // `lead` now holds the previous leader.
                    let mut supporting = lead.supporting;
                    if existing.strategy != lead.strategy && !supporting.contains(&lead.strategy) {
                        supporting.push(lead.strategy);
                    }
                    supporting.retain(|s| s != &existing.strategy);
                    existing.supporting = supporting;
                    for line in lead.evidence {
                        if !existing.evidence.contains(&line) {
                            existing.evidence.push(line);
                        }
                    }
                } else {
                    if distinct {
                        existing.supporting.push(candidate.strategy);
                    }
                    for line in candidate.evidence {
                        if !existing.evidence.contains(&line) {
                            existing.evidence.push(line);
                        }
                    }
                }
            }
        }
    }

    for candidate in &mut merged {
        if !candidate.supporting.is_empty() {
            candidate.raw_confidence = (candidate.raw_confidence + bonus).min(ceiling);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::signal::fixtures::email;
    use crate::targets::MemoryTargetRepository;

    fn candidate(strategy: &str, target: TargetRef, confidence: f64) -> CandidateLink {
        CandidateLink::new(
            &email("s1", "ana@client.com", "subject", ""),
            target,
            strategy,
            confidence,
            format!("{} evidence", strategy),
            strategy,
            "key",
        )
    }

    struct Failing;

    impl CandidateStrategy for Failing {
        fn generate(&self, _: &Signal, _: &StrategyContext<'_>) -> Result<Vec<CandidateLink>, SuggestError> {
            Err(SuggestError::Strategy {
                strategy: "failing".into(),
                message: "upstream 503".into(),
            })
        }
    }

    struct Fixed(Vec<CandidateLink>);

    impl CandidateStrategy for Fixed {
        fn generate(&self, _: &Signal, _: &StrategyContext<'_>) -> Result<Vec<CandidateLink>, SuggestError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_agreement_adds_bonus_capped_at_ceiling() {
        let merged = merge_agreeing(
            vec![
                candidate("identifier", TargetRef::project("p1"), 0.90),
                candidate("thread", TargetRef::project("p1"), 0.75),
                candidate("thread", TargetRef::project("p2"), 0.75),
            ],
            0.05,
            0.95,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].strategy, "identifier");
        assert!((merged[0].raw_confidence - 0.95).abs() < 1e-9);
        assert_eq!(merged[0].supporting, vec!["thread".to_string()]);
        assert_eq!(merged[0].evidence.len(), 2);
        assert!((merged[1].raw_confidence - 0.75).abs() < 1e-9);

        let capped = merge_agreeing(
            vec![
                candidate("a", TargetRef::project("p1"), 0.93),
                candidate("b", TargetRef::project("p1"), 0.92),
            ],
            0.05,
            0.95,
        );
        assert!((capped[0].raw_confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_stronger_late_candidate_takes_lead() {
        let merged = merge_agreeing(
            vec![
                candidate("thread", TargetRef::project("p1"), 0.75),
                candidate("identifier", TargetRef::project("p1"), 0.90),
            ],
            0.05,
            0.95,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].strategy, "identifier");
        assert_eq!(merged[0].pattern_type, "identifier");
        assert_eq!(merged[0].supporting, vec!["thread".to_string()]);
    }

    #[test]
    fn test_same_strategy_twice_is_not_agreement() {
        let merged = merge_agreeing(
            vec![
                candidate("sender", TargetRef::project("p1"), 0.80),
                candidate("sender", TargetRef::project("p1"), 0.65),
            ],
            0.05,
            0.95,
        );
        assert!((merged[0].raw_confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_failing_strategy_does_not_stop_cascade() {
        let db = test_db();
        let repo = MemoryTargetRepository::new();
        let config = EngineConfig::default();
        let ctx = StrategyContext {
            db: &db,
            targets: &repo,
            config: &config,
        };

        let mut bad = candidate("fixed", TargetRef::project("p2"), 1.7);
        bad.raw_confidence = 1.7;
        let mut registry = StrategyRegistry::new();
        registry.register("failing", Box::new(Failing));
        registry.register(
            "fixed",
            Box::new(Fixed(vec![candidate("fixed", TargetRef::project("p1"), 0.8), bad])),
        );
        assert_eq!(registry.names(), vec!["failing", "fixed"]);

        let generation = registry.generate(&email("s1", "ana@client.com", "hello", ""), &ctx);
        assert_eq!(generation.candidates.len(), 1);
        assert_eq!(generation.failures.len(), 1);
        assert_eq!(generation.failures[0].strategy, "failing");
        assert!(!generation.failures[0].timed_out);
        assert_eq!(generation.rejected, 1);
    }

    #[test]
    fn test_default_registry_order() {
        let config = CandidateConfig::default();
        let registry = default_registry(&config, None).unwrap();
        assert_eq!(registry.names(), vec!["identifier", "sender", "thread"]);

        let mut broken = CandidateConfig::default();
        broken.project_code_pattern = "([A-Z".into();
        assert!(matches!(
            default_registry(&broken, None),
            Err(SuggestError::Validation(_))
        ));
    }
}
