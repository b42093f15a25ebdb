//! The suggestion engine: one writable store, one target repository, the
//! strategy registry and the policy, behind per-target serialization.
//!
//! Lock order is always target stripe(s) first, then the store. Stripes are
//! taken in key order when an operation touches two targets (a correction).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::apply;
use crate::candidates::{self, ContentClassifier, Generation, StrategyContext, StrategyFailure, StrategyRegistry};
use crate::db::patterns::PatternFilter;
use crate::db::{timestamp, DbDecisionRecord, DbPattern, DbSuggestion, PriorityBucket, SuggestionDb, SuggestionStatus};
use crate::dedup::{self, Verdict};
use crate::entity::TargetRef;
use crate::error::SuggestError;
use crate::learning::{self, PatternView};
use crate::lifecycle::{DecisionRequest, Lifecycle, AUTO_ACTOR};
use crate::scoring;
use crate::signal::Signal;
use crate::state;
use crate::targets::TargetRepository;
use crate::types::EngineConfig;

/// Idle stripes are pruned once the map grows this large.
const STRIPE_PRUNE_AT: usize = 1024;

/// What happened to one signal.
#[derive(Debug, Clone, Default)]
pub struct SignalOutcome {
    pub signal_id: String,
    pub created: Vec<DbSuggestion>,
    /// Candidates the deduplicator turned away, with the reason.
    pub suppressed: Vec<(TargetRef, Verdict)>,
    pub failures: Vec<StrategyFailure>,
    /// Candidates dropped as malformed or pointing at a vanished target.
    pub rejected: usize,
}

/// Result of one auto-apply sweep.
#[derive(Debug, Clone, Default)]
pub struct AutoApplyReport {
    pub applied: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct SuggestionEngine {
    db: Mutex<SuggestionDb>,
    db_path: PathBuf,
    targets: Arc<dyn TargetRepository>,
    registry: StrategyRegistry,
    config: EngineConfig,
    target_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SuggestionEngine {
    pub fn new(
        db: SuggestionDb,
        targets: Arc<dyn TargetRepository>,
        registry: StrategyRegistry,
        config: EngineConfig,
    ) -> Self {
        let db_path = db.path().to_path_buf();
        Self {
            db: Mutex::new(db),
            db_path,
            targets,
            registry,
            config,
            target_locks: DashMap::new(),
        }
    }

    /// Open the configured database and build the default strategy cascade.
    pub fn open(
        config: EngineConfig,
        targets: Arc<dyn TargetRepository>,
        classifier: Option<Arc<dyn ContentClassifier>>,
    ) -> Result<Self, SuggestError> {
        config.validate().map_err(SuggestError::Validation)?;
        let path = state::database_path(&config).map_err(SuggestError::Validation)?;
        let db = SuggestionDb::open_at(path)?;
        let registry = candidates::default_registry(&config.candidates, classifier)?;
        log::info!(
            "Suggestion engine ready ({} at {}, strategies: {})",
            env!("CARGO_PKG_VERSION"),
            db.path().display(),
            registry.names().join(", ")
        );
        Ok(Self::new(db, targets, registry, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn targets(&self) -> &dyn TargetRepository {
        self.targets.as_ref()
    }

    /// Run `f` against the writable store.
    pub fn with_db<T>(&self, f: impl FnOnce(&SuggestionDb) -> T) -> T {
        let db = self.db.lock();
        f(&db)
    }

    /// A read-only connection for candidate generation off the writer.
    pub fn open_reader(&self) -> Result<SuggestionDb, SuggestError> {
        Ok(SuggestionDb::open_readonly_at(&self.db_path)?)
    }

    fn lifecycle<'a>(&'a self, db: &'a SuggestionDb) -> Lifecycle<'a> {
        Lifecycle::new(db, self.targets.as_ref(), &self.config)
    }

    fn stripes(&self, targets: &[&TargetRef]) -> Vec<Arc<Mutex<()>>> {
        if self.target_locks.len() >= STRIPE_PRUNE_AT {
            self.prune_stripes();
        }
        let mut keys: Vec<String> = targets.iter().map(|t| t.key()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .map(|key| self.target_locks.entry(key).or_default().clone())
            .collect()
    }

    /// Drop stripes nobody holds. A stripe handed out under the shard lock
    /// already has a second reference, so it is never pruned from under its
    /// holder.
    fn prune_stripes(&self) {
        let before = self.target_locks.len();
        self.target_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        log::debug!("Pruned {} idle target stripes", before.saturating_sub(self.target_locks.len()));
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Candidate generation. Touches nothing but `reader`.
    pub fn generate(&self, reader: &SuggestionDb, signal: &Signal) -> Generation {
        let ctx = StrategyContext {
            db: reader,
            targets: self.targets.as_ref(),
            config: &self.config,
        };
        self.registry.generate(signal, &ctx)
    }

    /// Score, deduplicate and persist the candidates generated for `signal`.
    ///
    /// Each candidate is handled under its target's stripe, so two workers
    /// racing on the same (signal, target) see each other's pending row.
    pub fn record(
        &self,
        signal: &Signal,
        generation: Generation,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, SuggestError> {
        let mut outcome = SignalOutcome {
            signal_id: signal.id.clone(),
            failures: generation.failures,
            rejected: generation.rejected,
            ..Default::default()
        };

        for candidate in generation.candidates {
            let stripes = self.stripes(&[&candidate.target]);
            let _guards: Vec<_> = stripes.iter().map(|s| s.lock()).collect();

            let version = match self.targets.get(&candidate.target) {
                Ok(entity) => entity.version,
                Err(SuggestError::NotFound(what)) => {
                    log::debug!("Skipping candidate for signal {}: {} not found", signal.id, what);
                    outcome.rejected += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let db = self.db.lock();
            let verdict = dedup::check(
                &db,
                signal,
                &candidate.target,
                self.config.dedup.rejection_cooldown_days,
                now,
            )?;
            if !verdict.is_fresh() {
                log::debug!(
                    "Suppressed {} -> {}: {}",
                    signal.id,
                    candidate.target,
                    verdict.as_str()
                );
                outcome.suppressed.push((candidate.target, verdict));
                continue;
            }

            let scored = scoring::score(&db, candidate, &self.config.learning)?;
            match self.lifecycle(&db).create(&scored, signal, version, now) {
                Ok(suggestion) => outcome.created.push(suggestion),
                Err(e) if e.is_candidate_scoped() => {
                    log::warn!("Dropping candidate for signal {}: {}", signal.id, e);
                    outcome.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Generate and record in one go, on a fresh read-only connection.
    pub fn process_signal(&self, signal: &Signal, now: DateTime<Utc>) -> Result<SignalOutcome, SuggestError> {
        let reader = self.open_reader()?;
        let generation = self.generate(&reader, signal);
        drop(reader);
        self.record(signal, generation, now)
    }

    // -----------------------------------------------------------------------
    // Review
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Result<DbSuggestion, SuggestError> {
        let db = self.db.lock();
        self.lifecycle(&db).get(id)
    }

    pub fn list(
        &self,
        bucket: Option<PriorityBucket>,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DbSuggestion>, SuggestError> {
        let db = self.db.lock();
        self.lifecycle(&db).list(bucket, status)
    }

    pub fn decision_history(&self, id: &str) -> Result<Vec<DbDecisionRecord>, SuggestError> {
        let db = self.db.lock();
        self.lifecycle(&db).decision_history(id)
    }

    pub fn decide(
        &self,
        id: &str,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let target = self.get(id)?.target;
        let mut involved = vec![&target];
        if let Some(ref correction) = request.correction {
            involved.push(&correction.target);
        }
        let stripes = self.stripes(&involved);
        let _guards: Vec<_> = stripes.iter().map(|s| s.lock()).collect();

        let db = self.db.lock();
        self.lifecycle(&db).decide(id, request, now)
    }

    pub fn retry(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<DbSuggestion, SuggestError> {
        let target = self.get(id)?.target;
        let stripes = self.stripes(&[&target]);
        let _guards: Vec<_> = stripes.iter().map(|s| s.lock()).collect();

        let db = self.db.lock();
        self.lifecycle(&db).retry(id, actor, now)
    }

    pub fn rollback(
        &self,
        id: &str,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let target = self.get(id)?.target;
        let stripes = self.stripes(&[&target]);
        let _guards: Vec<_> = stripes.iter().map(|s| s.lock()).collect();

        let db = self.db.lock();
        self.lifecycle(&db).rollback(id, actor, reason, now)
    }

    // -----------------------------------------------------------------------
    // Sweeps
    // -----------------------------------------------------------------------

    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, SuggestError> {
        let db = self.db.lock();
        self.lifecycle(&db).expire_stale(now)
    }

    /// Approve every pending suggestion whose originating pattern clears the
    /// auto-apply gate. Each approval is recorded with actor `auto` and
    /// teaches its patterns like a human approval would.
    pub fn auto_apply_sweep(&self, now: DateTime<Utc>) -> Result<AutoApplyReport, SuggestError> {
        let due = {
            let db = self.db.lock();
            apply::auto_apply_candidates(&db, &self.config.learning)?
        };

        let mut report = AutoApplyReport::default();
        for suggestion in due {
            let request = DecisionRequest::approve(AUTO_ACTOR).with_reason(&format!(
                "auto-applied at {:.3} from pattern {}",
                suggestion.confidence,
                suggestion.originating_pattern_id.as_deref().unwrap_or("-")
            ));
            match self.decide(&suggestion.id, &request, now) {
                Ok(_) => report.applied.push(suggestion.id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("Auto-apply of {} failed: {}", suggestion.id, e);
                    report.failed.push((suggestion.id, e.to_string()));
                }
            }
        }
        if !report.applied.is_empty() {
            log::info!("Auto-applied {} suggestions", report.applied.len());
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Patterns
    // -----------------------------------------------------------------------

    pub fn list_patterns(&self, filter: &PatternFilter) -> Result<Vec<PatternView>, SuggestError> {
        let db = self.db.lock();
        Ok(learning::list_patterns(&db, &self.config.learning, filter)?)
    }

    pub fn set_pattern_confidence(
        &self,
        pattern_id: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<DbPattern, SuggestError> {
        let db = self.db.lock();
        learning::set_pattern_confidence(&db, &self.config.learning, pattern_id, confidence, &timestamp(now))
    }

    pub fn deactivate_pattern(&self, pattern_id: &str, now: DateTime<Utc>) -> Result<DbPattern, SuggestError> {
        let db = self.db.lock();
        learning::set_pattern_active(&db, &self.config.learning, pattern_id, false, &timestamp(now))
    }

    pub fn reactivate_pattern(&self, pattern_id: &str, now: DateTime<Utc>) -> Result<DbPattern, SuggestError> {
        let db = self.db.lock();
        learning::set_pattern_active(&db, &self.config.learning, pattern_id, true, &timestamp(now))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::targets::MemoryTargetRepository;

    /// Two projects with codes, a proposal and one known contact.
    pub fn studio() -> Arc<MemoryTargetRepository> {
        let repo = MemoryTargetRepository::new();
        repo.insert(TargetRef::project("p1"), "Harbour House");
        repo.add_identifier("HH-2041", TargetRef::project("p1"));
        repo.insert(TargetRef::project("p2"), "Mill Lane");
        repo.add_identifier("ML-0330", TargetRef::project("p2"));
        repo.insert(TargetRef::proposal("pr-7"), "Mill Lane extension");
        repo.insert(TargetRef::contact("c1"), "Ana Ruiz");
        repo.add_contact_email("ana@client.com", TargetRef::contact("c1"));
        Arc::new(repo)
    }

    pub fn engine(repo: Arc<MemoryTargetRepository>) -> SuggestionEngine {
        let config = EngineConfig::default();
        let registry = candidates::default_registry(&config.candidates, None).unwrap();
        SuggestionEngine::new(test_db(), repo, registry, config)
    }
}
