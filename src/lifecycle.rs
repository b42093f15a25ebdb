//! Suggestion store and lifecycle manager.
//!
//! ```text
//!            ┌──────────► approved ──► rolled_back
//!            │               ▲
//! pending ───┼──► rejected   │ retry
//!            ├──► modified   │
//!            ├──► expired    │
//!            └──► error ─────┴──► rejected
//! ```
//!
//! Each operation is one SQLite transaction. Target mutations happen before
//! the transaction commits; if the commit fails the mutation is reverted.
//! Callers serialize operations per target (see `engine`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ProposedAction;
use crate::apply::{self, Applied};
use crate::candidates::sender::HISTORY_PATTERN;
use crate::db::suggestions::{is_constraint_violation, StatusUpdate};
use crate::db::{
    timestamp, Correction, DbDecisionRecord, DbSignalLink, DbSuggestion, DecisionKind,
    PriorityBucket, SuggestionDb, SuggestionStatus,
};
use crate::entity::TargetRef;
use crate::error::SuggestError;
use crate::learning::{self, Outcome, PatternKey};
use crate::scoring::ScoredCandidate;
use crate::signal::Signal;
use crate::targets::TargetRepository;
use crate::types::{EngineConfig, LifecycleConfig};

/// Actor recorded for sweeps and expiry.
pub const SYSTEM_ACTOR: &str = "system";
/// Actor recorded for auto-applied suggestions.
pub const AUTO_ACTOR: &str = "auto";

/// A reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
    /// Approve a corrected version (requires a correction).
    Modify,
}

impl Decision {
    fn status(&self) -> SuggestionStatus {
        match self {
            Decision::Approve => SuggestionStatus::Approved,
            Decision::Reject => SuggestionStatus::Rejected,
            Decision::Modify => SuggestionStatus::Modified,
        }
    }
}

/// Everything `decide` needs besides the suggestion id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub correction: Option<Correction>,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DecisionRequest {
    pub fn approve(actor: &str) -> Self {
        Self {
            decision: Decision::Approve,
            correction: None,
            actor: actor.to_string(),
            reason: None,
        }
    }

    pub fn reject(actor: &str) -> Self {
        Self {
            decision: Decision::Reject,
            ..Self::approve(actor)
        }
    }

    pub fn modify(actor: &str, target: TargetRef) -> Self {
        Self {
            decision: Decision::Modify,
            correction: Some(Correction { target, note: None }),
            ..Self::approve(actor)
        }
    }

    /// Attach a correction (used with `reject`).
    pub fn with_correction(mut self, target: TargetRef) -> Self {
        self.correction = Some(Correction { target, note: None });
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// Bucket from confidence and business impact (a monetary amount in the
/// signal). Fixed at creation.
pub fn bucket_for(confidence: f64, mentions_money: bool, config: &LifecycleConfig) -> PriorityBucket {
    if mentions_money && confidence >= config.urgent_min_confidence {
        PriorityBucket::Urgent
    } else if confidence >= config.attention_min_confidence || mentions_money {
        PriorityBucket::NeedsAttention
    } else {
        PriorityBucket::Fyi
    }
}

/// Patterns a decision on this suggestion teaches: the one that produced it
/// and the sender's history for the same target.
fn pattern_keys(pattern_type: &str, pattern_key: &str, sender_key: &str, target: &TargetRef) -> Vec<PatternKey> {
    let mut keys = vec![PatternKey::new(pattern_type, pattern_key, target)];
    if pattern_type != HISTORY_PATTERN && !sender_key.is_empty() {
        keys.push(PatternKey::new(HISTORY_PATTERN, sender_key, target));
    }
    keys
}

/// Expiry never touches a target, so it only needs the store.
pub fn expire_stale(db: &SuggestionDb, now: DateTime<Utc>) -> Result<usize, SuggestError> {
    let now_ts = timestamp(now);
    let mut expired = 0;
    for id in db.list_expired_pending(&now_ts)? {
        let moved = db.with_transaction(|db| {
            let update = StatusUpdate::default();
            if !db.transition_suggestion(&id, SuggestionStatus::Pending, SuggestionStatus::Expired, &update, &now_ts)? {
                return Ok::<bool, SuggestError>(false);
            }
            db.append_decision(&id, DecisionKind::Expired, Some("ttl elapsed"), None, SYSTEM_ACTOR, &now_ts)?;
            Ok(true)
        })?;
        if moved {
            expired += 1;
        }
    }
    if expired > 0 {
        log::info!("Expired {} stale suggestions", expired);
    }
    Ok(expired)
}

fn invalid(s: &DbSuggestion, to: SuggestionStatus) -> SuggestError {
    SuggestError::InvalidTransition {
        id: s.id.clone(),
        from: s.status.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

/// Lifecycle operations over one store and one target repository.
pub struct Lifecycle<'a> {
    pub db: &'a SuggestionDb,
    pub targets: &'a dyn TargetRepository,
    pub config: &'a EngineConfig,
}

impl<'a> Lifecycle<'a> {
    pub fn new(db: &'a SuggestionDb, targets: &'a dyn TargetRepository, config: &'a EngineConfig) -> Self {
        Self { db, targets, config }
    }

    /// Persist a scored candidate as a pending suggestion.
    ///
    /// `target_version` is the version read while scoring; approval applies
    /// against it. A second pending row for the same (signal, target) is an
    /// invariant breach and is reported as fatal.
    pub fn create(
        &self,
        scored: &ScoredCandidate,
        signal: &Signal,
        target_version: i64,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let candidate = &scored.candidate;
        candidate.validate()?;
        if candidate.signal_id != signal.id {
            return Err(SuggestError::Validation(format!(
                "candidate for signal {} scored against signal {}",
                candidate.signal_id, signal.id
            )));
        }
        let action = ProposedAction::for_target(&signal.id, &candidate.target);
        action.validate()?;

        let mut evidence = candidate.evidence.clone();
        if let Some(ref pattern) = scored.pattern {
            if pattern.times_correct > 0 && !evidence.iter().any(|e| e.contains("previous approvals")) {
                evidence.push(format!(
                    "Learned {} pattern based on {} previous approvals",
                    pattern.pattern_type.replace('_', " "),
                    pattern.times_correct
                ));
            }
        }

        let created_at = timestamp(now);
        let suggestion = DbSuggestion {
            id: format!("sg-{}", Uuid::new_v4()),
            suggestion_type: action.suggestion_type(),
            priority_bucket: bucket_for(scored.confidence, signal.mentions_money(), &self.config.lifecycle),
            confidence: scored.confidence,
            evidence,
            proposed_action: action,
            status: SuggestionStatus::Pending,
            created_at: created_at.clone(),
            reviewed_by: None,
            reviewed_at: None,
            rollback_snapshot: None,
            originating_pattern_id: scored.pattern.as_ref().map(|p| p.id.clone()),
            expires_at: timestamp(now + Duration::days(self.config.lifecycle.suggestion_ttl_days)),
            signal_id: signal.id.clone(),
            thread_id: signal.thread_id.clone(),
            target: candidate.target.clone(),
            strategy: candidate.strategy.clone(),
            pattern_type: candidate.pattern_type.clone(),
            pattern_key: candidate.pattern_key.clone(),
            sender_key: signal.sender_key(),
            target_version,
            content_fingerprint: signal.content_fingerprint(),
            error_reason: None,
            updated_at: created_at,
        };

        if let Err(e) = self.db.insert_suggestion(&suggestion) {
            if is_constraint_violation(&e) {
                let err = SuggestError::DuplicateSuggestion {
                    signal_id: signal.id.clone(),
                    target: candidate.target.key(),
                };
                log::error!("FATAL: {} ({})", err, e);
                return Err(err);
            }
            return Err(e.into());
        }

        log::info!(
            "Created suggestion {} ({} -> {}, {:.3}, {})",
            suggestion.id,
            suggestion.signal_id,
            suggestion.target,
            suggestion.confidence,
            suggestion.priority_bucket.as_str()
        );
        Ok(suggestion)
    }

    pub fn get(&self, id: &str) -> Result<DbSuggestion, SuggestError> {
        self.db
            .get_suggestion(id)?
            .ok_or_else(|| SuggestError::NotFound(format!("suggestion {}", id)))
    }

    pub fn list(
        &self,
        bucket: Option<PriorityBucket>,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DbSuggestion>, SuggestError> {
        Ok(self.db.list_suggestions(bucket, status)?)
    }

    pub fn decision_history(&self, id: &str) -> Result<Vec<DbDecisionRecord>, SuggestError> {
        Ok(self.db.decision_history(id)?)
    }

    /// Record a human (or auto) decision.
    ///
    /// Approval applies the proposed action first. If the target moved or
    /// vanished, the decision is recorded, the suggestion parks in `error`
    /// and the apply error is returned. Patterns only learn from an approval
    /// once it has actually been applied. `error` only accepts a rejection
    /// here; use `retry` to approve from it.
    pub fn decide(
        &self,
        id: &str,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        if request.actor.trim().is_empty() {
            return Err(SuggestError::Validation("decision needs an actor".into()));
        }
        let suggestion = self.get(id)?;
        let to = request.decision.status();
        if !suggestion.status.can_transition_to(to)
            || (suggestion.status == SuggestionStatus::Error && to != SuggestionStatus::Rejected)
        {
            return Err(invalid(&suggestion, to));
        }

        match request.decision {
            Decision::Reject => self.reject(&suggestion, request, now),
            Decision::Approve => self.approve(&suggestion, request, now),
            Decision::Modify => self.modify(&suggestion, request, now),
        }
    }

    fn reject(
        &self,
        s: &DbSuggestion,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        if let Some(ref c) = request.correction {
            c.target.validate()?;
        }
        let now_ts = timestamp(now);
        self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(&request.actor),
                reviewed_at: Some(&now_ts),
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, s.status, SuggestionStatus::Rejected, &update, &now_ts)? {
                return Err(invalid(s, SuggestionStatus::Rejected));
            }
            db.append_decision(
                &s.id,
                DecisionKind::Rejected,
                request.reason.as_deref(),
                request.correction.as_ref(),
                &request.actor,
                &now_ts,
            )?;
            // Dismissing a parked suggestion is triage, not a verdict on the
            // link, so only rejections from pending teach.
            if s.status == SuggestionStatus::Pending {
                self.teach(db, s, &s.target, Outcome::Rejected, &now_ts)?;
                if let Some(ref c) = request.correction {
                    self.teach(db, s, &c.target, Outcome::Approved, &now_ts)?;
                }
            }
            Ok(())
        })?;
        log::info!("Suggestion {} rejected by {}", s.id, request.actor);
        self.get(&s.id)
    }

    fn approve(
        &self,
        s: &DbSuggestion,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let now_ts = timestamp(now);
        let applied = match apply::apply_rebased(self.db, self.targets, &s.proposed_action, s.target_version) {
            Ok(applied) => applied,
            Err(e) if e.parks_suggestion() => {
                self.park(s, request, &e, &now_ts)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let committed = self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(&request.actor),
                reviewed_at: Some(&now_ts),
                rollback_snapshot: Some(&applied.snapshot),
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, s.status, SuggestionStatus::Approved, &update, &now_ts)? {
                return Err(invalid(s, SuggestionStatus::Approved));
            }
            self.record_link(db, s, &applied, &now_ts)?;
            db.append_decision(
                &s.id,
                DecisionKind::Approved,
                request.reason.as_deref(),
                None,
                &request.actor,
                &now_ts,
            )?;
            self.teach(db, s, &s.target, Outcome::Approved, &now_ts)
        });
        if let Err(e) = committed {
            apply::compensate(self.targets, &applied, &s.id);
            return Err(e);
        }

        log::info!(
            "Suggestion {} approved by {}; {} now at v{}",
            s.id,
            request.actor,
            s.target,
            applied.new_version
        );
        self.get(&s.id)
    }

    /// Move a pending suggestion to `error` after a failed apply. Nothing was
    /// changed, so no pattern is taught.
    fn park(
        &self,
        s: &DbSuggestion,
        request: &DecisionRequest,
        cause: &SuggestError,
        now_ts: &str,
    ) -> Result<(), SuggestError> {
        let reason = cause.to_string();
        self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(&request.actor),
                reviewed_at: Some(now_ts),
                error_reason: Some(&reason),
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, s.status, SuggestionStatus::Error, &update, now_ts)? {
                return Err(invalid(s, SuggestionStatus::Error));
            }
            db.append_decision(
                &s.id,
                DecisionKind::Approved,
                Some(&reason),
                None,
                &request.actor,
                now_ts,
            )?;
            Ok::<(), SuggestError>(())
        })?;
        log::warn!("Suggestion {} parked in error: {}", s.id, reason);
        Ok(())
    }

    fn modify(
        &self,
        s: &DbSuggestion,
        request: &DecisionRequest,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let correction = request.correction.as_ref().ok_or_else(|| {
            SuggestError::Validation("modify requires a correction target".into())
        })?;
        correction.target.validate()?;
        if correction.target == s.target {
            return Err(SuggestError::Validation(format!(
                "correction for {} points at the proposed target; approve instead",
                s.id
            )));
        }

        // The corrected target was never scored, so its current version is
        // the baseline. A missing target leaves the suggestion pending.
        let corrected = s.proposed_action.retarget(&correction.target);
        let current = self.targets.get(&correction.target)?;
        let applied = apply::apply(self.targets, &corrected, current.version)?;

        let now_ts = timestamp(now);
        let committed = self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(&request.actor),
                reviewed_at: Some(&now_ts),
                rollback_snapshot: Some(&applied.snapshot),
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, s.status, SuggestionStatus::Modified, &update, &now_ts)? {
                return Err(invalid(s, SuggestionStatus::Modified));
            }
            self.record_link(db, s, &applied, &now_ts)?;
            db.append_decision(
                &s.id,
                DecisionKind::Modified,
                request.reason.as_deref(),
                Some(correction),
                &request.actor,
                &now_ts,
            )?;
            self.teach(db, s, &s.target, Outcome::Rejected, &now_ts)?;
            self.teach(db, s, &correction.target, Outcome::Approved, &now_ts)
        });
        if let Err(e) = committed {
            apply::compensate(self.targets, &applied, &s.id);
            return Err(e);
        }

        log::info!(
            "Suggestion {} modified by {}: {} -> {}",
            s.id,
            request.actor,
            s.target,
            correction.target
        );
        self.get(&s.id)
    }

    /// Re-attempt the apply of a suggestion parked in `error`, against the
    /// target's current version. Only offered from `error`; never automatic.
    /// A successful retry is the approval that teaches the patterns.
    pub fn retry(&self, id: &str, actor: &str, now: DateTime<Utc>) -> Result<DbSuggestion, SuggestError> {
        let s = self.get(id)?;
        if s.status != SuggestionStatus::Error {
            return Err(invalid(&s, SuggestionStatus::Approved));
        }
        let now_ts = timestamp(now);

        let attempt = self
            .targets
            .get(&s.target)
            .and_then(|current| apply::apply(self.targets, &s.proposed_action, current.version));
        let applied = match attempt {
            Ok(applied) => applied,
            Err(e) => {
                if e.parks_suggestion() {
                    self.db.set_error_reason(&s.id, &e.to_string(), &now_ts)?;
                }
                log::warn!("Retry of suggestion {} failed: {}", s.id, e);
                return Err(e);
            }
        };

        let committed = self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(actor),
                reviewed_at: Some(&now_ts),
                rollback_snapshot: Some(&applied.snapshot),
                clear_error: true,
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, SuggestionStatus::Error, SuggestionStatus::Approved, &update, &now_ts)? {
                return Err(invalid(&s, SuggestionStatus::Approved));
            }
            self.record_link(db, &s, &applied, &now_ts)?;
            db.append_decision(
                &s.id,
                DecisionKind::Retried,
                s.error_reason.as_deref(),
                None,
                actor,
                &now_ts,
            )?;
            self.teach(db, &s, &s.target, Outcome::Approved, &now_ts)
        });
        if let Err(e) = committed {
            apply::compensate(self.targets, &applied, &s.id);
            return Err(e);
        }

        log::info!("Suggestion {} applied on retry by {}", s.id, actor);
        self.get(&s.id)
    }

    /// Undo an approved suggestion: restore the target from the snapshot,
    /// drop the confirmed link and take back the approval from its patterns.
    pub fn rollback(
        &self,
        id: &str,
        actor: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DbSuggestion, SuggestError> {
        let s = self.get(id)?;
        if !s.status.can_transition_to(SuggestionStatus::RolledBack) {
            return Err(invalid(&s, SuggestionStatus::RolledBack));
        }
        let snapshot = s.rollback_snapshot.clone().ok_or_else(|| {
            SuggestError::Validation(format!("approved suggestion {} has no rollback snapshot", s.id))
        })?;
        if !snapshot.matches(&s.proposed_action) {
            return Err(SuggestError::Validation(format!(
                "rollback snapshot of {} does not match its proposed action",
                s.id
            )));
        }

        let restored = apply::restore(self.targets, &snapshot)?;

        let now_ts = timestamp(now);
        let committed = self.db.with_transaction(|db| {
            let update = StatusUpdate {
                reviewed_by: Some(actor),
                reviewed_at: Some(&now_ts),
                ..Default::default()
            };
            if !db.transition_suggestion(&s.id, SuggestionStatus::Approved, SuggestionStatus::RolledBack, &update, &now_ts)? {
                return Err(invalid(&s, SuggestionStatus::RolledBack));
            }
            db.remove_signal_link(&s.signal_id, snapshot.target(), &s.id)?;
            db.append_decision(&s.id, DecisionKind::RolledBack, reason, None, actor, &now_ts)?;
            self.teach(db, &s, &s.target, Outcome::RolledBack, &now_ts)
        });
        if let Err(e) = committed {
            log::error!(
                "FATAL: {} restored to v{} but rollback of suggestion {} was not recorded: {}",
                snapshot.target(),
                restored.version,
                s.id,
                e
            );
            return Err(e);
        }

        log::info!("Suggestion {} rolled back by {}", s.id, actor);
        self.get(&s.id)
    }

    /// Expire pending suggestions past their TTL. Returns how many expired.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, SuggestError> {
        expire_stale(self.db, now)
    }

    fn record_link(
        &self,
        db: &SuggestionDb,
        s: &DbSuggestion,
        applied: &Applied,
        now_ts: &str,
    ) -> Result<(), SuggestError> {
        db.insert_signal_link(&DbSignalLink {
            signal_id: s.signal_id.clone(),
            target: applied.snapshot.target().clone(),
            thread_id: s.thread_id.clone(),
            suggestion_id: s.id.clone(),
            linked_at: now_ts.to_string(),
        })?;
        Ok(())
    }

    /// Feed an outcome for `target` into the suggestion's patterns.
    fn teach(
        &self,
        db: &SuggestionDb,
        s: &DbSuggestion,
        target: &TargetRef,
        outcome: Outcome,
        now_ts: &str,
    ) -> Result<(), SuggestError> {
        for key in pattern_keys(&s.pattern_type, &s.pattern_key, &s.sender_key, target) {
            learning::record_outcome(db, &self.config.learning, &key, outcome, now_ts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateLink;
    use crate::db::test_utils::test_db;
    use crate::signal::fixtures::email;
    use crate::targets::MemoryTargetRepository;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn scored(signal: &Signal, target: TargetRef, confidence: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: CandidateLink::new(
                signal,
                target,
                "identifier",
                confidence,
                "Project code HH-2041 in subject".into(),
                "identifier_code",
                "HH-2041",
            ),
            confidence,
            pattern: None,
        }
    }

    fn setup() -> (SuggestionDb, MemoryTargetRepository, EngineConfig) {
        let repo = MemoryTargetRepository::new();
        repo.insert(TargetRef::project("p1"), "Harbour House");
        repo.insert(TargetRef::project("p2"), "Mill Lane");
        (test_db(), repo, EngineConfig::default())
    }

    #[test]
    fn test_bucket_rules() {
        let cfg = LifecycleConfig::default();
        assert_eq!(bucket_for(0.90, false, &cfg), PriorityBucket::NeedsAttention);
        assert_eq!(bucket_for(0.90, true, &cfg), PriorityBucket::Urgent);
        assert_eq!(bucket_for(0.55, true, &cfg), PriorityBucket::NeedsAttention);
        assert_eq!(bucket_for(0.55, false, &cfg), PriorityBucket::Fyi);
    }

    #[test]
    fn test_create_sets_fields_and_refuses_duplicate_pending() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, TargetRef::project("p1"), 0.9), &signal, 1, t0()).unwrap();
        assert_eq!(s.status, SuggestionStatus::Pending);
        assert_eq!(s.expires_at, "2026-03-23T09:00:00Z");
        assert_eq!(s.sender_key, "ana@client.com");
        assert!(s.originating_pattern_id.is_none());

        let err = lc
            .create(&scored(&signal, TargetRef::project("p1"), 0.9), &signal, 1, t0())
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_approve_applies_and_records() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, TargetRef::project("p1"), 0.9), &signal, 1, t0()).unwrap();

        let approved = lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).unwrap();
        assert_eq!(approved.status, SuggestionStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("ana"));
        assert!(approved.rollback_snapshot.is_some());
        assert!(db.is_signal_linked("s1", &TargetRef::project("p1")).unwrap());
        assert!(repo.get(&TargetRef::project("p1")).unwrap().state.linked_signals.contains("s1"));

        let history = lc.decision_history(&s.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].decision, DecisionKind::Approved);

        // Both the identifier and the sender pattern were seeded.
        assert!(db.get_pattern("identifier_code", "HH-2041", &TargetRef::project("p1")).unwrap().is_some());
        assert!(db.get_pattern(HISTORY_PATTERN, "ana@client.com", &TargetRef::project("p1")).unwrap().is_some());

        // Terminal: a second decision is refused.
        let again = lc.decide(&s.id, &DecisionRequest::reject("tom"), t0()).unwrap_err();
        assert!(matches!(again, SuggestError::InvalidTransition { .. }));
    }

    #[test]
    fn test_stale_target_parks_in_error_then_retry() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, TargetRef::project("p1"), 0.9), &signal, 1, t0()).unwrap();
        repo.edit_field(&TargetRef::project("p1"), "stage", "on site");

        let err = lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).unwrap_err();
        assert!(matches!(err, SuggestError::StaleTarget { .. }));
        let parked = lc.get(&s.id).unwrap();
        assert_eq!(parked.status, SuggestionStatus::Error);
        assert!(parked.error_reason.as_deref().unwrap_or("").contains("changed"));
        assert!(!repo.get(&TargetRef::project("p1")).unwrap().state.linked_signals.contains("s1"));
        // Nothing was applied, so nothing was learned.
        assert!(db.get_pattern("identifier_code", "HH-2041", &TargetRef::project("p1")).unwrap().is_none());

        // Approve from error goes through retry only.
        assert!(lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).is_err());

        let retried = lc.retry(&s.id, "ana", t0()).unwrap();
        assert_eq!(retried.status, SuggestionStatus::Approved);
        assert!(retried.error_reason.is_none());
        let kinds: Vec<DecisionKind> = lc.decision_history(&s.id).unwrap().iter().map(|d| d.decision).collect();
        assert_eq!(kinds, vec![DecisionKind::Approved, DecisionKind::Retried]);
        let p = db.get_pattern("identifier_code", "HH-2041", &TargetRef::project("p1")).unwrap().unwrap();
        assert_eq!((p.times_used, p.times_correct), (1, 1));

        // Retry is only offered from error.
        assert!(matches!(lc.retry(&s.id, "ana", t0()), Err(SuggestError::InvalidTransition { .. })));
    }

    #[test]
    fn test_sibling_suggestions_survive_each_others_apply() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let p1 = TargetRef::project("p1");
        let a = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let b = email("s2", "ana@client.com", "HH-2041 tiles", "");
        let first = lc.create(&scored(&a, p1.clone(), 0.9), &a, 1, t0()).unwrap();
        let second = lc.create(&scored(&b, p1.clone(), 0.9), &b, 1, t0()).unwrap();

        lc.decide(&first.id, &DecisionRequest::approve("ana"), t0()).unwrap();
        let approved = lc.decide(&second.id, &DecisionRequest::approve("ana"), t0()).unwrap();
        assert_eq!(approved.status, SuggestionStatus::Approved);
        let state = repo.get(&p1).unwrap();
        assert_eq!(state.version, 3);
        assert!(state.state.linked_signals.contains("s1") && state.state.linked_signals.contains("s2"));

        // Rolling back the later one restores exactly its own prior state.
        lc.rollback(&second.id, "ana", None, t0()).unwrap();
        let after = repo.get(&p1).unwrap().state.linked_signals;
        assert!(after.contains("s1") && !after.contains("s2"));
    }

    #[test]
    fn test_missing_target_fails_closed() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, TargetRef::project("p2"), 0.9), &signal, 1, t0()).unwrap();
        repo.remove(&TargetRef::project("p2"));

        let err = lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).unwrap_err();
        assert!(matches!(err, SuggestError::NotFound(_)));
        assert_eq!(lc.get(&s.id).unwrap().status, SuggestionStatus::Error);
        assert!(matches!(lc.retry(&s.id, "ana", t0()), Err(SuggestError::NotFound(_))));

        let dismissed = lc.decide(&s.id, &DecisionRequest::reject("ana"), t0()).unwrap();
        assert_eq!(dismissed.status, SuggestionStatus::Rejected);
    }

    #[test]
    fn test_modify_applies_corrected_target() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, TargetRef::project("p1"), 0.9), &signal, 1, t0()).unwrap();

        assert!(lc.decide(&s.id, &DecisionRequest { correction: None, ..DecisionRequest::modify("ana", TargetRef::project("p2")) }, t0()).is_err());
        let modified = lc
            .decide(&s.id, &DecisionRequest::modify("ana", TargetRef::project("p2")), t0())
            .unwrap();
        assert_eq!(modified.status, SuggestionStatus::Modified);
        assert!(repo.get(&TargetRef::project("p2")).unwrap().state.linked_signals.contains("s1"));
        assert!(repo.get(&TargetRef::project("p1")).unwrap().state.linked_signals.is_empty());
        assert!(db.is_signal_linked("s1", &TargetRef::project("p2")).unwrap());

        // Modified is terminal.
        assert!(lc.rollback(&s.id, "ana", None, t0()).is_err());
    }

    #[test]
    fn test_rollback_restores_and_is_terminal() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let p1 = TargetRef::project("p1");
        let before = repo.get(&p1).unwrap();
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, p1.clone(), 0.9), &signal, 1, t0()).unwrap();
        lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).unwrap();

        let rolled = lc.rollback(&s.id, "ana", Some("wrong job"), t0()).unwrap();
        assert_eq!(rolled.status, SuggestionStatus::RolledBack);
        assert_eq!(repo.get(&p1).unwrap().state, before.state);
        assert!(!db.is_signal_linked("s1", &p1).unwrap());
        let p = db.get_pattern("identifier_code", "HH-2041", &p1).unwrap().unwrap();
        assert_eq!((p.times_used, p.times_correct), (1, 0));

        assert!(lc.rollback(&s.id, "ana", None, t0()).is_err());
        assert!(lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).is_err());
    }

    #[test]
    fn test_rollback_refused_after_outside_edit() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let p1 = TargetRef::project("p1");
        let signal = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let s = lc.create(&scored(&signal, p1.clone(), 0.9), &signal, 1, t0()).unwrap();
        lc.decide(&s.id, &DecisionRequest::approve("ana"), t0()).unwrap();
        repo.edit_field(&p1, "stage", "closed");

        assert!(matches!(lc.rollback(&s.id, "ana", None, t0()), Err(SuggestError::StaleTarget { .. })));
        assert_eq!(lc.get(&s.id).unwrap().status, SuggestionStatus::Approved);
        assert!(db.is_signal_linked("s1", &p1).unwrap());
    }

    #[test]
    fn test_expire_stale_only_touches_overdue_pending() {
        let (db, repo, config) = setup();
        let lc = Lifecycle::new(&db, &repo, &config);
        let a = email("s1", "ana@client.com", "HH-2041 drawings", "");
        let b = email("s2", "ana@client.com", "HH-2041 tiles", "");
        let old = lc.create(&scored(&a, TargetRef::project("p1"), 0.9), &a, 1, t0()).unwrap();
        let fresh = lc
            .create(&scored(&b, TargetRef::project("p1"), 0.9), &b, 1, t0() + Duration::days(10))
            .unwrap();

        assert_eq!(lc.expire_stale(t0() + Duration::days(22)).unwrap(), 1);
        assert_eq!(lc.get(&old.id).unwrap().status, SuggestionStatus::Expired);
        assert_eq!(lc.get(&fresh.id).unwrap().status, SuggestionStatus::Pending);
        let history = lc.decision_history(&old.id).unwrap();
        assert_eq!(history[0].actor, SYSTEM_ACTOR);
        assert_eq!(lc.expire_stale(t0() + Duration::days(22)).unwrap(), 0);
    }
}
