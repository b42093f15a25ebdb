//! Review surface: serialisable views over the queue for whatever UI sits on
//! top, and the decision entry points it calls.
//!
//! Every entry point returns `ReviewError` so the caller gets a message, a
//! kind and a recovery hint without matching on engine internals.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use crate::db::{DbDecisionRecord, DbSuggestion, PriorityBucket, SuggestionStatus};
use crate::engine::SuggestionEngine;
use crate::entity::TargetRef;
use crate::error::{ReviewError, SuggestError};
use crate::lifecycle::DecisionRequest;

fn review_err(e: SuggestError) -> ReviewError {
    if e.is_suggestion_scoped() {
        log::info!("Review action refused: {}", e);
    } else {
        log::warn!("Review action failed: {}", e);
    }
    ReviewError::from(&e)
}

/// Like `review_err`, but offers retry when the suggestion the action
/// targeted is now parked in `error`.
fn review_err_for(engine: &SuggestionEngine, id: &str, e: SuggestError) -> ReviewError {
    let parked = e.parks_suggestion()
        && matches!(engine.get(id), Ok(s) if s.status == SuggestionStatus::Error);
    let mut err = review_err(e);
    err.can_retry = parked;
    err
}

/// One suggestion as the reviewer sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionView {
    pub id: String,
    pub suggestion_type: String,
    pub priority_bucket: PriorityBucket,
    pub status: SuggestionStatus,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub signal_id: String,
    pub target: TargetRef,
    /// Display name of the target, when it still resolves.
    pub target_name: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub reviewed_by: Option<String>,
    pub error_reason: Option<String>,
    pub can_retry: bool,
    pub can_rollback: bool,
}

impl SuggestionView {
    fn build(engine: &SuggestionEngine, s: DbSuggestion) -> Self {
        let target_name = engine.targets().get(&s.target).ok().map(|e| e.state.name);
        Self {
            suggestion_type: s.suggestion_type.as_str().to_string(),
            can_retry: s.status == SuggestionStatus::Error,
            can_rollback: s.status == SuggestionStatus::Approved && s.rollback_snapshot.is_some(),
            id: s.id,
            priority_bucket: s.priority_bucket,
            status: s.status,
            confidence: s.confidence,
            evidence: s.evidence,
            signal_id: s.signal_id,
            target: s.target,
            target_name,
            created_at: s.created_at,
            expires_at: s.expires_at,
            reviewed_by: s.reviewed_by,
            error_reason: s.error_reason,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionDetail {
    pub suggestion: SuggestionView,
    pub history: Vec<DbDecisionRecord>,
}

/// Counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub urgent: i64,
    pub needs_attention: i64,
    pub fyi: i64,
    /// Suggestions parked in `error`, waiting for triage.
    pub errors: i64,
    pub by_status: BTreeMap<String, i64>,
}

impl QueueSummary {
    pub fn open(&self) -> i64 {
        self.urgent + self.needs_attention + self.fyi + self.errors
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueue {
    pub summary: QueueSummary,
    pub urgent: Vec<SuggestionView>,
    pub needs_attention: Vec<SuggestionView>,
    pub fyi: Vec<SuggestionView>,
    pub errors: Vec<SuggestionView>,
}

pub fn queue_summary(engine: &SuggestionEngine) -> Result<QueueSummary, ReviewError> {
    let rows = engine
        .with_db(|db| db.count_suggestions_by_status_bucket())
        .map_err(|e| review_err(e.into()))?;

    let mut summary = QueueSummary::default();
    for (status, bucket, count) in rows {
        *summary.by_status.entry(status.as_str().to_string()).or_default() += count;
        match status {
            SuggestionStatus::Pending => match bucket {
                PriorityBucket::Urgent => summary.urgent += count,
                PriorityBucket::NeedsAttention => summary.needs_attention += count,
                PriorityBucket::Fyi => summary.fyi += count,
            },
            SuggestionStatus::Error => summary.errors += count,
            _ => {}
        }
    }
    Ok(summary)
}

/// Open suggestions grouped by bucket, most confident first.
pub fn review_queue(engine: &SuggestionEngine) -> Result<ReviewQueue, ReviewError> {
    let summary = queue_summary(engine)?;
    let pending = engine
        .list(None, Some(SuggestionStatus::Pending))
        .map_err(review_err)?;
    let errors = engine
        .list(None, Some(SuggestionStatus::Error))
        .map_err(review_err)?;

    let mut queue = ReviewQueue {
        summary,
        urgent: Vec::new(),
        needs_attention: Vec::new(),
        fyi: Vec::new(),
        errors: errors
            .into_iter()
            .map(|s| SuggestionView::build(engine, s))
            .collect(),
    };
    for s in pending {
        let bucket = s.priority_bucket;
        let view = SuggestionView::build(engine, s);
        match bucket {
            PriorityBucket::Urgent => queue.urgent.push(view),
            PriorityBucket::NeedsAttention => queue.needs_attention.push(view),
            PriorityBucket::Fyi => queue.fyi.push(view),
        }
    }
    Ok(queue)
}

pub fn suggestion_detail(engine: &SuggestionEngine, id: &str) -> Result<SuggestionDetail, ReviewError> {
    let suggestion = engine.get(id).map_err(review_err)?;
    let history = engine.decision_history(id).map_err(review_err)?;
    Ok(SuggestionDetail {
        suggestion: SuggestionView::build(engine, suggestion),
        history,
    })
}

pub fn submit_decision(
    engine: &SuggestionEngine,
    id: &str,
    request: &DecisionRequest,
) -> Result<SuggestionView, ReviewError> {
    let updated = engine
        .decide(id, request, Utc::now())
        .map_err(|e| review_err_for(engine, id, e))?;
    Ok(SuggestionView::build(engine, updated))
}

pub fn retry_suggestion(engine: &SuggestionEngine, id: &str, actor: &str) -> Result<SuggestionView, ReviewError> {
    let updated = engine
        .retry(id, actor, Utc::now())
        .map_err(|e| review_err_for(engine, id, e))?;
    Ok(SuggestionView::build(engine, updated))
}

pub fn rollback_suggestion(
    engine: &SuggestionEngine,
    id: &str,
    actor: &str,
    reason: Option<&str>,
) -> Result<SuggestionView, ReviewError> {
    let updated = engine
        .rollback(id, actor, reason, Utc::now())
        .map_err(|e| review_err_for(engine, id, e))?;
    Ok(SuggestionView::build(engine, updated))
}
