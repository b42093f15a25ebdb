//! `suggestions` table access.

use rusqlite::{params, OptionalExtension, Row};

use super::{DbError, DbSuggestion, PriorityBucket, SuggestionDb, SuggestionStatus};
use crate::action::{ProposedAction, RollbackSnapshot, SuggestionType};
use crate::entity::{TargetRef, TargetType};

const SUGGESTION_COLUMNS: &str = "id, suggestion_type, priority_bucket, confidence, evidence,
    proposed_action, status, created_at, reviewed_by, reviewed_at, rollback_snapshot,
    originating_pattern_id, expires_at, signal_id, thread_id, target_type, target_id,
    strategy, pattern_type, pattern_key, sender_key, target_version,
    content_fingerprint, error_reason, updated_at";

/// Column values exactly as stored; decoded into `DbSuggestion` outside the
/// rusqlite row closure so JSON errors surface as `DbError::Corrupt`.
struct RawSuggestion {
    id: String,
    suggestion_type: String,
    priority_bucket: String,
    confidence: f64,
    evidence: String,
    proposed_action: String,
    status: String,
    created_at: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    rollback_snapshot: Option<String>,
    originating_pattern_id: Option<String>,
    expires_at: String,
    signal_id: String,
    thread_id: Option<String>,
    target_type: String,
    target_id: String,
    strategy: String,
    pattern_type: String,
    pattern_key: String,
    sender_key: String,
    target_version: i64,
    content_fingerprint: String,
    error_reason: Option<String>,
    updated_at: String,
}

impl RawSuggestion {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            suggestion_type: row.get(1)?,
            priority_bucket: row.get(2)?,
            confidence: row.get(3)?,
            evidence: row.get(4)?,
            proposed_action: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            reviewed_by: row.get(8)?,
            reviewed_at: row.get(9)?,
            rollback_snapshot: row.get(10)?,
            originating_pattern_id: row.get(11)?,
            expires_at: row.get(12)?,
            signal_id: row.get(13)?,
            thread_id: row.get(14)?,
            target_type: row.get(15)?,
            target_id: row.get(16)?,
            strategy: row.get(17)?,
            pattern_type: row.get(18)?,
            pattern_key: row.get(19)?,
            sender_key: row.get(20)?,
            target_version: row.get(21)?,
            content_fingerprint: row.get(22)?,
            error_reason: row.get(23)?,
            updated_at: row.get(24)?,
        })
    }

    fn decode(self) -> Result<DbSuggestion, DbError> {
        let id = self.id;
        let corrupt = |column: &'static str, message: String| DbError::Corrupt {
            column,
            id: id.clone(),
            message,
        };

        let suggestion_type = SuggestionType::parse(&self.suggestion_type)
            .map_err(|e| corrupt("suggestion_type", e.to_string()))?;
        let priority_bucket = PriorityBucket::parse(&self.priority_bucket)
            .ok_or_else(|| corrupt("priority_bucket", self.priority_bucket.clone()))?;
        let status = SuggestionStatus::parse(&self.status)
            .ok_or_else(|| corrupt("status", self.status.clone()))?;
        let evidence: Vec<String> = serde_json::from_str(&self.evidence)
            .map_err(|e| corrupt("evidence", e.to_string()))?;
        let proposed_action: ProposedAction = serde_json::from_str(&self.proposed_action)
            .map_err(|e| corrupt("proposed_action", e.to_string()))?;
        let rollback_snapshot: Option<RollbackSnapshot> = match self.rollback_snapshot {
            Some(ref raw) => Some(
                serde_json::from_str(raw).map_err(|e| corrupt("rollback_snapshot", e.to_string()))?,
            ),
            None => None,
        };
        let target_type = TargetType::parse(&self.target_type)
            .map_err(|e| corrupt("target_type", e.to_string()))?;

        Ok(DbSuggestion {
            suggestion_type,
            priority_bucket,
            confidence: self.confidence,
            evidence,
            proposed_action,
            status,
            created_at: self.created_at,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at,
            rollback_snapshot,
            originating_pattern_id: self.originating_pattern_id,
            expires_at: self.expires_at,
            signal_id: self.signal_id,
            thread_id: self.thread_id,
            target: TargetRef::new(target_type, self.target_id),
            strategy: self.strategy,
            pattern_type: self.pattern_type,
            pattern_key: self.pattern_key,
            sender_key: self.sender_key,
            target_version: self.target_version,
            content_fingerprint: self.content_fingerprint,
            error_reason: self.error_reason,
            updated_at: self.updated_at,
            id,
        })
    }
}

/// Field changes applied together with a status transition.
#[derive(Debug, Default)]
pub struct StatusUpdate<'a> {
    pub reviewed_by: Option<&'a str>,
    pub reviewed_at: Option<&'a str>,
    pub rollback_snapshot: Option<&'a RollbackSnapshot>,
    pub error_reason: Option<&'a str>,
    pub clear_error: bool,
}

/// Whether a storage error is a UNIQUE/CHECK constraint violation.
pub fn is_constraint_violation(err: &DbError) -> bool {
    matches!(
        err,
        DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SuggestionDb {
    /// Insert a new suggestion row. A second pending row for the same
    /// (signal, target) violates `idx_suggestions_one_pending`.
    pub fn insert_suggestion(&self, s: &DbSuggestion) -> Result<(), DbError> {
        let evidence = serde_json::to_string(&s.evidence).map_err(|e| DbError::Corrupt {
            column: "evidence",
            id: s.id.clone(),
            message: e.to_string(),
        })?;
        let action = serde_json::to_string(&s.proposed_action).map_err(|e| DbError::Corrupt {
            column: "proposed_action",
            id: s.id.clone(),
            message: e.to_string(),
        })?;
        let snapshot = match s.rollback_snapshot {
            Some(ref snap) => Some(serde_json::to_string(snap).map_err(|e| DbError::Corrupt {
                column: "rollback_snapshot",
                id: s.id.clone(),
                message: e.to_string(),
            })?),
            None => None,
        };
        self.conn_ref().execute(
            &format!(
                "INSERT INTO suggestions ({SUGGESTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"
            ),
            params![
                s.id,
                s.suggestion_type.as_str(),
                s.priority_bucket.as_str(),
                s.confidence,
                evidence,
                action,
                s.status.as_str(),
                s.created_at,
                s.reviewed_by,
                s.reviewed_at,
                snapshot,
                s.originating_pattern_id,
                s.expires_at,
                s.signal_id,
                s.thread_id,
                s.target.target_type.as_str(),
                s.target.id,
                s.strategy,
                s.pattern_type,
                s.pattern_key,
                s.sender_key,
                s.target_version,
                s.content_fingerprint,
                s.error_reason,
                s.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_suggestion(&self, id: &str) -> Result<Option<DbSuggestion>, DbError> {
        let raw = self
            .conn_ref()
            .query_row(
                &format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE id = ?1"),
                params![id],
                RawSuggestion::from_row,
            )
            .optional()?;
        raw.map(RawSuggestion::decode).transpose()
    }

    /// Review queue listing, highest confidence first within a bucket.
    pub fn list_suggestions(
        &self,
        bucket: Option<PriorityBucket>,
        status: Option<SuggestionStatus>,
    ) -> Result<Vec<DbSuggestion>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM suggestions
             WHERE (?1 IS NULL OR priority_bucket = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY CASE priority_bucket
                        WHEN 'urgent' THEN 0
                        WHEN 'needs_attention' THEN 1
                        ELSE 2
                      END,
                      confidence DESC, created_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(
            params![bucket.map(|b| b.as_str()), status.map(|s| s.as_str())],
            RawSuggestion::from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }

    /// Whether a pending suggestion exists for (signal, target).
    pub fn pending_exists(&self, signal_id: &str, target: &TargetRef) -> Result<bool, DbError> {
        let exists = self
            .conn_ref()
            .prepare(
                "SELECT 1 FROM suggestions
                 WHERE signal_id = ?1 AND target_type = ?2 AND target_id = ?3
                   AND status = 'pending'
                 LIMIT 1",
            )?
            .exists(params![signal_id, target.target_type.as_str(), target.id])?;
        Ok(exists)
    }

    /// Move a suggestion from `from` to `to`, guarded on the current status so
    /// a concurrent decision cannot be overwritten. Returns false when the row
    /// was not in `from`.
    pub fn transition_suggestion(
        &self,
        id: &str,
        from: SuggestionStatus,
        to: SuggestionStatus,
        update: &StatusUpdate<'_>,
        now: &str,
    ) -> Result<bool, DbError> {
        let snapshot = match update.rollback_snapshot {
            Some(s) => Some(serde_json::to_string(s).map_err(|e| DbError::Corrupt {
                column: "rollback_snapshot",
                id: id.to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };
        let changed = self.conn_ref().execute(
            "UPDATE suggestions SET
                status = ?3,
                reviewed_by = COALESCE(?4, reviewed_by),
                reviewed_at = COALESCE(?5, reviewed_at),
                rollback_snapshot = COALESCE(?6, rollback_snapshot),
                error_reason = CASE WHEN ?8 THEN NULL ELSE COALESCE(?7, error_reason) END,
                updated_at = ?9
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                from.as_str(),
                to.as_str(),
                update.reviewed_by,
                update.reviewed_at,
                snapshot,
                update.error_reason,
                update.clear_error,
                now,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Refresh the triage note on a suggestion parked in `error`.
    pub fn set_error_reason(&self, id: &str, reason: &str, now: &str) -> Result<bool, DbError> {
        let changed = self.conn_ref().execute(
            "UPDATE suggestions SET error_reason = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'error'",
            params![id, reason, now],
        )?;
        Ok(changed == 1)
    }

    /// Pending suggestions whose `expires_at` is at or before `now`.
    pub fn list_expired_pending(&self, now: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id FROM suggestions
             WHERE status = 'pending' AND expires_at <= ?1
             ORDER BY expires_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Pending suggestions backed by an active pattern. Eligibility depends on
    /// the policy in force, so the caller decides it; the stored flag may
    /// have been computed under a different one.
    pub fn list_auto_apply_candidates(&self) -> Result<Vec<DbSuggestion>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {cols} FROM suggestions s
             JOIN patterns p
               ON p.pattern_type = s.pattern_type
              AND p.pattern_key = s.pattern_key
              AND p.target_type = s.target_type
              AND p.target_id = s.target_id
             WHERE s.status = 'pending'
               AND p.active = 1
             ORDER BY s.created_at ASC, s.id ASC",
            cols = SUGGESTION_COLUMNS
                .split(',')
                .map(|c| format!("s.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map([], RawSuggestion::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }

    /// `(prior_version, applied_version)` of every mutation of `target` that
    /// an applied suggestion still stands behind. Rolled-back applies are
    /// excluded: their restore is a version bump of its own.
    pub fn applied_version_steps(&self, target: &TargetRef) -> Result<Vec<(i64, i64)>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, rollback_snapshot FROM suggestions
             WHERE status IN ('approved', 'modified') AND rollback_snapshot IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut steps = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            let snapshot: RollbackSnapshot = serde_json::from_str(&raw).map_err(|e| DbError::Corrupt {
                column: "rollback_snapshot",
                id,
                message: e.to_string(),
            })?;
            if snapshot.target() == target {
                steps.push((snapshot.prior_version(), snapshot.applied_version()));
            }
        }
        Ok(steps)
    }

    /// Count of suggestions per (status, bucket), for queue dashboards.
    pub fn count_suggestions_by_status_bucket(
        &self,
    ) -> Result<Vec<(SuggestionStatus, PriorityBucket, i64)>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT status, priority_bucket, COUNT(*) FROM suggestions
             GROUP BY status, priority_bucket
             ORDER BY status, priority_bucket",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (status, bucket, count) = row?;
            match (SuggestionStatus::parse(&status), PriorityBucket::parse(&bucket)) {
                (Some(s), Some(b)) => out.push((s, b, count)),
                _ => log::warn!("Skipping unknown status/bucket pair {}/{}", status, bucket),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    pub(crate) fn sample(id: &str, signal_id: &str, target: TargetRef) -> DbSuggestion {
        let action = ProposedAction::for_target(signal_id, &target);
        DbSuggestion {
            id: id.to_string(),
            suggestion_type: action.suggestion_type(),
            priority_bucket: PriorityBucket::NeedsAttention,
            confidence: 0.9,
            evidence: vec!["Project code HH-2041 in subject".into()],
            proposed_action: action,
            status: SuggestionStatus::Pending,
            created_at: "2026-03-02T09:00:00Z".into(),
            reviewed_by: None,
            reviewed_at: None,
            rollback_snapshot: None,
            originating_pattern_id: None,
            expires_at: "2026-03-23T09:00:00Z".into(),
            signal_id: signal_id.to_string(),
            thread_id: None,
            target,
            strategy: "identifier".into(),
            pattern_type: "identifier_code".into(),
            pattern_key: "HH-2041".into(),
            sender_key: "ana@client.com".into(),
            target_version: 1,
            content_fingerprint: "fp".into(),
            error_reason: None,
            updated_at: "2026-03-02T09:00:00Z".into(),
        }
    }

    #[test]
    fn test_insert_and_get_roundtrip_typed_columns() {
        let db = test_db();
        let s = sample("sg-1", "s1", TargetRef::project("p1"));
        db.insert_suggestion(&s).expect("insert");
        let got = db.get_suggestion("sg-1").unwrap().expect("row");
        assert_eq!(got.proposed_action, s.proposed_action);
        assert_eq!(got.target, TargetRef::project("p1"));
        assert_eq!(got.evidence, s.evidence);
        assert_eq!(got.status, SuggestionStatus::Pending);
        assert!(db.get_suggestion("missing").unwrap().is_none());
    }

    #[test]
    fn test_second_pending_row_violates_unique_index() {
        let db = test_db();
        db.insert_suggestion(&sample("sg-1", "s1", TargetRef::project("p1")))
            .unwrap();
        let err = db
            .insert_suggestion(&sample("sg-2", "s1", TargetRef::project("p1")))
            .unwrap_err();
        assert!(is_constraint_violation(&err), "{}", err);
        // Different target is fine.
        db.insert_suggestion(&sample("sg-3", "s1", TargetRef::project("p2")))
            .unwrap();
        assert!(db.pending_exists("s1", &TargetRef::project("p1")).unwrap());
        assert!(!db.pending_exists("s1", &TargetRef::project("p9")).unwrap());
    }

    #[test]
    fn test_transition_is_guarded_on_current_status() {
        let db = test_db();
        db.insert_suggestion(&sample("sg-1", "s1", TargetRef::project("p1")))
            .unwrap();
        let update = StatusUpdate {
            reviewed_by: Some("ana"),
            reviewed_at: Some("2026-03-03T10:00:00Z"),
            ..Default::default()
        };
        assert!(db
            .transition_suggestion("sg-1", SuggestionStatus::Pending, SuggestionStatus::Rejected, &update, "2026-03-03T10:00:00Z")
            .unwrap());
        // Second writer loses: row is no longer pending.
        assert!(!db
            .transition_suggestion("sg-1", SuggestionStatus::Pending, SuggestionStatus::Approved, &update, "2026-03-03T10:00:01Z")
            .unwrap());
        let got = db.get_suggestion("sg-1").unwrap().unwrap();
        assert_eq!(got.status, SuggestionStatus::Rejected);
        assert_eq!(got.reviewed_by.as_deref(), Some("ana"));

        // Once resolved, a new pending row for the same pair is allowed.
        db.insert_suggestion(&sample("sg-2", "s1", TargetRef::project("p1")))
            .unwrap();
    }

    #[test]
    fn test_list_orders_by_bucket_then_confidence() {
        let db = test_db();
        let mut a = sample("sg-a", "s1", TargetRef::project("p1"));
        a.priority_bucket = PriorityBucket::Fyi;
        let mut b = sample("sg-b", "s2", TargetRef::project("p1"));
        b.priority_bucket = PriorityBucket::Urgent;
        b.confidence = 0.72;
        let mut c = sample("sg-c", "s3", TargetRef::project("p1"));
        c.priority_bucket = PriorityBucket::Urgent;
        c.confidence = 0.93;
        for s in [&a, &b, &c] {
            db.insert_suggestion(s).unwrap();
        }
        let ids: Vec<String> = db
            .list_suggestions(None, Some(SuggestionStatus::Pending))
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["sg-c", "sg-b", "sg-a"]);
        let fyi = db.list_suggestions(Some(PriorityBucket::Fyi), None).unwrap();
        assert_eq!(fyi.len(), 1);
    }

    #[test]
    fn test_list_expired_pending() {
        let db = test_db();
        db.insert_suggestion(&sample("sg-1", "s1", TargetRef::project("p1")))
            .unwrap();
        assert!(db.list_expired_pending("2026-03-10T00:00:00Z").unwrap().is_empty());
        assert_eq!(
            db.list_expired_pending("2026-03-23T09:00:00Z").unwrap(),
            vec!["sg-1".to_string()]
        );
    }

    #[test]
    fn test_corrupt_action_is_reported() {
        let db = test_db();
        db.insert_suggestion(&sample("sg-1", "s1", TargetRef::project("p1")))
            .unwrap();
        db.conn_ref()
            .execute("UPDATE suggestions SET proposed_action = '{\"type\":\"teleport\"}'", [])
            .unwrap();
        let err = db.get_suggestion("sg-1").unwrap_err();
        assert!(matches!(err, DbError::Corrupt { column: "proposed_action", .. }));
    }
}
