//! Append-only decision log. Rows are never updated or deleted (enforced by
//! triggers); corrections and rollbacks are new rows.

use rusqlite::params;

use super::{Correction, DbDecisionRecord, DbError, DecisionKind, SuggestionDb};
use crate::entity::TargetRef;

impl SuggestionDb {
    /// Append a decision record and return its sequence number.
    pub fn append_decision(
        &self,
        suggestion_id: &str,
        decision: DecisionKind,
        reason: Option<&str>,
        correction: Option<&Correction>,
        actor: &str,
        created_at: &str,
    ) -> Result<i64, DbError> {
        let payload = match correction {
            Some(c) => Some(serde_json::to_string(c).map_err(|e| DbError::Corrupt {
                column: "correction_payload",
                id: suggestion_id.to_string(),
                message: e.to_string(),
            })?),
            None => None,
        };
        self.conn_ref().execute(
            "INSERT INTO decision_records
                (suggestion_id, decision, reason, correction_payload, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![suggestion_id, decision.as_str(), reason, payload, actor, created_at],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Every record for a suggestion, oldest first.
    pub fn decision_history(&self, suggestion_id: &str) -> Result<Vec<DbDecisionRecord>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT seq, suggestion_id, decision, reason, correction_payload, actor, created_at
             FROM decision_records
             WHERE suggestion_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![suggestion_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, suggestion_id, decision, reason, payload, actor, created_at) = row?;
            let decision = DecisionKind::parse(&decision).ok_or_else(|| DbError::Corrupt {
                column: "decision",
                id: seq.to_string(),
                message: format!("unknown decision '{}'", decision),
            })?;
            let correction_payload = match payload {
                Some(raw) => Some(serde_json::from_str::<Correction>(&raw).map_err(|e| {
                    DbError::Corrupt {
                        column: "correction_payload",
                        id: seq.to_string(),
                        message: e.to_string(),
                    }
                })?),
                None => None,
            };
            out.push(DbDecisionRecord {
                seq,
                suggestion_id,
                decision,
                reason,
                correction_payload,
                actor,
                created_at,
            });
        }
        Ok(out)
    }

    /// Content fingerprints of suggestions for `(signal, target)` that a
    /// reviewer turned down (rejected or corrected away) at or after `since`.
    pub fn recent_rejection_fingerprints(
        &self,
        signal_id: &str,
        target: &TargetRef,
        since: &str,
    ) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT DISTINCT s.content_fingerprint
             FROM decision_records d
             JOIN suggestions s ON s.id = d.suggestion_id
             WHERE s.signal_id = ?1
               AND s.target_type = ?2
               AND s.target_id = ?3
               AND d.decision IN ('rejected', 'modified')
               AND d.created_at >= ?4",
        )?;
        let rows = stmt.query_map(
            params![signal_id, target.target_type.as_str(), target.id, since],
            |row| row.get::<_, String>(0),
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}
