//! Confirmed signal -> target relationships.

use rusqlite::params;

use super::{DbError, DbSignalLink, SuggestionDb};
use crate::entity::{TargetRef, TargetType};

impl SuggestionDb {
    /// Record a confirmed link. Re-linking the same pair keeps the first row.
    pub fn insert_signal_link(&self, link: &DbSignalLink) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT OR IGNORE INTO signal_links
                (signal_id, target_type, target_id, thread_id, suggestion_id, linked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.signal_id,
                link.target.target_type.as_str(),
                link.target.id,
                link.thread_id,
                link.suggestion_id,
                link.linked_at,
            ],
        )?;
        Ok(())
    }

    /// Remove the link a rolled-back suggestion created.
    pub fn remove_signal_link(
        &self,
        signal_id: &str,
        target: &TargetRef,
        suggestion_id: &str,
    ) -> Result<bool, DbError> {
        let removed = self.conn_ref().execute(
            "DELETE FROM signal_links
             WHERE signal_id = ?1 AND target_type = ?2 AND target_id = ?3
               AND suggestion_id = ?4",
            params![signal_id, target.target_type.as_str(), target.id, suggestion_id],
        )?;
        Ok(removed > 0)
    }

    pub fn is_signal_linked(&self, signal_id: &str, target: &TargetRef) -> Result<bool, DbError> {
        let exists = self
            .conn_ref()
            .prepare(
                "SELECT 1 FROM signal_links
                 WHERE signal_id = ?1 AND target_type = ?2 AND target_id = ?3
                 LIMIT 1",
            )?
            .exists(params![signal_id, target.target_type.as_str(), target.id])?;
        Ok(exists)
    }

    /// Targets already confirmed for other messages in `thread_id`, with the
    /// number of linked messages per target.
    pub fn thread_link_targets(
        &self,
        thread_id: &str,
        exclude_signal_id: &str,
    ) -> Result<Vec<(TargetRef, i64)>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT target_type, target_id, COUNT(*) FROM signal_links
             WHERE thread_id = ?1 AND signal_id != ?2
             GROUP BY target_type, target_id
             ORDER BY COUNT(*) DESC, target_type ASC, target_id ASC",
        )?;
        let rows = stmt.query_map(params![thread_id, exclude_signal_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (target_type, target_id, count) = row?;
            let target_type = TargetType::parse(&target_type).map_err(|e| DbError::Corrupt {
                column: "target_type",
                id: target_id.clone(),
                message: e.to_string(),
            })?;
            out.push((TargetRef::new(target_type, target_id), count));
        }
        Ok(out)
    }
}
