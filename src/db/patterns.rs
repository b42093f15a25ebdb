//! `patterns` table access. Confidence arithmetic lives in `learning`; this
//! file only reads and writes rows.

use rusqlite::{params, OptionalExtension, Row};

use super::{DbError, DbPattern, SuggestionDb};
use crate::entity::{TargetRef, TargetType};

const PATTERN_COLUMNS: &str = "id, pattern_type, pattern_key, target_type, target_id,
    confidence, times_used, times_correct, times_rejected, active,
    auto_apply_eligible, created_at, updated_at";

/// Optional filters for the pattern inspection listing.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    pub pattern_type: Option<String>,
    pub target: Option<TargetRef>,
    pub active: Option<bool>,
}

fn map_pattern_row(row: &Row<'_>) -> rusqlite::Result<(DbPattern, String)> {
    let target_type: String = row.get(3)?;
    Ok((
        DbPattern {
            id: row.get(0)?,
            pattern_type: row.get(1)?,
            pattern_key: row.get(2)?,
            // Placeholder type; fixed up by `decode_target` below.
            target: TargetRef::new(TargetType::Project, row.get::<_, String>(4)?),
            confidence: row.get(5)?,
            times_used: row.get(6)?,
            times_correct: row.get(7)?,
            times_rejected: row.get(8)?,
            active: row.get::<_, i32>(9)? != 0,
            auto_apply_eligible: row.get::<_, i32>(10)? != 0,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        },
        target_type,
    ))
}

fn decode_target((mut pattern, target_type): (DbPattern, String)) -> Result<DbPattern, DbError> {
    pattern.target.target_type = TargetType::parse(&target_type).map_err(|e| DbError::Corrupt {
        column: "target_type",
        id: pattern.id.clone(),
        message: e.to_string(),
    })?;
    Ok(pattern)
}

impl SuggestionDb {
    /// Look up the pattern for `(type, key, target)`, active or not.
    pub fn get_pattern(
        &self,
        pattern_type: &str,
        pattern_key: &str,
        target: &TargetRef,
    ) -> Result<Option<DbPattern>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!(
                    "SELECT {PATTERN_COLUMNS} FROM patterns
                     WHERE pattern_type = ?1 AND pattern_key = ?2
                       AND target_type = ?3 AND target_id = ?4"
                ),
                params![pattern_type, pattern_key, target.target_type.as_str(), target.id],
                map_pattern_row,
            )
            .optional()?;
        row.map(decode_target).transpose()
    }

    pub fn get_pattern_by_id(&self, id: &str) -> Result<Option<DbPattern>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!("SELECT {PATTERN_COLUMNS} FROM patterns WHERE id = ?1"),
                params![id],
                map_pattern_row,
            )
            .optional()?;
        row.map(decode_target).transpose()
    }

    /// Active patterns for a key across all targets, strongest first.
    pub fn active_patterns_for_key(
        &self,
        pattern_type: &str,
        pattern_key: &str,
    ) -> Result<Vec<DbPattern>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             WHERE pattern_type = ?1 AND pattern_key = ?2 AND active = 1
             ORDER BY confidence DESC, times_correct DESC, id ASC"
        ))?;
        let rows = stmt.query_map(params![pattern_type, pattern_key], map_pattern_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_target(row?)?);
        }
        Ok(out)
    }

    pub fn insert_pattern(&self, p: &DbPattern) -> Result<(), DbError> {
        self.conn_ref().execute(
            &format!(
                "INSERT INTO patterns ({PATTERN_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                p.id,
                p.pattern_type,
                p.pattern_key,
                p.target.target_type.as_str(),
                p.target.id,
                p.confidence,
                p.times_used,
                p.times_correct,
                p.times_rejected,
                p.active as i32,
                p.auto_apply_eligible as i32,
                p.created_at,
                p.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Persist confidence, counters and eligibility for an existing pattern.
    pub fn update_pattern_stats(&self, p: &DbPattern) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE patterns SET
                confidence = ?2,
                times_used = ?3,
                times_correct = ?4,
                times_rejected = ?5,
                auto_apply_eligible = ?6,
                updated_at = ?7
             WHERE id = ?1",
            params![
                p.id,
                p.confidence,
                p.times_used,
                p.times_correct,
                p.times_rejected,
                p.auto_apply_eligible as i32,
                p.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Flip the `active` flag. Returns false when no such pattern exists.
    pub fn set_pattern_active(&self, id: &str, active: bool, now: &str) -> Result<bool, DbError> {
        let changed = self.conn_ref().execute(
            "UPDATE patterns SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active as i32, now],
        )?;
        Ok(changed == 1)
    }

    pub fn list_patterns(&self, filter: &PatternFilter) -> Result<Vec<DbPattern>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             WHERE (?1 IS NULL OR pattern_type = ?1)
               AND (?2 IS NULL OR (target_type = ?2 AND target_id = ?3))
               AND (?4 IS NULL OR active = ?4)
             ORDER BY pattern_type ASC, confidence DESC, id ASC"
        ))?;
        let rows = stmt.query_map(
            params![
                filter.pattern_type,
                filter.target.as_ref().map(|t| t.target_type.as_str()),
                filter.target.as_ref().map(|t| t.id.as_str()),
                filter.active.map(|a| a as i32),
            ],
            map_pattern_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_target(row?)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn pattern(id: &str, key: &str, target: TargetRef, confidence: f64) -> DbPattern {
        DbPattern {
            id: id.to_string(),
            pattern_type: "sender_history".into(),
            pattern_key: key.to_string(),
            target,
            confidence,
            times_used: 1,
            times_correct: 1,
            times_rejected: 0,
            active: true,
            auto_apply_eligible: false,
            created_at: "2026-03-02T09:00:00Z".into(),
            updated_at: "2026-03-02T09:00:00Z".into(),
        }
    }

    #[test]
    fn test_insert_get_and_update() {
        let db = test_db();
        let mut p = pattern("pat-1", "ana@client.com", TargetRef::proposal("pr-1"), 0.75);
        db.insert_pattern(&p).unwrap();
        let got = db
            .get_pattern("sender_history", "ana@client.com", &TargetRef::proposal("pr-1"))
            .unwrap()
            .expect("pattern");
        assert_eq!(got, p);
        assert!(db
            .get_pattern("sender_history", "ana@client.com", &TargetRef::project("pr-1"))
            .unwrap()
            .is_none());

        p.confidence = 0.8;
        p.times_used = 2;
        p.times_correct = 2;
        db.update_pattern_stats(&p).unwrap();
        assert_eq!(db.get_pattern_by_id("pat-1").unwrap().unwrap().times_used, 2);
    }

    #[test]
    fn test_active_patterns_for_key_skips_inactive() {
        let db = test_db();
        db.insert_pattern(&pattern("pat-1", "ana@client.com", TargetRef::project("p1"), 0.7))
            .unwrap();
        db.insert_pattern(&pattern("pat-2", "ana@client.com", TargetRef::project("p2"), 0.9))
            .unwrap();
        let ids: Vec<String> = db
            .active_patterns_for_key("sender_history", "ana@client.com")
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["pat-2", "pat-1"]);

        assert!(db.set_pattern_active("pat-2", false, "2026-03-03T00:00:00Z").unwrap());
        assert!(!db.set_pattern_active("missing", false, "2026-03-03T00:00:00Z").unwrap());
        let ids: Vec<String> = db
            .active_patterns_for_key("sender_history", "ana@client.com")
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["pat-1"]);
    }

    #[test]
    fn test_list_patterns_filters() {
        let db = test_db();
        db.insert_pattern(&pattern("pat-1", "ana@client.com", TargetRef::project("p1"), 0.7))
            .unwrap();
        let mut other = pattern("pat-2", "HH-2041", TargetRef::project("p1"), 0.8);
        other.pattern_type = "identifier_code".into();
        other.active = false;
        db.insert_pattern(&other).unwrap();

        assert_eq!(db.list_patterns(&PatternFilter::default()).unwrap().len(), 2);
        let active = db
            .list_patterns(&PatternFilter {
                active: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(active.len(), 1);
        let by_target = db
            .list_patterns(&PatternFilter {
                target: Some(TargetRef::project("p1")),
                pattern_type: Some("identifier_code".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_target[0].id, "pat-2");
    }
}
