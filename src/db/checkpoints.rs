//! Resume points for batch candidate generation.

use rusqlite::{params, OptionalExtension};

use super::{parse_timestamp, timestamp, DbError, SuggestionDb};
use crate::signal::SignalCursor;

impl SuggestionDb {
    /// Last processed position for a named batch, if any.
    pub fn load_checkpoint(&self, batch_name: &str) -> Result<Option<SignalCursor>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT last_signal_id, last_received_at FROM batch_checkpoints
                 WHERE batch_name = ?1",
                params![batch_name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((signal_id, received_at)) => {
                let received_at = parse_timestamp("last_received_at", batch_name, &received_at)?;
                Ok(Some(SignalCursor {
                    received_at,
                    signal_id,
                }))
            }
            None => Ok(None),
        }
    }

    /// Advance the checkpoint and add `processed` to the running count.
    pub fn save_checkpoint(
        &self,
        batch_name: &str,
        cursor: &SignalCursor,
        processed: usize,
        now: &str,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO batch_checkpoints
                (batch_name, last_signal_id, last_received_at, processed_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(batch_name) DO UPDATE SET
                last_signal_id = excluded.last_signal_id,
                last_received_at = excluded.last_received_at,
                processed_count = processed_count + excluded.processed_count,
                updated_at = excluded.updated_at",
            params![
                batch_name,
                cursor.signal_id,
                timestamp(cursor.received_at),
                processed as i64,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn checkpoint_processed_count(&self, batch_name: &str) -> Result<i64, DbError> {
        let count = self
            .conn_ref()
            .query_row(
                "SELECT processed_count FROM batch_checkpoints WHERE batch_name = ?1",
                params![batch_name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_checkpoint_roundtrip_and_accumulates() {
        let db = test_db();
        assert!(db.load_checkpoint("inbox").unwrap().is_none());

        let first = SignalCursor {
            received_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 1, 0).unwrap(),
            signal_id: "s1".into(),
        };
        db.save_checkpoint("inbox", &first, 10, "2026-03-02T09:05:00Z").unwrap();
        let second = SignalCursor {
            received_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 2, 0).unwrap(),
            signal_id: "s2".into(),
        };
        db.save_checkpoint("inbox", &second, 5, "2026-03-02T09:06:00Z").unwrap();

        assert_eq!(db.load_checkpoint("inbox").unwrap(), Some(second));
        assert_eq!(db.checkpoint_processed_count("inbox").unwrap(), 15);
        assert_eq!(db.checkpoint_processed_count("other").unwrap(), 0);
    }
}
