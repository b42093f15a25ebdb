//! Deduplication gate between scoring and creation.
//!
//! Checks run in order and the first hit wins:
//! 1. the signal is already linked to the target (confirmed relationship)
//! 2. a pending suggestion exists for the same (signal, target)
//! 3. a reviewer turned the pair down within the cool-down window, and the
//!    signal's content has not changed since

use chrono::{DateTime, Duration, Utc};

use crate::db::{timestamp, DbError, SuggestionDb};
use crate::entity::TargetRef;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Fresh,
    AlreadyLinked,
    PendingExists,
    RecentlyRejected,
}

impl Verdict {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Verdict::Fresh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fresh => "fresh",
            Verdict::AlreadyLinked => "already_linked",
            Verdict::PendingExists => "pending_exists",
            Verdict::RecentlyRejected => "recently_rejected",
        }
    }
}

pub fn check(
    db: &SuggestionDb,
    signal: &Signal,
    target: &TargetRef,
    cooldown_days: i64,
    now: DateTime<Utc>,
) -> Result<Verdict, DbError> {
    if db.is_signal_linked(&signal.id, target)? {
        return Ok(Verdict::AlreadyLinked);
    }
    if db.pending_exists(&signal.id, target)? {
        return Ok(Verdict::PendingExists);
    }
    let since = timestamp(now - Duration::days(cooldown_days.max(0)));
    let fingerprints = db.recent_rejection_fingerprints(&signal.id, target, &since)?;
    if !fingerprints.is_empty() && fingerprints.contains(&signal.content_fingerprint()) {
        return Ok(Verdict::RecentlyRejected);
    }
    Ok(Verdict::Fresh)
}
