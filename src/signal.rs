//! Inbound signals (emails, meeting notes) and the provider seam that
//! supplies them. Signals are read-only here; ingestion lives elsewhere.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SuggestError;

/// An inbound unstructured item considered for linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub sender_email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub subject: String,
    pub body_excerpt: String,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Signal {
    /// Lowercased, trimmed sender address; the key for sender patterns.
    pub fn sender_key(&self) -> String {
        self.sender_email.trim().to_lowercase()
    }

    /// Deterministic content fingerprint over subject + body.
    ///
    /// Whitespace runs collapse and case folds so a re-sent copy of the same
    /// message produces the same fingerprint.
    pub fn content_fingerprint(&self) -> String {
        let normalized = format!("{}\n{}", normalize_text(&self.subject), normalize_text(&self.body_excerpt));
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the text mentions a monetary amount (fee, invoice total,
    /// budget). Used as the business-impact input to bucketing.
    pub fn mentions_money(&self) -> bool {
        money_re().is_match(&self.subject) || money_re().is_match(&self.body_excerpt)
    }
}

fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:[$£€]\s?\d[\d,]*(?:\.\d+)?(?:\s?[km])?)|(?:\b\d[\d,]*(?:\.\d+)?\s?(?:usd|gbp|eur|dollars|pounds|euros)\b)")
            .expect("money regex")
    })
}

/// Resume position within a provider's stream: signals strictly after
/// `(received_at, signal_id)` are unprocessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalCursor {
    pub received_at: DateTime<Utc>,
    pub signal_id: String,
}

impl SignalCursor {
    pub fn of(signal: &Signal) -> Self {
        Self {
            received_at: signal.received_at,
            signal_id: signal.id.clone(),
        }
    }

    /// Whether `signal` sorts after this cursor.
    pub fn precedes(&self, signal: &Signal) -> bool {
        (signal.received_at, signal.id.as_str()) > (self.received_at, self.signal_id.as_str())
    }
}

/// Source of signals, supplied by mail/transcript ingestion.
pub trait SignalProvider: Send + Sync {
    fn get(&self, signal_id: &str) -> Result<Signal, SuggestError>;

    /// Signals after `since`, ordered by `(received_at, id)` ascending.
    fn list_unprocessed<'a>(
        &'a self,
        since: Option<&SignalCursor>,
    ) -> Result<Box<dyn Iterator<Item = Signal> + Send + 'a>, SuggestError>;
}

/// Vec-backed provider for tests and offline replays.
#[derive(Debug, Default)]
pub struct MemorySignalProvider {
    signals: Vec<Signal>,
}

impl MemorySignalProvider {
    pub fn new(mut signals: Vec<Signal>) -> Self {
        signals.sort_by(|a, b| (a.received_at, &a.id).cmp(&(b.received_at, &b.id)));
        Self { signals }
    }
}

impl SignalProvider for MemorySignalProvider {
    fn get(&self, signal_id: &str) -> Result<Signal, SuggestError> {
        self.signals
            .iter()
            .find(|s| s.id == signal_id)
            .cloned()
            .ok_or_else(|| SuggestError::NotFound(format!("signal {}", signal_id)))
    }

    fn list_unprocessed<'a>(
        &'a self,
        since: Option<&SignalCursor>,
    ) -> Result<Box<dyn Iterator<Item = Signal> + Send + 'a>, SuggestError> {
        let since = since.cloned();
        Ok(Box::new(
            self.signals
                .iter()
                .filter(move |s| since.as_ref().is_none_or(|c| c.precedes(s)))
                .cloned(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn email(id: &str, sender: &str, subject: &str, body: &str) -> Signal {
        Signal {
            id: id.to_string(),
            sender_email: sender.to_string(),
            sender_name: None,
            subject: subject.to_string(),
            body_excerpt: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            thread_id: None,
        }
    }

    pub fn email_at(id: &str, sender: &str, subject: &str, minute: u32) -> Signal {
        let mut s = email(id, sender, subject, "");
        s.received_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap();
        s
    }
}
