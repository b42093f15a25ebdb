//! Content classification via an external (slow, unreliable) classifier.
//!
//! The call runs on a helper thread and is abandoned after
//! `classifier_timeout_ms`; a late answer is dropped with its channel. An
//! abandoned call keeps its thread until the classifier returns, so at most
//! `max_in_flight` calls run at once. Past that, the strategy reports a
//! timeout without calling out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CandidateLink, CandidateStrategy, StrategyContext};
use crate::entity::TargetRef;
use crate::error::SuggestError;
use crate::signal::Signal;

pub const STRATEGY: &str = "classification";
pub const PATTERN_TYPE: &str = "content_class";

/// Labels below this score are noise.
const MIN_LABEL_SCORE: f64 = 0.5;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// One label the classifier assigned, already mapped to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub label: String,
    pub target: TargetRef,
    pub score: f64,
}

/// External content classifier (an AI model behind some transport).
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, signal: &Signal) -> Result<Vec<Classification>, String>;
}

pub struct ClassificationStrategy {
    classifier: Arc<dyn ContentClassifier>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

/// One slot of the in-flight budget; released when the helper thread ends.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ClassificationStrategy {
    pub fn new(classifier: Arc<dyn ContentClassifier>) -> Self {
        Self {
            classifier,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    fn acquire(&self) -> Option<InFlight> {
        let mut current = self.in_flight.load(Ordering::SeqCst);
        loop {
            if current >= self.max_in_flight {
                return None;
            }
            match self.in_flight.compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(InFlight(Arc::clone(&self.in_flight))),
                Err(actual) => current = actual,
            }
        }
    }

    fn classify_with_deadline(
        &self,
        signal: &Signal,
        timeout_ms: u64,
    ) -> Result<Vec<Classification>, SuggestError> {
        let Some(slot) = self.acquire() else {
            log::warn!(
                "Classifier has {} calls outstanding; skipping signal {}",
                self.max_in_flight,
                signal.id
            );
            return Err(SuggestError::ExternalStrategyTimeout {
                strategy: STRATEGY.to_string(),
                timeout_ms,
            });
        };

        let (tx, rx) = mpsc::channel();
        let classifier = Arc::clone(&self.classifier);
        let owned = signal.clone();

        std::thread::spawn(move || {
            let _slot = slot;
            let result = classifier.classify(&owned);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(Ok(labels)) => Ok(labels),
            Ok(Err(message)) => Err(SuggestError::Strategy {
                strategy: STRATEGY.to_string(),
                message,
            }),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SuggestError::ExternalStrategyTimeout {
                strategy: STRATEGY.to_string(),
                timeout_ms,
            }),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SuggestError::Strategy {
                strategy: STRATEGY.to_string(),
                message: "classifier thread exited without a result".into(),
            }),
        }
    }
}

impl CandidateStrategy for ClassificationStrategy {
    fn generate(
        &self,
        signal: &Signal,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<CandidateLink>, SuggestError> {
        let labels = self.classify_with_deadline(signal, ctx.config.candidates.classifier_timeout_ms)?;

        let mut candidates = Vec::new();
        for c in labels {
            if !c.score.is_finite() || c.score < MIN_LABEL_SCORE {
                continue;
            }
            candidates.push(CandidateLink::new(
                signal,
                c.target,
                STRATEGY,
                ctx.config.candidates.classification_confidence,
                format!("Classified as \"{}\" (score {:.2})", c.label, c.score),
                PATTERN_TYPE,
                &c.label.to_lowercase(),
            ));
        }
        Ok(candidates)
    }
}
