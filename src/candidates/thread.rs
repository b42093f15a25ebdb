//! Thread propagation: when another message in the same thread is already
//! linked to a record, propagate the link at reduced confidence.

use super::{CandidateLink, CandidateStrategy, StrategyContext};
use crate::error::SuggestError;
use crate::signal::Signal;

pub const STRATEGY: &str = "thread";
pub const PATTERN_TYPE: &str = "thread_propagation";

pub struct ThreadStrategy;

impl CandidateStrategy for ThreadStrategy {
    fn generate(
        &self,
        signal: &Signal,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<CandidateLink>, SuggestError> {
        let Some(thread_id) = signal.thread_id.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(Vec::new());
        };

        let linked = ctx
            .db
            .thread_link_targets(thread_id, &signal.id)
            .map_err(|e| SuggestError::Strategy {
                strategy: STRATEGY.to_string(),
                message: e.to_string(),
            })?;

        let mut candidates = Vec::new();
        for (target, count) in linked {
            if !ctx.targets.exists(&target) {
                continue;
            }
            let noun = if count == 1 { "message" } else { "messages" };
            candidates.push(CandidateLink::new(
                signal,
                target.clone(),
                STRATEGY,
                ctx.config.candidates.thread_confidence,
                format!("{} earlier {} in this thread linked to {}", count, noun, target),
                PATTERN_TYPE,
                thread_id,
            ));
        }
        Ok(candidates)
    }
}
