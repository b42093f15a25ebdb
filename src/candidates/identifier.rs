//! Exact identifier extraction: project codes and proposal numbers quoted in
//! the subject or body resolve directly to a record. Highest baseline.

use std::collections::BTreeSet;

use regex::Regex;

use super::{CandidateLink, CandidateStrategy, StrategyContext};
use crate::error::SuggestError;
use crate::signal::Signal;

pub const STRATEGY: &str = "identifier";
pub const PATTERN_TYPE: &str = "identifier_code";

pub struct IdentifierStrategy {
    code: Regex,
}

impl IdentifierStrategy {
    /// Compile the configured identifier pattern. A bad pattern is a config
    /// error and is reported before any signal is processed.
    pub fn new(pattern: &str) -> Result<Self, SuggestError> {
        let code = Regex::new(pattern).map_err(|e| {
            SuggestError::Validation(format!("invalid project code pattern '{}': {}", pattern, e))
        })?;
        Ok(Self { code })
    }

    /// Distinct codes in first-seen order, tagged with where they appeared.
    fn extract(&self, signal: &Signal) -> Vec<(String, &'static str)> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for (text, location) in [(&signal.subject, "subject"), (&signal.body_excerpt, "body")] {
            for m in self.code.find_iter(text) {
                let code = m.as_str().to_uppercase();
                if seen.insert(code.clone()) {
                    out.push((code, location));
                }
            }
        }
        out
    }
}

impl CandidateStrategy for IdentifierStrategy {
    fn generate(
        &self,
        signal: &Signal,
        ctx: &StrategyContext<'_>,
    ) -> Result<Vec<CandidateLink>, SuggestError> {
        let mut candidates = Vec::new();
        for (code, location) in self.extract(signal) {
            let Some(target) = ctx.targets.find_by_identifier(&code) else {
                log::debug!("Identifier {} in signal {} matches no record", code, signal.id);
                continue;
            };
            candidates.push(CandidateLink::new(
                signal,
                target,
                STRATEGY,
                ctx.config.candidates.identifier_confidence,
                format!("Project code {} in {}", code, location),
                PATTERN_TYPE,
                &code,
            ));
        }
        Ok(candidates)
    }
}
