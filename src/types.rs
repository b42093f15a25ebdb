//! Engine configuration.
//!
//! Every threshold the engine uses lives here so product can tune the
//! learning policy without a code change. All fields default, so a partial
//! `config.json` is valid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Override for the database location (defaults to `~/.studiolink/studiolink.db`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default)]
    pub learning: LearningPolicy,
    #[serde(default)]
    pub candidates: CandidateConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.learning.validate()?;
        if self.batch.chunk_size == 0 {
            return Err("batch.chunkSize must be at least 1".into());
        }
        if self.batch.workers == 0 {
            return Err("batch.workers must be at least 1".into());
        }
        if self.candidates.classifier_max_in_flight == 0 {
            return Err("candidates.classifierMaxInFlight must be at least 1".into());
        }
        Ok(())
    }
}

/// Pattern learning policy. Deltas and bounds were tuned empirically; treat
/// them as product decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPolicy {
    #[serde(default = "default_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_ceiling")]
    pub confidence_ceiling: f64,
    #[serde(default = "default_promote_delta")]
    pub promote_delta: f64,
    #[serde(default = "default_demote_delta")]
    pub demote_delta: f64,
    #[serde(default = "default_seed_confidence")]
    pub seed_confidence: f64,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u32,
    #[serde(default = "default_auto_apply_threshold")]
    pub auto_apply_threshold: f64,
    #[serde(default = "default_target_approval_rate")]
    pub target_approval_rate: f64,
    /// Weight given to learned confidence once a pattern has enough samples.
    #[serde(default = "default_learned_weight")]
    pub learned_weight: f64,
}

fn default_floor() -> f64 {
    0.50
}
fn default_ceiling() -> f64 {
    0.95
}
fn default_promote_delta() -> f64 {
    0.05
}
fn default_demote_delta() -> f64 {
    0.10
}
fn default_seed_confidence() -> f64 {
    0.75
}
fn default_min_sample_size() -> u32 {
    5
}
fn default_auto_apply_threshold() -> f64 {
    0.90
}
fn default_target_approval_rate() -> f64 {
    0.80
}
fn default_learned_weight() -> f64 {
    0.75
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self {
            confidence_floor: default_floor(),
            confidence_ceiling: default_ceiling(),
            promote_delta: default_promote_delta(),
            demote_delta: default_demote_delta(),
            seed_confidence: default_seed_confidence(),
            min_sample_size: default_min_sample_size(),
            auto_apply_threshold: default_auto_apply_threshold(),
            target_approval_rate: default_target_approval_rate(),
            learned_weight: default_learned_weight(),
        }
    }
}

impl LearningPolicy {
    pub fn validate(&self) -> Result<(), String> {
        let unit = |name: &str, v: f64| {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(format!("learning.{} must be in (0, 1), got {}", name, v))
            }
        };
        unit("confidenceFloor", self.confidence_floor)?;
        unit("confidenceCeiling", self.confidence_ceiling)?;
        unit("promoteDelta", self.promote_delta)?;
        unit("demoteDelta", self.demote_delta)?;
        unit("seedConfidence", self.seed_confidence)?;
        unit("autoApplyThreshold", self.auto_apply_threshold)?;
        unit("targetApprovalRate", self.target_approval_rate)?;
        unit("learnedWeight", self.learned_weight)?;
        if !(self.confidence_floor < self.seed_confidence
            && self.seed_confidence < self.confidence_ceiling)
        {
            return Err("learning: require confidenceFloor < seedConfidence < confidenceCeiling".into());
        }
        if self.demote_delta <= self.promote_delta {
            return Err("learning: demoteDelta must exceed promoteDelta".into());
        }
        if self.min_sample_size == 0 {
            return Err("learning.minSampleSize must be at least 1".into());
        }
        Ok(())
    }

    /// Clamp into `[floor, ceiling]`.
    pub fn clamp(&self, confidence: f64) -> f64 {
        confidence.clamp(self.confidence_floor, self.confidence_ceiling)
    }
}

/// Strategy baselines and the classifier deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateConfig {
    #[serde(default = "default_identifier_confidence")]
    pub identifier_confidence: f64,
    #[serde(default = "default_sender_contact_confidence")]
    pub sender_contact_confidence: f64,
    #[serde(default = "default_sender_history_confidence")]
    pub sender_history_confidence: f64,
    #[serde(default = "default_sender_name_confidence")]
    pub sender_name_confidence: f64,
    #[serde(default = "default_thread_confidence")]
    pub thread_confidence: f64,
    #[serde(default = "default_classification_confidence")]
    pub classification_confidence: f64,
    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f64,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    /// Classifier calls allowed to run at once, abandoned ones included.
    #[serde(default = "default_classifier_max_in_flight")]
    pub classifier_max_in_flight: usize,
    #[serde(default = "default_project_code_pattern")]
    pub project_code_pattern: String,
}

fn default_identifier_confidence() -> f64 {
    0.90
}
fn default_sender_contact_confidence() -> f64 {
    0.85
}
fn default_sender_history_confidence() -> f64 {
    0.80
}
fn default_sender_name_confidence() -> f64 {
    0.65
}
fn default_thread_confidence() -> f64 {
    0.75
}
fn default_classification_confidence() -> f64 {
    0.60
}
fn default_agreement_bonus() -> f64 {
    0.05
}
fn default_classifier_timeout_ms() -> u64 {
    5000
}
fn default_classifier_max_in_flight() -> usize {
    crate::candidates::classification::DEFAULT_MAX_IN_FLIGHT
}
fn default_project_code_pattern() -> String {
    r"\b[A-Z]{2,4}-\d{3,5}\b".to_string()
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            identifier_confidence: default_identifier_confidence(),
            sender_contact_confidence: default_sender_contact_confidence(),
            sender_history_confidence: default_sender_history_confidence(),
            sender_name_confidence: default_sender_name_confidence(),
            thread_confidence: default_thread_confidence(),
            classification_confidence: default_classification_confidence(),
            agreement_bonus: default_agreement_bonus(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            classifier_max_in_flight: default_classifier_max_in_flight(),
            project_code_pattern: default_project_code_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupConfig {
    #[serde(default = "default_rejection_cooldown_days")]
    pub rejection_cooldown_days: i64,
}

fn default_rejection_cooldown_days() -> i64 {
    30
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            rejection_cooldown_days: default_rejection_cooldown_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    #[serde(default = "default_suggestion_ttl_days")]
    pub suggestion_ttl_days: i64,
    /// Minimum confidence for a money-bearing suggestion to be `urgent`.
    #[serde(default = "default_urgent_min_confidence")]
    pub urgent_min_confidence: f64,
    /// Minimum confidence for `needs_attention`; below is `fyi`.
    #[serde(default = "default_attention_min_confidence")]
    pub attention_min_confidence: f64,
}

fn default_suggestion_ttl_days() -> i64 {
    21
}
fn default_urgent_min_confidence() -> f64 {
    0.70
}
fn default_attention_min_confidence() -> f64 {
    0.70
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            suggestion_ttl_days: default_suggestion_ttl_days(),
            urgent_min_confidence: default_urgent_min_confidence(),
            attention_min_confidence: default_attention_min_confidence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_chunk_size() -> usize {
    50
}
fn default_workers() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.learning.demote_delta > config.learning.promote_delta);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "learning": { "minSampleSize": 3 } }"#).unwrap();
        assert_eq!(config.learning.min_sample_size, 3);
        assert!((config.learning.confidence_ceiling - 0.95).abs() < 1e-9);
        assert_eq!(config.batch.chunk_size, 50);
        assert_eq!(config.candidates.classifier_max_in_flight, 8);
    }

    #[test]
    fn test_zero_classifier_budget_is_invalid() {
        let mut config = EngineConfig::default();
        config.candidates.classifier_max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_deltas() {
        let mut policy = LearningPolicy::default();
        policy.demote_delta = 0.02;
        assert!(policy.validate().is_err());

        let mut policy = LearningPolicy::default();
        policy.seed_confidence = 0.97;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_clamp_respects_bounds() {
        let policy = LearningPolicy::default();
        assert!((policy.clamp(1.2) - 0.95).abs() < 1e-9);
        assert!((policy.clamp(0.1) - 0.50).abs() < 1e-9);
        assert!((policy.clamp(0.7) - 0.70).abs() < 1e-9);
    }
}
