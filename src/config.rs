//! Tunable constants.
//!
//! Every weight, window and threshold used by the engines lives here. The
//! defaults reproduce the production formulas; deployments may load overrides
//! from JSON and a handful of operational knobs from the environment.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abuse::RiskLevel;
use crate::error::ValidationError;

const WEIGHT_EPSILON: f64 = 1e-9;

/// Final score composition weights.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub popularity: f64,
    pub intelligence: f64,
    pub momentum: f64,
    pub integrity: f64,
    /// Votes per popularity point; `popularity_score = min(100, count / divisor)`.
    pub popularity_divisor: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            popularity: 0.40,
            intelligence: 0.25,
            momentum: 0.20,
            integrity: 0.15,
            popularity_divisor: 100.0,
        }
    }
}

impl RankingWeights {
    fn sum(&self) -> f64 {
        self.popularity + self.intelligence + self.momentum + self.integrity
    }
}

/// Intelligence component weights.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelligenceWeights {
    pub integrity: f64,
    pub event_impact: f64,
    pub consistency: f64,
    pub risk_inverse: f64,
    /// Ratio used when a candidate has no validated events.
    pub neutral_ratio: f64,
}

impl Default for IntelligenceWeights {
    fn default() -> Self {
        Self {
            integrity: 0.30,
            event_impact: 0.40,
            consistency: 0.15,
            risk_inverse: 0.15,
            neutral_ratio: 0.5,
        }
    }
}

impl IntelligenceWeights {
    fn sum(&self) -> f64 {
        self.integrity + self.event_impact + self.consistency + self.risk_inverse
    }
}

/// Momentum window weights and tendency thresholds.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    pub h1_weight: f64,
    pub h6_weight: f64,
    pub h24_weight: f64,
    pub velocity_share: f64,
    pub acceleration_share: f64,
    /// Acceleration is clamped to `[-cap, cap]` before mixing.
    pub acceleration_cap: f64,
    pub rising_threshold: f64,
    pub stable_threshold: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            h1_weight: 3.0,
            h6_weight: 1.5,
            h24_weight: 0.5,
            velocity_share: 0.7,
            acceleration_share: 0.3,
            acceleration_cap: 50.0,
            rising_threshold: 70.0,
            stable_threshold: 40.0,
        }
    }
}

/// Anti-abuse thresholds. Counts include the attempt being evaluated.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseLimits {
    pub burst_limit: usize,
    pub burst_window_secs: i64,
    pub hourly_limit: usize,
    pub daily_limit: usize,
    /// More than this many votes for one target inside the window is flagged.
    pub repeat_target_limit: usize,
    pub repeat_target_window_hours: i64,
    pub min_vote_interval_ms: i64,
}

impl Default for AbuseLimits {
    fn default() -> Self {
        Self {
            burst_limit: 5,
            burst_window_secs: 60,
            hourly_limit: 30,
            daily_limit: 100,
            repeat_target_limit: 3,
            repeat_target_window_hours: 6,
            min_vote_interval_ms: 2_000,
        }
    }
}

/// Vote write-path policy.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotePolicy {
    /// Risk level at which a vote is refused.
    pub deny_at: RiskLevel,
    /// Ceiling for categories not listed in `category_ceilings`.
    pub default_ceiling: usize,
    /// Per-category ceilings, keyed by lowercase category.
    pub category_ceilings: HashMap<String, usize>,
    pub ceiling_window_hours: i64,
}

impl Default for VotePolicy {
    fn default() -> Self {
        let mut category_ceilings = HashMap::new();
        category_ceilings.insert("president".to_string(), 1);
        category_ceilings.insert("governor".to_string(), 1);
        category_ceilings.insert("mayor".to_string(), 1);
        Self {
            deny_at: RiskLevel::High,
            default_ceiling: 3,
            category_ceilings,
            ceiling_window_hours: 24,
        }
    }
}

impl VotePolicy {
    /// Ceiling for a category.
    #[must_use]
    pub fn ceiling_for(&self, category: &str) -> usize {
        self.category_ceilings
            .get(&category.trim().to_ascii_lowercase())
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

/// Cache behaviour.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub failure_threshold: u32,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            failure_threshold: 3,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Default TTL as a `Duration`.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Background work.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval of the full recompute sweep.
    pub recompute_interval_secs: u64,
    /// Bounded queue for score notifications.
    pub notification_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recompute_interval_secs: 300,
            notification_queue_capacity: 1024,
        }
    }
}

/// Complete configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub ranking: RankingWeights,
    pub intelligence: IntelligenceWeights,
    pub momentum: MomentumConfig,
    pub abuse: AbuseLimits,
    pub votes: VotePolicy,
    pub cache: CacheConfig,
    pub runtime: RuntimeConfig,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ScoringConfig {
    /// Parse a JSON document; missing sections keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on malformed JSON or a
    /// document that fails [`ScoringConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with operational overrides from the environment.
    ///
    /// Recognized variables: `TALLYRANK_CACHE_TTL_SECS`,
    /// `TALLYRANK_CACHE_FAILURE_THRESHOLD`, `TALLYRANK_CACHE_SWEEP_SECS`,
    /// `TALLYRANK_RECOMPUTE_INTERVAL_SECS`, `TALLYRANK_POPULARITY_DIVISOR`.
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("TALLYRANK_CACHE_TTL_SECS") {
            config.cache.default_ttl_secs = v;
        }
        if let Some(v) = env_parse("TALLYRANK_CACHE_FAILURE_THRESHOLD") {
            config.cache.failure_threshold = v;
        }
        if let Some(v) = env_parse("TALLYRANK_CACHE_SWEEP_SECS") {
            config.cache.sweep_interval_secs = v;
        }
        if let Some(v) = env_parse("TALLYRANK_RECOMPUTE_INTERVAL_SECS") {
            config.runtime.recompute_interval_secs = v;
        }
        if let Some(v) = env_parse::<f64>("TALLYRANK_POPULARITY_DIVISOR") {
            if v > 0.0 {
                config.ranking.popularity_divisor = v;
            }
        }

        config
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` when weight sets do not sum to
    /// 1.0, the popularity divisor is not positive, or thresholds are inverted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: String| Err(ValidationError::InvalidConfig { reason });

        if (self.ranking.sum() - 1.0).abs() > WEIGHT_EPSILON {
            return invalid(format!("ranking weights sum to {}, expected 1.0", self.ranking.sum()));
        }
        if (self.intelligence.sum() - 1.0).abs() > WEIGHT_EPSILON {
            return invalid(format!(
                "intelligence weights sum to {}, expected 1.0",
                self.intelligence.sum()
            ));
        }
        if !(self.ranking.popularity_divisor > 0.0) {
            return invalid("popularity_divisor must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.intelligence.neutral_ratio) {
            return invalid("neutral_ratio must be within [0, 1]".to_string());
        }
        if self.momentum.stable_threshold > self.momentum.rising_threshold {
            return invalid("momentum stable_threshold exceeds rising_threshold".to_string());
        }
        if self.abuse.burst_limit == 0 || self.abuse.hourly_limit == 0 || self.abuse.daily_limit == 0 {
            return invalid("abuse limits must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScoringConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.votes.ceiling_for("President"), 1);
        assert_eq!(config.votes.ceiling_for("senator"), 3);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ScoringConfig::from_json(r#"{"cache": {"default_ttl_secs": 30}}"#).unwrap();
        assert_eq!(config.cache.default_ttl_secs, 30);
        assert_eq!(config.cache.failure_threshold, 3);
        assert_eq!(config.ranking, RankingWeights::default());
    }

    #[test]
    fn weights_must_sum_to_one() {
        let err = ScoringConfig::from_json(r#"{"ranking": {"popularity": 0.9}}"#).unwrap_err();
        assert!(err.to_string().contains("ranking weights"));
    }

    #[test]
    fn non_positive_divisor_rejected() {
        let mut config = ScoringConfig::default();
        config.ranking.popularity_divisor = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(matches!(
            ScoringConfig::from_json("{not json"),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }
}
