//! Momentum engine.
//!
//! Momentum summarizes how fast a candidate is collecting votes right now and
//! whether that pace is speeding up. It is computed from vote counts in four
//! windows ending at the reference instant:
//!
//! | window   | span               |
//! |----------|--------------------|
//! | `h1`     | last hour          |
//! | `h6`     | last 6 hours       |
//! | `h24`    | last 24 hours      |
//! | `prev24` | 24 to 48 hours ago |
//!
//! The windows overlap on purpose: a vote cast ten minutes ago counts towards
//! `h1`, `h6` and `h24`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{keys, ScoreCache, ScoreCacheExt};
use crate::candidate::{clamp_score, CandidateId, CandidatePatch};
use crate::config::MomentumConfig;
use crate::error::{ExecutionError, RankResult};
use crate::storage::{CandidateStore, VoteStore};
use crate::time::TimeWindow;

/// Direction label derived from the momentum score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tendency {
    /// Score at or above the rising threshold.
    Rising,
    /// Between the stable and rising thresholds.
    Stable,
    /// Below the stable threshold.
    Declining,
}

impl Tendency {
    /// Classify a score.
    #[must_use]
    pub fn classify(score: f64, cfg: &MomentumConfig) -> Self {
        if score >= cfg.rising_threshold {
            Self::Rising
        } else if score >= cfg.stable_threshold {
            Self::Stable
        } else {
            Self::Declining
        }
    }
}

/// Vote counts per momentum window.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub h1: usize,
    pub h6: usize,
    pub h24: usize,
    pub prev24: usize,
}

/// Cached result of a momentum computation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumBreakdown {
    pub candidate_id: CandidateId,
    pub score: f64,
    pub tendency: Tendency,
    pub windows: WindowCounts,
    pub velocity: f64,
    /// Unclamped acceleration percentage.
    pub acceleration: f64,
    pub computed_at: DateTime<Utc>,
}

/// `h1×w1 + h6×w6 + h24×w24`.
#[must_use]
pub fn velocity(counts: &WindowCounts, cfg: &MomentumConfig) -> f64 {
    counts.h1 as f64 * cfg.h1_weight + counts.h6 as f64 * cfg.h6_weight + counts.h24 as f64 * cfg.h24_weight
}

/// Percentage change of the last 24h against the 24h before.
///
/// With no prior activity, any current activity counts as +100%.
#[must_use]
pub fn acceleration(counts: &WindowCounts) -> f64 {
    if counts.prev24 > 0 {
        (counts.h24 as f64 - counts.prev24 as f64) / counts.prev24 as f64 * 100.0
    } else if counts.h24 > 0 {
        100.0
    } else {
        0.0
    }
}

/// Momentum score in `[0, 100]`.
#[must_use]
pub fn momentum_score(counts: &WindowCounts, cfg: &MomentumConfig) -> f64 {
    let accel = acceleration(counts).clamp(-cfg.acceleration_cap, cfg.acceleration_cap);
    clamp_score(velocity(counts, cfg) * cfg.velocity_share + accel * cfg.acceleration_share)
}

/// Computes and caches per-candidate momentum.
#[derive(Clone)]
pub struct MomentumEngine {
    candidates: Arc<dyn CandidateStore>,
    votes: Arc<dyn VoteStore>,
    cache: Arc<dyn ScoreCache>,
    cfg: MomentumConfig,
    ttl: Duration,
}

impl MomentumEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        votes: Arc<dyn VoteStore>,
        cache: Arc<dyn ScoreCache>,
        cfg: MomentumConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            candidates,
            votes,
            cache,
            cfg,
            ttl,
        }
    }

    /// Cached breakdown, recomputing on miss.
    ///
    /// # Errors
    ///
    /// `CandidateNotFound` for unknown IDs; storage errors propagate.
    pub fn get(&self, id: CandidateId) -> RankResult<MomentumBreakdown> {
        if let Some(hit) = self.cache.get_as::<MomentumBreakdown>(&keys::momentum(id)) {
            return Ok(hit);
        }
        self.recompute(id)
    }

    /// Recompute as of now.
    ///
    /// # Errors
    ///
    /// See [`MomentumEngine::get`].
    pub fn recompute(&self, id: CandidateId) -> RankResult<MomentumBreakdown> {
        self.recompute_at(id, Utc::now())
    }

    /// Recompute with an explicit reference instant.
    ///
    /// # Errors
    ///
    /// See [`MomentumEngine::get`].
    pub fn recompute_at(&self, id: CandidateId, now: DateTime<Utc>) -> RankResult<MomentumBreakdown> {
        if self.candidates.get(id)?.is_none() {
            return Err(ExecutionError::CandidateNotFound { id }.into());
        }

        let windows = self.window_counts(id, now)?;
        let score = momentum_score(&windows, &self.cfg);
        let breakdown = MomentumBreakdown {
            candidate_id: id,
            score,
            tendency: Tendency::classify(score, &self.cfg),
            windows,
            velocity: velocity(&windows, &self.cfg),
            acceleration: acceleration(&windows),
            computed_at: now,
        };

        self.candidates.update_fields(id, &CandidatePatch::momentum(score))?;
        self.cache.set_as(&keys::momentum(id), &breakdown, Some(self.ttl));
        debug!(candidate = %id, score, tendency = ?breakdown.tendency, "momentum recomputed");
        Ok(breakdown)
    }

    /// Drop the cached breakdown.
    pub fn invalidate(&self, id: CandidateId) {
        self.cache.delete(&keys::momentum(id));
    }

    fn window_counts(&self, id: CandidateId, now: DateTime<Utc>) -> RankResult<WindowCounts> {
        let hours = ChronoDuration::hours;
        Ok(WindowCounts {
            h1: self.votes.count_for_candidate(id, &TimeWindow::trailing(now, hours(1)))?,
            h6: self.votes.count_for_candidate(id, &TimeWindow::trailing(now, hours(6)))?,
            h24: self.votes.count_for_candidate(id, &TimeWindow::trailing(now, hours(24)))?,
            prev24: self
                .votes
                .count_for_candidate(id, &TimeWindow::between_ago(now, hours(48), hours(24)))?,
        })
    }
}
