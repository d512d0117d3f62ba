//! Intelligence (quality/trust) engine.
//!
//! Intelligence blends four components into a `[0, 100]` score:
//!
//! - **integrity**: the raw integrity field
//! - **event impact**: share of favourable events among validated events
//! - **consistency**: share of favourable impact magnitude
//! - **risk inverse**: headroom below maximum risk
//!
//! The score depends on the whole validated history of a candidate, never on
//! a single event, so any change to that history is handled by invalidating
//! and recomputing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{keys, ScoreCache, ScoreCacheExt};
use crate::candidate::{clamp_score, Candidate, CandidateId, CandidatePatch, SCORE_MAX};
use crate::config::IntelligenceWeights;
use crate::error::{ExecutionError, RankResult};
use crate::event::EventCategory;
use crate::storage::{CandidateStore, EventStore};

/// Validated-event aggregates feeding the event and consistency components.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTallies {
    pub positive_count: usize,
    pub negative_count: usize,
    pub positive_impact: f64,
    pub negative_impact: f64,
}

/// Per-component contributions. They sum to `score` before clamping.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceComponents {
    pub integrity: f64,
    pub event_impact: f64,
    pub consistency: f64,
    pub risk_inverse: f64,
}

impl IntelligenceComponents {
    /// Unclamped sum.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.integrity + self.event_impact + self.consistency + self.risk_inverse
    }
}

/// Cached result of an intelligence computation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceBreakdown {
    pub candidate_id: CandidateId,
    pub score: f64,
    pub components: IntelligenceComponents,
    pub tallies: EventTallies,
    pub computed_at: DateTime<Utc>,
}

/// Compute the four components from raw fields and event tallies.
#[must_use]
pub fn components(integrity: f64, risk: f64, tallies: &EventTallies, w: &IntelligenceWeights) -> IntelligenceComponents {
    let total_count = tallies.positive_count + tallies.negative_count;
    let ratio = if total_count == 0 {
        w.neutral_ratio
    } else {
        tallies.positive_count as f64 / total_count as f64
    };

    let total_impact = tallies.positive_impact + tallies.negative_impact;
    let consistency_share = if total_impact > 0.0 {
        tallies.positive_impact / total_impact * SCORE_MAX
    } else {
        SCORE_MAX / 2.0
    };

    IntelligenceComponents {
        integrity: integrity * w.integrity,
        event_impact: ratio * SCORE_MAX * w.event_impact,
        consistency: consistency_share * w.consistency,
        risk_inverse: (SCORE_MAX - risk.min(SCORE_MAX)) * w.risk_inverse,
    }
}

/// Field deltas produced by applying one validated event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactOutcome {
    pub effective_impact: f64,
    pub integrity_before: f64,
    pub integrity_after: f64,
    pub risk_before: f64,
    pub risk_after: f64,
}

/// Mutate integrity/risk for one validated event.
///
/// Each category uses fixed fractions of `|impact|` rather than the weighted
/// effective impact:
///
/// | category    | integrity   | risk        |
/// |-------------|-------------|-------------|
/// | corruption  | −0.3·\|i\|  | +0.5·\|i\|  |
/// | negative    |             | +0.2·\|i\|  |
/// | achievement | +0.2·\|i\|  | −0.1·\|i\|  |
/// | positive    |             | −0.05·\|i\| |
///
/// # Examples
///
/// ```
/// use tallyrank::{Candidate, EventCategory};
/// use tallyrank::intelligence::apply_event_impact;
///
/// let mut c = Candidate::new("Ada", "senator").with_integrity_risk(60.0, 20.0);
/// apply_event_impact(&mut c, EventCategory::Corruption, -10.0);
/// assert_eq!(c.integrity, 57.0);
/// assert_eq!(c.risk, 25.0);
/// ```
pub fn apply_event_impact(candidate: &mut Candidate, category: EventCategory, impact: f64) -> ImpactOutcome {
    let magnitude = impact.abs();
    let integrity_before = candidate.integrity;
    let risk_before = candidate.risk;

    let (d_integrity, d_risk) = match category {
        EventCategory::Corruption => (-magnitude * 0.3, magnitude * 0.5),
        EventCategory::Negative => (0.0, magnitude * 0.2),
        EventCategory::Achievement => (magnitude * 0.2, -magnitude * 0.1),
        EventCategory::Positive => (0.0, -magnitude * 0.05),
    };

    candidate.integrity = clamp_score(integrity_before + d_integrity);
    candidate.risk = clamp_score(risk_before + d_risk);

    ImpactOutcome {
        effective_impact: category.effective_impact(impact),
        integrity_before,
        integrity_after: candidate.integrity,
        risk_before,
        risk_after: candidate.risk,
    }
}

/// Computes and caches per-candidate intelligence.
#[derive(Clone)]
pub struct IntelligenceEngine {
    candidates: Arc<dyn CandidateStore>,
    events: Arc<dyn EventStore>,
    cache: Arc<dyn ScoreCache>,
    weights: IntelligenceWeights,
    ttl: Duration,
}

impl IntelligenceEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        events: Arc<dyn EventStore>,
        cache: Arc<dyn ScoreCache>,
        weights: IntelligenceWeights,
        ttl: Duration,
    ) -> Self {
        Self {
            candidates,
            events,
            cache,
            weights,
            ttl,
        }
    }

    /// Cached breakdown, recomputing on miss.
    ///
    /// # Errors
    ///
    /// `CandidateNotFound` for unknown IDs; storage errors propagate.
    pub fn get(&self, id: CandidateId) -> RankResult<IntelligenceBreakdown> {
        if let Some(hit) = self.cache.get_as::<IntelligenceBreakdown>(&keys::intelligence(id)) {
            return Ok(hit);
        }
        self.recompute(id)
    }

    /// Recompute from current fields and validated history, writing through.
    ///
    /// # Errors
    ///
    /// See [`IntelligenceEngine::get`].
    pub fn recompute(&self, id: CandidateId) -> RankResult<IntelligenceBreakdown> {
        let candidate = self
            .candidates
            .get(id)?
            .ok_or(ExecutionError::CandidateNotFound { id })?;

        let tallies = self.tallies(id)?;
        let parts = components(candidate.integrity, candidate.risk, &tallies, &self.weights);
        let score = clamp_score(parts.total());

        let breakdown = IntelligenceBreakdown {
            candidate_id: id,
            score,
            components: parts,
            tallies,
            computed_at: Utc::now(),
        };

        self.candidates.update_fields(id, &CandidatePatch::intelligence(score))?;
        self.cache.set_as(&keys::intelligence(id), &breakdown, Some(self.ttl));
        debug!(candidate = %id, score, "intelligence recomputed");
        Ok(breakdown)
    }

    /// Drop the cached breakdown.
    pub fn invalidate(&self, id: CandidateId) {
        self.cache.delete(&keys::intelligence(id));
    }

    /// Atomically apply a validated event's field mutation.
    ///
    /// # Errors
    ///
    /// `CandidateNotFound` if the candidate vanished; storage errors propagate.
    pub fn apply_event(&self, id: CandidateId, category: EventCategory, impact: f64) -> RankResult<ImpactOutcome> {
        let mut outcome = None;
        self.candidates.update_with(id, &mut |c: &mut Candidate| {
            outcome = Some(apply_event_impact(c, category, impact));
        })?;
        outcome.ok_or_else(|| ExecutionError::CandidateNotFound { id }.into())
    }

    fn tallies(&self, id: CandidateId) -> RankResult<EventTallies> {
        Ok(EventTallies {
            positive_count: self.events.count_validated(id, &EventCategory::POSITIVE_CLASS, None)?,
            negative_count: self.events.count_validated(id, &EventCategory::NEGATIVE_CLASS, None)?,
            positive_impact: self
                .events
                .sum_validated_abs_impact(id, &EventCategory::POSITIVE_CLASS)?,
            negative_impact: self
                .events
                .sum_validated_abs_impact(id, &EventCategory::NEGATIVE_CLASS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::LocalCache;
    use crate::event::{EventState, ModerationEvent};
    use crate::storage::{InMemoryCandidateStore, InMemoryEventStore};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn no_events_uses_neutral_components() {
        let w = IntelligenceWeights::default();
        let parts = components(80.0, 10.0, &EventTallies::default(), &w);
        assert!(approx(parts.event_impact, 20.0));
        assert!(approx(parts.consistency, 7.5));
        assert!(approx(parts.integrity, 24.0));
        assert!(approx(parts.risk_inverse, 13.5));
        assert!(approx(parts.total(), 65.0));
    }

    #[test]
    fn ratio_and_consistency_from_tallies() {
        let w = IntelligenceWeights::default();
        let tallies = EventTallies {
            positive_count: 3,
            negative_count: 1,
            positive_impact: 6.0,
            negative_impact: 18.0,
        };
        let parts = components(50.0, 0.0, &tallies, &w);
        assert!(approx(parts.event_impact, 30.0));
        assert!(approx(parts.consistency, 3.75));
    }

    #[test]
    fn risk_above_max_is_capped() {
        let w = IntelligenceWeights::default();
        let parts = components(0.0, 250.0, &EventTallies::default(), &w);
        assert_eq!(parts.risk_inverse, 0.0);
    }

    #[test]
    fn corruption_scenario() {
        let mut c = Candidate::new("Ada", "senator").with_integrity_risk(60.0, 20.0);
        let out = apply_event_impact(&mut c, EventCategory::Corruption, 10.0);
        assert!(approx(c.integrity, 57.0));
        assert!(approx(c.risk, 25.0));
        assert_eq!(out.effective_impact, -20.0);
    }

    #[test]
    fn mutations_per_category_clamp() {
        let mut c = Candidate::new("Ada", "senator").with_integrity_risk(99.0, 1.0);
        apply_event_impact(&mut c, EventCategory::Achievement, 20.0);
        assert_eq!(c.integrity, 100.0);
        assert_eq!(c.risk, 0.0);

        apply_event_impact(&mut c, EventCategory::Negative, 10.0);
        assert!(approx(c.risk, 2.0));

        apply_event_impact(&mut c, EventCategory::Positive, 20.0);
        assert!(approx(c.risk, 1.0));
        assert_eq!(c.integrity, 100.0);
    }

    #[test]
    fn engine_recomputes_from_validated_history_only() {
        let candidates = Arc::new(InMemoryCandidateStore::new());
        let events = Arc::new(InMemoryEventStore::new());
        let cache = Arc::new(LocalCache::default());
        let c = Candidate::new("Ada", "senator").with_integrity_risk(100.0, 0.0);
        let id = c.id;
        candidates.insert(c).unwrap();

        let engine = IntelligenceEngine::new(
            candidates.clone(),
            events.clone(),
            cache.clone(),
            IntelligenceWeights::default(),
            Duration::from_secs(300),
        );

        // 30 + 20 + 7.5 + 15
        assert!(approx(engine.get(id).unwrap().score, 72.5));
        assert!(approx(candidates.get(id).unwrap().unwrap().intelligence, 72.5));

        let pending = ModerationEvent::pending(id, EventCategory::Negative, 5.0, "");
        events.insert(pending.clone()).unwrap();
        engine.invalidate(id);
        assert!(approx(engine.get(id).unwrap().score, 72.5));

        events
            .transition(pending.id, EventState::Pending, EventState::Validated, Utc::now())
            .unwrap();
        engine.invalidate(id);
        // ratio 0 and consistency 0: 30 + 0 + 0 + 15
        assert!(approx(engine.get(id).unwrap().score, 45.0));
    }

    #[test]
    fn apply_event_is_written_through() {
        let candidates = Arc::new(InMemoryCandidateStore::new());
        let c = Candidate::new("Ada", "senator").with_integrity_risk(60.0, 20.0);
        let id = c.id;
        candidates.insert(c).unwrap();

        let engine = IntelligenceEngine::new(
            candidates.clone(),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(LocalCache::default()),
            IntelligenceWeights::default(),
            Duration::from_secs(300),
        );
        let out = engine.apply_event(id, EventCategory::Corruption, -10.0).unwrap();
        assert!(approx(out.integrity_after, 57.0));
        let stored = candidates.get(id).unwrap().unwrap();
        assert!(approx(stored.integrity, 57.0));
        assert!(approx(stored.risk, 25.0));

        assert!(engine.apply_event(CandidateId::new(), EventCategory::Positive, 1.0).is_err());
    }
}
