//! Moderation event lifecycle.
//!
//! ```text
//! pending --validate--> validated
//! pending --reject----> rejected
//! ```
//!
//! Both targets are terminal. A transition attempted from a terminal state
//! fails with `InvalidEventState` before anything is written. The state
//! check and the write are a single conditional store call, so concurrent
//! validate/reject calls on one event resolve it exactly once.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::candidate::{CandidateId, CandidatePatch, SCORE_MAX};
use crate::error::{ExecutionError, RankResult, ValidationError};
use crate::event::{EventCategory, EventId, EventState, ModerationEvent, NewEvent};
use crate::intelligence::{ImpactOutcome, IntelligenceEngine};
use crate::notify::{Notifier, ScoreUpdate};
use crate::pipeline::{CascadeReport, CascadeTarget, RecomputePipeline};
use crate::storage::{CandidateStore, EventStore, StorageError};

/// What a lifecycle operation did.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event: ModerationEvent,
    /// Field mutation applied on validation.
    pub impact: Option<ImpactOutcome>,
    /// Cascade results, when a cascade ran.
    pub cascade: Option<CascadeReport>,
}

/// Drives moderation events through their lifecycle and the recompute
/// cascade.
pub struct EventsOrchestrator {
    candidates: Arc<dyn CandidateStore>,
    events: Arc<dyn EventStore>,
    intelligence: IntelligenceEngine,
    cascade: RecomputePipeline,
    notifier: Arc<dyn Notifier>,
}

fn check_score_field(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=SCORE_MAX).contains(&value) {
        return Ok(());
    }
    Err(ValidationError::OutOfRange {
        field: field.to_string(),
        value,
        min: 0.0,
        max: SCORE_MAX,
    })
}

impl EventsOrchestrator {
    /// Create an orchestrator. `cascade` is normally
    /// [`RecomputePipeline::event_cascade`].
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        events: Arc<dyn EventStore>,
        intelligence: IntelligenceEngine,
        cascade: RecomputePipeline,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            candidates,
            events,
            intelligence,
            cascade,
            notifier,
        }
    }

    /// Record a pending event.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a missing candidate id, unknown category or
    /// non-finite impact; `NotFound` for an unknown candidate.
    pub fn create_event(&self, input: NewEvent) -> RankResult<ModerationEvent> {
        let candidate_id = input.candidate_id.ok_or_else(|| ValidationError::MissingField {
            field: "candidate_id".to_string(),
        })?;
        let category: EventCategory = input.category.parse()?;
        if !input.impact.is_finite() {
            return Err(ValidationError::OutOfRange {
                field: "impact".to_string(),
                value: input.impact,
                min: f64::MIN,
                max: f64::MAX,
            }
            .into());
        }
        if self.candidates.get(candidate_id)?.is_none() {
            return Err(ExecutionError::CandidateNotFound { id: candidate_id }.into());
        }

        let event = ModerationEvent::pending(candidate_id, category, input.impact, input.description);
        self.events.insert(event.clone())?;
        self.intelligence.invalidate(candidate_id);
        info!(event = %event.id, candidate = %candidate_id, category = %category, impact = event.impact, "moderation event created");
        Ok(event)
    }

    /// Validate a pending event: mutate integrity/risk, then cascade.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event or candidate, `InvalidState` if the
    /// event is not pending; storage errors propagate.
    pub fn validate_event(&self, id: EventId) -> RankResult<EventOutcome> {
        let event = self.resolve(id, EventState::Validated, "validated")?;
        let impact = self
            .intelligence
            .apply_event(event.candidate_id, event.category, event.impact)?;
        info!(
            event = %id,
            candidate = %event.candidate_id,
            integrity = impact.integrity_after,
            risk = impact.risk_after,
            "moderation event validated"
        );

        let cascade = self.run_cascade(event.candidate_id)?;
        self.resolved(&event);
        Ok(EventOutcome {
            event,
            impact: Some(impact),
            cascade: Some(cascade),
        })
    }

    /// Reject a pending event and cascade.
    ///
    /// # Errors
    ///
    /// See [`EventsOrchestrator::validate_event`].
    pub fn reject_event(&self, id: EventId) -> RankResult<EventOutcome> {
        let event = self.resolve(id, EventState::Rejected, "rejected")?;
        info!(event = %id, candidate = %event.candidate_id, "moderation event rejected");

        let cascade = self.run_cascade(event.candidate_id)?;
        self.resolved(&event);
        Ok(EventOutcome {
            event,
            impact: None,
            cascade: Some(cascade),
        })
    }

    /// Remove an event in any state.
    ///
    /// Integrity/risk mutations applied at validation are kept; only the
    /// derived scores are recomputed from the remaining history, and only
    /// when the removed event was validated.
    ///
    /// Pending and rejected events never contribute to intelligence, so
    /// removing one leaves every derived score unchanged. Dropping the
    /// cached intelligence is enough; cached final scores stay correct.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event; storage errors propagate.
    pub fn delete_event(&self, id: EventId) -> RankResult<EventOutcome> {
        let event = self.events.delete(id)?;
        info!(event = %id, candidate = %event.candidate_id, state = %event.state, "moderation event deleted");

        let cascade = if event.state == EventState::Validated {
            Some(self.run_cascade(event.candidate_id)?)
        } else {
            self.intelligence.invalidate(event.candidate_id);
            None
        };
        Ok(EventOutcome {
            event,
            impact: None,
            cascade,
        })
    }

    /// Events recorded for a candidate, oldest first.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn list_events(&self, candidate: CandidateId) -> RankResult<Vec<ModerationEvent>> {
        Ok(self.events.list_for_candidate(candidate)?)
    }

    /// Overwrite integrity and/or risk directly, then cascade.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for values outside `[0, 100]`, `NotFound` for an
    /// unknown candidate; storage errors propagate.
    pub fn update_integrity_risk(
        &self,
        id: CandidateId,
        integrity: Option<f64>,
        risk: Option<f64>,
    ) -> RankResult<CascadeReport> {
        if let Some(v) = integrity {
            check_score_field("integrity", v)?;
        }
        if let Some(v) = risk {
            check_score_field("risk", v)?;
        }
        if self.candidates.get(id)?.is_none() {
            return Err(ExecutionError::CandidateNotFound { id }.into());
        }

        let patch = CandidatePatch {
            integrity,
            risk,
            ..CandidatePatch::default()
        };
        if !patch.touches_raw_signals() {
            debug!(candidate = %id, "empty integrity/risk edit ignored");
            return Ok(CascadeReport::default());
        }
        self.candidates.update_fields(id, &patch)?;
        info!(candidate = %id, ?integrity, ?risk, "integrity/risk edited");
        self.run_cascade(id)
    }

    /// Leave `pending` for `to`. Only one caller can win this step.
    fn resolve(&self, id: EventId, to: EventState, action: &'static str) -> RankResult<ModerationEvent> {
        match self.events.transition(id, EventState::Pending, to, Utc::now()) {
            Ok(event) => Ok(event),
            Err(StorageError::EventNotFound(_)) => Err(ExecutionError::EventNotFound { id }.into()),
            Err(StorageError::EventStateConflict { actual, .. }) => Err(ExecutionError::InvalidEventState {
                id,
                state: actual,
                action,
            }
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    fn run_cascade(&self, candidate_id: CandidateId) -> RankResult<CascadeReport> {
        let candidate = self
            .candidates
            .get(candidate_id)?
            .ok_or(ExecutionError::CandidateNotFound { id: candidate_id })?;
        let report = self
            .cascade
            .run(&CascadeTarget::new(candidate_id, candidate.party_id))?;
        report.publish(self.notifier.as_ref());
        Ok(report)
    }

    fn resolved(&self, event: &ModerationEvent) {
        self.notifier.notify(ScoreUpdate::EventResolved {
            event_id: event.id,
            candidate_id: event.candidate_id,
            state: event.state,
        });
    }
}
