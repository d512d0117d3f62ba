//! Moderation events.
//!
//! A moderation event is a reviewed record about one candidate. It starts out
//! `pending` and moves exactly once to `validated` or `rejected`. Only
//! validated events feed the intelligence signal.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::CandidateId;
use crate::error::ValidationError;

/// Unique identifier for a moderation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction an event pushes a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Favourable.
    Positive,
    /// Unfavourable.
    Negative,
}

impl Polarity {
    /// `+1.0` or `-1.0`.
    #[must_use]
    pub const fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }
}

/// The fixed set of moderation event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// General favourable news.
    Positive,
    /// General unfavourable news.
    Negative,
    /// Integrity breach; weighted double.
    Corruption,
    /// Concrete accomplishment; weighted 1.5x.
    Achievement,
}

impl EventCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Positive,
        Self::Negative,
        Self::Corruption,
        Self::Achievement,
    ];

    /// Categories counted on the favourable side of the intelligence ratio.
    pub const POSITIVE_CLASS: [Self; 2] = [Self::Positive, Self::Achievement];

    /// Categories counted on the unfavourable side of the intelligence ratio.
    pub const NEGATIVE_CLASS: [Self; 2] = [Self::Negative, Self::Corruption];

    /// Direction of this category.
    #[must_use]
    pub const fn polarity(self) -> Polarity {
        match self {
            Self::Positive | Self::Achievement => Polarity::Positive,
            Self::Negative | Self::Corruption => Polarity::Negative,
        }
    }

    /// Weight factor applied to the impact magnitude.
    #[must_use]
    pub const fn factor(self) -> f64 {
        match self {
            Self::Positive | Self::Negative => 1.0,
            Self::Corruption => 2.0,
            Self::Achievement => 1.5,
        }
    }

    /// `|impact| × factor × direction`.
    #[must_use]
    pub fn effective_impact(self, impact: f64) -> f64 {
        impact.abs() * self.factor() * self.polarity().sign()
    }

    /// Forces the sign of `impact` to match this category's polarity.
    #[must_use]
    pub fn signed_impact(self, impact: f64) -> f64 {
        impact.abs() * self.polarity().sign()
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Corruption => "corruption",
            Self::Achievement => "achievement",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "corruption" => Ok(Self::Corruption),
            "achievement" => Ok(Self::Achievement),
            _ => Err(ValidationError::UnknownCategory {
                value: s.to_string(),
            }),
        }
    }
}

/// Validation state of a moderation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Awaiting review.
    Pending,
    /// Accepted; terminal.
    Validated,
    /// Discarded; terminal.
    Rejected,
}

impl EventState {
    /// Returns true for `Validated` and `Rejected`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validated => write!(f, "validated"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// A moderation event as stored.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub id: EventId,
    pub candidate_id: CandidateId,
    pub category: EventCategory,

    /// Signed magnitude; sign always matches `category.polarity()`.
    pub impact: f64,

    #[serde(default)]
    pub description: String,

    pub state: EventState,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ModerationEvent {
    /// Builds a pending event, normalizing the impact sign.
    #[must_use]
    pub fn pending(
        candidate_id: CandidateId,
        category: EventCategory,
        impact: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            candidate_id,
            category,
            impact: category.signed_impact(impact),
            description: description.into(),
            state: EventState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Caller-supplied input for creating an event.
///
/// The category arrives as free text from the outer layer and is parsed
/// during creation.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewEvent {
    pub candidate_id: Option<CandidateId>,
    pub category: String,
    pub impact: f64,
    #[serde(default)]
    pub description: String,
}

impl NewEvent {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(candidate_id: CandidateId, category: impl Into<String>, impact: f64) -> Self {
        Self {
            candidate_id: Some(candidate_id),
            category: category.into(),
            impact,
            description: String::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }
}
