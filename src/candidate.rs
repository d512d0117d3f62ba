//! Candidate and party types.
//!
//! A candidate is the ranked subject. It carries four raw signal fields that
//! outside writers mutate (popularity via votes, integrity/risk via moderation
//! events) and three derived fields that only recompute passes write.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound shared by every bounded signal.
pub const SCORE_MAX: f64 = 100.0;

/// Clamp a signal into `[0, 100]`.
///
/// Negative intermediates floor to zero and a NaN collapses to zero rather
/// than propagating into cached scores.
#[must_use]
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, SCORE_MAX)
}

/// Round to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stable candidate identifier.
///
/// # Examples
///
/// ```
/// use tallyrank::CandidateId;
///
/// let id = CandidateId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(Uuid);

impl CandidateId {
    /// Creates a new random candidate ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a candidate ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for CandidateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CandidateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Stable party identifier. Ordered so it can serve as a ranking tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(Uuid);

impl PartyId {
    /// Creates a new random party ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a party ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for PartyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ranked subject.
///
/// # Examples
///
/// ```
/// use tallyrank::Candidate;
///
/// let c = Candidate::new("Ada Reyes", "senator");
/// assert_eq!(c.integrity, 50.0);
/// assert!(c.active);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique identifier.
    pub id: CandidateId,

    /// Display name.
    pub name: String,

    /// Position category, e.g. `president` or `senator`. Drives per-category
    /// leaderboards and vote ceilings.
    pub category: String,

    /// Party membership, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party_id: Option<PartyId>,

    /// Raw popularity: number of admitted votes.
    pub popularity_count: u64,

    /// Integrity in `[0, 100]`.
    pub integrity: f64,
    /// Risk in `[0, 100]`. Higher is worse.
    pub risk: f64,

    // Derived fields, written only by recompute passes.
    /// Last computed intelligence score.
    pub intelligence: f64,
    /// Last computed momentum score.
    pub momentum: f64,
    /// Last computed final score.
    pub final_score: f64,

    /// Inactive candidates take no votes and are left out of party means
    /// and leaderboards.
    pub active: bool,

    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// Creates an active candidate with neutral signal fields.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CandidateId::new(),
            name: name.into(),
            category: category.into(),
            party_id: None,
            popularity_count: 0,
            integrity: 50.0,
            risk: 0.0,
            intelligence: 50.0,
            momentum: 0.0,
            final_score: 0.0,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the party membership.
    #[must_use]
    pub fn in_party(mut self, party: PartyId) -> Self {
        self.party_id = Some(party);
        self
    }

    /// Sets the raw integrity and risk fields (clamped).
    #[must_use]
    pub fn with_integrity_risk(mut self, integrity: f64, risk: f64) -> Self {
        self.integrity = clamp_score(integrity);
        self.risk = clamp_score(risk);
        self
    }

    /// Sets the raw popularity count.
    #[must_use]
    pub fn with_popularity(mut self, count: u64) -> Self {
        self.popularity_count = count;
        self
    }

    /// Applies a partial update. Bounded fields are clamped.
    pub fn apply_patch(&mut self, patch: &CandidatePatch) {
        if let Some(v) = patch.integrity {
            self.integrity = clamp_score(v);
        }
        if let Some(v) = patch.risk {
            self.risk = clamp_score(v);
        }
        if let Some(v) = patch.intelligence {
            self.intelligence = clamp_score(v);
        }
        if let Some(v) = patch.momentum {
            self.momentum = clamp_score(v);
        }
        if let Some(v) = patch.final_score {
            self.final_score = clamp_score(v);
        }
        if let Some(v) = patch.active {
            self.active = v;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial field update for a candidate. `None` leaves a field untouched.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidatePatch {
    pub integrity: Option<f64>,
    pub risk: Option<f64>,
    pub intelligence: Option<f64>,
    pub momentum: Option<f64>,
    pub final_score: Option<f64>,
    pub active: Option<bool>,
}

impl CandidatePatch {
    /// Patch touching only the intelligence field.
    #[must_use]
    pub fn intelligence(value: f64) -> Self {
        Self {
            intelligence: Some(value),
            ..Self::default()
        }
    }

    /// Patch touching only the momentum field.
    #[must_use]
    pub fn momentum(value: f64) -> Self {
        Self {
            momentum: Some(value),
            ..Self::default()
        }
    }

    /// Patch touching only the final score.
    #[must_use]
    pub fn final_score(value: f64) -> Self {
        Self {
            final_score: Some(value),
            ..Self::default()
        }
    }

    /// Returns true when the patch changes integrity or risk.
    #[must_use]
    pub const fn touches_raw_signals(&self) -> bool {
        self.integrity.is_some() || self.risk.is_some()
    }
}

/// A party: a group of candidates ranked by their mean final score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    /// Unique identifier.
    pub id: PartyId,
    /// Display name.
    pub name: String,

    /// Mean final score of active members at the last recompute.
    pub score: f64,

    /// 1-based position among all parties, `None` until first ranked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,

    /// Active members counted in `score`.
    pub member_count: usize,

    /// Last standing update.
    pub updated_at: DateTime<Utc>,
}

impl Party {
    /// Creates an unranked party.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PartyId::new(),
            name: name.into(),
            score: 0.0,
            rank: None,
            member_count: 0,
            updated_at: Utc::now(),
        }
    }
}
