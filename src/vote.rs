//! Votes and voter identities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::CandidateId;

/// Unique identifier for a recorded vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoteId(Uuid);

impl VoteId {
    /// Creates a new random vote ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable counter key derived from a voter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey([u8; 32]);

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// A (network address, client fingerprint) pair.
///
/// Not a durable entity: it only exists as a lookup key for rate-limit
/// counters and the block list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoterIdentity {
    /// Network address the vote came from.
    pub address: String,
    /// Client fingerprint.
    pub fingerprint: String,
}

impl VoterIdentity {
    /// Creates an identity, trimming surrounding whitespace.
    #[must_use]
    pub fn new(address: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            fingerprint: fingerprint.into().trim().to_string(),
        }
    }

    /// Stable blake3 digest of the pair, used to index vote counters.
    ///
    /// Components are length-prefixed so `("ab", "c")` and `("a", "bc")` do
    /// not collide.
    #[must_use]
    pub fn key(&self) -> IdentityKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.address.len() as u64).to_le_bytes());
        hasher.update(self.address.as_bytes());
        hasher.update(&(self.fingerprint.len() as u64).to_le_bytes());
        hasher.update(self.fingerprint.as_bytes());
        IdentityKey(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for VoterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.key())
    }
}

/// An admitted vote.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub voter: IdentityKey,
    pub candidate_id: CandidateId,

    /// Position category of the target at vote time.
    pub category: String,

    pub cast_at: DateTime<Utc>,
}

impl Vote {
    /// Builds a vote record.
    #[must_use]
    pub fn new(
        voter: &VoterIdentity,
        candidate_id: CandidateId,
        category: impl Into<String>,
        cast_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VoteId::new(),
            voter: voter.key(),
            candidate_id,
            category: category.into(),
            cast_at,
        }
    }
}

/// Which of an identity's votes a count should include.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VoteTarget {
    /// Every vote.
    #[default]
    Any,
    /// Votes for one candidate.
    Candidate(CandidateId),
    /// Votes for candidates of one position category.
    Category(String),
}

impl VoteTarget {
    /// Returns true if `vote` is selected by this filter.
    #[must_use]
    pub fn matches(&self, vote: &Vote) -> bool {
        match self {
            Self::Any => true,
            Self::Candidate(id) => vote.candidate_id == *id,
            Self::Category(c) => vote.category.eq_ignore_ascii_case(c),
        }
    }
}
