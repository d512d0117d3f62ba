//! Abstract persistence traits for tallyrank.
//!
//! The scoring core never talks to a database directly. It consumes this
//! narrow contract, so any relational or embedded store can sit behind it:
//! - In-memory backends for tests and embedded use
//! - Persistent backends supplied by the host application

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::candidate::{Candidate, CandidateId, CandidatePatch, Party, PartyId};
use crate::event::{EventCategory, EventId, EventState, ModerationEvent};
use crate::time::TimeWindow;
use crate::vote::{IdentityKey, Vote, VoteTarget};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Candidate not found.
    #[error("Candidate not found: {0}")]
    CandidateNotFound(CandidateId),

    /// Party not found.
    #[error("Party not found: {0}")]
    PartyNotFound(PartyId),

    /// Moderation event not found.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// A conditional event transition found a different current state.
    #[error("Event {id} is {actual}, expected {expected}")]
    EventStateConflict {
        /// Event that was not moved.
        id: EventId,
        /// State the caller required.
        expected: EventState,
        /// State the event is actually in.
        actual: EventState,
    },

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The call did not complete within its deadline.
    #[error("Storage call timed out after {0}ms")]
    Timeout(u64),
}

/// Storage trait for candidates.
///
/// # Safety Considerations
/// - `update_with` and `increment_popularity` must be atomic read-modify-write
///   operations scoped to one candidate
/// - Implementations should handle concurrent access safely
pub trait CandidateStore: Send + Sync {
    /// Insert a new candidate. Returns error if ID already exists.
    fn insert(&self, candidate: Candidate) -> Result<(), StorageError>;

    /// Get a candidate by ID.
    fn get(&self, id: CandidateId) -> Result<Option<Candidate>, StorageError>;

    /// Apply a partial update and return the updated candidate.
    fn update_fields(&self, id: CandidateId, patch: &CandidatePatch) -> Result<Candidate, StorageError>;

    /// Atomically read, mutate and write back one candidate.
    fn update_with(
        &self,
        id: CandidateId,
        mutate: &mut dyn FnMut(&mut Candidate),
    ) -> Result<Candidate, StorageError>;

    /// Atomically add one to the popularity count, returning the new count.
    fn increment_popularity(&self, id: CandidateId) -> Result<u64, StorageError>;

    /// All candidates, active or not.
    fn list_all(&self) -> Result<Vec<Candidate>, StorageError>;

    /// Candidates in one position category (case-insensitive).
    fn list_by_category(&self, category: &str) -> Result<Vec<Candidate>, StorageError>;

    /// IDs of active members of a party.
    fn list_active_members(&self, party: PartyId) -> Result<Vec<CandidateId>, StorageError>;
}

/// Storage trait for parties.
pub trait PartyStore: Send + Sync {
    /// Insert a new party.
    fn insert(&self, party: Party) -> Result<(), StorageError>;

    /// Get a party by ID.
    fn get(&self, id: PartyId) -> Result<Option<Party>, StorageError>;

    /// IDs of every party.
    fn list_ids(&self) -> Result<Vec<PartyId>, StorageError>;

    /// Record the aggregate score, member count and rank of a party.
    fn update_standing(
        &self,
        id: PartyId,
        score: f64,
        member_count: usize,
        rank: Option<u32>,
    ) -> Result<Party, StorageError>;
}

/// Storage trait for moderation events.
pub trait EventStore: Send + Sync {
    /// Insert a new event.
    fn insert(&self, event: ModerationEvent) -> Result<(), StorageError>;

    /// Get an event by ID.
    fn get(&self, id: EventId) -> Result<Option<ModerationEvent>, StorageError>;

    /// Move an event from `from` to `to`, stamping `resolved_at`.
    ///
    /// The state check and the write must be one atomic step: when the
    /// current state is not `from`, nothing is written and
    /// `EventStateConflict` is returned. Of two racing transitions out of
    /// the same state, exactly one succeeds.
    fn transition(
        &self,
        id: EventId,
        from: EventState,
        to: EventState,
        at: DateTime<Utc>,
    ) -> Result<ModerationEvent, StorageError>;

    /// Remove an event, returning what was removed.
    fn delete(&self, id: EventId) -> Result<ModerationEvent, StorageError>;

    /// All events for a candidate, oldest first.
    fn list_for_candidate(&self, candidate: CandidateId) -> Result<Vec<ModerationEvent>, StorageError>;

    /// Count validated events in `categories`, optionally restricted to a
    /// creation-time window.
    fn count_validated(
        &self,
        candidate: CandidateId,
        categories: &[EventCategory],
        window: Option<&TimeWindow>,
    ) -> Result<usize, StorageError>;

    /// Sum of `|impact|` over validated events in `categories`.
    fn sum_validated_abs_impact(
        &self,
        candidate: CandidateId,
        categories: &[EventCategory],
    ) -> Result<f64, StorageError>;
}

/// Storage trait for admitted votes.
pub trait VoteStore: Send + Sync {
    /// Record an admitted vote.
    fn record(&self, vote: Vote) -> Result<(), StorageError>;

    /// Count an identity's votes inside `window` matching `target`.
    fn count_by_identity(
        &self,
        voter: &IdentityKey,
        window: &TimeWindow,
        target: &VoteTarget,
    ) -> Result<usize, StorageError>;

    /// The `n` most recent vote timestamps of an identity, newest first.
    fn recent_timestamps(&self, voter: &IdentityKey, n: usize) -> Result<Vec<DateTime<Utc>>, StorageError>;

    /// Count votes for a candidate inside `window`.
    fn count_for_candidate(&self, candidate: CandidateId, window: &TimeWindow) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_candidate_store_object_safe(_: &dyn CandidateStore) {}
    fn _assert_party_store_object_safe(_: &dyn PartyStore) {}
    fn _assert_event_store_object_safe(_: &dyn EventStore) {}
    fn _assert_vote_store_object_safe(_: &dyn VoteStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::CandidateNotFound(CandidateId::new());
        assert!(err.to_string().contains("Candidate not found"));

        let err = StorageError::Timeout(250);
        assert!(err.to_string().contains("250ms"));
    }
}
