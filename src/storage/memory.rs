//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::candidate::{Candidate, CandidateId, CandidatePatch, Party, PartyId};
use crate::event::{EventCategory, EventId, EventState, ModerationEvent};
use crate::storage::traits::{CandidateStore, EventStore, PartyStore, StorageError, VoteStore};
use crate::time::TimeWindow;
use crate::vote::{IdentityKey, Vote, VoteTarget};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory candidate store.
#[derive(Debug, Default)]
pub struct InMemoryCandidateStore {
    by_id: RwLock<HashMap<CandidateId, Candidate>>,
}

impl InMemoryCandidateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CandidateStore for InMemoryCandidateStore {
    fn insert(&self, candidate: Candidate) -> Result<(), StorageError> {
        let mut guard = self.by_id.write().map_err(|_| lock_err("candidate.insert"))?;
        if guard.contains_key(&candidate.id) {
            return Err(StorageError::DuplicateKey(candidate.id.to_string()));
        }
        guard.insert(candidate.id, candidate);
        Ok(())
    }

    fn get(&self, id: CandidateId) -> Result<Option<Candidate>, StorageError> {
        let guard = self.by_id.read().map_err(|_| lock_err("candidate.get"))?;
        Ok(guard.get(&id).cloned())
    }

    fn update_fields(&self, id: CandidateId, patch: &CandidatePatch) -> Result<Candidate, StorageError> {
        self.update_with(id, &mut |c: &mut Candidate| c.apply_patch(patch))
    }

    fn update_with(
        &self,
        id: CandidateId,
        mutate: &mut dyn FnMut(&mut Candidate),
    ) -> Result<Candidate, StorageError> {
        let mut guard = self.by_id.write().map_err(|_| lock_err("candidate.update_with"))?;
        let candidate = guard.get_mut(&id).ok_or(StorageError::CandidateNotFound(id))?;
        mutate(candidate);
        candidate.updated_at = Utc::now();
        Ok(candidate.clone())
    }

    fn increment_popularity(&self, id: CandidateId) -> Result<u64, StorageError> {
        let mut guard = self
            .by_id
            .write()
            .map_err(|_| lock_err("candidate.increment_popularity"))?;
        let candidate = guard.get_mut(&id).ok_or(StorageError::CandidateNotFound(id))?;
        candidate.popularity_count = candidate.popularity_count.saturating_add(1);
        candidate.updated_at = Utc::now();
        Ok(candidate.popularity_count)
    }

    fn list_all(&self) -> Result<Vec<Candidate>, StorageError> {
        let guard = self.by_id.read().map_err(|_| lock_err("candidate.list_all"))?;
        let mut out: Vec<Candidate> = guard.values().cloned().collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn list_by_category(&self, category: &str) -> Result<Vec<Candidate>, StorageError> {
        let category = category.trim();
        let guard = self
            .by_id
            .read()
            .map_err(|_| lock_err("candidate.list_by_category"))?;
        let mut out: Vec<Candidate> = guard
            .values()
            .filter(|c| c.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn list_active_members(&self, party: PartyId) -> Result<Vec<CandidateId>, StorageError> {
        let guard = self
            .by_id
            .read()
            .map_err(|_| lock_err("candidate.list_active_members"))?;
        let mut out: Vec<CandidateId> = guard
            .values()
            .filter(|c| c.active && c.party_id == Some(party))
            .map(|c| c.id)
            .collect();
        out.sort();
        Ok(out)
    }
}

/// Thread-safe in-memory party store.
#[derive(Debug, Default)]
pub struct InMemoryPartyStore {
    by_id: RwLock<BTreeMap<PartyId, Party>>,
}

impl InMemoryPartyStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartyStore for InMemoryPartyStore {
    fn insert(&self, party: Party) -> Result<(), StorageError> {
        let mut guard = self.by_id.write().map_err(|_| lock_err("party.insert"))?;
        if guard.contains_key(&party.id) {
            return Err(StorageError::DuplicateKey(party.id.to_string()));
        }
        guard.insert(party.id, party);
        Ok(())
    }

    fn get(&self, id: PartyId) -> Result<Option<Party>, StorageError> {
        let guard = self.by_id.read().map_err(|_| lock_err("party.get"))?;
        Ok(guard.get(&id).cloned())
    }

    fn list_ids(&self) -> Result<Vec<PartyId>, StorageError> {
        let guard = self.by_id.read().map_err(|_| lock_err("party.list_ids"))?;
        Ok(guard.keys().copied().collect())
    }

    fn update_standing(
        &self,
        id: PartyId,
        score: f64,
        member_count: usize,
        rank: Option<u32>,
    ) -> Result<Party, StorageError> {
        let mut guard = self.by_id.write().map_err(|_| lock_err("party.update_standing"))?;
        let party = guard.get_mut(&id).ok_or(StorageError::PartyNotFound(id))?;
        party.score = score;
        party.member_count = member_count;
        party.rank = rank;
        party.updated_at = Utc::now();
        Ok(party.clone())
    }
}

#[derive(Debug, Default)]
struct EventIndex {
    by_id: HashMap<EventId, ModerationEvent>,
    by_candidate: HashMap<CandidateId, Vec<EventId>>,
}

/// Thread-safe in-memory moderation event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    state: RwLock<EventIndex>,
}

impl InMemoryEventStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn validated_in<'a>(
        state: &'a EventIndex,
        candidate: CandidateId,
        categories: &'a [EventCategory],
    ) -> impl Iterator<Item = &'a ModerationEvent> + 'a {
        state
            .by_candidate
            .get(&candidate)
            .into_iter()
            .flatten()
            .filter_map(move |id| state.by_id.get(id))
            .filter(move |e| e.state == EventState::Validated && categories.contains(&e.category))
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: ModerationEvent) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("event.insert"))?;
        if state.by_id.contains_key(&event.id) {
            return Err(StorageError::DuplicateKey(event.id.to_string()));
        }
        state.by_candidate.entry(event.candidate_id).or_default().push(event.id);
        state.by_id.insert(event.id, event);
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Option<ModerationEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("event.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn transition(
        &self,
        id: EventId,
        from: EventState,
        new_state: EventState,
        at: DateTime<Utc>,
    ) -> Result<ModerationEvent, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("event.transition"))?;
        let event = state.by_id.get_mut(&id).ok_or(StorageError::EventNotFound(id))?;
        if event.state != from {
            return Err(StorageError::EventStateConflict {
                id,
                expected: from,
                actual: event.state,
            });
        }
        event.state = new_state;
        event.resolved_at = new_state.is_terminal().then_some(at);
        Ok(event.clone())
    }

    fn delete(&self, id: EventId) -> Result<ModerationEvent, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("event.delete"))?;
        let event = state.by_id.remove(&id).ok_or(StorageError::EventNotFound(id))?;
        if let Some(ids) = state.by_candidate.get_mut(&event.candidate_id) {
            ids.retain(|e| *e != id);
            if ids.is_empty() {
                state.by_candidate.remove(&event.candidate_id);
            }
        }
        Ok(event)
    }

    fn list_for_candidate(&self, candidate: CandidateId) -> Result<Vec<ModerationEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("event.list_for_candidate"))?;
        let mut out: Vec<ModerationEvent> = state
            .by_candidate
            .get(&candidate)
            .into_iter()
            .flatten()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect();
        out.sort_by_key(|e| e.created_at);
        Ok(out)
    }

    fn count_validated(
        &self,
        candidate: CandidateId,
        categories: &[EventCategory],
        window: Option<&TimeWindow>,
    ) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("event.count_validated"))?;
        Ok(Self::validated_in(&state, candidate, categories)
            .filter(|e| window.map_or(true, |w| w.contains(e.created_at)))
            .count())
    }

    fn sum_validated_abs_impact(
        &self,
        candidate: CandidateId,
        categories: &[EventCategory],
    ) -> Result<f64, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("event.sum_validated_abs_impact"))?;
        Ok(Self::validated_in(&state, candidate, categories)
            .map(|e| e.impact.abs())
            .sum())
    }
}

#[derive(Debug, Default)]
struct VoteState {
    // Per-identity votes kept sorted by cast time.
    by_voter: HashMap<IdentityKey, VecDeque<Vote>>,
    by_candidate: HashMap<CandidateId, Vec<DateTime<Utc>>>,
}

/// Thread-safe in-memory vote store.
#[derive(Debug, Default)]
pub struct InMemoryVoteStore {
    state: RwLock<VoteState>,
}

impl InMemoryVoteStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoteStore for InMemoryVoteStore {
    fn record(&self, vote: Vote) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("vote.record"))?;
        state
            .by_candidate
            .entry(vote.candidate_id)
            .or_default()
            .push(vote.cast_at);

        let votes = state.by_voter.entry(vote.voter).or_default();
        // Votes usually arrive in order; fall back to a sorted insert otherwise.
        let pos = votes
            .iter()
            .rposition(|v| v.cast_at <= vote.cast_at)
            .map_or(0, |p| p + 1);
        votes.insert(pos, vote);
        Ok(())
    }

    fn count_by_identity(
        &self,
        voter: &IdentityKey,
        window: &TimeWindow,
        target: &VoteTarget,
    ) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("vote.count_by_identity"))?;
        Ok(state
            .by_voter
            .get(voter)
            .map_or(0, |votes| {
                votes
                    .iter()
                    .filter(|v| window.contains(v.cast_at) && target.matches(v))
                    .count()
            }))
    }

    fn recent_timestamps(&self, voter: &IdentityKey, n: usize) -> Result<Vec<DateTime<Utc>>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("vote.recent_timestamps"))?;
        Ok(state.by_voter.get(voter).map_or_else(Vec::new, |votes| {
            votes.iter().rev().take(n).map(|v| v.cast_at).collect()
        }))
    }

    fn count_for_candidate(&self, candidate: CandidateId, window: &TimeWindow) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("vote.count_for_candidate"))?;
        Ok(state
            .by_candidate
            .get(&candidate)
            .map_or(0, |ts| ts.iter().filter(|t| window.contains(**t)).count()))
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Candidate store.
    pub candidates: InMemoryCandidateStore,
    /// Party store.
    pub parties: InMemoryPartyStore,
    /// Moderation event store.
    pub events: InMemoryEventStore,
    /// Vote store.
    pub votes: InMemoryVoteStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
