//! Persistence contract consumed by the scoring core.
//!
//! The traits define what the core needs from a store; `memory` provides a
//! thread-safe reference implementation.

mod memory;
mod traits;

use std::sync::Arc;

pub use memory::{
    InMemoryCandidateStore, InMemoryEventStore, InMemoryPartyStore, InMemoryStores, InMemoryVoteStore,
};
pub use traits::{CandidateStore, EventStore, PartyStore, StorageError, VoteStore};

/// Shared handles to every store the core reads and writes.
#[derive(Clone)]
pub struct Stores {
    /// Candidate store.
    pub candidates: Arc<dyn CandidateStore>,
    /// Party store.
    pub parties: Arc<dyn PartyStore>,
    /// Moderation event store.
    pub events: Arc<dyn EventStore>,
    /// Vote store.
    pub votes: Arc<dyn VoteStore>,
}

impl Stores {
    /// Bundle explicit store handles.
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        parties: Arc<dyn PartyStore>,
        events: Arc<dyn EventStore>,
        votes: Arc<dyn VoteStore>,
    ) -> Self {
        Self {
            candidates,
            parties,
            events,
            votes,
        }
    }
}

impl From<InMemoryStores> for Stores {
    fn from(stores: InMemoryStores) -> Self {
        Self {
            candidates: Arc::new(stores.candidates),
            parties: Arc::new(stores.parties),
            events: Arc::new(stores.events),
            votes: Arc::new(stores.votes),
        }
    }
}
