use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use tallyrank::cache::{keys, CacheError};
use tallyrank::storage::{InMemoryEventStore, InMemoryPartyStore, InMemoryVoteStore};
use tallyrank::{
    Candidate, CandidateId, CandidatePatch, CandidateStore, ErrorKind, EventState, FallbackCache, LocalCache,
    NewEvent, Party, PartyId, PartyStore, RemoteBackend, ScoreCache, ScoringConfig, ScoringService, StorageError, Stores,
    VoterIdentity,
};

/// Candidate store whose plain field writes can be switched off.
struct FlakyCandidates {
    inner: tallyrank::storage::InMemoryCandidateStore,
    writes_fail: AtomicBool,
}

impl CandidateStore for FlakyCandidates {
    fn insert(&self, candidate: Candidate) -> Result<(), StorageError> {
        self.inner.insert(candidate)
    }

    fn get(&self, id: CandidateId) -> Result<Option<Candidate>, StorageError> {
        self.inner.get(id)
    }

    fn update_fields(&self, id: CandidateId, patch: &CandidatePatch) -> Result<Candidate, StorageError> {
        if self.writes_fail.load(Ordering::Relaxed) {
            return Err(StorageError::BackendError("primary unreachable".to_string()));
        }
        self.inner.update_fields(id, patch)
    }

    fn update_with(
        &self,
        id: CandidateId,
        mutate: &mut dyn FnMut(&mut Candidate),
    ) -> Result<Candidate, StorageError> {
        self.inner.update_with(id, mutate)
    }

    fn increment_popularity(&self, id: CandidateId) -> Result<u64, StorageError> {
        self.inner.increment_popularity(id)
    }

    fn list_all(&self) -> Result<Vec<Candidate>, StorageError> {
        self.inner.list_all()
    }

    fn list_by_category(&self, category: &str) -> Result<Vec<Candidate>, StorageError> {
        self.inner.list_by_category(category)
    }

    fn list_active_members(&self, party: PartyId) -> Result<Vec<CandidateId>, StorageError> {
        self.inner.list_active_members(party)
    }
}

#[test]
fn failed_persist_leaves_no_cached_value() {
    let candidates = Arc::new(FlakyCandidates {
        inner: tallyrank::storage::InMemoryCandidateStore::new(),
        writes_fail: AtomicBool::new(false),
    });
    let stores = Stores::new(
        candidates.clone(),
        Arc::new(InMemoryPartyStore::new()),
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryVoteStore::new()),
    );
    let cache = Arc::new(LocalCache::default());
    let service = ScoringService::new(stores, cache.clone(), ScoringConfig::default()).unwrap();

    let c = Candidate::new("Ada", "senator").with_integrity_risk(60.0, 20.0);
    let id = c.id;
    service.stores().candidates.insert(c).unwrap();
    service.get_score(id).unwrap();
    assert!(cache.get(&keys::score(id)).is_some());

    let event = service
        .create_event(NewEvent::new(id, "corruption", 10.0))
        .unwrap();
    candidates.writes_fail.store(true, Ordering::Relaxed);

    let err = service.validate_event(event.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    assert!(err.is_retryable());
    assert!(cache.get(&keys::intelligence(id)).is_none());
    assert!(cache.get(&keys::score(id)).is_none());

    // The transition and the field mutation were already committed.
    let events = service.list_events(id).unwrap();
    assert_eq!(events[0].state, EventState::Validated);

    // Once the store recovers, a sweep converges the derived scores.
    candidates.writes_fail.store(false, Ordering::Relaxed);
    assert!(service.recompute_all().unwrap().is_clean());
    let stored = service.stores().candidates.get(id).unwrap().unwrap();
    assert_eq!(stored.integrity, 57.0);
    assert_eq!(stored.final_score, service.get_score(id).unwrap().final_score);
}

/// Remote cache that stops answering on command.
#[derive(Default)]
struct OutageRemote {
    map: Mutex<HashMap<String, Value>>,
    down: AtomicBool,
}

impl OutageRemote {
    fn up(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::Relaxed) {
            Err(CacheError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RemoteBackend for OutageRemote {
    fn name(&self) -> &str {
        "outage"
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.up()?;
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value, _ttl: Duration) -> Result<(), CacheError> {
        self.up()?;
        self.map.lock().unwrap().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.up()?;
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        self.up()?;
        let re = tallyrank::cache::glob::compile(pattern).map_err(|e| CacheError::Protocol(e.to_string()))?;
        let mut map = self.map.lock().unwrap();
        let before = map.len();
        map.retain(|k, _| !re.is_match(k));
        Ok(before - map.len())
    }
}

#[test]
fn remote_cache_outage_degrades_without_failing_requests() {
    let remote = Arc::new(OutageRemote::default());
    let cache = Arc::new(FallbackCache::new(remote.clone(), Duration::from_secs(300), 3));
    let service = ScoringService::new(
        Stores::from(tallyrank::storage::InMemoryStores::new()),
        cache.clone(),
        ScoringConfig::default(),
    )
    .unwrap();

    let party = Party::new("Amber");
    let party_id = party.id;
    service.stores().parties.insert(party).unwrap();
    let c = Candidate::new("Bo", "mayor").in_party(party_id);
    let id = c.id;
    service.stores().candidates.insert(c).unwrap();

    let healthy = service.get_score(id).unwrap();
    assert!(remote.map.lock().unwrap().contains_key(&keys::score(id)));
    assert!(!cache.is_degraded());

    remote.down.store(true, Ordering::Relaxed);
    let receipt = service
        .cast_vote(&VoterIdentity::new("203.0.113.50", "fp-outage"), id)
        .unwrap();
    assert_eq!(receipt.popularity_count, 1);
    assert!(cache.is_degraded());

    let after = service.get_score(id).unwrap();
    assert!(after.popularity_score > healthy.popularity_score);
    assert!(after.final_score >= healthy.final_score);
    assert_eq!(service.get_party_score(party_id).unwrap().rank, Some(1));

    let stats = service.cache_stats();
    assert!(stats.degraded);
    assert!(stats.backend_errors >= 1);
}

#[test]
fn blip_during_invalidation_never_serves_stale_scores() {
    let remote = Arc::new(OutageRemote::default());
    let cache = Arc::new(FallbackCache::new(remote.clone(), Duration::from_secs(300), 3));
    let service = ScoringService::new(
        Stores::from(tallyrank::storage::InMemoryStores::new()),
        cache.clone(),
        ScoringConfig::default(),
    )
    .unwrap();

    let c = Candidate::new("Cy", "senator").with_integrity_risk(50.0, 50.0);
    let id = c.id;
    service.stores().candidates.insert(c).unwrap();
    let stale = service.get_intelligence(id).unwrap();

    // The remote misses only the invalidation, then recovers.
    remote.down.store(true, Ordering::Relaxed);
    service.update_integrity_risk(id, Some(100.0), Some(0.0)).unwrap();
    remote.down.store(false, Ordering::Relaxed);

    assert!(remote.map.lock().unwrap().contains_key(&keys::intelligence(id)));
    let fresh = service.get_intelligence(id).unwrap();
    assert!(fresh.score > stale.score);
}
