//! Scoring service facade.
//!
//! [`ScoringService`] wires the stores, the cache, the engines, the gate and
//! the orchestrator together and exposes the operations an outer API layer
//! calls. It holds no state of its own beyond the block list inside the gate.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::abuse::{AdmissionDecision, AntiAbuseGate};
use crate::cache::{CacheStats, LocalCache, ScoreCache};
use crate::candidate::{CandidateId, PartyId};
use crate::config::ScoringConfig;
use crate::error::{ExecutionError, RankResult};
use crate::event::{EventId, ModerationEvent, NewEvent};
use crate::intelligence::{IntelligenceBreakdown, IntelligenceEngine};
use crate::leaderboard::{Leaderboard, LeaderboardBuilder, LeaderboardScope};
use crate::momentum::{MomentumBreakdown, MomentumEngine};
use crate::notify::{NoopNotifier, Notifier};
use crate::orchestrator::{EventOutcome, EventsOrchestrator};
use crate::pipeline::{CascadeReport, CascadeTarget, RecomputePipeline};
use crate::ranking::{PartyStanding, RankingEngine, ScoreBreakdown};
use crate::storage::{CandidateStore, InMemoryStores, Stores, VoteStore};
use crate::sweep::{self, FullRecompute, SweepReport};
use crate::time::TimeWindow;
use crate::vote::{Vote, VoteTarget, VoterIdentity};

/// Result of an admitted vote.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote: Vote,
    pub decision: AdmissionDecision,
    pub popularity_count: u64,
    pub cascade: CascadeReport,
}

/// Entry point for every scoring operation.
pub struct ScoringService {
    stores: Stores,
    cache: Arc<dyn ScoreCache>,
    config: ScoringConfig,
    ranking: RankingEngine,
    leaderboards: LeaderboardBuilder,
    gate: AntiAbuseGate,
    orchestrator: EventsOrchestrator,
    vote_cascade: RecomputePipeline,
    notifier: Arc<dyn Notifier>,
}

impl ScoringService {
    /// Build a service that discards notifications.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `config` fails validation.
    pub fn new(stores: Stores, cache: Arc<dyn ScoreCache>, config: ScoringConfig) -> RankResult<Self> {
        Self::with_notifier(stores, cache, config, Arc::new(NoopNotifier))
    }

    /// In-memory stores and a local cache. Intended for embedding and tests.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `config` fails validation.
    pub fn in_memory(config: ScoringConfig) -> RankResult<Self> {
        let cache = Arc::new(LocalCache::new(config.cache.default_ttl()));
        Self::new(Stores::from(InMemoryStores::new()), cache, config)
    }

    /// Build a service publishing changes to `notifier`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `config` fails validation.
    pub fn with_notifier(
        stores: Stores,
        cache: Arc<dyn ScoreCache>,
        config: ScoringConfig,
        notifier: Arc<dyn Notifier>,
    ) -> RankResult<Self> {
        config.validate()?;
        let ttl = config.cache.default_ttl();

        let momentum = MomentumEngine::new(
            Arc::clone(&stores.candidates),
            Arc::clone(&stores.votes),
            Arc::clone(&cache),
            config.momentum.clone(),
            ttl,
        );
        let intelligence = IntelligenceEngine::new(
            Arc::clone(&stores.candidates),
            Arc::clone(&stores.events),
            Arc::clone(&cache),
            config.intelligence.clone(),
            ttl,
        );
        let ranking = RankingEngine::new(
            Arc::clone(&stores.candidates),
            Arc::clone(&stores.parties),
            Arc::clone(&cache),
            momentum,
            intelligence.clone(),
            config.ranking.clone(),
            ttl,
        );
        let leaderboards = LeaderboardBuilder::new(
            Arc::clone(&stores.candidates),
            Arc::clone(&stores.parties),
            Arc::clone(&cache),
            ttl,
        );
        let orchestrator = EventsOrchestrator::new(
            Arc::clone(&stores.candidates),
            Arc::clone(&stores.events),
            intelligence,
            RecomputePipeline::event_cascade(&ranking, &leaderboards),
            Arc::clone(&notifier),
        );
        let vote_cascade = RecomputePipeline::vote_cascade(&ranking, &leaderboards);
        let gate = AntiAbuseGate::new(Arc::clone(&stores.votes), config.abuse.clone());

        Ok(Self {
            stores,
            cache,
            config,
            ranking,
            leaderboards,
            gate,
            orchestrator,
            vote_cascade,
            notifier,
        })
    }

    /// Store handles, for seeding and inspection.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Anti-abuse gate, for block-list management.
    #[must_use]
    pub fn gate(&self) -> &AntiAbuseGate {
        &self.gate
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ----- reads -----

    /// Final score, cached or recomputed.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown candidates; storage errors propagate.
    pub fn get_score(&self, id: CandidateId) -> RankResult<ScoreBreakdown> {
        self.ranking.get_score(id)
    }

    /// Force a recompute of one candidate's final score.
    ///
    /// # Errors
    ///
    /// See [`ScoringService::get_score`].
    pub fn recompute_score(&self, id: CandidateId) -> RankResult<ScoreBreakdown> {
        self.ranking.recompute(id)
    }

    /// Momentum breakdown, cached or recomputed.
    ///
    /// # Errors
    ///
    /// See [`ScoringService::get_score`].
    pub fn get_momentum(&self, id: CandidateId) -> RankResult<MomentumBreakdown> {
        self.ranking.momentum().get(id)
    }

    /// Intelligence breakdown, cached or recomputed.
    ///
    /// # Errors
    ///
    /// See [`ScoringService::get_score`].
    pub fn get_intelligence(&self, id: CandidateId) -> RankResult<IntelligenceBreakdown> {
        self.ranking.intelligence().get(id)
    }

    /// Party standing, cached or recomputed.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown parties; storage errors propagate.
    pub fn get_party_score(&self, id: PartyId) -> RankResult<PartyStanding> {
        self.ranking.get_party_score(id)
    }

    /// Leaderboard by name: `"global"`, `"parties"` or a position category.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn get_leaderboard(&self, name: &str) -> RankResult<Leaderboard> {
        self.leaderboards.get(&LeaderboardScope::parse(name))
    }

    /// Recompute every candidate and party.
    ///
    /// # Errors
    ///
    /// Listing failures abort; per-subject failures are reported.
    pub fn recompute_all(&self) -> RankResult<SweepReport> {
        sweep::recompute_all(
            self.stores.candidates.as_ref(),
            self.stores.parties.as_ref(),
            &self.ranking,
            &self.leaderboards,
        )
    }

    // ----- votes -----

    /// Evaluate an identity without a target and without recording anything.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn check_voter_admission(&self, identity: &VoterIdentity) -> RankResult<AdmissionDecision> {
        self.gate.check(identity, None)
    }

    /// Cast a vote as of now.
    ///
    /// # Errors
    ///
    /// See [`ScoringService::cast_vote_at`].
    pub fn cast_vote(&self, identity: &VoterIdentity, candidate: CandidateId) -> RankResult<VoteReceipt> {
        self.cast_vote_at(identity, candidate, Utc::now())
    }

    /// Gate, record and cascade one vote.
    ///
    /// The vote is refused when the gate blocks it, when its risk reaches
    /// the configured deny level, or when the identity already reached the
    /// ceiling for the candidate's position category.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown candidates, `Blocked` for refused votes;
    /// storage errors propagate.
    pub fn cast_vote_at(
        &self,
        identity: &VoterIdentity,
        candidate_id: CandidateId,
        now: DateTime<Utc>,
    ) -> RankResult<VoteReceipt> {
        let candidate = self
            .stores
            .candidates
            .get(candidate_id)?
            .ok_or(ExecutionError::CandidateNotFound { id: candidate_id })?;
        if !candidate.active {
            return Err(deny(identity, "candidate is not active"));
        }

        let decision = self.gate.check_at(identity, Some(candidate_id), now)?;
        if !decision.admitted || decision.risk >= self.config.votes.deny_at {
            return Err(deny(identity, &decision.summary()));
        }

        let policy = &self.config.votes;
        let ceiling = policy.ceiling_for(&candidate.category);
        let window = TimeWindow::trailing(now, ChronoDuration::hours(policy.ceiling_window_hours));
        let cast = self.stores.votes.count_by_identity(
            &identity.key(),
            &window,
            &VoteTarget::Category(candidate.category.clone()),
        )?;
        if cast >= ceiling {
            return Err(deny(
                identity,
                &format!("ceiling of {ceiling} votes for '{}' reached", candidate.category),
            ));
        }

        let vote = Vote::new(identity, candidate_id, candidate.category.clone(), now);
        self.stores.votes.record(vote.clone())?;
        let popularity_count = self.stores.candidates.increment_popularity(candidate_id)?;

        let cascade = self
            .vote_cascade
            .run(&CascadeTarget::new(candidate_id, candidate.party_id))?;
        cascade.publish(self.notifier.as_ref());
        info!(candidate = %candidate_id, popularity_count, risk = %decision.risk, "vote admitted");

        Ok(VoteReceipt {
            vote,
            decision,
            popularity_count,
            cascade,
        })
    }

    /// Block a network address.
    ///
    /// # Errors
    ///
    /// Internal error on a poisoned lock.
    pub fn block_address(&self, address: &str) -> RankResult<bool> {
        self.gate.block_address(address)
    }

    /// Unblock a network address.
    ///
    /// # Errors
    ///
    /// Internal error on a poisoned lock.
    pub fn unblock_address(&self, address: &str) -> RankResult<bool> {
        self.gate.unblock_address(address)
    }

    /// Block a client fingerprint.
    ///
    /// # Errors
    ///
    /// Internal error on a poisoned lock.
    pub fn block_fingerprint(&self, fingerprint: &str) -> RankResult<bool> {
        self.gate.block_fingerprint(fingerprint)
    }

    /// Unblock a client fingerprint.
    ///
    /// # Errors
    ///
    /// Internal error on a poisoned lock.
    pub fn unblock_fingerprint(&self, fingerprint: &str) -> RankResult<bool> {
        self.gate.unblock_fingerprint(fingerprint)
    }

    // ----- moderation -----

    /// See [`EventsOrchestrator::create_event`].
    ///
    /// # Errors
    ///
    /// `InvalidInput` or `NotFound`; storage errors propagate.
    pub fn create_event(&self, input: NewEvent) -> RankResult<ModerationEvent> {
        self.orchestrator.create_event(input)
    }

    /// See [`EventsOrchestrator::validate_event`].
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidState`; storage errors propagate.
    pub fn validate_event(&self, id: EventId) -> RankResult<EventOutcome> {
        self.orchestrator.validate_event(id)
    }

    /// See [`EventsOrchestrator::reject_event`].
    ///
    /// # Errors
    ///
    /// `NotFound` or `InvalidState`; storage errors propagate.
    pub fn reject_event(&self, id: EventId) -> RankResult<EventOutcome> {
        self.orchestrator.reject_event(id)
    }

    /// See [`EventsOrchestrator::delete_event`].
    ///
    /// # Errors
    ///
    /// `NotFound`; storage errors propagate.
    pub fn delete_event(&self, id: EventId) -> RankResult<EventOutcome> {
        self.orchestrator.delete_event(id)
    }

    /// See [`EventsOrchestrator::list_events`].
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn list_events(&self, candidate: CandidateId) -> RankResult<Vec<ModerationEvent>> {
        self.orchestrator.list_events(candidate)
    }

    /// See [`EventsOrchestrator::update_integrity_risk`].
    ///
    /// # Errors
    ///
    /// `InvalidInput` or `NotFound`; storage errors propagate.
    pub fn update_integrity_risk(
        &self,
        id: CandidateId,
        integrity: Option<f64>,
        risk: Option<f64>,
    ) -> RankResult<CascadeReport> {
        self.orchestrator.update_integrity_risk(id, integrity, risk)
    }
}

impl FullRecompute for ScoringService {
    fn recompute_all(&self) -> RankResult<SweepReport> {
        ScoringService::recompute_all(self)
    }
}

fn deny(identity: &VoterIdentity, reason: &str) -> crate::error::RankError {
    warn!(voter = %identity, reason, "vote denied");
    ExecutionError::VoteDenied {
        reason: reason.to_string(),
    }
    .into()
}
