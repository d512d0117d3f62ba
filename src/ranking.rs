//! Final score composition and party standings.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{keys, ScoreCache, ScoreCacheExt};
use crate::candidate::{clamp_score, round2, CandidateId, CandidatePatch, Party, PartyId, SCORE_MAX};
use crate::config::RankingWeights;
use crate::error::{ExecutionError, RankResult};
use crate::intelligence::IntelligenceEngine;
use crate::momentum::MomentumEngine;
use crate::storage::{CandidateStore, PartyStore};

/// Weighted contribution of each term to the final score.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreContributions {
    pub popularity: f64,
    pub intelligence: f64,
    pub momentum: f64,
    pub integrity: f64,
}

/// Cached result of a final score computation.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub candidate_id: CandidateId,
    pub final_score: f64,
    pub popularity_score: f64,
    pub intelligence: f64,
    pub momentum: f64,
    pub integrity: f64,
    pub contributions: ScoreContributions,
    pub computed_at: DateTime<Utc>,
}

/// `min(100, count / divisor)`.
#[must_use]
pub fn popularity_score(popularity_count: u64, weights: &RankingWeights) -> f64 {
    (popularity_count as f64 / weights.popularity_divisor).min(SCORE_MAX)
}

/// Compose the final score from its inputs.
///
/// Returns the clamped score rounded to two decimals together with the
/// per-term contributions.
///
/// # Examples
///
/// ```
/// use tallyrank::config::RankingWeights;
/// use tallyrank::ranking::compose_final_score;
///
/// let (score, _) = compose_final_score(10_000, 80.0, 50.0, 100.0, &RankingWeights::default());
/// assert_eq!(score, 85.0);
/// ```
#[must_use]
pub fn compose_final_score(
    popularity_count: u64,
    intelligence: f64,
    momentum: f64,
    integrity: f64,
    weights: &RankingWeights,
) -> (f64, ScoreContributions) {
    let contributions = ScoreContributions {
        popularity: popularity_score(popularity_count, weights) * weights.popularity,
        intelligence: intelligence * weights.intelligence,
        momentum: momentum * weights.momentum,
        integrity: integrity * weights.integrity,
    };
    let sum = contributions.popularity + contributions.intelligence + contributions.momentum + contributions.integrity;
    (round2(clamp_score(sum)), contributions)
}

/// Party score and position after a recompute.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyStanding {
    pub party_id: PartyId,
    pub name: String,
    pub score: f64,
    pub rank: Option<u32>,
    pub member_count: usize,
    pub computed_at: DateTime<Utc>,
}

impl From<Party> for PartyStanding {
    fn from(p: Party) -> Self {
        Self {
            party_id: p.id,
            name: p.name,
            score: p.score,
            rank: p.rank,
            member_count: p.member_count,
            computed_at: p.updated_at,
        }
    }
}

/// Highest score first; equal scores ordered by ascending party id.
pub(crate) fn standing_order(a: &Party, b: &Party) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Computes and caches final scores and party standings.
#[derive(Clone)]
pub struct RankingEngine {
    candidates: Arc<dyn CandidateStore>,
    parties: Arc<dyn PartyStore>,
    cache: Arc<dyn ScoreCache>,
    momentum: MomentumEngine,
    intelligence: IntelligenceEngine,
    weights: RankingWeights,
    ttl: Duration,
}

impl RankingEngine {
    /// Create an engine on top of the momentum and intelligence engines.
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        parties: Arc<dyn PartyStore>,
        cache: Arc<dyn ScoreCache>,
        momentum: MomentumEngine,
        intelligence: IntelligenceEngine,
        weights: RankingWeights,
        ttl: Duration,
    ) -> Self {
        Self {
            candidates,
            parties,
            cache,
            momentum,
            intelligence,
            weights,
            ttl,
        }
    }

    /// Momentum engine in use.
    #[must_use]
    pub fn momentum(&self) -> &MomentumEngine {
        &self.momentum
    }

    /// Intelligence engine in use.
    #[must_use]
    pub fn intelligence(&self) -> &IntelligenceEngine {
        &self.intelligence
    }

    /// Cached final score, recomputing on miss.
    ///
    /// # Errors
    ///
    /// `CandidateNotFound` for unknown IDs; storage errors propagate.
    pub fn get_score(&self, id: CandidateId) -> RankResult<ScoreBreakdown> {
        if let Some(hit) = self.cache.get_as::<ScoreBreakdown>(&keys::score(id)) {
            debug!(candidate = %id, "score cache hit");
            return Ok(hit);
        }
        self.recompute(id)
    }

    /// Recompute the final score, pulling momentum and intelligence through
    /// their own caches, and write it through.
    ///
    /// # Errors
    ///
    /// See [`RankingEngine::get_score`].
    pub fn recompute(&self, id: CandidateId) -> RankResult<ScoreBreakdown> {
        let momentum = self.momentum.get(id)?.score;
        let intelligence = self.intelligence.get(id)?.score;
        let candidate = self
            .candidates
            .get(id)?
            .ok_or(ExecutionError::CandidateNotFound { id })?;

        let (final_score, contributions) = compose_final_score(
            candidate.popularity_count,
            intelligence,
            momentum,
            candidate.integrity,
            &self.weights,
        );
        let breakdown = ScoreBreakdown {
            candidate_id: id,
            final_score,
            popularity_score: popularity_score(candidate.popularity_count, &self.weights),
            intelligence,
            momentum,
            integrity: candidate.integrity,
            contributions,
            computed_at: Utc::now(),
        };

        self.candidates.update_fields(id, &CandidatePatch::final_score(final_score))?;
        self.cache.set_as(&keys::score(id), &breakdown, Some(self.ttl));
        debug!(candidate = %id, final_score, "score recomputed");
        Ok(breakdown)
    }

    /// Drop the cached final score.
    pub fn invalidate(&self, id: CandidateId) {
        self.cache.delete(&keys::score(id));
    }

    /// Cached party standing, recomputing on miss.
    ///
    /// # Errors
    ///
    /// `PartyNotFound` for unknown IDs; storage errors propagate.
    pub fn get_party_score(&self, id: PartyId) -> RankResult<PartyStanding> {
        if let Some(hit) = self.cache.get_as::<PartyStanding>(&keys::party(id)) {
            return Ok(hit);
        }
        self.recompute_party(id)
    }

    /// Recompute one party's mean score, then every party's rank position.
    ///
    /// # Errors
    ///
    /// See [`RankingEngine::get_party_score`].
    pub fn recompute_party(&self, id: PartyId) -> RankResult<PartyStanding> {
        let party = self.parties.get(id)?.ok_or(ExecutionError::PartyNotFound { id })?;

        let members = self.candidates.list_active_members(id)?;
        let mut total = 0.0;
        for member in &members {
            total += self.get_score(*member)?.final_score;
        }
        let score = if members.is_empty() {
            0.0
        } else {
            round2(total / members.len() as f64)
        };

        self.parties.update_standing(id, score, members.len(), party.rank)?;
        let standing = self.rerank_parties(id)?;
        debug!(party = %id, score, members = members.len(), rank = ?standing.rank, "party recomputed");
        Ok(standing)
    }

    /// Drop every cached party standing.
    pub fn invalidate_parties(&self) {
        self.cache.delete_pattern(keys::PARTY_PATTERN);
    }

    /// Persisted parties ordered by standing.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn ranked_parties(&self) -> RankResult<Vec<Party>> {
        let mut parties = Vec::new();
        for id in self.parties.list_ids()? {
            if let Some(p) = self.parties.get(id)? {
                parties.push(p);
            }
        }
        parties.sort_by(standing_order);
        Ok(parties)
    }

    /// Re-number every party. Other parties' positions may have moved, so all
    /// cached standings are dropped and only `focus` is re-cached.
    fn rerank_parties(&self, focus: PartyId) -> RankResult<PartyStanding> {
        let ordered = self.ranked_parties()?;
        self.invalidate_parties();

        let mut focused = None;
        for (pos, party) in ordered.into_iter().enumerate() {
            let rank = u32::try_from(pos + 1).ok();
            let updated = self
                .parties
                .update_standing(party.id, party.score, party.member_count, rank)?;
            if updated.id == focus {
                focused = Some(PartyStanding::from(updated));
            }
        }

        let standing = focused.ok_or(ExecutionError::PartyNotFound { id: focus })?;
        self.cache.set_as(&keys::party(focus), &standing, Some(self.ttl));
        info!(party = %focus, rank = ?standing.rank, "party standings reranked");
        Ok(standing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cache::LocalCache;
    use crate::candidate::Candidate;
    use crate::config::{IntelligenceWeights, MomentumConfig};
    use crate::storage::{InMemoryCandidateStore, InMemoryEventStore, InMemoryPartyStore, InMemoryVoteStore};

    struct Fixture {
        candidates: Arc<InMemoryCandidateStore>,
        parties: Arc<InMemoryPartyStore>,
        cache: Arc<LocalCache>,
        engine: RankingEngine,
    }

    fn fixture() -> Fixture {
        let candidates = Arc::new(InMemoryCandidateStore::new());
        let parties = Arc::new(InMemoryPartyStore::new());
        let cache = Arc::new(LocalCache::default());
        let ttl = Duration::from_secs(300);
        let momentum = MomentumEngine::new(
            candidates.clone(),
            Arc::new(InMemoryVoteStore::new()),
            cache.clone(),
            MomentumConfig::default(),
            ttl,
        );
        let intelligence = IntelligenceEngine::new(
            candidates.clone(),
            Arc::new(InMemoryEventStore::new()),
            cache.clone(),
            IntelligenceWeights::default(),
            ttl,
        );
        let engine = RankingEngine::new(
            candidates.clone(),
            parties.clone(),
            cache.clone(),
            momentum,
            intelligence,
            RankingWeights::default(),
            ttl,
        );
        Fixture {
            candidates,
            parties,
            cache,
            engine,
        }
    }

    #[test]
    fn formula_example() {
        let (score, parts) = compose_final_score(10_000, 80.0, 50.0, 100.0, &RankingWeights::default());
        assert_eq!(score, 85.0);
        assert_eq!(parts.popularity, 40.0);
        assert_eq!(parts.intelligence, 20.0);
        assert_eq!(parts.momentum, 10.0);
        assert_eq!(parts.integrity, 15.0);
    }

    #[test]
    fn popularity_saturates() {
        let w = RankingWeights::default();
        assert_eq!(popularity_score(50, &w), 0.5);
        assert_eq!(popularity_score(1_000_000, &w), 100.0);
    }

    #[test]
    fn rounding_to_two_decimals() {
        let (score, _) = compose_final_score(1, 33.333, 0.0, 0.0, &RankingWeights::default());
        // 0.004 + 8.33325
        assert_eq!(score, 8.34);
    }

    #[test]
    fn recompute_writes_through_and_caches() {
        let f = fixture();
        let c = Candidate::new("Ada", "senator")
            .with_integrity_risk(100.0, 0.0)
            .with_popularity(10_000);
        let id = c.id;
        f.candidates.insert(c).unwrap();

        let b = f.engine.recompute(id).unwrap();
        // 40 + 72.5*0.25 + 0 + 15
        assert_eq!(b.final_score, 73.13);
        assert_eq!(f.candidates.get(id).unwrap().unwrap().final_score, 73.13);
        assert!(f.cache.get(&keys::score(id)).is_some());
        assert!(f.cache.get(&keys::momentum(id)).is_some());
        assert!(f.cache.get(&keys::intelligence(id)).is_some());

        let again = f.engine.recompute(id).unwrap();
        assert_eq!(again.final_score, b.final_score);
        assert_eq!(again.contributions, b.contributions);
    }

    #[test]
    fn party_mean_and_rank_order() {
        let f = fixture();
        let strong = Party::new("Strong");
        let weak = Party::new("Weak");
        let empty = Party::new("Empty");
        let (strong_id, weak_id, empty_id) = (strong.id, weak.id, empty.id);
        for p in [strong, weak, empty] {
            f.parties.insert(p).unwrap();
        }

        for (integrity, popularity) in [(100.0, 10_000), (80.0, 5_000)] {
            f.candidates
                .insert(
                    Candidate::new("S", "senator")
                        .in_party(strong_id)
                        .with_integrity_risk(integrity, 0.0)
                        .with_popularity(popularity),
                )
                .unwrap();
        }
        let mut inactive = Candidate::new("Gone", "senator").in_party(weak_id).with_popularity(1_000_000);
        inactive.active = false;
        f.candidates.insert(inactive).unwrap();
        f.candidates
            .insert(Candidate::new("W", "senator").in_party(weak_id).with_integrity_risk(0.0, 100.0))
            .unwrap();

        let s = f.engine.recompute_party(strong_id).unwrap();
        let w = f.engine.recompute_party(weak_id).unwrap();
        let e = f.engine.recompute_party(empty_id).unwrap();

        assert_eq!(s.member_count, 2);
        assert_eq!(w.member_count, 1);
        assert_eq!(e.score, 0.0);
        assert!(s.score > w.score);
        assert_eq!(e.rank, Some(3));
        assert_eq!(f.parties.get(strong_id).unwrap().unwrap().rank, Some(1));
        assert_eq!(f.parties.get(weak_id).unwrap().unwrap().rank, Some(2));

        // Only the last recomputed party is cached; the others were invalidated by reranking.
        assert!(f.cache.get(&keys::party(empty_id)).is_some());
        assert!(f.cache.get(&keys::party(strong_id)).is_none());
    }

    #[test]
    fn equal_scores_tie_break_by_id() {
        let f = fixture();
        let a = Party::new("A");
        let b = Party::new("B");
        let (lo, hi) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        f.parties.insert(a).unwrap();
        f.parties.insert(b).unwrap();

        f.engine.recompute_party(hi).unwrap();
        f.engine.recompute_party(lo).unwrap();
        assert_eq!(f.parties.get(lo).unwrap().unwrap().rank, Some(1));
        assert_eq!(f.parties.get(hi).unwrap().unwrap().rank, Some(2));
    }

    #[test]
    fn unknown_party_is_not_found() {
        let f = fixture();
        let err = f.engine.get_party_score(PartyId::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
