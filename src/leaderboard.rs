//! Cached ranked lists.
//!
//! One list per position category, one global list over every active
//! candidate and one list of parties. Lists are built from persisted scores
//! and dropped as a family whenever any score changes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{keys, ScoreCache, ScoreCacheExt};
use crate::candidate::{Candidate, CandidateId, PartyId};
use crate::error::RankResult;
use crate::ranking::standing_order;
use crate::storage::{CandidateStore, PartyStore};

/// Which list to read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "category")]
pub enum LeaderboardScope {
    /// Every active candidate.
    Global,
    /// Active candidates of one position category.
    Category(String),
    /// Every party by standing.
    Parties,
}

impl LeaderboardScope {
    /// Map a request name: `"global"` and `"parties"` are reserved, anything
    /// else names a position category.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("global") || name.is_empty() {
            Self::Global
        } else if name.eq_ignore_ascii_case("parties") {
            Self::Parties
        } else {
            Self::Category(name.to_ascii_lowercase())
        }
    }

    /// Cache key for this list.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Self::Global => keys::LEADERBOARD_GLOBAL.to_string(),
            Self::Parties => keys::LEADERBOARD_PARTIES.to_string(),
            Self::Category(c) => keys::leaderboard_category(c),
        }
    }
}

impl fmt::Display for LeaderboardScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Parties => write!(f, "parties"),
            Self::Category(c) => write!(f, "category:{c}"),
        }
    }
}

/// Ranked subject.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Candidate(CandidateId),
    Party(PartyId),
}

/// One row of a leaderboard. Positions start at 1.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub position: u32,
    pub subject: Subject,
    pub name: String,
    pub score: f64,
}

/// A ranked list as cached.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub scope: LeaderboardScope,
    pub entries: Vec<LeaderboardEntry>,
    pub generated_at: DateTime<Utc>,
}

impl Leaderboard {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn position(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

fn rank_candidates(mut list: Vec<Candidate>) -> Vec<LeaderboardEntry> {
    list.retain(|c| c.active);
    list.sort_by(|a, b| b.final_score.total_cmp(&a.final_score).then_with(|| a.id.cmp(&b.id)));
    list.into_iter()
        .enumerate()
        .map(|(i, c)| LeaderboardEntry {
            position: position(i),
            subject: Subject::Candidate(c.id),
            name: c.name,
            score: c.final_score,
        })
        .collect()
}

/// Builds and caches leaderboards.
#[derive(Clone)]
pub struct LeaderboardBuilder {
    candidates: Arc<dyn CandidateStore>,
    parties: Arc<dyn PartyStore>,
    cache: Arc<dyn ScoreCache>,
    ttl: Duration,
}

impl LeaderboardBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(
        candidates: Arc<dyn CandidateStore>,
        parties: Arc<dyn PartyStore>,
        cache: Arc<dyn ScoreCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            candidates,
            parties,
            cache,
            ttl,
        }
    }

    /// Cached list, rebuilding on miss.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn get(&self, scope: &LeaderboardScope) -> RankResult<Leaderboard> {
        let key = scope.cache_key();
        if let Some(hit) = self.cache.get_as::<Leaderboard>(&key) {
            return Ok(hit);
        }
        let board = self.build(scope)?;
        self.cache.set_as(&key, &board, Some(self.ttl));
        Ok(board)
    }

    /// Build a list from persisted scores without touching the cache.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn build(&self, scope: &LeaderboardScope) -> RankResult<Leaderboard> {
        let entries = match scope {
            LeaderboardScope::Global => rank_candidates(self.candidates.list_all()?),
            LeaderboardScope::Category(category) => rank_candidates(self.candidates.list_by_category(category)?),
            LeaderboardScope::Parties => {
                let mut parties = Vec::new();
                for id in self.parties.list_ids()? {
                    if let Some(p) = self.parties.get(id)? {
                        parties.push(p);
                    }
                }
                parties.sort_by(standing_order);
                parties
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| LeaderboardEntry {
                        position: position(i),
                        subject: Subject::Party(p.id),
                        name: p.name,
                        score: p.score,
                    })
                    .collect()
            }
        };
        debug!(scope = %scope, rows = entries.len(), "leaderboard built");
        Ok(Leaderboard {
            scope: scope.clone(),
            entries,
            generated_at: Utc::now(),
        })
    }

    /// Drop every cached list, returning how many were removed.
    pub fn invalidate_all(&self) -> usize {
        self.cache.delete_pattern(keys::LEADERBOARD_PATTERN)
    }
}
