//! # tallyrank
//!
//! Near-real-time ranking of candidates. Four independently computed
//! signals (popularity, intelligence, momentum and integrity) are combined
//! into one bounded final score per candidate and averaged per party, while
//! the vote write path that feeds popularity and momentum is guarded by an
//! anti-abuse gate.
//!
//! ## Components
//!
//! - **Score cache**: TTL key-value cache with distributed-to-local fallback
//! - **Momentum**: vote pace over overlapping windows
//! - **Intelligence**: integrity, risk and validated moderation history
//! - **Ranking**: final score, party standings and leaderboards
//! - **Orchestrator**: moderation event lifecycle and the recompute cascade
//! - **Anti-abuse gate**: multi-window rate limits and a block list
//!
//! ## Usage
//!
//! ```rust
//! use tallyrank::{Candidate, CandidateStore, ScoringConfig, ScoringService, VoterIdentity};
//!
//! let service = ScoringService::in_memory(ScoringConfig::default())?;
//! let ada = Candidate::new("Ada", "senator").with_integrity_risk(80.0, 10.0);
//! let id = ada.id;
//! service.stores().candidates.insert(ada)?;
//!
//! service.cast_vote(&VoterIdentity::new("203.0.113.9", "browser-1"), id)?;
//! let score = service.get_score(id)?;
//! assert!((0.0..=100.0).contains(&score.final_score));
//! # Ok::<(), tallyrank::RankError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// Core types
pub mod candidate;
pub mod config;
pub mod error;
pub mod event;
pub mod time;
pub mod vote;

// Persistence contract and cache
pub mod cache;
pub mod storage;

// Engines
pub mod abuse;
pub mod intelligence;
pub mod leaderboard;
pub mod momentum;
pub mod ranking;

// Orchestration
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod service;
pub mod sweep;

pub use abuse::{AbuseIssue, AdmissionDecision, AntiAbuseGate, RiskLevel};
pub use cache::{CacheStats, FallbackCache, LocalCache, RemoteBackend, ScoreCache, ScoreCacheExt};
pub use candidate::{Candidate, CandidateId, CandidatePatch, Party, PartyId};
pub use config::ScoringConfig;
pub use error::{ErrorKind, ExecutionError, RankError, RankResult, ValidationError};
pub use event::{EventCategory, EventId, EventState, ModerationEvent, NewEvent};
pub use leaderboard::{Leaderboard, LeaderboardScope};
pub use momentum::{MomentumBreakdown, Tendency};
pub use notify::{ChannelNotifier, NoopNotifier, Notifier, ScoreUpdate};
pub use ranking::{PartyStanding, ScoreBreakdown};
pub use runtime::ScoringRuntime;
pub use service::{ScoringService, VoteReceipt};
pub use storage::{CandidateStore, EventStore, PartyStore, StorageError, Stores, VoteStore};
pub use sweep::{SweepReport, SweepRunner};
pub use time::TimeWindow;
pub use vote::{Vote, VoterIdentity};
