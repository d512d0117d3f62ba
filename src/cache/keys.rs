//! Cache key layout.
//!
//! Every cached value lives under a scoped prefix so whole families can be
//! dropped with one pattern deletion.

use crate::candidate::{CandidateId, PartyId};

/// Prefix for every leaderboard key.
pub const LEADERBOARD_PATTERN: &str = "leaderboard:*";

/// Prefix for every party standing key.
pub const PARTY_PATTERN: &str = "party:*";

/// Key of the global candidate leaderboard.
pub const LEADERBOARD_GLOBAL: &str = "leaderboard:global";

/// Key of the party leaderboard.
pub const LEADERBOARD_PARTIES: &str = "leaderboard:parties";

/// Momentum breakdown for a candidate.
#[must_use]
pub fn momentum(id: CandidateId) -> String {
    format!("momentum:{id}")
}

/// Intelligence breakdown for a candidate.
#[must_use]
pub fn intelligence(id: CandidateId) -> String {
    format!("intelligence:{id}")
}

/// Final score breakdown for a candidate.
#[must_use]
pub fn score(id: CandidateId) -> String {
    format!("score:{id}")
}

/// Aggregate standing of a party.
#[must_use]
pub fn party(id: PartyId) -> String {
    format!("party:{id}")
}

/// Leaderboard for one position category. Categories are case-folded.
#[must_use]
pub fn leaderboard_category(category: &str) -> String {
    format!("leaderboard:category:{}", category.trim().to_ascii_lowercase())
}
