//! Anti-abuse gate for the vote write path.
//!
//! The gate is consulted before a vote is recorded. It never writes votes
//! itself; it only reads per-identity counters and the runtime block list.
//! Every rule runs even after an earlier one fired so the decision carries
//! the full list of issues; only the block list short-circuits.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::candidate::CandidateId;
use crate::config::AbuseLimits;
use crate::error::{RankError, RankResult};
use crate::storage::VoteStore;
use crate::time::TimeWindow;
use crate::vote::{VoteTarget, VoterIdentity};

/// Ordered risk level. `Blocked` is the only level that refuses admission
/// at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// No rule fired.
    Low,
    /// Suspicious but tolerated.
    Medium,
    /// Likely automated.
    High,
    /// Refused outright.
    Blocked,
}

impl RiskLevel {
    /// The higher of two levels. Risk is only ever raised.
    #[must_use]
    pub fn raise(self, to: Self) -> Self {
        self.max(to)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// A rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseIssue {
    /// Identity or fingerprint is on the block list.
    BlockListed,
    /// Too many votes in the burst window.
    Burst,
    /// Too many votes in the last hour.
    HourlyLimit,
    /// Too many votes in the last day.
    DailyLimit,
    /// Too many votes for the same target.
    RepeatedTarget,
    /// Consecutive votes too close together.
    TooRapid,
}

impl AbuseIssue {
    /// Stable issue code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::BlockListed => "blocked",
            Self::Burst => "burst",
            Self::HourlyLimit => "hourly limit",
            Self::DailyLimit => "daily limit",
            Self::RepeatedTarget => "repeated target",
            Self::TooRapid => "too rapid",
        }
    }
}

impl fmt::Display for AbuseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// `risk != Blocked`.
    pub admitted: bool,
    /// Highest level raised by any rule.
    pub risk: RiskLevel,
    /// Rules that fired, in evaluation order.
    pub issues: Vec<AbuseIssue>,
}

impl AdmissionDecision {
    fn from_risk(risk: RiskLevel, issues: Vec<AbuseIssue>) -> Self {
        Self {
            admitted: risk != RiskLevel::Blocked,
            risk,
            issues,
        }
    }

    /// Whether `issue` fired.
    #[must_use]
    pub fn has(&self, issue: AbuseIssue) -> bool {
        self.issues.contains(&issue)
    }

    /// Issue codes joined for logs and error messages.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return self.risk.to_string();
        }
        let codes: Vec<&str> = self.issues.iter().map(|i| i.code()).collect();
        format!("{} ({})", self.risk, codes.join(", "))
    }
}

/// Multi-window rate limiter plus block list.
pub struct AntiAbuseGate {
    votes: Arc<dyn VoteStore>,
    limits: AbuseLimits,
    blocked_addresses: RwLock<HashSet<String>>,
    blocked_fingerprints: RwLock<HashSet<String>>,
}

fn poisoned(what: &str) -> RankError {
    RankError::internal(format!("{what} lock poisoned"))
}

impl AntiAbuseGate {
    /// Create a gate with an empty block list.
    #[must_use]
    pub fn new(votes: Arc<dyn VoteStore>, limits: AbuseLimits) -> Self {
        Self {
            votes,
            limits,
            blocked_addresses: RwLock::new(HashSet::new()),
            blocked_fingerprints: RwLock::new(HashSet::new()),
        }
    }

    /// Thresholds in use.
    #[must_use]
    pub fn limits(&self) -> &AbuseLimits {
        &self.limits
    }

    /// Check as of now.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn check(&self, identity: &VoterIdentity, target: Option<CandidateId>) -> RankResult<AdmissionDecision> {
        self.check_at(identity, target, Utc::now())
    }

    /// Evaluate every rule for an attempt at `now`.
    ///
    /// The repeated-target rule only runs when `target` is given.
    ///
    /// # Errors
    ///
    /// Storage errors propagate.
    pub fn check_at(
        &self,
        identity: &VoterIdentity,
        target: Option<CandidateId>,
        now: DateTime<Utc>,
    ) -> RankResult<AdmissionDecision> {
        if self.is_blocked(identity)? {
            info!(voter = %identity, "vote attempt from blocked identity");
            return Ok(AdmissionDecision::from_risk(RiskLevel::Blocked, vec![AbuseIssue::BlockListed]));
        }

        let key = identity.key();
        let limits = &self.limits;
        let mut risk = RiskLevel::Low;
        let mut issues = Vec::new();

        let attempts_in = |span: Duration, filter: &VoteTarget| -> RankResult<usize> {
            let window = TimeWindow::trailing(now, span);
            Ok(self.votes.count_by_identity(&key, &window, filter)? + 1)
        };

        if attempts_in(Duration::seconds(limits.burst_window_secs), &VoteTarget::Any)? >= limits.burst_limit {
            risk = risk.raise(RiskLevel::High);
            issues.push(AbuseIssue::Burst);
        }
        if attempts_in(Duration::hours(1), &VoteTarget::Any)? >= limits.hourly_limit {
            risk = risk.raise(RiskLevel::High);
            issues.push(AbuseIssue::HourlyLimit);
        }
        if attempts_in(Duration::hours(24), &VoteTarget::Any)? >= limits.daily_limit {
            risk = risk.raise(RiskLevel::Blocked);
            issues.push(AbuseIssue::DailyLimit);
        }
        if let Some(candidate) = target {
            let same = attempts_in(
                Duration::hours(limits.repeat_target_window_hours),
                &VoteTarget::Candidate(candidate),
            )?;
            if same > limits.repeat_target_limit {
                risk = risk.raise(RiskLevel::Medium);
                issues.push(AbuseIssue::RepeatedTarget);
            }
        }

        // The attempt itself is the most recent vote.
        if let Some(last) = self.votes.recent_timestamps(&key, 1)?.first() {
            if now - *last < Duration::milliseconds(limits.min_vote_interval_ms) {
                risk = risk.raise(RiskLevel::High);
                issues.push(AbuseIssue::TooRapid);
            }
        }

        let decision = AdmissionDecision::from_risk(risk, issues);
        if decision.risk >= RiskLevel::High {
            warn!(voter = %identity, risk = %decision.risk, issues = %decision.summary(), "suspicious vote attempt");
        } else {
            debug!(voter = %identity, risk = %decision.risk, "vote attempt checked");
        }
        Ok(decision)
    }

    /// Whether the address or fingerprint is block-listed.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a block-list lock is poisoned.
    pub fn is_blocked(&self, identity: &VoterIdentity) -> RankResult<bool> {
        let addresses = self.blocked_addresses.read().map_err(|_| poisoned("address block list"))?;
        if addresses.contains(&identity.address) {
            return Ok(true);
        }
        drop(addresses);
        let fingerprints = self
            .blocked_fingerprints
            .read()
            .map_err(|_| poisoned("fingerprint block list"))?;
        Ok(fingerprints.contains(&identity.fingerprint))
    }

    /// Block a network address. Returns false if it was already blocked.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn block_address(&self, address: &str) -> RankResult<bool> {
        let added = self
            .blocked_addresses
            .write()
            .map_err(|_| poisoned("address block list"))?
            .insert(address.trim().to_string());
        info!(address, added, "address blocked");
        Ok(added)
    }

    /// Unblock a network address. Returns false if it was not blocked.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn unblock_address(&self, address: &str) -> RankResult<bool> {
        let removed = self
            .blocked_addresses
            .write()
            .map_err(|_| poisoned("address block list"))?
            .remove(address.trim());
        info!(address, removed, "address unblocked");
        Ok(removed)
    }

    /// Block a client fingerprint. Returns false if it was already blocked.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn block_fingerprint(&self, fingerprint: &str) -> RankResult<bool> {
        let added = self
            .blocked_fingerprints
            .write()
            .map_err(|_| poisoned("fingerprint block list"))?
            .insert(fingerprint.trim().to_string());
        info!(fingerprint, added, "fingerprint blocked");
        Ok(added)
    }

    /// Unblock a client fingerprint. Returns false if it was not blocked.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn unblock_fingerprint(&self, fingerprint: &str) -> RankResult<bool> {
        let removed = self
            .blocked_fingerprints
            .write()
            .map_err(|_| poisoned("fingerprint block list"))?
            .remove(fingerprint.trim());
        info!(fingerprint, removed, "fingerprint unblocked");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::InMemoryVoteStore;
    use crate::vote::Vote;

    fn gate() -> (Arc<InMemoryVoteStore>, AntiAbuseGate) {
        let votes = Arc::new(InMemoryVoteStore::new());
        let gate = AntiAbuseGate::new(votes.clone(), AbuseLimits::default());
        (votes, gate)
    }

    fn voter() -> VoterIdentity {
        VoterIdentity::new("203.0.113.7", "fp-abc")
    }

    #[test]
    fn clean_identity_is_low() {
        let (_, gate) = gate();
        let d = gate.check(&voter(), Some(CandidateId::new())).unwrap();
        assert!(d.admitted);
        assert_eq!(d.risk, RiskLevel::Low);
        assert!(d.issues.is_empty());
    }

    #[test]
    fn burst_fires_on_fifth_attempt_within_a_minute() {
        let (votes, gate) = gate();
        let start = Utc::now();
        let v = voter();
        // 0s, 14s, 28s, 42s recorded; the attempt at 56s is the fifth.
        for i in 0..4 {
            let target = CandidateId::new();
            let at = start + Duration::seconds(14 * i);
            let d = gate.check_at(&v, Some(target), at).unwrap();
            assert!(!d.has(AbuseIssue::Burst), "attempt {i}");
            votes.record(Vote::new(&v, target, "senator", at)).unwrap();
        }
        let d = gate
            .check_at(&v, Some(CandidateId::new()), start + Duration::seconds(56))
            .unwrap();
        assert!(d.has(AbuseIssue::Burst));
        assert!(d.risk >= RiskLevel::High);
        assert!(d.admitted);
    }

    #[test]
    fn two_minute_spacing_never_bursts() {
        let (votes, gate) = gate();
        let start = Utc::now();
        let v = voter();
        for i in 0..10 {
            let target = CandidateId::new();
            let at = start + Duration::minutes(2 * i);
            let d = gate.check_at(&v, Some(target), at).unwrap();
            assert!(!d.has(AbuseIssue::Burst));
            assert_eq!(d.risk, RiskLevel::Low);
            votes.record(Vote::new(&v, target, "senator", at)).unwrap();
        }
    }

    #[test]
    fn repeated_target_is_medium() {
        let (votes, gate) = gate();
        let start = Utc::now();
        let v = voter();
        let target = CandidateId::new();
        for i in 0..3 {
            votes
                .record(Vote::new(&v, target, "senator", start + Duration::minutes(10 * i)))
                .unwrap();
        }
        let d = gate.check_at(&v, Some(target), start + Duration::minutes(40)).unwrap();
        assert_eq!(d.issues, vec![AbuseIssue::RepeatedTarget]);
        assert_eq!(d.risk, RiskLevel::Medium);

        // Without a target the rule does not apply.
        let d = gate.check_at(&v, None, start + Duration::minutes(40)).unwrap();
        assert!(d.issues.is_empty());
    }

    #[test]
    fn too_rapid_against_last_vote() {
        let (votes, gate) = gate();
        let now = Utc::now();
        let v = voter();
        votes.record(Vote::new(&v, CandidateId::new(), "senator", now)).unwrap();
        let d = gate
            .check_at(&v, None, now + Duration::milliseconds(1_500))
            .unwrap();
        assert!(d.has(AbuseIssue::TooRapid));
        assert_eq!(d.risk, RiskLevel::High);

        let d = gate.check_at(&v, None, now + Duration::seconds(3)).unwrap();
        assert!(!d.has(AbuseIssue::TooRapid));
    }

    #[test]
    fn hourly_limit_is_high() {
        let (votes, gate) = gate();
        let now = Utc::now();
        let heavy = voter();
        let steady = VoterIdentity::new("203.0.113.8", "fp-def");

        // Two minutes apart, so no burst; the newest is two minutes old.
        for i in 0..29 {
            let at = now - Duration::minutes(58 - 2 * i);
            votes.record(Vote::new(&heavy, CandidateId::new(), "senator", at)).unwrap();
            if i > 0 {
                votes.record(Vote::new(&steady, CandidateId::new(), "senator", at)).unwrap();
            }
        }

        let d = gate.check_at(&heavy, Some(CandidateId::new()), now).unwrap();
        assert_eq!(d.issues, vec![AbuseIssue::HourlyLimit]);
        assert_eq!(d.risk, RiskLevel::High);
        assert!(d.admitted);

        // 28 prior votes make the 29th attempt, one short of the limit.
        let d = gate.check_at(&steady, Some(CandidateId::new()), now).unwrap();
        assert!(!d.has(AbuseIssue::HourlyLimit));
        assert_eq!(d.risk, RiskLevel::Low);
    }

    #[test]
    fn daily_limit_blocks() {
        let votes = Arc::new(InMemoryVoteStore::new());
        let limits = AbuseLimits {
            daily_limit: 3,
            ..AbuseLimits::default()
        };
        let gate = AntiAbuseGate::new(votes.clone(), limits);
        let v = voter();
        let now = Utc::now();
        for h in 1..=2 {
            votes
                .record(Vote::new(&v, CandidateId::new(), "senator", now - Duration::hours(h)))
                .unwrap();
        }
        let d = gate.check_at(&v, None, now).unwrap();
        assert!(d.has(AbuseIssue::DailyLimit));
        assert_eq!(d.risk, RiskLevel::Blocked);
        assert!(!d.admitted);
    }

    #[test]
    fn block_list_short_circuits() {
        let (_, gate) = gate();
        let v = voter();
        assert!(gate.block_fingerprint("fp-abc").unwrap());
        assert!(!gate.block_fingerprint("fp-abc").unwrap());

        let d = gate.check(&v, None).unwrap();
        assert!(!d.admitted);
        assert_eq!(d.issues, vec![AbuseIssue::BlockListed]);

        assert!(gate.unblock_fingerprint("fp-abc").unwrap());
        assert!(gate.check(&v, None).unwrap().admitted);

        gate.block_address("203.0.113.7").unwrap();
        assert!(gate.is_blocked(&v).unwrap());
        assert!(gate.unblock_address("203.0.113.7").unwrap());
        assert!(!gate.is_blocked(&v).unwrap());
    }

    #[test]
    fn risk_is_never_downgraded() {
        assert_eq!(RiskLevel::High.raise(RiskLevel::Medium), RiskLevel::High);
        assert_eq!(RiskLevel::Low.raise(RiskLevel::Medium), RiskLevel::Medium);
        assert!(RiskLevel::Blocked > RiskLevel::High);
    }
}
