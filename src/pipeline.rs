//! Ordered recompute cascade.
//!
//! A cascade is a fixed list of stages run for one candidate. All stages
//! invalidate their keys before the first stage recomputes, so a failure
//! part-way leaves later keys missing rather than stale.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidate::{CandidateId, PartyId};
use crate::error::RankResult;
use crate::intelligence::{IntelligenceBreakdown, IntelligenceEngine};
use crate::leaderboard::LeaderboardBuilder;
use crate::momentum::{MomentumBreakdown, MomentumEngine};
use crate::notify::{Notifier, ScoreUpdate};
use crate::ranking::{PartyStanding, RankingEngine, ScoreBreakdown};

/// Subject of one cascade run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeTarget {
    /// Candidate whose inputs changed.
    pub candidate_id: CandidateId,
    /// Party to re-aggregate, if any.
    pub party_id: Option<PartyId>,
}

impl CascadeTarget {
    /// Target a candidate and its party.
    #[must_use]
    pub const fn new(candidate_id: CandidateId, party_id: Option<PartyId>) -> Self {
        Self { candidate_id, party_id }
    }
}

impl fmt::Display for CascadeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.party_id {
            Some(p) => write!(f, "{} (party {p})", self.candidate_id),
            None => write!(f, "{}", self.candidate_id),
        }
    }
}

/// Results collected while the cascade runs.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub intelligence: Option<IntelligenceBreakdown>,
    pub momentum: Option<MomentumBreakdown>,
    pub score: Option<ScoreBreakdown>,
    pub party: Option<PartyStanding>,
    pub leaderboards_invalidated: usize,
    pub stages_run: Vec<String>,
}

impl CascadeReport {
    /// Updates describing what changed, in cascade order.
    #[must_use]
    pub fn updates(&self) -> Vec<ScoreUpdate> {
        let mut out = Vec::new();
        if let Some(m) = &self.momentum {
            out.push(ScoreUpdate::Momentum {
                candidate_id: m.candidate_id,
                score: m.score,
                tendency: m.tendency,
            });
        }
        if let Some(s) = &self.score {
            out.push(ScoreUpdate::Score {
                candidate_id: s.candidate_id,
                final_score: s.final_score,
            });
        }
        if let Some(p) = &self.party {
            out.push(ScoreUpdate::Party {
                party_id: p.party_id,
                score: p.score,
                rank: p.rank,
            });
        }
        if self.stages_run.iter().any(|s| s == "leaderboards") {
            out.push(ScoreUpdate::LeaderboardsInvalidated);
        }
        out
    }

    /// Hand every update to `notifier`.
    pub fn publish(&self, notifier: &dyn Notifier) {
        for update in self.updates() {
            notifier.notify(update);
        }
    }
}

/// One step of a cascade.
pub trait RecomputeStage: Send + Sync {
    /// Stage name for logs and reports.
    fn name(&self) -> &'static str;

    /// Drop every cached key this stage owns for `target`.
    fn invalidate(&self, target: &CascadeTarget);

    /// Recompute and record results in `report`.
    ///
    /// # Errors
    ///
    /// Storage and lookup errors propagate and stop the cascade.
    fn run(&self, target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()>;
}

/// Recomputes intelligence.
pub struct IntelligenceStage(pub IntelligenceEngine);

impl RecomputeStage for IntelligenceStage {
    fn name(&self) -> &'static str {
        "intelligence"
    }

    fn invalidate(&self, target: &CascadeTarget) {
        self.0.invalidate(target.candidate_id);
    }

    fn run(&self, target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()> {
        report.intelligence = Some(self.0.recompute(target.candidate_id)?);
        Ok(())
    }
}

/// Recomputes momentum.
pub struct MomentumStage(pub MomentumEngine);

impl RecomputeStage for MomentumStage {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn invalidate(&self, target: &CascadeTarget) {
        self.0.invalidate(target.candidate_id);
    }

    fn run(&self, target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()> {
        report.momentum = Some(self.0.recompute(target.candidate_id)?);
        Ok(())
    }
}

/// Recomputes the final score.
pub struct ScoreStage(pub RankingEngine);

impl RecomputeStage for ScoreStage {
    fn name(&self) -> &'static str {
        "score"
    }

    fn invalidate(&self, target: &CascadeTarget) {
        self.0.invalidate(target.candidate_id);
    }

    fn run(&self, target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()> {
        report.score = Some(self.0.recompute(target.candidate_id)?);
        Ok(())
    }
}

/// Re-aggregates the candidate's party and reranks all parties.
pub struct PartyStage(pub RankingEngine);

impl RecomputeStage for PartyStage {
    fn name(&self) -> &'static str {
        "party"
    }

    fn invalidate(&self, target: &CascadeTarget) {
        if target.party_id.is_some() {
            self.0.invalidate_parties();
        }
    }

    fn run(&self, target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()> {
        if let Some(party) = target.party_id {
            report.party = Some(self.0.recompute_party(party)?);
        }
        Ok(())
    }
}

/// Drops every cached leaderboard. Lists are rebuilt lazily on read.
pub struct LeaderboardStage(pub LeaderboardBuilder);

impl RecomputeStage for LeaderboardStage {
    fn name(&self) -> &'static str {
        "leaderboards"
    }

    fn invalidate(&self, _target: &CascadeTarget) {
        self.0.invalidate_all();
    }

    fn run(&self, _target: &CascadeTarget, report: &mut CascadeReport) -> RankResult<()> {
        // Earlier stages may have repopulated a list through a read.
        report.leaderboards_invalidated = self.0.invalidate_all();
        Ok(())
    }
}

/// Ordered list of stages.
pub struct RecomputePipeline {
    stages: Vec<Box<dyn RecomputeStage>>,
}

impl RecomputePipeline {
    /// Build from explicit stages, run in the given order.
    #[must_use]
    pub fn new(stages: Vec<Box<dyn RecomputeStage>>) -> Self {
        Self { stages }
    }

    /// Intelligence, score, party, leaderboards. Used after moderation
    /// events and direct integrity/risk edits.
    #[must_use]
    pub fn event_cascade(ranking: &RankingEngine, leaderboards: &LeaderboardBuilder) -> Self {
        Self::new(vec![
            Box::new(IntelligenceStage(ranking.intelligence().clone())),
            Box::new(ScoreStage(ranking.clone())),
            Box::new(PartyStage(ranking.clone())),
            Box::new(LeaderboardStage(leaderboards.clone())),
        ])
    }

    /// Momentum, score, party, leaderboards. Used after an admitted vote.
    #[must_use]
    pub fn vote_cascade(ranking: &RankingEngine, leaderboards: &LeaderboardBuilder) -> Self {
        Self::new(vec![
            Box::new(MomentumStage(ranking.momentum().clone())),
            Box::new(ScoreStage(ranking.clone())),
            Box::new(PartyStage(ranking.clone())),
            Box::new(LeaderboardStage(leaderboards.clone())),
        ])
    }

    /// Stage names in run order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Drop every stage's keys for `target` without recomputing.
    pub fn invalidate(&self, target: &CascadeTarget) {
        for stage in &self.stages {
            stage.invalidate(target);
        }
    }

    /// Invalidate all stages, then run them in order.
    ///
    /// # Errors
    ///
    /// The first stage error aborts the run; keys of stages that did not
    /// finish stay invalidated.
    pub fn run(&self, target: &CascadeTarget) -> RankResult<CascadeReport> {
        self.invalidate(target);

        let mut report = CascadeReport::default();
        for stage in &self.stages {
            if let Err(e) = stage.run(target, &mut report) {
                warn!(cascade = %target, stage = stage.name(), error = %e, "recompute cascade aborted");
                return Err(e);
            }
            report.stages_run.push(stage.name().to_string());
        }
        debug!(cascade = %target, stages = report.stages_run.len(), "recompute cascade finished");
        Ok(report)
    }
}
