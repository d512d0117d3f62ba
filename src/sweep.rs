//! Full recompute sweeps.
//!
//! A sweep recomputes every candidate and then every party from persisted
//! state. Sweeps may overlap with each other and with live writes; every
//! step is an idempotent recompute so concurrent runs converge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RankResult;
use crate::leaderboard::LeaderboardBuilder;
use crate::ranking::RankingEngine;
use crate::storage::{CandidateStore, PartyStore};

/// A subject that failed during a sweep.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub subject: String,
    pub error: String,
}

/// Outcome of one sweep.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub candidates_recomputed: usize,
    pub parties_recomputed: usize,
    pub failures: Vec<SweepFailure>,
    pub elapsed_ms: u64,
}

impl SweepReport {
    /// True when nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Recompute every candidate, then every party, then drop leaderboards.
///
/// Per-subject failures are collected rather than aborting the sweep.
///
/// # Errors
///
/// Only listing failures abort the sweep.
pub fn recompute_all(
    candidates: &dyn CandidateStore,
    parties: &dyn PartyStore,
    ranking: &RankingEngine,
    leaderboards: &LeaderboardBuilder,
) -> RankResult<SweepReport> {
    let started = Instant::now();
    let mut report = SweepReport::default();

    for candidate in candidates.list_all()? {
        let id = candidate.id;
        ranking.momentum().invalidate(id);
        ranking.intelligence().invalidate(id);
        match ranking.recompute(id) {
            Ok(_) => report.candidates_recomputed += 1,
            Err(e) => report.failures.push(SweepFailure {
                subject: format!("candidate {id}"),
                error: e.to_string(),
            }),
        }
    }

    for id in parties.list_ids()? {
        match ranking.recompute_party(id) {
            Ok(_) => report.parties_recomputed += 1,
            Err(e) => report.failures.push(SweepFailure {
                subject: format!("party {id}"),
                error: e.to_string(),
            }),
        }
    }

    leaderboards.invalidate_all();
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if report.is_clean() {
        info!(
            candidates = report.candidates_recomputed,
            parties = report.parties_recomputed,
            elapsed_ms = report.elapsed_ms,
            "full recompute finished"
        );
    } else {
        warn!(
            candidates = report.candidates_recomputed,
            parties = report.parties_recomputed,
            failures = report.failures.len(),
            "full recompute finished with failures"
        );
    }
    Ok(report)
}

/// Anything that can run a full sweep.
pub trait FullRecompute: Send + Sync {
    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// See [`recompute_all`].
    fn recompute_all(&self) -> RankResult<SweepReport>;
}

enum Control {
    RunNow,
    Shutdown,
}

/// Background thread running a sweep every interval, or on demand.
pub struct SweepRunner {
    control: Option<Sender<Control>>,
    join: Option<JoinHandle<()>>,
    completed: Arc<AtomicU64>,
}

impl SweepRunner {
    /// Spawn the runner. The first sweep runs after one `interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(target: Arc<dyn FullRecompute>, interval: Duration) -> std::io::Result<Self> {
        let interval = interval.max(Duration::from_millis(1));
        let (tx, rx) = bounded::<Control>(1);
        let completed = Arc::new(AtomicU64::new(0));
        let thread_completed = Arc::clone(&completed);

        let join = thread::Builder::new()
            .name("tallyrank-sweep".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(Control::RunNow) | Err(RecvTimeoutError::Timeout) => {
                        if let Err(e) = target.recompute_all() {
                            warn!(error = %e, "scheduled recompute failed");
                        }
                        thread_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self {
            control: Some(tx),
            join: Some(join),
            completed,
        })
    }

    /// Ask for an immediate sweep. Ignored if one is already queued.
    pub fn trigger(&self) {
        if let Some(tx) = &self.control {
            match tx.try_send(Control::RunNow) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => warn!("sweep runner is gone"),
            }
        }
    }

    /// Sweeps finished so far, failed ones included.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Stop the thread after any sweep in progress and wait for it.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.control.take() {
            let _ = tx.send_timeout(Control::Shutdown, Duration::from_millis(10));
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("sweep runner panicked");
            }
        }
    }
}

impl Drop for SweepRunner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::RankError;

    struct Counting {
        runs: AtomicU64,
        fail: bool,
    }

    impl FullRecompute for Counting {
        fn recompute_all(&self) -> RankResult<SweepReport> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(RankError::internal("store offline"));
            }
            Ok(SweepReport::default())
        }
    }

    fn wait_for(runner: &SweepRunner, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while runner.completed() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn trigger_runs_immediately() {
        let target = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail: false,
        });
        let mut runner = SweepRunner::start(target.clone(), Duration::from_secs(3600)).unwrap();
        runner.trigger();
        wait_for(&runner, 1);
        runner.shutdown();
        assert_eq!(target.runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn interval_keeps_running_after_failures() {
        let target = Arc::new(Counting {
            runs: AtomicU64::new(0),
            fail: true,
        });
        let runner = SweepRunner::start(target.clone(), Duration::from_millis(5)).unwrap();
        wait_for(&runner, 3);
        assert!(runner.completed() >= 3);
        drop(runner);
        assert!(target.runs.load(Ordering::Relaxed) >= 3);
    }
}
