//! Fire-and-forget change notifications.
//!
//! Score writers call [`Notifier::notify`] after every score, momentum, party
//! or leaderboard change. Delivery is best effort: a full queue or a slow
//! subscriber drops the update and bumps a counter, and the caller never
//! blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::candidate::{CandidateId, PartyId};
use crate::event::{EventId, EventState};
use crate::momentum::Tendency;

/// A change worth broadcasting.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreUpdate {
    Score {
        candidate_id: CandidateId,
        final_score: f64,
    },
    Momentum {
        candidate_id: CandidateId,
        score: f64,
        tendency: Tendency,
    },
    Party {
        party_id: PartyId,
        score: f64,
        rank: Option<u32>,
    },
    LeaderboardsInvalidated,
    EventResolved {
        event_id: EventId,
        candidate_id: CandidateId,
        state: EventState,
    },
}

/// Sink for [`ScoreUpdate`]s. Must never block.
pub trait Notifier: Send + Sync {
    /// Hand off one update.
    fn notify(&self, update: ScoreUpdate);
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _update: ScoreUpdate) {}
}

/// Receiving end of a [`ChannelNotifier`] subscription.
#[derive(Debug)]
pub struct UpdateStream {
    rx: Receiver<ScoreUpdate>,
}

impl UpdateStream {
    /// Wait up to `timeout` for the next update. `None` on timeout or after
    /// the notifier is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ScoreUpdate> {
        match self.rx.recv_timeout(timeout) {
            Ok(update) => Some(update),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every update already delivered.
    pub fn drain(&self) -> Vec<ScoreUpdate> {
        self.rx.try_iter().collect()
    }
}

type Subscribers = Arc<Mutex<Vec<Sender<ScoreUpdate>>>>;

/// Bounded queue drained by a dispatcher thread that fans updates out to
/// subscribers.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: Option<Sender<ScoreUpdate>>,
    subscribers: Subscribers,
    stream_capacity: usize,
    dropped_updates: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl ChannelNotifier {
    /// Spawn the dispatcher. `capacity` bounds both the shared queue and each
    /// subscriber's buffer.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<ScoreUpdate>(capacity);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let dropped_updates = Arc::new(AtomicU64::new(0));

        let thread_subs = Arc::clone(&subscribers);
        let thread_dropped = Arc::clone(&dropped_updates);
        let join = thread::Builder::new()
            .name("tallyrank-notify".to_string())
            .spawn(move || dispatch_loop(rx, thread_subs, thread_dropped))?;

        Ok(Self {
            tx: Some(tx),
            subscribers,
            stream_capacity: capacity,
            dropped_updates,
            join: Some(join),
        })
    }

    /// Open a new subscription. Only updates sent afterwards are delivered.
    #[must_use]
    pub fn subscribe(&self) -> UpdateStream {
        let (tx, rx) = bounded(self.stream_capacity);
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(_) => warn!("notification subscriber list poisoned"),
        }
        UpdateStream { rx }
    }

    /// Updates lost to a full queue or a slow subscriber.
    #[must_use]
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, update: ScoreUpdate) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped_updates.fetch_add(1, Ordering::Relaxed);
                debug!("notification queue full, update dropped");
            }
        }
    }
}

impl Drop for ChannelNotifier {
    fn drop(&mut self) {
        // The dispatcher exits once the queue disconnects.
        drop(self.tx.take());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("notification dispatcher panicked");
            }
        }
    }
}

fn dispatch_loop(rx: Receiver<ScoreUpdate>, subscribers: Subscribers, dropped: Arc<AtomicU64>) {
    for update in rx {
        let Ok(mut subs) = subscribers.lock() else {
            dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        subs.retain(|sub| match sub.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
