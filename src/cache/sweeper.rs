//! Background eviction of expired local entries.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::local::LocalCache;

/// Periodically sweeps a [`LocalCache`].
///
/// The thread stops on [`CacheSweeper::shutdown`] or drop.
#[derive(Debug)]
pub struct CacheSweeper {
    shutdown_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Spawn a sweeper running every `interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn start(local: Arc<LocalCache>, interval: Duration) -> std::io::Result<Self> {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("tallyrank-cache-sweeper".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        local.sweep_expired();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        debug!(interval_ms = interval.as_millis() as u64, "cache sweeper started");
        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        // Dropping the sender disconnects the channel, which also wakes the loop.
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("cache sweeper thread panicked");
            }
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ScoreCache;

    #[test]
    fn sweeper_evicts_expired_entries() {
        let local = Arc::new(LocalCache::default());
        local.set("stale", serde_json::json!(1), Some(Duration::ZERO));
        local.set("fresh", serde_json::json!(2), Some(Duration::from_secs(60)));

        let mut sweeper = CacheSweeper::start(Arc::clone(&local), Duration::from_millis(5)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while local.len() > 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        sweeper.shutdown();

        assert_eq!(local.len(), 1);
        assert_eq!(local.get("fresh"), Some(serde_json::json!(2)));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let local = Arc::new(LocalCache::default());
        let mut sweeper = CacheSweeper::start(local, Duration::from_secs(3600)).unwrap();
        sweeper.shutdown();
        sweeper.shutdown();
    }
}
