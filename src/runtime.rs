//! Long-running assembly of the scoring service.
//!
//! [`ScoringRuntime`] builds the cache, notifier and service from a
//! [`ScoringConfig`] and owns the background threads: the local cache sweeper
//! and the periodic full recompute. Dropping the runtime stops both.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheSweeper, FallbackCache, RemoteBackend};
use crate::config::ScoringConfig;
use crate::error::{RankError, RankResult};
use crate::notify::{ChannelNotifier, UpdateStream};
use crate::service::ScoringService;
use crate::storage::Stores;
use crate::sweep::{FullRecompute, SweepRunner};

fn spawn_failed(what: &str, err: &std::io::Error) -> RankError {
    RankError::internal(format!("failed to start {what}: {err}"))
}

/// Service plus its background workers.
pub struct ScoringRuntime {
    service: Arc<ScoringService>,
    cache: Arc<FallbackCache>,
    notifier: Arc<ChannelNotifier>,
    sweeper: CacheSweeper,
    recompute: SweepRunner,
}

impl ScoringRuntime {
    /// Build and start everything.
    ///
    /// Without a `remote` the cache runs local-only from the start.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad config; an internal error when a background
    /// thread cannot be spawned.
    pub fn start(
        stores: Stores,
        remote: Option<Arc<dyn RemoteBackend>>,
        config: ScoringConfig,
    ) -> RankResult<Self> {
        config.validate()?;

        let ttl = config.cache.default_ttl();
        let cache = Arc::new(match remote {
            Some(remote) => FallbackCache::new(remote, ttl, config.cache.failure_threshold),
            None => FallbackCache::local_only(ttl),
        });
        let sweeper = CacheSweeper::start(cache.local(), config.cache.sweep_interval())
            .map_err(|e| spawn_failed("cache sweeper", &e))?;

        let notifier = Arc::new(
            ChannelNotifier::start(config.runtime.notification_queue_capacity)
                .map_err(|e| spawn_failed("notifier", &e))?,
        );

        let interval = Duration::from_secs(config.runtime.recompute_interval_secs);
        let service = Arc::new(ScoringService::with_notifier(
            stores,
            cache.clone(),
            config,
            notifier.clone(),
        )?);
        let target: Arc<dyn FullRecompute> = service.clone();
        let recompute = SweepRunner::start(target, interval).map_err(|e| spawn_failed("recompute runner", &e))?;

        info!(
            degraded = cache.is_degraded(),
            recompute_interval_secs = interval.as_secs(),
            "scoring runtime started"
        );
        Ok(Self {
            service,
            cache,
            notifier,
            sweeper,
            recompute,
        })
    }

    /// Shared service handle.
    #[must_use]
    pub fn service(&self) -> &Arc<ScoringService> {
        &self.service
    }

    /// The cache the service runs on.
    #[must_use]
    pub fn cache(&self) -> &FallbackCache {
        &self.cache
    }

    /// New subscriber to score updates.
    #[must_use]
    pub fn subscribe(&self) -> UpdateStream {
        self.notifier.subscribe()
    }

    /// Request a full recompute now.
    pub fn trigger_recompute(&self) {
        self.recompute.trigger();
    }

    /// Scheduled and triggered recomputes finished so far.
    #[must_use]
    pub fn recomputes_completed(&self) -> u64 {
        self.recompute.completed()
    }

    /// Stop the background threads.
    pub fn shutdown(&mut self) {
        self.recompute.shutdown();
        self.sweeper.shutdown();
        info!(dropped_updates = self.notifier.dropped_updates(), "scoring runtime stopped");
    }
}
