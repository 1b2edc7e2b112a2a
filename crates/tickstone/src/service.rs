//! Async front for a [`TimestampAllocator`].
//!
//! Handouts stay on the caller's task and only touch memory. Buffer refills
//! run on a background task that wakes after every handout and on a fixed
//! interval, so an idle oracle still makes progress. A caller only waits on
//! the store when the buffer is fully exhausted.

use crate::{
    BoundStore, Error, Result, TimeSource, Timestamp, TimestampAllocator, TimestampDestination,
    TimestampRange, TimestampSource,
};
use core::time::Duration;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// Largest range a single request may obtain; larger requests are clamped.
pub const MAX_REQUEST_RANGE_SIZE: u64 = 10_000;

/// Synchronous refills a request may trigger before giving up.
pub const DEFAULT_REFILL_ATTEMPTS: u32 = 3;

/// Period of the background refresh, independent of traffic.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub max_request_range: u64,
    pub max_refill_attempts: u32,
    pub refresh_interval: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_request_range: MAX_REQUEST_RANGE_SIZE,
            max_refill_attempts: DEFAULT_REFILL_ATTEMPTS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

struct Inner<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    allocator: Arc<TimestampAllocator<S, T>>,
    config: ServiceConfig,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<S, T> Drop for Inner<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A cloneable timestamp service shared by request handlers.
///
/// Dropping the last clone stops the background refresher; prefer
/// [`Self::shutdown`] to wait for it.
pub struct TimestampService<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for TimestampService<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> TimestampService<S, T>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    /// Wraps `allocator` and spawns the background refresher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(allocator: TimestampAllocator<S, T>, config: ServiceConfig) -> Self {
        let allocator = Arc::new(allocator);
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(refresh_loop(
            Arc::clone(&allocator),
            Arc::clone(&wake),
            shutdown.clone(),
            config.refresh_interval,
        ));

        Self {
            inner: Arc::new(Inner {
                allocator,
                config,
                wake,
                shutdown,
                refresher: Mutex::new(Some(handle)),
            }),
        }
    }

    pub fn allocator(&self) -> &TimestampAllocator<S, T> {
        &self.inner.allocator
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn upper_limit(&self) -> Timestamp {
        self.inner.allocator.upper_limit()
    }

    pub fn last_returned(&self) -> Timestamp {
        self.inner.allocator.last_returned()
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.inner.allocator.contains(ts)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Returns the next `count` timestamps, clamped to
    /// [`ServiceConfig::max_request_range`] and to the allocator's buffer
    /// size.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `count` is zero.
    /// - [`Error::OutOfBounds`] if the buffer is still exhausted after
    ///   [`ServiceConfig::max_refill_attempts`] refills.
    /// - [`Error::ServiceShutdown`], [`Error::Invalidated`] or
    ///   [`Error::StoreUnavailable`] as reported by the allocator.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub async fn fresh_timestamps(&self, count: u64) -> Result<TimestampRange> {
        if self.is_shut_down() {
            return Err(Error::ServiceShutdown);
        }
        if count == 0 {
            return Err(Error::invalid_argument("Count must be greater than 0"));
        }
        // A single refill reserves one buffer, so a larger range could never
        // be satisfied.
        let count = count
            .min(self.inner.config.max_request_range)
            .min(self.inner.allocator.buffer_size());

        let mut refills = 0;
        loop {
            match self.inner.allocator.hand_out_count(count) {
                Ok(range) => {
                    self.inner.wake.notify_one();
                    return Ok(range);
                }
                Err(Error::OutOfBounds { .. })
                    if refills < self.inner.config.max_refill_attempts =>
                {
                    refills += 1;

                    #[cfg(feature = "tracing")]
                    tracing::debug!(refills, "buffer exhausted, refilling on the request path");

                    self.inner.allocator.allocate_more_timestamps().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn fresh_timestamp(&self) -> Result<Timestamp> {
        self.fresh_timestamps(1)
            .await
            .map(|range| range.lower_bound())
    }

    /// Stops the background refresher and refuses further requests.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.refresher.lock().take();
        if let Some(handle) = handle {
            if let Err(_e) = handle.await {
                #[cfg(feature = "tracing")]
                tracing::error!("buffer refresher ended abnormally: {_e}");
            }
        }
    }
}

async fn refresh_loop<S, T>(
    allocator: Arc<TimestampAllocator<S, T>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    period: Duration,
) where
    S: BoundStore,
    T: TimeSource<u64>,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("buffer refresher started");

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = wake.notified() => {}
            _ = ticker.tick() => {}
        }

        match allocator.refresh_buffer().await {
            Ok(_refilled) => {
                #[cfg(feature = "tracing")]
                if _refilled {
                    tracing::debug!(upper_limit = allocator.upper_limit(), "buffer refilled");
                }
            }
            Err(Error::Invalidated { backup: _backup }) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(backup = _backup, "bound invalidated, stopping refresher");
                break;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("buffer refresh failed: {_e}");
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("buffer refresher stopped");
}

impl<S, T> TimestampDestination for TimestampService<S, T>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    async fn ping(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ServiceShutdown);
        }
        self.inner.allocator.ping().await
    }

    async fn fast_forward_timestamp(&self, ts: Timestamp) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ServiceShutdown);
        }
        self.inner.allocator.fast_forward_to(ts).await
    }
}

impl<S, T> TimestampSource for TimestampService<S, T>
where
    S: BoundStore + 'static,
    T: TimeSource<u64> + Send + Sync + 'static,
{
    async fn backup_and_invalidate(&self) -> Result<Timestamp> {
        self.inner.allocator.backup_and_invalidate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocatorConfig, MemoryBoundStore, Migrator, MonotonicClock, StoreInvalidator};

    type Service = TimestampService<MemoryBoundStore, MonotonicClock>;

    async fn service_with_buffer(store: MemoryBoundStore, buffer_size: u64) -> Service {
        let config = AllocatorConfig::default().with_buffer_size(buffer_size);
        let allocator = TimestampAllocator::load(store, MonotonicClock::new(), config)
            .await
            .unwrap();
        TimestampService::start(allocator, ServiceConfig::default())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn first_request_on_a_fresh_namespace_starts_at_one() {
        let service = service_with_buffer(MemoryBoundStore::new(), 1_000).await;
        let range = service.fresh_timestamps(10).await.unwrap();
        assert_eq!(range.lower_bound(), 1);
        assert_eq!(range.upper_bound(), 10);
        assert_eq!(service.fresh_timestamp().await.unwrap(), 11);
        assert!(service.upper_limit() >= service.last_returned());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn requests_are_clamped() {
        let service = service_with_buffer(MemoryBoundStore::new(), 1_000_000).await;
        let range = service
            .fresh_timestamps(MAX_REQUEST_RANGE_SIZE * 5)
            .await
            .unwrap();
        assert_eq!(range.size(), MAX_REQUEST_RANGE_SIZE);
        assert!(matches!(
            service.fresh_timestamps(0).await,
            Err(Error::InvalidArgument { .. })
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn requests_never_outgrow_a_small_buffer() {
        let service = service_with_buffer(MemoryBoundStore::new(), 100).await;
        assert!(service.config().max_request_range > 100);

        let first = service.fresh_timestamps(500).await.unwrap();
        assert_eq!((first.lower_bound(), first.upper_bound()), (1, 100));
        let second = service.fresh_timestamps(500).await.unwrap();
        assert_eq!(second.lower_bound(), 101);
        assert_eq!(second.size(), 100);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn refresher_refills_in_the_background() {
        let store = MemoryBoundStore::new();
        let service = service_with_buffer(store.clone(), 100).await;

        service.fresh_timestamps(60).await.unwrap();
        // 60 used out of a 100 buffer: the refresher must top it up.
        eventually(|| store.snapshot().reserved_upto() >= 160).await;
        assert!(service.upper_limit() >= 160);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shut_down_service_refuses_work() {
        let service = service_with_buffer(MemoryBoundStore::new(), 100).await;
        service.shutdown().await;
        assert!(service.is_shut_down());
        assert!(matches!(
            service.fresh_timestamps(1).await,
            Err(Error::ServiceShutdown)
        ));
        assert!(matches!(service.ping().await, Err(Error::ServiceShutdown)));
        // A second shutdown is harmless.
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_overlap() {
        let service = service_with_buffer(MemoryBoundStore::new(), 1_000).await;

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    let mut ranges = Vec::new();
                    for j in 0..200_u64 {
                        ranges.push(service.fresh_timestamps((i + j) % 7 + 1).await.unwrap());
                    }
                    ranges
                })
            })
            .collect();

        let mut all: Vec<TimestampRange> = futures::future::try_join_all(tasks)
            .await
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        all.sort_by_key(TimestampRange::lower_bound);
        for pair in all.windows(2) {
            assert!(pair[0].upper_bound() < pair[1].lower_bound());
        }
        assert!(service.upper_limit() >= service.last_returned());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn service_takes_over_a_legacy_store() {
        let legacy = MemoryBoundStore::with_upper_limit(5_000);
        let service = service_with_buffer(MemoryBoundStore::new(), 1_000).await;

        let migrator = Migrator::new(
            StoreInvalidator::new(legacy.clone(), Default::default()),
            service.clone(),
        );
        assert_eq!(migrator.migrate().await.unwrap(), 5_000);
        assert!(service.fresh_timestamp().await.unwrap() > 5_000);
        assert_eq!(
            legacy.snapshot(),
            crate::BoundRecord::Invalidated { backup: 5_000 }
        );
        service.shutdown().await;
    }

    #[tokio::test]
    async fn invalidated_service_fails_ping() {
        let service = service_with_buffer(MemoryBoundStore::new(), 1_000).await;
        service.fresh_timestamps(3).await.unwrap();
        let backup = service.backup_and_invalidate().await.unwrap();
        assert!(backup >= 3);
        assert!(matches!(
            service.ping().await,
            Err(Error::Invalidated { .. })
        ));
        assert!(matches!(
            service.fresh_timestamps(1).await,
            Err(Error::Invalidated { .. })
        ));
        service.shutdown().await;
    }
}
