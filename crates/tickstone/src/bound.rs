use crate::{BoundRecord, BoundStore, Error, Result, StoreError, TimeSource, Timestamp};
use core::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use parking_lot::Mutex;

/// Bounded retry with exponential backoff for store round trips.
///
/// Both lost compare-and-set races and [`StoreError`]s consume an attempt.
/// Once `max_attempts` is spent the operation fails with
/// [`Error::StoreUnavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of one optimistic round trip against the store.
pub(crate) enum Attempt<R> {
    Done(R),
    /// The record changed between our read and our write.
    Conflict,
    /// Retrying cannot help.
    Abort(Error),
}

/// Drives `step` until it completes, aborts, or the retry budget runs out.
pub(crate) async fn retrying<R, F, Fut>(policy: &RetryPolicy, mut step: F) -> Result<R>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<R>, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let failure = match step().await {
            Ok(Attempt::Done(value)) => return Ok(value),
            Ok(Attempt::Abort(err)) => return Err(err),
            Ok(Attempt::Conflict) => StoreError::Unavailable {
                reason: format!("compare-and-set lost {attempt} race(s)"),
            },
            Err(err) => err,
        };

        if attempt >= max_attempts {
            return Err(Error::StoreUnavailable {
                attempts: attempt,
                source: failure,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, error = %failure, "retrying bound store operation");

        tokio::time::sleep(policy.backoff(attempt)).await;
    }
}

/// Backs up the live bound of `store` and poisons it.
///
/// Idempotent: an already invalidated store returns the backup recorded the
/// first time. A store that never reserved anything is invalidated with a
/// backup of `0`.
pub async fn invalidate_store<S: BoundStore>(store: &S, policy: &RetryPolicy) -> Result<Timestamp> {
    retrying(policy, || async move {
        let current = store.get().await?;
        if let BoundRecord::Invalidated { backup } = current {
            return Ok(Attempt::Done(backup));
        }
        let backup = current.reserved_upto();
        if store
            .compare_and_set(current, BoundRecord::Invalidated { backup })
            .await?
        {
            Ok(Attempt::Done(backup))
        } else {
            Ok(Attempt::Conflict)
        }
    })
    .await
}

/// The durable ceiling below which timestamps are reserved.
///
/// The last value observed in the store is cached, so [`Self::get`] never
/// touches the store. All writes are compare-and-set with
/// [`max`](Ord::max) semantics: the bound never decreases, and a concurrent
/// increase from another writer is never overwritten.
pub struct PersistentUpperBound<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    store: S,
    time: T,
    retry: RetryPolicy,
    upper_limit: AtomicU64,
    last_increase_millis: AtomicU64,
    invalidated: Mutex<Option<Timestamp>>,
}

impl<S, T> PersistentUpperBound<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    /// Reads the namespace's record and caches its upper limit.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalidated`] if the namespace was migrated away.
    /// - [`Error::StoreUnavailable`] if the store cannot be read.
    pub async fn load(store: S, time: T, retry: RetryPolicy) -> Result<Self> {
        let record = {
            let store = &store;
            retrying(&retry, || async move { Ok(Attempt::Done(store.get().await?)) }).await?
        };

        if let BoundRecord::Invalidated { backup } = record {
            return Err(Error::Invalidated { backup });
        }

        let now = time.current_millis();
        Ok(Self {
            store,
            time,
            retry,
            upper_limit: AtomicU64::new(record.reserved_upto()),
            last_increase_millis: AtomicU64::new(now),
            invalidated: Mutex::new(None),
        })
    }

    /// The current upper limit as last observed. Pure read.
    pub fn get(&self) -> Timestamp {
        self.upper_limit.load(Ordering::Acquire)
    }

    /// Returns `true` if this instance raised the bound within `window`.
    ///
    /// A staleness hint for the refill policy, not a correctness guarantee.
    pub fn has_increased_within(&self, window: Duration) -> bool {
        let elapsed = self
            .time
            .current_millis()
            .saturating_sub(self.last_increase_millis.load(Ordering::Acquire));
        u128::from(elapsed) < window.as_millis()
    }

    /// The backup value if this bound has been invalidated.
    pub fn invalidated_backup(&self) -> Option<Timestamp> {
        *self.invalidated.lock()
    }

    /// Atomically sets the bound to `max(bound, candidate)`.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalidated`] if the bound was invalidated.
    /// - [`Error::StoreUnavailable`] once the retry budget is exhausted.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub async fn increase_to_at_least(&self, candidate: Timestamp) -> Result<()> {
        if let Some(backup) = self.invalidated_backup() {
            return Err(Error::Invalidated { backup });
        }
        // The store only grows and always holds at least the cached value.
        if candidate <= self.get() {
            return Ok(());
        }

        let (observed, wrote) =
            retrying(&self.retry, || self.try_increase(candidate)).await?;

        let previous = self.upper_limit.fetch_max(observed, Ordering::AcqRel);
        if wrote {
            self.last_increase_millis
                .store(self.time.current_millis(), Ordering::Release);
        } else if observed > previous {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                previous,
                observed,
                "upper limit was raised by another writer; is a second oracle active?"
            );
        }
        Ok(())
    }

    async fn try_increase(
        &self,
        candidate: Timestamp,
    ) -> Result<Attempt<(Timestamp, bool)>, StoreError> {
        let current = self.store.get().await?;
        let stored = match current {
            BoundRecord::Invalidated { backup } => {
                *self.invalidated.lock() = Some(backup);
                return Ok(Attempt::Abort(Error::Invalidated { backup }));
            }
            other => other.reserved_upto(),
        };

        if stored >= candidate {
            return Ok(Attempt::Done((stored, false)));
        }

        let next = BoundRecord::Active {
            upper_limit: candidate,
        };
        if self.store.compare_and_set(current, next).await? {
            Ok(Attempt::Done((candidate, true)))
        } else {
            Ok(Attempt::Conflict)
        }
    }

    /// Records the live bound as a backup and poisons it, permanently.
    ///
    /// Idempotent: repeated calls return the backup recorded first.
    pub async fn backup_and_invalidate(&self) -> Result<Timestamp> {
        if let Some(backup) = self.invalidated_backup() {
            return Ok(backup);
        }
        let backup = invalidate_store(&self.store, &self.retry).await?;
        *self.invalidated.lock() = Some(backup);

        #[cfg(feature = "tracing")]
        tracing::info!(backup, "timestamp bound backed up and invalidated");

        Ok(backup)
    }
}
