use crate::{
    AllocatorConfig, BoundStore, Error, LastReturned, PersistentUpperBound, Result, TimeSource,
    Timestamp, TimestampRange,
};
use core::time::Duration;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Debug)]
struct HandoutState {
    cursor: LastReturned,
    /// Raised by a fast-forward before its bound write lands; nothing at or
    /// below it is handed out even while the cursor still lags.
    floor: Timestamp,
    invalidated: Option<Timestamp>,
}

impl HandoutState {
    fn issued_upto(&self) -> Timestamp {
        self.cursor.get().max(self.floor)
    }
}

/// A buffered, lock-based timestamp allocator.
///
/// Combines the in-memory [`LastReturned`] cursor with a
/// [`PersistentUpperBound`]. Handouts only touch memory and never go past the
/// bound; refills move the bound ahead of the cursor through the store.
///
/// ## Guarantees
/// - Ranges returned by [`Self::hand_out`] never overlap and their lower
///   bounds strictly increase in completion order.
/// - `upper_limit() >= last_returned()` at every instant.
/// - Nothing at or below a persisted upper limit is handed out again after a
///   restart, because the cursor restarts at that limit.
///
/// ## See Also
/// - [`TimestampService`](crate::TimestampService) for the async front that
///   refills automatically.
pub struct TimestampAllocator<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    state: Mutex<HandoutState>,
    bound: PersistentUpperBound<S, T>,
    buffer_size: u64,
    staleness_window: Duration,
}

impl<S, T> TimestampAllocator<S, T>
where
    S: BoundStore,
    T: TimeSource<u64>,
{
    /// Loads the namespace from `store` and starts the cursor at the persisted
    /// upper limit.
    ///
    /// # Errors
    ///
    /// - [`Error::Invalidated`] if the namespace was migrated away.
    /// - [`Error::StoreUnavailable`] if the store cannot be read.
    pub async fn load(store: S, time: T, config: AllocatorConfig) -> Result<Self> {
        let bound = PersistentUpperBound::load(store, time, config.retry).await?;
        let cursor = LastReturned::new(bound.get());

        #[cfg(feature = "tracing")]
        tracing::info!(
            upper_limit = bound.get(),
            buffer_size = config.buffer_size,
            "timestamp allocator loaded"
        );

        Self::new(bound, cursor, config)
    }

    /// Builds an allocator from an already loaded bound and cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the cursor is above the bound or
    /// the buffer size is zero.
    pub fn new(
        bound: PersistentUpperBound<S, T>,
        cursor: LastReturned,
        config: AllocatorConfig,
    ) -> Result<Self> {
        if config.buffer_size == 0 {
            return Err(Error::invalid_argument("Buffer size must be greater than 0"));
        }
        if cursor.get() > bound.get() {
            return Err(Error::invalid_argument(format!(
                "Last returned timestamp {} is above the upper limit {}",
                cursor.get(),
                bound.get()
            )));
        }
        Ok(Self {
            state: Mutex::new(HandoutState {
                floor: cursor.get(),
                cursor,
                invalidated: None,
            }),
            bound,
            buffer_size: config.buffer_size,
            staleness_window: config.staleness_window,
        })
    }

    pub const fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    pub const fn bound(&self) -> &PersistentUpperBound<S, T> {
        &self.bound
    }

    /// The persisted upper limit. Every timestamp at or below it is reserved.
    pub fn upper_limit(&self) -> Timestamp {
        self.bound.get()
    }

    /// The highest timestamp handed out so far.
    pub fn last_returned(&self) -> Timestamp {
        self.state.lock().cursor.get()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated.is_some()
    }

    /// Returns `true` if `ts` may already have been issued.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts <= self.bound.get()
    }

    /// Hands out `[last_returned + 1, requested_upper]`.
    ///
    /// Never performs store I/O.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `requested_upper <= last_returned`.
    /// - [`Error::OutOfBounds`] if `requested_upper` is above the upper limit;
    ///   refill with [`Self::allocate_more_timestamps`] and retry.
    /// - [`Error::Invalidated`] once the allocator has been invalidated.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn hand_out(&self, requested_upper: Timestamp) -> Result<TimestampRange> {
        let mut state = self.state.lock();
        self.hand_out_locked(&mut state, requested_upper)
    }

    /// Hands out the next `count` timestamps.
    ///
    /// Same as [`Self::hand_out`] with the upper bound computed from the
    /// cursor inside the critical section, so concurrent callers never fail
    /// on a stale read of the cursor.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn hand_out_count(&self, count: u64) -> Result<TimestampRange> {
        if count == 0 {
            return Err(Error::invalid_argument("Count must be greater than 0"));
        }
        let mut state = self.state.lock();
        let requested_upper = state
            .issued_upto()
            .checked_add(count)
            .ok_or_else(|| Error::invalid_argument("Timestamp space exhausted"))?;
        self.hand_out_locked(&mut state, requested_upper)
    }

    fn hand_out_locked(
        &self,
        state: &mut HandoutState,
        requested_upper: Timestamp,
    ) -> Result<TimestampRange> {
        if let Some(backup) = state.invalidated {
            return Err(Error::Invalidated { backup });
        }

        let last_returned = state.issued_upto();
        if requested_upper <= last_returned {
            return Err(Error::invalid_argument(format!(
                "Timestamp upper bound {requested_upper} must be greater than the last returned timestamp {last_returned}"
            )));
        }

        let upper_limit = self.bound.get();
        if requested_upper > upper_limit {
            return Err(Error::OutOfBounds {
                requested: requested_upper,
                last_returned,
                upper_limit,
            });
        }

        state.cursor.increase_to_at_least(requested_upper);
        Ok(TimestampRange::new(last_returned + 1, requested_upper))
    }

    /// Raises the bound to at least `last_returned + buffer_size`.
    pub async fn allocate_more_timestamps(&self) -> Result<()> {
        let target = self.issued_upto().saturating_add(self.buffer_size);
        self.guard(self.bound.increase_to_at_least(target).await)
    }

    /// Refills the bound if less than half the buffer is left, or if the bound
    /// has not grown within the staleness window.
    ///
    /// Returns `true` if a refill was issued.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub async fn refresh_buffer(&self) -> Result<bool> {
        let last_returned = self.issued_upto();
        let upper_limit = self.bound.get();
        let buffered = upper_limit.saturating_sub(last_returned);

        let target = if buffered < self.buffer_size / 2 {
            last_returned.saturating_add(self.buffer_size)
        } else if !self.bound.has_increased_within(self.staleness_window) {
            // An idle oracle must still make observable progress.
            last_returned
                .saturating_add(self.buffer_size)
                .max(upper_limit.saturating_add(1))
        } else {
            return Ok(false);
        };

        self.guard(self.bound.increase_to_at_least(target).await)?;
        Ok(true)
    }

    /// Moves the cursor to at least `new_minimum` and the bound to at least
    /// `new_minimum + buffer_size`. A `new_minimum` the cursor already passed
    /// is a no-op.
    ///
    /// Administrative only; used by migration and resets.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `new_minimum + buffer_size` overflows.
    /// - [`Error::Invalidated`] once the allocator has been invalidated.
    /// - [`Error::StoreUnavailable`] if the bound cannot be raised.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub async fn fast_forward_to(&self, new_minimum: Timestamp) -> Result<()> {
        let target = {
            let mut state = self.state.lock();
            if let Some(backup) = state.invalidated {
                return Err(Error::Invalidated { backup });
            }
            if new_minimum <= state.cursor.get() {
                return Ok(());
            }
            let target = new_minimum.checked_add(self.buffer_size).ok_or_else(|| {
                Error::invalid_argument(format!("Cannot fast forward to {new_minimum}"))
            })?;
            // Close the handout path below `new_minimum` before the bound
            // moves; a concurrent refill may pick up the new bound at once.
            state.floor = state.floor.max(new_minimum);
            target
        };

        // Bound next, so the cursor never overtakes it. On failure the floor
        // stays: skipping timestamps is safe, reissuing is not.
        self.guard(self.bound.increase_to_at_least(target).await)?;
        self.state.lock().cursor.increase_to_at_least(new_minimum);
        Ok(())
    }

    /// Backs up and invalidates the persisted bound, then refuses further
    /// handouts. Idempotent.
    pub async fn backup_and_invalidate(&self) -> Result<Timestamp> {
        let backup = self.bound.backup_and_invalidate().await?;
        self.state.lock().invalidated = Some(backup);
        Ok(backup)
    }

    fn issued_upto(&self) -> Timestamp {
        self.state.lock().issued_upto()
    }

    /// Closes the handout path when the store reports an invalidation made by
    /// another party.
    fn guard<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(Error::Invalidated { backup }) = &result {
            self.state.lock().invalidated = Some(*backup);
        }
        result
    }
}
