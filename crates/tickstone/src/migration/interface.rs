use crate::{
    BoundStore, Error, Result, RetryPolicy, TimeSource, Timestamp, TimestampAllocator,
    invalidate_store,
};

/// The oracle that gives up authority during a migration.
pub trait TimestampSource: Send + Sync {
    /// Durably records the current bound, marks the source unable to issue
    /// timestamps ever again and returns the recorded bound.
    ///
    /// Must be idempotent: once invalidated, returns the same bound.
    fn backup_and_invalidate(&self) -> impl Future<Output = Result<Timestamp>> + Send;
}

/// The oracle that takes over authority during a migration.
pub trait TimestampDestination: Send + Sync {
    /// Cheap liveness check, called before anything touches the source.
    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Moves the destination past `ts`. Forwarding to an already passed value
    /// is a no-op.
    fn fast_forward_timestamp(&self, ts: Timestamp) -> impl Future<Output = Result<()>> + Send;
}

/// A [`TimestampSource`] over a bare [`BoundStore`], for a namespace whose
/// oracle is not running (e.g. the embedded store of a client that moves to
/// a dedicated oracle).
pub struct StoreInvalidator<S: BoundStore> {
    store: S,
    retry: RetryPolicy,
}

impl<S: BoundStore> StoreInvalidator<S> {
    pub const fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }
}

impl<S: BoundStore> TimestampSource for StoreInvalidator<S> {
    async fn backup_and_invalidate(&self) -> Result<Timestamp> {
        invalidate_store(&self.store, &self.retry).await
    }
}

impl<S, T> TimestampSource for TimestampAllocator<S, T>
where
    S: BoundStore,
    T: TimeSource<u64> + Send + Sync,
{
    async fn backup_and_invalidate(&self) -> Result<Timestamp> {
        TimestampAllocator::backup_and_invalidate(self).await
    }
}

impl<S, T> TimestampDestination for TimestampAllocator<S, T>
where
    S: BoundStore,
    T: TimeSource<u64> + Send + Sync,
{
    async fn ping(&self) -> Result<()> {
        match self.bound().invalidated_backup() {
            Some(backup) => Err(Error::Invalidated { backup }),
            None => Ok(()),
        }
    }

    async fn fast_forward_timestamp(&self, ts: Timestamp) -> Result<()> {
        self.fast_forward_to(ts).await
    }
}
