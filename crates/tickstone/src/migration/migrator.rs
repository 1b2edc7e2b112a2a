use crate::{Error, Result, Timestamp, TimestampDestination, TimestampSource};
use core::time::Duration;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Default bound on the destination ping.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress of a [`Migrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    NotStarted,
    Pinging,
    /// The source is durably invalidated; the destination may not have been
    /// forwarded yet. Re-running the migration completes it.
    BackedUpAndInvalidated,
    FastForwarded,
}

/// Moves timestamp authority from a source oracle to a destination oracle.
///
/// Migration works as follows:
/// 1. Ping the destination (bounded by a timeout). On failure nothing else
///    happens, which protects against a misconfigured destination.
/// 2. Back up and invalidate the source, obtaining its bound `T`.
/// 3. Fast-forward the destination to `T`.
///
/// [`Self::migrate`] runs this at most once to completion. Concurrent callers
/// wait for the running attempt; later callers get the recorded `T` without
/// touching either side. A failed attempt may be retried: if it failed after
/// step 2, the source's idempotent backup returns the same `T`.
pub struct Migrator<Src, Dst>
where
    Src: TimestampSource,
    Dst: TimestampDestination,
{
    source: Src,
    destination: Dst,
    ping_timeout: Duration,
    state: Mutex<MigrationState>,
    completed: OnceCell<Timestamp>,
}

impl<Src, Dst> Migrator<Src, Dst>
where
    Src: TimestampSource,
    Dst: TimestampDestination,
{
    pub fn new(source: Src, destination: Dst) -> Self {
        Self {
            source,
            destination,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            state: Mutex::new(MigrationState::NotStarted),
            completed: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn with_ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.ping_timeout = ping_timeout;
        self
    }

    pub fn state(&self) -> MigrationState {
        *self.state.lock()
    }

    /// The bound the destination was forwarded to, once migration completed.
    pub fn migrated_bound(&self) -> Option<Timestamp> {
        self.completed.get().copied()
    }

    pub const fn source(&self) -> &Src {
        &self.source
    }

    pub const fn destination(&self) -> &Dst {
        &self.destination
    }

    /// Hands the destination back, e.g. to start serving from it once the
    /// migration is done.
    pub fn into_destination(self) -> Dst {
        self.destination
    }

    /// Runs the migration, or returns the bound of the completed one.
    ///
    /// # Errors
    ///
    /// - [`Error::DestinationUnreachable`] if the ping fails or times out; the
    ///   source is untouched.
    /// - Any error from the source backup or the destination fast-forward.
    pub async fn migrate(&self) -> Result<Timestamp> {
        self.completed
            .get_or_try_init(|| self.run())
            .await
            .copied()
    }

    async fn run(&self) -> Result<Timestamp> {
        let resume = self.state();
        self.set_state(MigrationState::Pinging);

        #[cfg(feature = "tracing")]
        tracing::info!(timeout = ?self.ping_timeout, "pinging migration destination");

        let ping = match tokio::time::timeout(self.ping_timeout, self.destination.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("ping timed out after {:?}", self.ping_timeout)),
        };
        if let Err(reason) = ping {
            self.set_state(resume);

            #[cfg(feature = "tracing")]
            tracing::error!(%reason, "migration destination unreachable");

            return Err(Error::DestinationUnreachable { reason });
        }

        let bound = match self.source.backup_and_invalidate().await {
            Ok(bound) => bound,
            Err(e) => {
                self.set_state(resume);
                return Err(e);
            }
        };
        self.set_state(MigrationState::BackedUpAndInvalidated);

        #[cfg(feature = "tracing")]
        tracing::info!(bound, "source backed up and invalidated");

        self.destination.fast_forward_timestamp(bound).await?;
        self.set_state(MigrationState::FastForwarded);

        #[cfg(feature = "tracing")]
        tracing::info!(bound, "migration complete");

        Ok(bound)
    }

    fn set_state(&self, state: MigrationState) {
        *self.state.lock() = state;
    }
}
