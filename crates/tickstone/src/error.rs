use crate::{StoreError, Timestamp};

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `tickstone` can emit.
///
/// Variants are split along the recovery line: [`Error::OutOfBounds`],
/// [`Error::StoreUnavailable`] and [`Error::DestinationUnreachable`] are
/// transient and may be retried (see [`Error::is_retryable`]); the rest signal
/// a caller bug or a permanent state change.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A handout asked for more than the persisted upper limit allows.
    ///
    /// The caller should refill the buffer (e.g.
    /// [`TimestampAllocator::allocate_more_timestamps`]) and retry.
    ///
    /// [`TimestampAllocator::allocate_more_timestamps`]:
    ///     crate::TimestampAllocator::allocate_more_timestamps
    #[error(
        "Cannot hand out timestamps up to {requested}: last returned is {last_returned}, upper limit is {upper_limit}"
    )]
    OutOfBounds {
        requested: Timestamp,
        last_returned: Timestamp,
        upper_limit: Timestamp,
    },

    /// The request can never succeed as issued.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The backing store could not be read or written within the retry budget.
    #[error("Bound store unavailable after {attempts} attempt(s): {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The timestamp bound has been backed up and invalidated; this instance
    /// is no longer authoritative.
    #[error("Timestamp bound has been invalidated (backup: {backup})")]
    Invalidated { backup: Timestamp },

    /// The migration destination did not answer its ping in time.
    #[error("Could not contact the migration destination: {reason}")]
    DestinationUnreachable { reason: String },

    /// The service is shutting down and refuses new work.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` if retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. }
                | Self::StoreUnavailable { .. }
                | Self::DestinationUnreachable { .. }
        )
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_reports_all_fields() {
        let err = Error::OutOfBounds {
            requested: 1_000_010,
            last_returned: 10,
            upper_limit: 1_000_000,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000010"));
        assert!(msg.contains("10"));
        assert!(msg.contains("1000000"));
        assert!(err.is_retryable());
    }

    #[test]
    fn caller_bugs_are_not_retryable() {
        assert!(!Error::invalid_argument("nope").is_retryable());
        assert!(!Error::Invalidated { backup: 7 }.is_retryable());
        assert!(!Error::ServiceShutdown.is_retryable());
    }
}
