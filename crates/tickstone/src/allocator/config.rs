use crate::RetryPolicy;
use core::time::Duration;

/// Default gap reserved ahead of the cursor.
///
/// Larger buffers mean fewer durable writes but more timestamps skipped after
/// a restart (the cursor restarts at the persisted upper limit).
pub const ALLOCATION_BUFFER_SIZE: u64 = 1_000_000;

/// If the bound has not grown for this long, [`refresh_buffer`] grows it even
/// when the buffer is mostly unused.
///
/// [`refresh_buffer`]: crate::TimestampAllocator::refresh_buffer
pub const STALENESS_WINDOW: Duration = Duration::from_secs(60);

/// Tuning knobs for a [`TimestampAllocator`](crate::TimestampAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub buffer_size: u64,
    pub staleness_window: Duration,
    pub retry: RetryPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            buffer_size: ALLOCATION_BUFFER_SIZE,
            staleness_window: STALENESS_WINDOW,
            retry: RetryPolicy::default(),
        }
    }
}

impl AllocatorConfig {
    #[must_use]
    pub const fn with_buffer_size(mut self, buffer_size: u64) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub const fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
