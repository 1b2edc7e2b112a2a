use std::{sync::Arc, time::Instant};

/// A trait for time sources that return a monotonic timestamp in
/// milliseconds.
///
/// The persisted bound only uses time to answer "has the bound grown
/// recently?", so any monotonic origin works. Plug in a mocked source in tests.
///
/// # Example
///
/// ```
/// use tickstone::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource<u64> for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource<T> {
    /// Returns the current time in milliseconds since the source's origin.
    fn current_millis(&self) -> T;
}

impl<T, S: TimeSource<T> + ?Sized> TimeSource<T> for Arc<S> {
    fn current_millis(&self) -> T {
        (**self).current_millis()
    }
}

/// A monotonic time source measuring elapsed milliseconds since construction.
///
/// Wall-clock adjustments (NTP, manual changes) never move it backward.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl TimeSource<u64> for MonotonicClock {
    fn current_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backward() {
        let clock = MonotonicClock::new();
        let mut last = clock.current_millis();
        for _ in 0..1_000 {
            let now = clock.current_millis();
            assert!(now >= last);
            last = now;
        }
    }
}
