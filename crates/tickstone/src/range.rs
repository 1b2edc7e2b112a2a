use core::fmt;
use serde::{Deserialize, Serialize};

/// A timestamp handed out by the oracle. Issued values start at `1`.
pub type Timestamp = u64;

/// An inclusive, contiguous range of freshly issued timestamps.
///
/// Ranges returned by one allocator never overlap and, in completion order,
/// have strictly increasing lower bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct TimestampRange {
    lower: Timestamp,
    upper: Timestamp,
}

/// Unchecked wire form of a [`TimestampRange`].
#[derive(Deserialize)]
struct RawRange {
    lower: Timestamp,
    upper: Timestamp,
}

impl TryFrom<RawRange> for TimestampRange {
    type Error = String;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        if raw.lower > raw.upper {
            return Err(format!(
                "range lower bound {} is above its upper bound {}",
                raw.lower, raw.upper
            ));
        }
        Ok(Self::new(raw.lower, raw.upper))
    }
}

impl TimestampRange {
    /// Builds `[lower, upper]`. Callers must guarantee `lower <= upper`.
    pub(crate) const fn new(lower: Timestamp, upper: Timestamp) -> Self {
        debug_assert!(lower <= upper);
        Self { lower, upper }
    }

    pub const fn lower_bound(&self) -> Timestamp {
        self.lower
    }

    pub const fn upper_bound(&self) -> Timestamp {
        self.upper
    }

    /// Number of timestamps in the range.
    pub const fn size(&self) -> u64 {
        self.upper - self.lower + 1
    }

    pub const fn contains(&self, ts: Timestamp) -> bool {
        self.lower <= ts && ts <= self.upper
    }

    /// Returns `true` if the two ranges share at least one timestamp.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }
}

impl fmt::Display for TimestampRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}
