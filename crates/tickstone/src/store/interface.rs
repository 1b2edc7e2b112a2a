use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The durable state of one timestamp namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BoundRecord {
    /// Nothing has ever been reserved in this namespace.
    #[default]
    Missing,
    /// Every timestamp up to and including `upper_limit` may have been issued.
    Active { upper_limit: Timestamp },
    /// The namespace was handed over to another oracle. `backup` is the last
    /// live upper limit; the bound can never be increased again.
    Invalidated { backup: Timestamp },
}

impl BoundRecord {
    /// The highest timestamp this record reserves, whether live or backed up.
    pub const fn reserved_upto(&self) -> Timestamp {
        match *self {
            Self::Missing => 0,
            Self::Active { upper_limit } => upper_limit,
            Self::Invalidated { backup } => backup,
        }
    }
}

/// Errors raised by a [`BoundStore`] adapter.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record exists but cannot be decoded. Never treated as
    /// [`BoundRecord::Missing`], which would restart the namespace at zero.
    #[error("Corrupt bound record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// A durable compare-and-set register holding a [`BoundRecord`].
///
/// Implementations must make `compare_and_set` atomic: the write happens only
/// if the stored record still equals `expected`, and the return value reports
/// whether it did. Blind overwrites are never issued by callers.
pub trait BoundStore: Send + Sync {
    /// Reads the current record.
    fn get(&self) -> impl Future<Output = Result<BoundRecord, StoreError>> + Send;

    /// Replaces `expected` with `new`. Returns `Ok(false)` on a lost race.
    fn compare_and_set(
        &self,
        expected: BoundRecord,
        new: BoundRecord,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

impl<S: BoundStore> BoundStore for Arc<S> {
    fn get(&self) -> impl Future<Output = Result<BoundRecord, StoreError>> + Send {
        (**self).get()
    }

    fn compare_and_set(
        &self,
        expected: BoundRecord,
        new: BoundRecord,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        (**self).compare_and_set(expected, new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_state_tag() {
        let json = serde_json::to_string(&BoundRecord::Active { upper_limit: 42 }).unwrap();
        assert_eq!(json, r#"{"state":"active","upper_limit":42}"#);

        let back: BoundRecord =
            serde_json::from_str(r#"{"state":"invalidated","backup":7}"#).unwrap();
        assert_eq!(back, BoundRecord::Invalidated { backup: 7 });
    }

    #[test]
    fn reserved_upto_covers_every_state() {
        assert_eq!(BoundRecord::Missing.reserved_upto(), 0);
        assert_eq!(BoundRecord::Active { upper_limit: 5 }.reserved_upto(), 5);
        assert_eq!(BoundRecord::Invalidated { backup: 9 }.reserved_upto(), 9);
    }
}
