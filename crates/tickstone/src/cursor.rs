use crate::Timestamp;

/// The highest timestamp actually handed to a client.
///
/// Plain data: the allocator keeps it behind the same mutex as the handout
/// path, so every read-check-update happens in one critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastReturned {
    value: Timestamp,
}

impl LastReturned {
    /// Starts the cursor at `floor`, typically the persisted upper limit
    /// found at startup.
    pub const fn new(floor: Timestamp) -> Self {
        Self { value: floor }
    }

    pub const fn get(&self) -> Timestamp {
        self.value
    }

    /// Sets the cursor to `max(current, candidate)`.
    pub fn increase_to_at_least(&mut self, candidate: Timestamp) {
        self.value = self.value.max(candidate);
    }
}
