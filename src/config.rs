//! Tunables: batch limits and dispatch concurrency in one place.

/// Limits governing bulk-write chunking and dispatch.
pub struct BatchLimits;

impl BatchLimits {
    /// Maximum number of statements the backend accepts in a single `BatchExecuteStatement`-style
    /// call.
    pub const MAX_STATEMENTS_PER_BATCH: usize = 25;

    /// Maximum number of chunk RPCs issued concurrently by the bulk-write coordinator.
    pub const DEFAULT_CONCURRENCY: usize = 8;
}
