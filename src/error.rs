use std::time::Duration;

use thiserror::Error;

/// The settled failure of a load handle.
///
/// `E` is the error type of the loader's [`BatchFunction`](crate::BatchFunction).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError<E> {
    /// The batch function returned a result count that does not match the key count.
    #[error("batch function returned {actual} results for {expected} keys")]
    BatchShape { expected: usize, actual: usize },

    /// The batch function failed as a whole; every key of the batch carries this error.
    #[error("batch fetch failed: {0:?}")]
    BatchFetch(E),

    /// The batch function returned a failure at this key's position.
    #[error("key failed to load: {0:?}")]
    PerKey(E),

    /// The batch did not complete within the configured batch timeout.
    #[error("batch timed out after {0:?}")]
    TimedOut(Duration),

    /// The batch was cancelled, or the loader was dropped before the batch settled.
    #[error("batch cancelled")]
    Cancelled,
}

/// Failure of a [`Loader::prime`](crate::Loader::prime) family call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimeError<K> {
    /// The prime policy forbids overwriting and these keys were already cached. Keys that were
    /// not cached have still been primed.
    #[error("keys already cached: {keys:?}")]
    AlreadyCached { keys: Vec<K> },

    /// The loader worker is gone.
    #[error("loader worker has shut down")]
    Closed,
}

/// Result type delivered to every load handle and stored in the cache.
pub type Outcome<V, E> = Result<V, LoadError<E>>;
