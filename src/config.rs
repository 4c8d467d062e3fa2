use std::num::NonZeroUsize;
use std::time::Duration;

/// When the worker flushes the keys collected so far into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Dispatch at the end of every execution frame: once the op queue is drained and the worker
    /// has yielded to the runtime once.
    #[default]
    Tick,
    /// Dispatch only on [`Loader::dispatch`](crate::Loader::dispatch).
    Manual,
    /// Dispatch once this much time has passed since the first key of the pending batch was
    /// registered.
    Delay(Duration),
}

/// Whether [`Loader::prime`](crate::Loader::prime) may replace an existing cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimePolicy {
    #[default]
    Overwrite,
    Forbid,
}

/// Per-loader settings.
///
/// ```
/// use std::time::Duration;
/// use batchload_rs::{DispatchPolicy, LoaderConfig};
///
/// let config = LoaderConfig::default()
///     .with_name("song_by_id")
///     .with_dispatch(DispatchPolicy::Delay(Duration::from_millis(2)))
///     .with_max_batch_size(100);
/// assert_eq!(config.max_batch_size.map(|n| n.get()), Some(100));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Name reported in the worker's tracing span. Defaults to the key/value type names.
    pub name: Option<&'static str>,
    pub dispatch: DispatchPolicy,
    /// Upper bound on distinct keys per batch, applied on top of `dispatch`.
    pub max_batch_size: Option<NonZeroUsize>,
    pub batch_timeout: Option<Duration>,
    /// Run at most one batch at a time, in dispatch order.
    pub serialize_batches: bool,
    pub prime_policy: PrimePolicy,
}

impl LoaderConfig {
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// A size of zero removes the bound.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = NonZeroUsize::new(max_batch_size);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn with_serialized_batches(mut self, serialize: bool) -> Self {
        self.serialize_batches = serialize;
        self
    }

    pub fn with_prime_policy(mut self, prime_policy: PrimePolicy) -> Self {
        self.prime_policy = prime_policy;
        self
    }

    pub(crate) fn batch_full(&self, pending_keys: usize) -> bool {
        self.max_batch_size.map_or(false, |max| pending_keys >= max.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_coalesce_per_tick_without_bound() {
        let config = LoaderConfig::default();
        assert_eq!(config.dispatch, DispatchPolicy::Tick);
        assert_eq!(config.prime_policy, PrimePolicy::Overwrite);
        assert!(!config.batch_full(1_000));
    }

    #[test]
    fn zero_batch_size_means_unbounded() {
        assert!(LoaderConfig::default().with_max_batch_size(0).max_batch_size.is_none());

        let bounded = LoaderConfig::default().with_max_batch_size(2);
        assert!(!bounded.batch_full(1));
        assert!(bounded.batch_full(2));
    }
}
