use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` fetches batched data from
/// some resource. The `BatchFunction` receives the distinct keys that were requested during the
/// `Loader`'s most recent coalescing window, in first-request order, and some user defined
/// context struct.
///
/// The returned vector must hold exactly one entry per key, in the same order as `keys`. An
/// `Err` at some position is a failure for that key only and is delivered to the requesters of
/// that key. Returning `Err` for the whole call fails every key of the batch. A vector of the
/// wrong length is a contract violation; every requester in the batch then receives
/// [`LoadError::BatchShape`](crate::LoadError::BatchShape) and nothing is cached.
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Arc`). The [`align`](crate::align) helpers turn unordered query rows into the positional form.
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error;

    async fn load(
        keys: &[K],
        context: &Self::Context,
    ) -> Result<Vec<Result<V, Self::Error>>, Self::Error>;
}
