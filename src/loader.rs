use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Drop;

use tokio::sync::{mpsc, oneshot};
use tracing::{span, Level};
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    cache::Cache,
    config::LoaderConfig,
    error::{LoadError, Outcome, PrimeError},
    handle::LoadFuture,
    loader_op::{LoadRequest, LoaderOp},
    loader_worker::LoaderWorker,
};

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem.
///
/// Users call [`Loader::load`] and [`Loader::load_many`] to fetch values from the underlying
/// resource or cache. Cached entries are removed with [`Loader::invalidate`],
/// [`Loader::invalidate_many`] and [`Loader::invalidate_all`], and outcomes can be added to the
/// cache out-of-band through [`Loader::prime`] and friends.
///
/// The `Loader` struct acts as an intermediary between the async domain in which `load` calls are
/// invoked and the pseudo-single-threaded domain of the `LoaderWorker`. Callers can invoke the
/// `Loader` from multiple parallel tasks (share it behind an `Arc`), and the loader will enqueue
/// the requested operations on the request queue for processing by its `LoaderWorker`. The worker
/// processes the requests sequentially and settles handles via oneshot channels.
///
/// A `Loader` owns its cache. Create one per request to bound what a request can observe; dropping
/// it stops the worker and drops the cache.
pub struct Loader<K, V, E>
where
    K: 'static + Send,
    V: 'static + Send,
    E: 'static + Send,
{
    request_tx: mpsc::UnboundedSender<LoaderOp<K, V, E>>,
    load_task_handle: tokio::task::JoinHandle<()>,
}

impl<K, V, E> Drop for Loader<K, V, E>
where
    K: 'static + Send,
    V: 'static + Send,
    E: 'static + Send,
{
    fn drop(&mut self) {
        self.load_task_handle.abort();
    }
}

impl<K, V, E> Loader<K, V, E>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Debug + Send,
    E: 'static + Clone + Debug + Send,
{
    /// Creates a new Loader for the provided BatchFunction and Context type with the default
    /// configuration.
    ///
    /// Note: the batch function is passed in as a marker for type inference. Must be called from
    /// within a tokio runtime.
    pub fn new<F, ContextT>(batch_function: F, context: ContextT) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT, Error = E> + Send,
    {
        Self::with_config(batch_function, context, LoaderConfig::default())
    }

    pub fn with_config<F, ContextT>(
        batch_function: F,
        context: ContextT,
        config: LoaderConfig,
    ) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT, Error = E> + Send,
    {
        Self::with_cache(batch_function, context, config, HashMap::new())
    }

    /// Creates a Loader backed by a caller supplied cache.
    pub fn with_cache<F, ContextT, CacheT>(
        _: F,
        context: ContextT,
        config: LoaderConfig,
        cache: CacheT,
    ) -> Self
    where
        ContextT: Send + Sync + 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT, Error = E> + Send,
        CacheT: 'static + Cache<K = K, V = Outcome<V, E>> + Send,
    {
        let name = config.name.unwrap_or_else(std::any::type_name::<(K, V)>);
        let span = span!(Level::TRACE, "LoaderWorker", kv = name);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            request_tx: tx,
            load_task_handle: tokio::task::spawn(
                LoaderWorker::<K, V, F, CacheT, ContextT>::new(cache, rx, context, config)
                    .start()
                    .instrument(span),
            ),
        }
    }
}

impl<K, V, E> Loader<K, V, E>
where
    K: 'static + Send,
    V: 'static + Send,
    E: 'static + Send,
{
    /// Loads a value from the underlying resource.
    ///
    /// Returns immediately. If the key is already in the loader cache, the handle settles as soon
    /// as the request is processed. Otherwise, the key is registered for the next batch; repeated
    /// keys in the same window share one fetch slot but each call gets its own handle.
    pub fn load(&self, key: K) -> LoadFuture<V, E> {
        let (request, response_rx) = LoadRequest::new(key);
        self.send(LoaderOp::Load(vec![request]));
        LoadFuture::new(response_rx)
    }

    /// Loads many values at once.
    ///
    /// Returns one handle per key, in the order given. All keys are registered in the same
    /// coalescing window.
    pub fn load_many<I>(&self, keys: I) -> Vec<LoadFuture<V, E>>
    where
        I: IntoIterator<Item = K>,
    {
        let (requests, handles): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .map(|key| {
                let (request, response_rx) = LoadRequest::new(key);
                (request, LoadFuture::new(response_rx))
            })
            .unzip();
        if !requests.is_empty() {
            self.send(LoaderOp::Load(requests));
        }
        handles
    }

    /// Adds a value to the cache.
    pub async fn prime(&self, key: K, value: V) -> Result<(), PrimeError<K>> {
        self.prime_outcomes(vec![(key, Ok(value))]).await
    }

    /// Caches a per-key failure for `key`.
    pub async fn prime_error(&self, key: K, error: E) -> Result<(), PrimeError<K>> {
        self.prime_outcomes(vec![(key, Err(LoadError::PerKey(error)))]).await
    }

    /// Adds many values to the cache at once.
    pub async fn prime_many(&self, key_vals: Vec<(K, V)>) -> Result<(), PrimeError<K>> {
        self.prime_outcomes(key_vals.into_iter().map(|(key, value)| (key, Ok(value))).collect())
            .await
    }

    async fn prime_outcomes(
        &self,
        key_outcomes: Vec<(K, Outcome<V, E>)>,
    ) -> Result<(), PrimeError<K>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(LoaderOp::Prime(key_outcomes, response_tx))
            .map_err(|_| PrimeError::Closed)?;
        response_rx.await.map_err(|_| PrimeError::Closed)?
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested. Invalidating a key that is not cached
    /// does nothing.
    pub fn invalidate(&self, key: K) {
        self.send(LoaderOp::Invalidate(vec![key]));
    }

    /// Removes multiple values from the cache at once.
    pub fn invalidate_many(&self, keys: Vec<K>) {
        self.send(LoaderOp::Invalidate(keys));
    }

    pub fn invalidate_all(&self) {
        self.send(LoaderOp::InvalidateAll);
    }

    /// Dispatches the pending batch without waiting for the dispatch policy.
    pub fn dispatch(&self) {
        self.send(LoaderOp::Dispatch);
    }

    /// Cancels every dispatched batch that has not settled; their handles resolve to
    /// [`LoadError::Cancelled`].
    pub fn cancel(&self) {
        self.send(LoaderOp::Cancel);
    }

    fn send(&self, op: LoaderOp<K, V, E>) {
        // A failed send drops the op together with any response channels it carries, which
        // settles their handles as cancelled.
        if self.request_tx.send(op).is_err() {
            tracing::warn!("loader worker has shut down");
        }
    }
}
