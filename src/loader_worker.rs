use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[cfg(feature = "stats")]
use crate::worker_stats::WorkerStats;
use crate::{
    batch_function::BatchFunction,
    cache::Cache,
    config::{DispatchPolicy, LoaderConfig, PrimePolicy},
    error::{LoadError, Outcome, PrimeError},
    executor::{self, FetchResult},
    loader_op::{send_response, LoadRequest, LoaderOp},
    registry::{KeyRegistry, PendingEntry},
};

type BatchId = u64;

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// A dispatched batch that has not settled yet.
struct InFlightBatch<K, V, E> {
    entries: Vec<PendingEntry<K, V, E>>,
    /// Keys invalidated while the batch was running; their outcomes are not cached.
    stale: HashSet<K>,
    all_stale: bool,
    abort: AbortHandle,
}

impl<K: Eq + Hash, V, E> InFlightBatch<K, V, E> {
    fn should_cache(&self, key: &K) -> bool {
        !self.all_stale && !self.stale.contains(key)
    }
}

/// A `LoaderWorker` is the "single-thread" worker task that actually does the loading work.
///
/// Once started, it runs in a loop until the parent Loader aborts its `JoinHandle` or drops the
/// request queue tx channel. Because only the worker touches the registry, the cache and the
/// in-flight batches, every op is applied under the same exclusive ownership.
///
/// Each turn of the loop waits on three sources:
///
/// 1. The request queue. On the first op the worker yields once to the runtime, then drains
///    every op queued without waiting. Load requests are answered from the cache when possible
///    and otherwise registered as pending keys. Under [`DispatchPolicy::Tick`] the pending keys
///    are dispatched once the queue is drained; this cycle is one "execution frame".
/// 2. In-flight batches. A settled batch is checked against its keys, written to the cache, then
///    fanned out to every waiting handle.
/// 3. The batch deadline under [`DispatchPolicy::Delay`].
///
/// Reaching `max_batch_size` distinct pending keys dispatches immediately under any policy; keys
/// repeated later in the same window still share the slot they were dispatched with. A key
/// requested in a later window while its batch is in flight starts a new pending batch rather
/// than joining it.
pub struct LoaderWorker<K, V, F, CacheT, ContextT>
where
    F: BatchFunction<K, V, Context = ContextT>,
{
    cache: CacheT,
    request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V, F::Error>>,
    registry: KeyRegistry<K, V, F::Error>,
    in_flight: FuturesUnordered<BoxFuture<'static, (BatchId, FetchResult<V, F::Error>)>>,
    /// Batches waiting for their turn when `serialize_batches` is set.
    queued: VecDeque<BoxFuture<'static, (BatchId, FetchResult<V, F::Error>)>>,
    batches: HashMap<BatchId, InFlightBatch<K, V, F::Error>>,
    /// Keys that `max_batch_size` dispatched before the current window ended, with their batch
    /// and slot. Later requests for them in the same window join that slot.
    split_keys: HashMap<K, (BatchId, usize)>,
    next_batch_id: BatchId,
    deadline: Option<Instant>,
    context: Arc<ContextT>,
    config: LoaderConfig,
    phantom_batch_function: PhantomData<F>,
    #[cfg(feature = "stats")]
    stats: WorkerStats,
}

impl<K, V, F, CacheT, ContextT> LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Clone + Debug + Send,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    F::Error: 'static + Clone + Debug + Send,
    CacheT: Cache<K = K, V = Outcome<V, F::Error>>,
    ContextT: Send + Sync + 'static,
{
    pub fn new(
        cache: CacheT,
        request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V, F::Error>>,
        context: ContextT,
        config: LoaderConfig,
    ) -> Self {
        Self {
            cache,
            request_rx,
            registry: KeyRegistry::default(),
            in_flight: FuturesUnordered::new(),
            queued: VecDeque::new(),
            batches: HashMap::new(),
            split_keys: HashMap::new(),
            next_batch_id: 0,
            deadline: None,
            context: Arc::new(context),
            #[cfg(feature = "stats")]
            stats: WorkerStats::new(config.name.unwrap_or_else(std::any::type_name::<(K, V)>)),
            config,
            phantom_batch_function: PhantomData,
        }
    }

    pub async fn start(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                op = self.request_rx.recv() => {
                    let op = match op {
                        None => {
                            tracing::info!("Tx channel closed. Terminating LoaderWorker.");
                            return;
                        }
                        Some(op) => op,
                    };
                    self.mux_op(op);
                    // Let tasks that are already runnable enqueue their loads into this frame.
                    tokio::task::yield_now().await;
                    // Flush remainder of the op queue before dispatching.
                    while let Some(Some(op)) = self.request_rx.recv().now_or_never() {
                        self.mux_op(op);
                    }
                    if self.config.dispatch == DispatchPolicy::Tick {
                        self.dispatch_pending();
                    }
                }
                Some((batch_id, fetched)) = self.in_flight.next(),
                    if !self.in_flight.is_empty() =>
                {
                    self.settle_batch(batch_id, fetched);
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    tracing::trace!("batch delay elapsed");
                    self.dispatch_pending();
                }
            }
        }
    }

    fn mux_op(&mut self, op: LoaderOp<K, V, F::Error>) {
        match op {
            LoaderOp::Load(requests) => self.register_loads(requests),
            LoaderOp::Prime(key_outcomes, response_tx) => {
                let primed = self.prime(key_outcomes);
                if response_tx.send(primed).is_err() {
                    tracing::debug!("prime receiver dropped");
                }
            }
            LoaderOp::Invalidate(keys) => {
                self.cache.remove(&keys);
                for batch in self.batches.values_mut() {
                    batch.stale.extend(keys.iter().cloned());
                }
            }
            LoaderOp::InvalidateAll => {
                self.cache.flush();
                for batch in self.batches.values_mut() {
                    batch.all_stale = true;
                }
            }
            LoaderOp::Dispatch => self.dispatch_pending(),
            LoaderOp::Cancel => self.cancel_in_flight(),
        }
    }

    #[tracing::instrument(skip_all, fields(requests = requests.len()))]
    fn register_loads(&mut self, requests: Vec<LoadRequest<K, V, F::Error>>) {
        #[cfg(feature = "stats")]
        self.stats.record_load_request(requests.len() as u32);

        let mut cache_hits = 0;
        for LoadRequest { key, response_tx } in requests {
            if let Some(cached) = self.cache.get(&key) {
                cache_hits += 1;
                send_response(response_tx, cached.clone());
                continue;
            }
            if let Some(&(batch_id, slot)) = self.split_keys.get(&key) {
                if let Some(batch) = self.batches.get_mut(&batch_id) {
                    batch.entries[slot].attach(response_tx);
                    continue;
                }
            }
            let starts_batch = self.registry.is_empty();
            if !self.registry.register(key, response_tx) {
                continue;
            }
            if starts_batch {
                if let DispatchPolicy::Delay(delay) = self.config.dispatch {
                    self.deadline = Some(Instant::now() + delay);
                }
            }
            if self.config.batch_full(self.registry.len()) {
                self.dispatch_split();
            }
        }
        tracing::debug!(cache_hits, pending_keys = self.registry.len());

        #[cfg(feature = "stats")]
        self.stats.record_cache_hits(cache_hits);
    }

    fn prime(&mut self, key_outcomes: Vec<(K, Outcome<V, F::Error>)>) -> Result<(), PrimeError<K>> {
        let mut rejected = Vec::new();
        for (key, outcome) in key_outcomes {
            match self.config.prime_policy {
                PrimePolicy::Overwrite => self.cache.insert(key, outcome),
                PrimePolicy::Forbid => {
                    if self.cache.contains(&key) {
                        rejected.push(key);
                    } else {
                        self.cache.insert(key, outcome);
                    }
                }
            }
        }
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(PrimeError::AlreadyCached { keys: rejected })
        }
    }

    /// Ends the current window: dispatches whatever is pending.
    fn dispatch_pending(&mut self) {
        self.deadline = None;
        self.dispatch_batch();
        self.split_keys.clear();
    }

    /// Dispatches a full batch while the window stays open.
    fn dispatch_split(&mut self) {
        let Some(batch_id) = self.dispatch_batch() else { return };
        if let Some(batch) = self.batches.get(&batch_id) {
            for (slot, entry) in batch.entries.iter().enumerate() {
                self.split_keys.insert(entry.key.clone(), (batch_id, slot));
            }
        }
    }

    /// Turns every pending key into one batch and starts it (or queues it when batches are
    /// serialized).
    fn dispatch_batch(&mut self) -> Option<BatchId> {
        if self.registry.is_empty() {
            return None;
        }
        let entries = self.registry.take();
        let keys = entries.iter().map(|entry| entry.key.clone()).collect::<Vec<_>>();
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        tracing::debug!(batch_id, ?keys, "dispatching batch");

        #[cfg(feature = "stats")]
        self.stats.record_dispatch(keys.len() as u32);

        let (abort, registration) = AbortHandle::new_pair();
        let fetch = executor::fetch::<K, V, F, ContextT>(
            keys,
            self.context.clone(),
            self.config.batch_timeout,
        );
        let fetch = Abortable::new(fetch, registration);
        let batch: BoxFuture<'static, _> = Box::pin(async move {
            (batch_id, fetch.await.unwrap_or(Err(LoadError::Cancelled)))
        });

        self.batches.insert(
            batch_id,
            InFlightBatch { entries, stale: HashSet::new(), all_stale: false, abort },
        );
        if self.config.serialize_batches && !self.in_flight.is_empty() {
            self.queued.push_back(batch);
        } else {
            self.in_flight.push(batch);
        }
        Some(batch_id)
    }

    fn cancel_in_flight(&mut self) {
        tracing::debug!(batches = self.batches.len(), "cancelling in-flight batches");
        for batch in self.batches.values() {
            batch.abort.abort();
        }
        // Aborted batches settle as cancelled on their first poll without calling the batch
        // function.
        self.in_flight.extend(self.queued.drain(..));
    }

    /// Caches and fans out the outcome of one batch.
    fn settle_batch(&mut self, batch_id: BatchId, fetched: FetchResult<V, F::Error>) {
        if let Some(batch) = self.batches.remove(&batch_id) {
            match executor::demultiplex(batch.entries.len(), fetched) {
                Ok(outcomes) => {
                    for (entry, outcome) in batch.entries.iter().zip(outcomes.iter()) {
                        if batch.should_cache(&entry.key) {
                            self.cache.insert_vacant(entry.key.clone(), outcome.clone());
                        }
                    }
                    #[cfg(feature = "stats")]
                    self.stats.record_settled(
                        batch.entries.iter().map(PendingEntry::waiter_count).sum::<usize>() as u32,
                        outcomes.iter().filter(|outcome| outcome.is_ok()).count() as u32,
                    );
                    for (entry, outcome) in batch.entries.into_iter().zip(outcomes.iter()) {
                        entry.resolve(outcome);
                    }
                }
                Err(error) => {
                    if let LoadError::BatchShape { expected, actual } = error {
                        tracing::error!(
                            batch_id,
                            expected,
                            actual,
                            "batch function returned the wrong number of results"
                        );
                    } else {
                        tracing::warn!(batch_id, ?error, "batch failed");
                        for entry in batch.entries.iter() {
                            if batch.should_cache(&entry.key) {
                                self.cache.insert_vacant(entry.key.clone(), Err(error.clone()));
                            }
                        }
                    }
                    #[cfg(feature = "stats")]
                    self.stats.record_failed_batch(
                        batch.entries.iter().map(PendingEntry::waiter_count).sum::<usize>() as u32,
                    );
                    let failure = Err(error);
                    for entry in batch.entries {
                        entry.resolve(&failure);
                    }
                }
            }
        }

        if self.in_flight.is_empty() {
            if let Some(next) = self.queued.pop_front() {
                self.in_flight.push(next);
            }
        }
    }
}
