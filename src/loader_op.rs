use tokio::sync::oneshot;

use crate::error::{Outcome, PrimeError};

/// Set of possible requests that can be sent to the
/// [`LoaderWorker`](crate::loader_worker::LoaderWorker).
///
/// Ops are applied in the order they were sent.
#[derive(Debug)]
pub enum LoaderOp<K, V, E> {
    /// Fetch data from the resource wrapped by this data loader (or the cache). All requests of
    /// one op are registered in the same coalescing window.
    Load(Vec<LoadRequest<K, V, E>>),
    /// Add outcomes to the cache that were fetched from elsewhere.
    Prime(Vec<(K, Outcome<V, E>)>, oneshot::Sender<Result<(), PrimeError<K>>>),
    /// Remove values from the cache so that they will be reloaded when they are next requested.
    Invalidate(Vec<K>),
    InvalidateAll,
    /// Flush the pending batch now, regardless of the dispatch policy.
    Dispatch,
    /// Abort every dispatched batch that has not settled yet.
    Cancel,
}

/// One `load` call: the requested key and the channel its handle listens on.
#[derive(Debug)]
pub struct LoadRequest<K, V, E> {
    pub key: K,
    pub response_tx: oneshot::Sender<Outcome<V, E>>,
}

impl<K, V, E> LoadRequest<K, V, E> {
    pub fn new(key: K) -> (Self, oneshot::Receiver<Outcome<V, E>>) {
        let (response_tx, response_rx) = oneshot::channel();
        (Self { key, response_tx }, response_rx)
    }
}

pub(crate) fn send_response<V, E>(
    response_tx: oneshot::Sender<Outcome<V, E>>,
    outcome: Outcome<V, E>,
) {
    if response_tx.send(outcome).is_err() {
        tracing::debug!("receiver dropped");
    }
}
