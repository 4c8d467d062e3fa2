use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{LoadError, Outcome};

/// Deferred result of [`Loader::load`](crate::Loader::load).
///
/// Resolves once the key's batch settles, or immediately when the key was already cached. If the
/// loader is dropped first, the handle resolves to [`LoadError::Cancelled`]. Dropping the handle
/// does not withdraw the key from its batch.
#[derive(Debug)]
#[must_use = "a load handle does nothing unless awaited"]
pub struct LoadFuture<V, E> {
    response_rx: oneshot::Receiver<Outcome<V, E>>,
}

impl<V, E> LoadFuture<V, E> {
    pub(crate) fn new(response_rx: oneshot::Receiver<Outcome<V, E>>) -> Self {
        Self { response_rx }
    }
}

impl<V, E> Future for LoadFuture<V, E> {
    type Output = Outcome<V, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.response_rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(LoadError::Cancelled)))
    }
}
