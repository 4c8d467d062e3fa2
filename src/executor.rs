use std::sync::Arc;
use std::time::Duration;

use crate::{
    batch_function::BatchFunction,
    error::{LoadError, Outcome},
};

/// What one batch call produced, before it is checked against the dispatched keys.
pub type FetchResult<V, E> = Result<Vec<Result<V, E>>, LoadError<E>>;

/// Invokes the batch function once for `keys`, bounded by `timeout` when one is configured.
pub async fn fetch<K, V, F, ContextT>(
    keys: Vec<K>,
    context: Arc<ContextT>,
    timeout: Option<Duration>,
) -> FetchResult<V, F::Error>
where
    F: BatchFunction<K, V, Context = ContextT>,
{
    let loading = F::load(&keys, &context);
    let loaded = match timeout {
        Some(limit) => match tokio::time::timeout(limit, loading).await {
            Ok(loaded) => loaded,
            Err(_) => return Err(LoadError::TimedOut(limit)),
        },
        None => loading.await,
    };
    loaded.map_err(LoadError::BatchFetch)
}

/// Maps a batch result back onto the positions of the `expected` dispatched keys.
///
/// Errors are whole-batch failures; `Ok` holds one outcome per dispatched key.
pub fn demultiplex<V, E>(
    expected: usize,
    fetched: FetchResult<V, E>,
) -> Result<Vec<Outcome<V, E>>, LoadError<E>> {
    let values = fetched?;
    if values.len() != expected {
        return Err(LoadError::BatchShape { expected, actual: values.len() });
    }
    Ok(values.into_iter().map(|value| value.map_err(LoadError::PerKey)).collect())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    #[test]
    fn per_key_failures_stay_at_their_position() {
        let fetched: FetchResult<&str, &str> = Ok(vec![Ok("a"), Err("missing"), Ok("c")]);
        assert_eq!(
            demultiplex(3, fetched),
            Ok(vec![Ok("a"), Err(LoadError::PerKey("missing")), Ok("c")])
        );
    }

    #[test]
    fn length_mismatch_is_a_shape_error() {
        let short: FetchResult<&str, &str> = Ok(vec![Ok("a")]);
        assert_eq!(demultiplex(2, short), Err(LoadError::BatchShape { expected: 2, actual: 1 }));

        let long: FetchResult<&str, &str> = Ok(vec![Ok("a"), Ok("b"), Ok("c")]);
        assert_eq!(demultiplex(2, long), Err(LoadError::BatchShape { expected: 2, actual: 3 }));
    }

    #[test]
    fn whole_batch_failure_passes_through() {
        let fetched: FetchResult<&str, &str> = Err(LoadError::BatchFetch("db down"));
        assert_eq!(demultiplex(4, fetched), Err(LoadError::BatchFetch("db down")));
    }

    struct Echo;

    #[async_trait]
    impl BatchFunction<u32, u32> for Echo {
        type Context = Duration;
        type Error = ();

        async fn load(keys: &[u32], delay: &Duration) -> Result<Vec<Result<u32, ()>>, ()> {
            tokio::time::sleep(*delay).await;
            Ok(keys.iter().map(|k| Ok(k * 10)).collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_respects_timeout() {
        let fast = fetch::<_, _, Echo, _>(
            vec![1, 2],
            Arc::new(Duration::from_millis(5)),
            Some(Duration::from_millis(10)),
        );
        assert_eq!(fast.await, Ok(vec![Ok(10), Ok(20)]));

        let slow = fetch::<_, _, Echo, _>(
            vec![1],
            Arc::new(Duration::from_secs(60)),
            Some(Duration::from_millis(10)),
        );
        assert_eq!(slow.await, Err(LoadError::TimedOut(Duration::from_millis(10))));
    }
}
