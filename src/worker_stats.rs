#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Human readable name used to identify this worker stats when it is reported.
    tag: &'static str,
    /// Number of `LoaderOp::Load` that were received by the worker.
    load_requests: u32,
    /// The total number of keys that were requested for loading (not necessarily unique).
    items_requested: u32,
    /// The number of keys that were immediately found in the loader cache.
    cache_hits: u32,
    /// Number of batches handed to the batch function.
    batches: u32,
    /// The average number of unique keys per batch.
    average_batch_size: f32,
    /// The max number of unique keys fetched during a single batch.
    max_batch_size: u32,
    /// The min number of unique keys fetched during a single batch.
    min_batch_size: u32,
    /// The number of handles a batch result was fanned out to.
    handles_resolved: u32,
    /// The total number of keys that settled with a value.
    items_loaded: u32,
    /// Number of batches that failed as a whole.
    failed_batches: u32,
}

impl WorkerStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, min_batch_size: u32::MAX, ..Default::default() }
    }

    pub fn record_load_request(&mut self, items_requested: u32) {
        self.load_requests += 1;
        self.items_requested += items_requested;
    }

    pub fn record_cache_hits(&mut self, hits: u32) {
        self.cache_hits += hits;
    }

    pub fn record_dispatch(&mut self, batch_size: u32) {
        let new_total = self.batches + 1;
        self.average_batch_size = (((self.average_batch_size as f64 * self.batches as f64)
            + batch_size as f64)
            / new_total as f64) as f32;
        self.batches = new_total;
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
    }

    pub fn record_settled(&mut self, handles_resolved: u32, loaded_item_count: u32) {
        self.handles_resolved += handles_resolved;
        self.items_loaded += loaded_item_count;
    }

    pub fn record_failed_batch(&mut self, handles_resolved: u32) {
        self.failed_batches += 1;
        self.handles_resolved += handles_resolved;
    }
}

impl Drop for WorkerStats {
    fn drop(&mut self) {
        tracing::debug!(worker_stats = ?self);
    }
}
