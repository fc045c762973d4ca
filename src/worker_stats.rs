#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Name of the loader these stats belong to.
    tag: &'static str,
    /// Number of `LoaderOp::Load` that were received by the worker.
    load_requests: u32,
    /// The number of loads answered straight from the loader cache.
    cache_hits: u32,
    /// Number of batch function calls made by the worker.
    loads: u32,
    /// The average number of unique keys fetched per batch function call.
    average_batch_size: f32,
    /// The max number of keys fetched during a single call.
    max_batch_size: u32,
    /// The min number of keys fetched during a single call.
    min_batch_size: u32,
    /// The total number of keys that were actually fetched.
    items_loaded: u32,
}

impl WorkerStats {
    pub fn new(tag: &'static str) -> Self {
        Self { tag, min_batch_size: u32::MAX, ..Default::default() }
    }

    pub fn record_load_request(&mut self) {
        self.load_requests += 1;
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    pub fn record_load_exec(&mut self, batch_size: usize) {
        let batch_size = u32::try_from(batch_size).unwrap_or(u32::MAX);
        let new_total_load = self.loads + 1;
        self.average_batch_size = (((self.average_batch_size as f64 * self.loads as f64)
            + batch_size as f64)
            / new_total_load as f64) as f32;
        self.loads = new_total_load;
        self.items_loaded = self.items_loaded.saturating_add(batch_size);
        self.max_batch_size = self.max_batch_size.max(batch_size);
        self.min_batch_size = self.min_batch_size.min(batch_size);
    }
}

impl Drop for WorkerStats {
    fn drop(&mut self) {
        tracing::debug!(loader = self.tag, worker_stats = ?self);
    }
}
