use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::num::NonZeroUsize;
use std::slice;
use std::task::{self, Poll};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    batch_function::BatchFunction,
    cache::Cache,
    error::LoadError,
    loader_op::{LoadRequest, LoaderOp, Outcome},
    scheduler::Flush,
};
#[cfg(feature = "stats")]
use crate::worker_stats::WorkerStats;

/// A `LoaderWorker` owns the state behind one [`crate::Loader`]: its cache, its staged keys and
/// the load requests waiting on them.
///
/// It has no task of its own. The `FlushScheduler` of the request drives it through two
/// phases, and one pass through both may be called an "execution frame":
///
/// 1. Staging. The scheduler drains the request queue. Prime and Clear requests are applied to the
///    cache immediately. Load requests for a key with a cached outcome are answered immediately;
///    every other key is staged (once, in arrival order) and its request parked.
///
/// 2. Loading. Once the request can make no further progress without data, the scheduler invokes
///    [`LoaderWorker::execute_load`]: the staged keys are handed to the `BatchFunction`, the
///    outcomes are cached, and every parked request is answered from them.
pub struct LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    CacheT: Cache<K = K, V = Outcome<V>> + Send,
    ContextT: Send + Sync + 'static,
{
    name: &'static str,
    cache: CacheT,
    request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
    keys_to_load: Vec<K>,
    staged: HashSet<K>,
    pending_requests: Vec<LoadRequest<K, V>>,
    context: ContextT,
    max_batch_size: Option<NonZeroUsize>,
    phantom_batch_function: PhantomData<fn() -> F>,
    #[cfg(feature = "stats")]
    stats: WorkerStats,
}

impl<K, V, F, ContextT> LoaderWorker<K, V, F, HashMap<K, Outcome<V>>, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    ContextT: Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        request_rx: mpsc::UnboundedReceiver<LoaderOp<K, V>>,
        context: ContextT,
        max_batch_size: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            name,
            cache: HashMap::new(),
            request_rx,
            keys_to_load: Vec::new(),
            staged: HashSet::new(),
            pending_requests: Vec::new(),
            context,
            max_batch_size,
            phantom_batch_function: PhantomData,
            #[cfg(feature = "stats")]
            stats: WorkerStats::new(name),
        }
    }
}

impl<K, V, F, CacheT, ContextT> LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    CacheT: Cache<K = K, V = Outcome<V>> + Send,
    ContextT: Send + Sync + 'static,
{
    /// Applies one op. Returns true if a load request was answered from the cache.
    #[tracing::instrument(skip(self, op), fields(loader = self.name))]
    fn mux_op(&mut self, op: LoaderOp<K, V>) -> bool {
        match op {
            LoaderOp::Load(request) => {
                #[cfg(feature = "stats")]
                self.stats.record_load_request();
                if let Some(outcome) = self.cache.get(request.key()) {
                    tracing::trace!(key = ?request.key(), "cache hit");
                    #[cfg(feature = "stats")]
                    self.stats.record_cache_hit();
                    request.send_response(outcome);
                    return true;
                }
                if self.staged.insert(request.key().clone()) {
                    tracing::debug!(key = ?request.key(), "staging key");
                    self.keys_to_load.push(request.key().clone());
                }
                self.pending_requests.push(request);
                false
            }
            LoaderOp::Prime(key, value) => self.prime(key, value),
            LoaderOp::PrimeMany(key_vals) => {
                let mut answered = false;
                for (key, value) in key_vals {
                    answered |= self.prime(key, value);
                }
                answered
            }
            LoaderOp::Clear(key) => {
                self.cache.remove(slice::from_ref(&key));
                false
            }
            LoaderOp::ClearMany(keys) => {
                self.cache.remove(&keys);
                false
            }
            LoaderOp::ClearAll => {
                self.cache.flush();
                false
            }
        }
    }

    /// Caches a primed value. Loads already parked on the key are answered with it and the key is
    /// no longer fetched.
    fn prime(&mut self, key: K, value: V) -> bool {
        let outcome = Ok(value);
        let mut answered = false;
        if self.staged.remove(&key) {
            self.keys_to_load.retain(|staged| staged != &key);
            let (primed, parked): (Vec<_>, Vec<_>) = mem::take(&mut self.pending_requests)
                .into_iter()
                .partition(|request| request.key() == &key);
            self.pending_requests = parked;
            for request in primed {
                request.send_response(&outcome);
                answered = true;
            }
        }
        self.cache.insert(key, outcome);
        answered
    }

    /// Hands the staged keys to the `BatchFunction` and answers every parked request.
    ///
    /// Returns the first contract violation of this frame, if any; batch fetch errors are only
    /// delivered to the requests that waited on the failing batch.
    #[tracing::instrument(skip(self), fields(loader = self.name, keys = self.keys_to_load.len()))]
    pub async fn execute_load(&mut self) -> Result<(), LoadError> {
        // Taken up front so an abandoned flush leaves nothing parked behind.
        let keys = mem::take(&mut self.keys_to_load);
        let pending_requests = mem::take(&mut self.pending_requests);
        self.staged.clear();

        let batch_size = self.max_batch_size.map_or(keys.len().max(1), NonZeroUsize::get);
        let mut resolved: HashMap<K, Outcome<V>> = HashMap::with_capacity(keys.len());
        let mut violation = None;

        for batch in keys.chunks(batch_size) {
            tracing::debug!(keys = ?batch, "fetching batch");
            #[cfg(feature = "stats")]
            self.stats.record_load_exec(batch.len());
            let batch_error = match F::load(batch, &self.context).await {
                Ok(values) if values.len() == batch.len() => {
                    resolved.extend(batch.iter().cloned().zip(values.into_iter().map(Ok)));
                    continue;
                }
                Ok(values) => {
                    let error = LoadError::ContractViolation {
                        loader: self.name,
                        expected: batch.len(),
                        actual: values.len(),
                    };
                    tracing::error!(%error, "batch function broke the loader contract");
                    violation.get_or_insert_with(|| error.clone());
                    error
                }
                Err(source) => {
                    let error = LoadError::batch_fetch(self.name, source);
                    tracing::warn!(%error, keys = ?batch, "batch fetch failed");
                    error
                }
            };
            resolved.extend(batch.iter().map(|key| (key.clone(), Err(batch_error.clone()))));
        }

        for request in pending_requests {
            match resolved.get(request.key()) {
                Some(outcome) => request.send_response(outcome),
                None => tracing::error!(key = ?request.key(), "parked load without a staged key"),
            }
        }
        self.cache.insert_many(resolved);

        match violation {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<K, V, F, CacheT, ContextT> Flush for LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
    F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
    CacheT: Cache<K = K, V = Outcome<V>> + Send,
    ContextT: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn poll_stage(&mut self, cx: &mut task::Context<'_>) -> bool {
        let mut answered = false;
        while let Poll::Ready(Some(op)) = self.request_rx.poll_recv(cx) {
            answered |= self.mux_op(op);
        }
        answered
    }

    fn has_staged(&self) -> bool {
        !self.pending_requests.is_empty()
    }

    async fn flush(&mut self) -> Result<(), LoadError> {
        self.execute_load().await
    }
}
