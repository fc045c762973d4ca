use std::fmt::Debug;
use std::hash::Hash;

use futures::future;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::LoadError,
    loader_op::{LoadRequest, LoaderOp},
    pending_load::PendingLoad,
};

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem.
///
/// Users can call [`Loader::load`] and [`Loader::load_many`] to fetch values from the underlying
/// resource or cache. The cache can be cleared with calls to [`Loader::clear`] and
/// [`Loader::clear_many`], and values can be added to the cache out-of-band through the use of
/// [`Loader::prime`] and [`Loader::prime_many`].
///
/// A `Loader` is a cheap handle onto a loader worker owned by one request's
/// [`crate::LoaderRegistry`]. Calls only enqueue operations; the worker applies them when the
/// registry's scheduler next drains it, so loads resolve only while the registry is running a
/// request. Once the registry is dropped every call reports [`LoadError::RegistryClosed`].
pub struct Loader<K, V> {
    name: &'static str,
    request_tx: mpsc::UnboundedSender<LoaderOp<K, V>>,
}

impl<K, V> Clone for Loader<K, V> {
    fn clone(&self) -> Self {
        Self { name: self.name, request_tx: self.request_tx.clone() }
    }
}

impl<K, V> Debug for Loader<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("closed", &self.request_tx.is_closed())
            .finish()
    }
}

impl<K, V> Loader<K, V> {
    pub(crate) fn new(name: &'static str, request_tx: mpsc::UnboundedSender<LoaderOp<K, V>>) -> Self {
        Self { name, request_tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, op: LoaderOp<K, V>) -> Result<(), LoadError> {
        self.request_tx.send(op).map_err(|_| {
            tracing::error!(loader = self.name, "loader used after its request completed");
            LoadError::RegistryClosed { loader: self.name }
        })
    }
}

impl<K, V> Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
    V: 'static + Send + Debug + Clone,
{
    /// Loads a value from the underlying resource.
    ///
    /// The key is registered right away: answered from the cache if this request already resolved
    /// it, otherwise staged for the loader's next batch (once, however many times it is requested).
    /// The returned [`PendingLoad`] yields the value after that batch is fetched.
    pub fn load(&self, key: K) -> PendingLoad<V> {
        let (response_tx, response_rx) = oneshot::channel();
        match self.send(LoaderOp::Load(LoadRequest::new(key, response_tx))) {
            Ok(()) => PendingLoad::waiting(self.name, response_rx),
            Err(error) => PendingLoad::ready(self.name, Err(error)),
        }
    }

    /// Loads many values at once. Equivalent to calling [`Loader::load`] for each key in order.
    pub fn load_many<I>(&self, keys: I) -> Vec<PendingLoad<V>>
    where
        I: IntoIterator<Item = K>,
    {
        keys.into_iter().map(|key| self.load(key)).collect()
    }

    /// Loads many values and waits for all of them, failing with the first error.
    pub async fn load_all<I>(&self, keys: I) -> Result<Vec<V>, LoadError>
    where
        I: IntoIterator<Item = K>,
    {
        future::try_join_all(self.load_many(keys)).await
    }

    /// Adds a value to the cache.
    pub fn prime(&self, key: K, value: V) -> Result<(), LoadError> {
        self.send(LoaderOp::Prime(key, value))
    }

    /// Adds many values to the cache at once.
    pub fn prime_many(&self, key_vals: Vec<(K, V)>) -> Result<(), LoadError> {
        self.send(LoaderOp::PrimeMany(key_vals))
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested.
    pub fn clear(&self, key: K) -> Result<(), LoadError> {
        self.send(LoaderOp::Clear(key))
    }

    /// Removes multiple values from the cache at once.
    ///
    /// These keys will be reloaded when requested.
    pub fn clear_many(&self, keys: Vec<K>) -> Result<(), LoadError> {
        self.send(LoaderOp::ClearMany(keys))
    }

    pub fn clear_all(&self) -> Result<(), LoadError> {
        self.send(LoaderOp::ClearAll)
    }
}
