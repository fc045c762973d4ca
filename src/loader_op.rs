use tokio::sync::oneshot;

use crate::error::LoadError;

/// Terminal state of one key: resolved to a value or failed.
pub(crate) type Outcome<V> = Result<V, LoadError>;

/// Set of possible requests that can be sent to the [`crate::loader_worker::LoaderWorker`].
///
/// The three categories of commands are Load, Prime, and Clear; Prime and Clear have single and
/// many variants for convenience.
#[derive(Debug)]
pub enum LoaderOp<K, V> {
    /// Fetch data from the resource wrapped by this loader (or the cache).
    Load(LoadRequest<K, V>),
    /// Add values to the cache that were fetched from elsewhere.
    Prime(K, V),
    PrimeMany(Vec<(K, V)>),
    /// Remove values from the cache so that they will be reloaded when they are next requested.
    Clear(K),
    ClearMany(Vec<K>),
    ClearAll,
}

#[derive(Debug)]
pub struct LoadRequest<K, V> {
    key: K,
    response_tx: oneshot::Sender<Outcome<V>>,
}

impl<K, V> LoadRequest<K, V>
where
    V: Clone,
{
    pub fn new(key: K, response_tx: oneshot::Sender<Outcome<V>>) -> Self {
        Self { key, response_tx }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn send_response(self, outcome: &Outcome<V>) {
        if self.response_tx.send(outcome.clone()).is_err() {
            tracing::debug!("pending load dropped before it resolved");
        }
    }
}
