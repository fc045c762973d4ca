use std::fmt::Debug;
use std::hash::Hash;

use crate::{pending_load::PendingLoad, registry::RegistryHandle};

/// An entity whose relations are loaded by its key.
pub trait Keyed {
    type Key;

    fn key(&self) -> Self::Key;
}

impl RegistryHandle {
    /// Loads the `relation` of `parent` through the loader registered under that name.
    ///
    /// This is what a field resolver calls in place of querying the backing store itself. An
    /// unknown or mistyped relation yields an already failed [`PendingLoad`].
    pub fn load_related<P, V>(&self, relation: &'static str, parent: &P) -> PendingLoad<V>
    where
        P: Keyed,
        P::Key: 'static + Eq + Hash + Clone + Debug + Send + Sync,
        V: 'static + Send + Debug + Clone,
    {
        match self.loader::<P::Key, V>(relation) {
            Ok(loader) => loader.load(parent.key()),
            Err(error) => {
                tracing::error!(%error, relation, "cannot resolve relation");
                PendingLoad::ready(relation, Err(error))
            }
        }
    }
}
