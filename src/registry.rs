use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    config::RegistryConfig,
    error::LoadError,
    loader::Loader,
    loader_worker::LoaderWorker,
    scheduler::{Flush, FlushScheduler},
};

type ErasedLoader = Box<dyn Any + Send + Sync>;

type BuildFn = dyn Fn(Option<NonZeroUsize>) -> (ErasedLoader, Box<dyn Flush>) + Send + Sync;

/// Recipe for one named loader: its batch function, the context handed to it, and options.
///
/// Definitions are built once per process and stamp out a fresh loader, with an empty cache and
/// queue, for every request.
#[derive(Clone)]
pub struct LoaderDefinition {
    name: &'static str,
    max_batch_size: Option<NonZeroUsize>,
    build: Arc<BuildFn>,
}

impl LoaderDefinition {
    /// Defines a loader named `name` for the provided BatchFunction and context.
    ///
    /// Note: the batch function is passed in as a marker for type inference. The context is cloned
    /// into every request's loader, so share expensive state through an `Arc`.
    pub fn new<K, V, F, ContextT>(name: &'static str, _: F, context: ContextT) -> Self
    where
        K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
        V: 'static + Send + Debug + Clone,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
        ContextT: Clone + Send + Sync + 'static,
    {
        let build = move |max_batch_size| {
            let (request_tx, request_rx) = mpsc::unbounded_channel();
            let worker = LoaderWorker::<K, V, F, _, ContextT>::new(
                name,
                request_rx,
                context.clone(),
                max_batch_size,
            );
            let loader: ErasedLoader = Box::new(Loader::new(name, request_tx));
            (loader, Box::new(worker) as Box<dyn Flush>)
        };
        Self { name, max_batch_size: None, build: Arc::new(build) }
    }

    /// Splits each flush of this loader into fetches of at most `size` keys.
    pub fn max_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for LoaderDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderDefinition")
            .field("name", &self.name)
            .field("max_batch_size", &self.max_batch_size)
            .finish_non_exhaustive()
    }
}

/// Every loader an application offers its requests, plus the shared registry settings.
#[derive(Clone, Debug, Default)]
pub struct LoaderDefinitions {
    config: RegistryConfig,
    definitions: Vec<LoaderDefinition>,
}

impl LoaderDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Adds a definition. A later definition replaces an earlier one with the same name.
    pub fn define(mut self, definition: LoaderDefinition) -> Self {
        if let Some(pos) = self.definitions.iter().position(|d| d.name == definition.name) {
            tracing::warn!(loader = definition.name, "replacing loader definition");
            self.definitions.remove(pos);
        }
        self.definitions.push(definition);
        self
    }

    /// Shorthand for `define(LoaderDefinition::new(name, batch_fn, context))`.
    pub fn register<K, V, F, ContextT>(self, name: &'static str, batch_fn: F, context: ContextT) -> Self
    where
        K: 'static + Eq + Hash + Clone + Debug + Send + Sync,
        V: 'static + Send + Debug + Clone,
        F: 'static + BatchFunction<K, V, Context = ContextT> + Send,
        ContextT: Clone + Send + Sync + 'static,
    {
        self.define(LoaderDefinition::new(name, batch_fn, context))
    }

    /// Builds the loaders of a single request.
    pub fn new_registry(&self) -> LoaderRegistry {
        let mut loaders = HashMap::with_capacity(self.definitions.len());
        let mut workers = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            let max_batch_size = definition.max_batch_size.or(self.config.max_batch_size);
            let (loader, worker) = (definition.build)(max_batch_size);
            loaders.insert(definition.name, loader);
            workers.push(worker);
        }
        tracing::trace!(loaders = loaders.len(), "created request registry");
        LoaderRegistry {
            handle: RegistryHandle { loaders: Arc::new(loaders) },
            scheduler: FlushScheduler::new(workers),
            config: self.config.clone(),
        }
    }
}

/// Creates the registry for one incoming request. Call it at request start and drop the result
/// when the request completes.
pub fn new_registry(definitions: &LoaderDefinitions) -> LoaderRegistry {
    definitions.new_registry()
}

/// The loaders of one request, together with the scheduler that flushes them.
///
/// Resolvers reach the loaders through a [`RegistryHandle`]; the request itself runs inside
/// [`LoaderRegistry::run`]. Registries are never shared between requests, so cached values can't
/// leak from one request into another.
pub struct LoaderRegistry {
    handle: RegistryHandle,
    scheduler: FlushScheduler,
    config: RegistryConfig,
}

impl LoaderRegistry {
    /// A handle onto this request's loaders, to be placed in the resolvers' context.
    pub fn handle(&self) -> RegistryHandle {
        self.handle.clone()
    }

    pub fn loader<K, V>(&self, name: &str) -> Result<&Loader<K, V>, LoadError>
    where
        K: 'static,
        V: 'static,
    {
        self.handle.loader(name)
    }

    /// Number of flush frames this registry has run.
    pub fn frames(&self) -> usize {
        self.scheduler.frames()
    }

    /// Drives `request` to completion, flushing this registry's loaders each time it parks on
    /// staged keys.
    ///
    /// Failed batches only fail the loads that awaited them and `run` still returns the request's
    /// output. A contract violation by a batch function, or an elapsed request timeout, abandons
    /// the request and is returned as the error. Dropping the returned future abandons any
    /// remaining flushes.
    pub async fn run<F>(&mut self, request: F) -> Result<F::Output, LoadError>
    where
        F: Future,
    {
        let span = tracing::debug_span!("LoaderRegistry::run", loaders = self.handle.loaders.len());
        // One sweep must see every load issued at its tree level; tokio's coop budget would
        // otherwise cut a large sweep short and split the level across flushes.
        let drive = tokio::task::unconstrained(self.scheduler.drive(request)).instrument(span);
        match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, drive).await.map_err(|_| {
                tracing::warn!(?limit, "request timed out, abandoning pending loads");
                LoadError::Timeout(limit)
            })?,
            None => drive.await,
        }
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("loaders", &self.handle)
            .field("frames", &self.scheduler.frames())
            .field("config", &self.config)
            .finish()
    }
}

/// Clonable, read-only view of one request's loaders.
#[derive(Clone)]
pub struct RegistryHandle {
    loaders: Arc<HashMap<&'static str, ErasedLoader>>,
}

impl RegistryHandle {
    /// Looks up the loader registered under `name` with key type `K` and value type `V`.
    pub fn loader<K, V>(&self, name: &str) -> Result<&Loader<K, V>, LoadError>
    where
        K: 'static,
        V: 'static,
    {
        self.loaders
            .get(name)
            .ok_or_else(|| LoadError::UnknownLoader { name: name.to_owned() })?
            .downcast_ref::<Loader<K, V>>()
            .ok_or_else(|| LoadError::TypeMismatch { name: name.to_owned() })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.loaders.keys().copied()
    }
}

impl fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.loaders.keys()).finish()
    }
}
