mod batch_function;
mod cache;
mod config;
mod error;
mod loader;
mod loader_op;
mod loader_worker;
mod pending_load;
mod registry;
mod resolver;
mod scheduler;
#[cfg(feature = "stats")]
mod worker_stats;

pub use batch_function::BatchFunction;
pub use config::RegistryConfig;
pub use error::LoadError;
pub use loader::Loader;
pub use pending_load::PendingLoad;
pub use registry::{new_registry, LoaderDefinition, LoaderDefinitions, LoaderRegistry, RegistryHandle};
pub use resolver::Keyed;
