use std::sync::Arc;
use std::time::Duration;

/// Errors produced while loading through a [`crate::Loader`].
///
/// `LoadError` is `Clone` because a single batch failure is delivered to every load that was
/// waiting on that batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The batch function failed for a whole batch.
    #[error("batch fetch for loader `{loader}` failed: {source}")]
    BatchFetch { loader: &'static str, source: Arc<dyn std::error::Error + Send + Sync> },

    /// The batch function returned a value list that does not line up with its keys. This is a
    /// bug in the batch function and aborts the request.
    #[error("loader `{loader}` fetched {actual} values for {expected} keys")]
    ContractViolation { loader: &'static str, expected: usize, actual: usize },

    /// The loader was used after the registry of its request was dropped.
    #[error("loader `{loader}` used after its request completed")]
    RegistryClosed { loader: &'static str },

    #[error("no loader named `{name}` is registered")]
    UnknownLoader { name: String },

    #[error("loader `{name}` is registered with different key or value types")]
    TypeMismatch { name: String },

    #[error("request exceeded its {0:?} time limit")]
    Timeout(Duration),
}

impl LoadError {
    pub(crate) fn batch_fetch<E>(loader: &'static str, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LoadError::BatchFetch { loader, source: Arc::new(error) }
    }

    /// Whether this error aborts the whole request rather than only the loads that observed it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LoadError::ContractViolation { .. } | LoadError::Timeout(_))
    }
}
