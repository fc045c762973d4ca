use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

const REQUEST_TIMEOUT_VAR: &str = "BATCHLOAD_REQUEST_TIMEOUT_MS";
const MAX_BATCH_SIZE_VAR: &str = "BATCHLOAD_MAX_BATCH_SIZE";

/// Settings shared by every registry built from one set of loader definitions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Upper bound for one `LoaderRegistry::run`. `None` lets requests run until they finish.
    pub request_timeout: Option<Duration>,
    /// Default batch size limit for loaders that don't set their own. `None` flushes every staged
    /// key in a single fetch.
    pub max_batch_size: Option<NonZeroUsize>,
}

impl RegistryConfig {
    /// Reads `BATCHLOAD_REQUEST_TIMEOUT_MS` and `BATCHLOAD_MAX_BATCH_SIZE`. Unset variables keep
    /// their defaults, unparsable ones are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let request_timeout =
            parse_var::<u64, _>(&lookup, REQUEST_TIMEOUT_VAR).map(Duration::from_millis);
        let max_batch_size = parse_var::<NonZeroUsize, _>(&lookup, MAX_BATCH_SIZE_VAR);
        Self { request_timeout, max_batch_size }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.max_batch_size = Some(size);
        self
    }
}

fn parse_var<T, L>(lookup: &L, var: &str) -> Option<T>
where
    T: std::str::FromStr,
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(var)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var, value = %raw, "ignoring invalid batchload setting");
            None
        }
    }
}
