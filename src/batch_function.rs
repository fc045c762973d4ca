use async_trait::async_trait;

/// A `BatchFunction` defines the method through which some `Loader` fetches batched data from the
/// backing store. It receives the keys that were staged during the loader's most recent sweep and
/// the user defined context the loader was registered with.
///
/// The returned values must line up with `keys`: `values.len() == keys.len()` and `values[i]`
/// belongs to `keys[i]`. Keys without a match map to a sentinel chosen by the implementation (an
/// empty `Vec`, a `None`, ...); a missing key is a successful load, not an error. A result of the
/// wrong length is reported as [`crate::LoadError::ContractViolation`] and aborts the request.
///
/// Returning `Err` fails every load that was waiting on this batch with
/// [`crate::LoadError::BatchFetch`]. The loader never retries.
///
/// Multiple `BatchFunction`s (and therefore loaders) can share the same context (likely through an
/// `Arc`).
#[async_trait]
pub trait BatchFunction<K, V> {
    type Context;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<V>, Self::Error>;
}
