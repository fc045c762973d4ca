use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batchload_rs::{
    new_registry, BatchFunction, LoadError, LoaderDefinitions, LoaderRegistry, RegistryConfig,
};
use futures::future;

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<Vec<i64>>>,
    generation: AtomicI64,
}

impl Recorder {
    fn record(&self, keys: &[i64]) -> i64 {
        self.batches.lock().unwrap().push(keys.to_vec());
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn batches(&self) -> Vec<Vec<i64>> {
        self.batches.lock().unwrap().clone()
    }
}

/// `fetch(keys) = [key * 10 for key in keys]`
struct TimesTen;

#[async_trait]
impl BatchFunction<i64, i64> for TimesTen {
    type Context = Arc<Recorder>;
    type Error = Infallible;

    async fn load(keys: &[i64], context: &Arc<Recorder>) -> Result<Vec<i64>, Infallible> {
        context.record(keys);
        Ok(keys.iter().map(|k| k * 10).collect())
    }
}

/// Tags every value with the number of fetches made so far.
struct Generational;

#[async_trait]
impl BatchFunction<i64, i64> for Generational {
    type Context = Arc<Recorder>;
    type Error = Infallible;

    async fn load(keys: &[i64], context: &Arc<Recorder>) -> Result<Vec<i64>, Infallible> {
        let generation = context.record(keys);
        Ok(keys.iter().map(|k| k * 100 + generation).collect())
    }
}

#[derive(Debug)]
struct StoreDown;

impl fmt::Display for StoreDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("store is down")
    }
}

impl std::error::Error for StoreDown {}

struct Failing;

#[async_trait]
impl BatchFunction<i64, i64> for Failing {
    type Context = Arc<Recorder>;
    type Error = StoreDown;

    async fn load(keys: &[i64], context: &Arc<Recorder>) -> Result<Vec<i64>, StoreDown> {
        context.record(keys);
        Err(StoreDown)
    }
}

/// Drops the last value of every batch.
struct Short;

#[async_trait]
impl BatchFunction<i64, i64> for Short {
    type Context = Arc<Recorder>;
    type Error = Infallible;

    async fn load(keys: &[i64], context: &Arc<Recorder>) -> Result<Vec<i64>, Infallible> {
        context.record(keys);
        Ok(keys.iter().skip(1).copied().collect())
    }
}

struct Slow;

#[async_trait]
impl BatchFunction<i64, i64> for Slow {
    type Context = Arc<Recorder>;
    type Error = Infallible;

    async fn load(keys: &[i64], context: &Arc<Recorder>) -> Result<Vec<i64>, Infallible> {
        context.record(keys);
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(keys.to_vec())
    }
}

fn times_ten(recorder: &Arc<Recorder>) -> LoaderRegistry {
    LoaderDefinitions::new().register("times_ten", TimesTen, recorder.clone()).new_registry()
}

#[tokio::test]
async fn duplicate_keys_are_fetched_once() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    let (a, b, c) =
        registry.run(future::join3(loader.load(3), loader.load(1), loader.load(3))).await.unwrap();

    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (30, 10, 30));
    assert_eq!(recorder.batches(), vec![vec![3, 1]]);
}

#[tokio::test]
async fn values_follow_their_callers() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    let request = future::join_all([9, 4, 7, 1].into_iter().map(|key| async move {
        (key, loader.load(key).await.unwrap())
    }));
    let results = registry.run(request).await.unwrap();

    assert_eq!(results, vec![(9, 90), (4, 40), (7, 70), (1, 10)]);
    assert_eq!(recorder.batches(), vec![vec![9, 4, 7, 1]]);
}

#[tokio::test]
async fn two_level_tree_fetches_once_per_level() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    let tree = future::try_join_all((1..=3).map(|parent| async move {
        let value = loader.load(parent).await?;
        future::try_join(loader.load(value + 1), loader.load(value + 2)).await
    }));
    let children = registry.run(tree).await.unwrap().unwrap();

    assert_eq!(children, vec![(110, 120), (210, 220), (310, 320)]);
    assert_eq!(recorder.batches(), vec![vec![1, 2, 3], vec![11, 12, 21, 22, 31, 32]]);
    assert_eq!(registry.frames(), 2);
}

#[tokio::test]
async fn cached_keys_do_not_split_a_level() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    loader.prime(1, 10).unwrap();
    let after_hit = async {
        let value = loader.load(1).await?;
        loader.load(value + 2).await
    };
    let request = future::try_join(after_hit, loader.load(3));
    let (a, b) = registry.run(request).await.unwrap().unwrap();

    assert_eq!((a, b), (120, 30));
    assert_eq!(recorder.batches(), vec![vec![3, 12]]);
}

#[tokio::test]
async fn a_large_level_is_a_single_fetch() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    let values = registry.run(loader.load_all(0..1000)).await.unwrap().unwrap();

    assert_eq!(values.len(), 1000);
    assert_eq!(values[999], 9990);
    assert_eq!(recorder.batches().len(), 1);
}

#[tokio::test]
async fn resolvers_that_yield_join_the_same_level() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("times_ten").unwrap();

    let request = future::join_all((1..=4).map(|k| {
        let loader = loader.clone();
        async move {
            if k % 2 == 0 {
                tokio::task::yield_now().await;
            }
            loader.load(k).await.unwrap()
        }
    }));
    let values = registry.run(request).await.unwrap();

    assert_eq!(values, vec![10, 20, 30, 40]);
    let mut batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    batches[0].sort_unstable();
    assert_eq!(batches, vec![vec![1, 2, 3, 4]]);
    assert_eq!(registry.frames(), 1);
}

#[tokio::test]
async fn failed_batch_only_fails_its_loads() {
    let failing = Arc::new(Recorder::default());
    let healthy = Arc::new(Recorder::default());
    let definitions = LoaderDefinitions::new()
        .register("failing", Failing, failing.clone())
        .register("healthy", TimesTen, healthy.clone());
    let mut registry = new_registry(&definitions);
    let handle = registry.handle();
    let broken = handle.loader::<i64, i64>("failing").unwrap();
    let other = handle.loader::<i64, i64>("healthy").unwrap();

    let (five, six, one) =
        registry.run(future::join3(broken.load(5), broken.load(6), other.load(1))).await.unwrap();

    let (five, six) = (five.unwrap_err(), six.unwrap_err());
    assert!(matches!(five, LoadError::BatchFetch { loader: "failing", .. }));
    assert_eq!(five.to_string(), six.to_string());
    assert_eq!(five.to_string(), "batch fetch for loader `failing` failed: store is down");
    assert!(!five.is_fatal());
    assert_eq!(one.unwrap(), 10);

    // Failures are terminal for the rest of the request.
    let again = registry.run(broken.load(5)).await.unwrap();
    assert!(again.is_err());
    assert_eq!(failing.batches(), vec![vec![5, 6]]);
}

#[tokio::test]
async fn contract_violation_aborts_the_request() {
    let recorder = Arc::new(Recorder::default());
    let mut registry =
        LoaderDefinitions::new().register("short", Short, recorder.clone()).new_registry();
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("short").unwrap();

    let error = registry.run(loader.load_all(vec![1, 2])).await.unwrap_err();

    assert!(matches!(error, LoadError::ContractViolation { loader: "short", expected: 2, actual: 1 }));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn registries_do_not_share_cached_values() {
    let recorder = Arc::new(Recorder::default());
    let definitions = LoaderDefinitions::new().register("generational", Generational, recorder.clone());

    let mut first = new_registry(&definitions);
    let handle = first.handle();
    let loader = handle.loader::<i64, i64>("generational").unwrap();
    let (a, b) = first.run(future::try_join(loader.load(1), loader.load(1))).await.unwrap().unwrap();
    assert_eq!((a, b), (101, 101));
    assert_eq!(first.run(loader.load(1)).await.unwrap().unwrap(), 101);
    drop(first);

    let mut second = new_registry(&definitions);
    let handle = second.handle();
    let loader = handle.loader::<i64, i64>("generational").unwrap();
    assert_eq!(second.run(loader.load(1)).await.unwrap().unwrap(), 102);

    assert_eq!(recorder.batches(), vec![vec![1], vec![1]]);
}

#[tokio::test]
async fn request_timeout_abandons_the_request() {
    let recorder = Arc::new(Recorder::default());
    let config = RegistryConfig::default().with_request_timeout(Duration::from_millis(20));
    let mut registry = LoaderDefinitions::new()
        .with_config(config)
        .register("slow", Slow, recorder.clone())
        .new_registry();
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("slow").unwrap();

    let error = registry.run(loader.load(1)).await.unwrap_err();

    assert!(matches!(error, LoadError::Timeout(limit) if limit == Duration::from_millis(20)));
    assert_eq!(recorder.batches(), vec![vec![1]]);
}

#[tokio::test]
async fn a_timed_out_request_leaves_the_registry_clean() {
    let recorder = Arc::new(Recorder::default());
    let config = RegistryConfig::default().with_request_timeout(Duration::from_millis(20));
    let mut registry = LoaderDefinitions::new()
        .with_config(config)
        .register("slow", Slow, recorder.clone())
        .new_registry();
    let handle = registry.handle();
    let loader = handle.loader::<i64, i64>("slow").unwrap();

    assert!(matches!(registry.run(loader.load(1)).await, Err(LoadError::Timeout(_))));
    let next = registry.run(async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        1
    });

    assert_eq!(next.await.unwrap(), 1);
    assert_eq!(registry.frames(), 1);
    assert_eq!(recorder.batches(), vec![vec![1]]);
}

#[tokio::test]
async fn requests_without_loads_complete() {
    let recorder = Arc::new(Recorder::default());
    let mut registry = times_ten(&recorder);

    assert_eq!(registry.run(async { 7 }).await.unwrap(), 7);
    assert_eq!(registry.frames(), 0);
}

#[tokio::test]
async fn lookups_check_name_and_types() {
    let recorder = Arc::new(Recorder::default());
    let registry = times_ten(&recorder);
    let handle = registry.handle();

    assert!(matches!(
        handle.loader::<i64, i64>("nope"),
        Err(LoadError::UnknownLoader { name }) if name == "nope"
    ));
    assert!(matches!(
        handle.loader::<i64, String>("times_ten"),
        Err(LoadError::TypeMismatch { name }) if name == "times_ten"
    ));
    assert_eq!(handle.names().collect::<Vec<_>>(), vec!["times_ten"]);
}
