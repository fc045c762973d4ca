use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use batchload_rs::{new_registry, BatchFunction, Keyed, LoadError, LoaderDefinitions, RegistryConfig};
use futures::future;
use tracing_subscriber::EnvFilter;

// A tiny in-memory "database": businesses have reviews, reviews have authors.
struct Db {
    reviews: Vec<(u32, u32, &'static str)>, // (review id, business id, author)
}

struct Business(u32);

impl Keyed for Business {
    type Key = u32;

    fn key(&self) -> u32 {
        self.0
    }
}

struct BusinessReviews;

#[async_trait]
impl BatchFunction<u32, Vec<u32>> for BusinessReviews {
    type Context = Arc<Db>;
    type Error = Infallible;

    async fn load(keys: &[u32], db: &Arc<Db>) -> Result<Vec<Vec<u32>>, Infallible> {
        println!("SELECT * FROM reviews WHERE business_id IN {:?}", keys);
        let mut by_business: HashMap<u32, Vec<u32>> = HashMap::new();
        for (review, business, _) in &db.reviews {
            by_business.entry(*business).or_default().push(*review);
        }
        Ok(keys.iter().map(|k| by_business.get(k).cloned().unwrap_or_default()).collect())
    }
}

struct ReviewAuthor;

#[async_trait]
impl BatchFunction<u32, Option<String>> for ReviewAuthor {
    type Context = Arc<Db>;
    type Error = Infallible;

    async fn load(keys: &[u32], db: &Arc<Db>) -> Result<Vec<Option<String>>, Infallible> {
        println!("SELECT author FROM reviews WHERE id IN {:?}", keys);
        Ok(keys
            .iter()
            .map(|k| db.reviews.iter().find(|(id, _, _)| id == k).map(|(_, _, a)| a.to_string()))
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), LoadError> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let db = Arc::new(Db {
        reviews: vec![(1, 2001, "hal"), (2, 2001, "dave"), (3, 7, "kambei"), (4, 12, "juror 8")],
    });
    // Built once at startup; every request gets fresh loaders from it.
    let definitions = LoaderDefinitions::new()
        .with_config(RegistryConfig::from_env())
        .register("business_reviews", BusinessReviews, db.clone())
        .register("review_author", ReviewAuthor, db);

    let mut registry = new_registry(&definitions);
    let loaders = registry.handle();
    let request = future::try_join_all([2001, 7, 12, 15].map(|id| {
        let loaders = loaders.clone();
        async move {
            let reviews: Vec<u32> = loaders.load_related("business_reviews", &Business(id)).await?;
            let authors = loaders.loader::<u32, Option<String>>("review_author")?;
            Ok::<_, LoadError>((id, authors.load_all(reviews).await?))
        }
    }));

    for (business, authors) in registry.run(request).await?? {
        println!("business {business}: reviewed by {authors:?}");
    }
    println!("{} flushes for the whole tree", registry.frames());
    Ok(())
}
