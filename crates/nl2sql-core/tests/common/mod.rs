#![allow(dead_code)]

use nl2sql_core::executor::Executor;
use nl2sql_core::generator::Generator;
use nl2sql_core::providers::embedder::fake::FakeEmbedder;
use nl2sql_core::providers::embedder::Embedder;
use nl2sql_core::providers::llm::fake::FakeClient;
use nl2sql_core::providers::llm::InferenceClient;
use nl2sql_core::rate_limit::RateLimiter;
use nl2sql_core::retrieval::store::ExampleStore;
use nl2sql_core::retrieval::{ExampleIndex, Retriever};
use nl2sql_core::{Orchestrator, Provider, SchemaCatalog};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const EMBEDDING_DIM: usize = 64;

/// Temp copy of the demo shop database.
pub struct ShopDb {
    pub dir: TempDir,
    pub path: PathBuf,
    pub catalog: Arc<SchemaCatalog>,
}

pub fn shop_db() -> ShopDb {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(include_str!("../../../../demos/shop.sql"))
        .unwrap();
    let catalog = Arc::new(SchemaCatalog::introspect(&conn).unwrap());
    ShopDb { dir, path, catalog }
}

pub async fn seeded_index(embedder: &dyn Embedder) -> Arc<ExampleIndex> {
    let store = ExampleStore::memory().unwrap();
    store.init_schema().unwrap();
    store
        .add(embedder, "How many customers are there?", "SELECT COUNT(*) FROM customers")
        .await
        .unwrap();
    store
        .add(
            embedder,
            "Which orders are still pending?",
            "SELECT order_id FROM orders WHERE status = 'pending'",
        )
        .await
        .unwrap();
    Arc::new(store.load_index().unwrap())
}

pub fn hashed_embedder() -> Arc<FakeEmbedder> {
    Arc::new(FakeEmbedder::hashed("fake-embed", EMBEDDING_DIM))
}

pub fn generator(backends: Vec<(Provider, FakeClient)>, limiter: RateLimiter) -> Generator {
    let mut inference = InferenceClient::new();
    for (provider, client) in backends {
        inference = inference.with_backend(provider, Arc::new(client), Duration::from_secs(30));
    }
    Generator::new(Arc::new(inference), Arc::new(limiter))
}

pub fn orchestrator(
    db: &ShopDb,
    embedder: Arc<dyn Embedder>,
    index: Arc<ExampleIndex>,
    generator: Generator,
) -> Orchestrator {
    Orchestrator::new(
        db.catalog.clone(),
        Arc::new(Retriever::new(embedder, index)),
        Arc::new(generator),
        Executor::new(&db.path),
    )
}

/// Single fake primary provider, no examples.
pub fn simple(db: &ShopDb, primary: FakeClient) -> Orchestrator {
    orchestrator(
        db,
        hashed_embedder(),
        Arc::new(ExampleIndex::new()),
        generator(vec![(Provider::Primary, primary)], RateLimiter::unlimited()),
    )
}
