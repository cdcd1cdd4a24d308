use anyhow::Context;
use nl2sql_core::cache::PromptCache;
use nl2sql_core::config::{load_config, AppConfig, BackendKind, ProviderConfig};
use nl2sql_core::executor::Executor;
use nl2sql_core::generator::{Generator, SqlGenerator};
use nl2sql_core::providers::embedder::fake::FakeEmbedder;
use nl2sql_core::providers::embedder::openai::OpenAIEmbedder;
use nl2sql_core::providers::embedder::Embedder;
use nl2sql_core::providers::llm::fake::FakeClient;
use nl2sql_core::providers::llm::openai::OpenAiCompatClient;
use nl2sql_core::providers::llm::{InferenceClient, LlmClient};
use nl2sql_core::rate_limit::RateLimiter;
use nl2sql_core::retrieval::store::ExampleStore;
use nl2sql_core::retrieval::Retriever;
use nl2sql_core::{Orchestrator, SchemaCatalog};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const FAKE_EMBEDDING_DIM: usize = 64;

pub(crate) fn load(path: &Path) -> anyhow::Result<AppConfig> {
    load_config(path).with_context(|| format!("cannot use config {}", path.display()))
}

pub(crate) fn catalog(cfg: &AppConfig) -> anyhow::Result<SchemaCatalog> {
    SchemaCatalog::introspect_path(&cfg.database.path)
        .with_context(|| format!("failed to read schema from {}", cfg.database.path.display()))
}

pub(crate) fn embedder(cfg: &AppConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let e = &cfg.embedder;
    Ok(match e.kind {
        BackendKind::Fake => Arc::new(FakeEmbedder::hashed(
            &e.model,
            e.dimensions.unwrap_or(FAKE_EMBEDDING_DIM),
        )),
        BackendKind::Openai => {
            let mut embedder = OpenAIEmbedder::new(e.model.clone(), e.api_key()?);
            if let Some(url) = &e.base_url {
                embedder = embedder.with_base_url(url);
            }
            if let Some(dim) = e.dimensions {
                embedder = embedder.with_dimensions(dim);
            }
            Arc::new(embedder)
        }
    })
}

pub(crate) fn example_store(cfg: &AppConfig) -> anyhow::Result<ExampleStore> {
    if let Some(parent) = cfg.examples.store.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = ExampleStore::open(&cfg.examples.store)?;
    store.init_schema()?;
    Ok(store)
}

fn llm_client(p: &ProviderConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    Ok(match p.kind {
        BackendKind::Fake => {
            let mut fake = FakeClient::new(p.model.clone());
            if let Some((last, scripted)) = p.responses.split_last() {
                for response in scripted {
                    fake = fake.then_respond(response.clone());
                }
                fake = fake.with_response(last.clone());
            }
            Arc::new(fake)
        }
        BackendKind::Openai => {
            let mut client = OpenAiCompatClient::new(
                p.model.clone(),
                p.api_key()?,
                p.temperature,
                p.max_tokens,
            )
            .with_timeout(p.timeout());
            if let Some(url) = &p.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    })
}

/// A wired orchestrator plus a handle on its generator for usage reporting.
pub(crate) struct Pipeline {
    pub orchestrator: Orchestrator,
    pub generator: Arc<Generator>,
}

/// Everything `ask`, `compare` and `eval` need, wired from config.
pub(crate) async fn build_pipeline(cfg: &AppConfig) -> anyhow::Result<Pipeline> {
    let catalog = Arc::new(catalog(cfg)?);
    let embedder = embedder(cfg)?;

    let store = example_store(cfg)?;
    if store.count()? == 0 {
        if let Some(seed) = &cfg.examples.seed_file {
            match store.seed_from_json(seed, embedder.as_ref()).await {
                Ok(n) => info!(count = n, "example store was empty; seeded"),
                Err(e) => warn!(error = %format!("{e:#}"), "could not seed example store; continuing without examples"),
            }
        }
    }
    let index = Arc::new(store.load_index()?);

    let mut inference = InferenceClient::new();
    let mut limits = Vec::new();
    for p in &cfg.providers {
        inference = inference.with_backend(p.slot, llm_client(p)?, p.timeout());
        if let Some(rl) = &p.rate_limit {
            limits.push((p.slot, rl.to_rate_limit()));
        }
    }

    let mut generator = Generator::new(Arc::new(inference), Arc::new(RateLimiter::new(limits)))
        .with_providers(cfg.provider_order())
        .with_max_rate_wait(Duration::from_secs(cfg.pipeline.max_rate_wait_secs));
    if let Some(cache) = &cfg.cache {
        generator = generator.with_cache(Arc::new(PromptCache::new(Duration::from_secs(
            cache.ttl_secs,
        ))));
    }

    let executor = Executor::new(&cfg.database.path)
        .with_timeout(Duration::from_secs(cfg.database.execution_timeout_secs));

    let generator = Arc::new(generator);
    let orchestrator = Orchestrator::new(
        catalog,
        Arc::new(Retriever::new(embedder, index)),
        Arc::clone(&generator) as Arc<dyn SqlGenerator>,
        executor,
    )
    .with_deadline(Duration::from_secs(cfg.pipeline.request_deadline_secs));
    Ok(Pipeline {
        orchestrator,
        generator,
    })
}
