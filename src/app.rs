//! Wiring of the pipeline components shared by the CLI and the server.

use std::sync::Arc;

use anyhow::Result;

use journal_harness_core::embedding::EmbeddingProvider;
use journal_harness_core::store::EntryStore;

use crate::analyzer::Analyzer;
use crate::chat::Assistant;
use crate::chunker::Chunker;
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::indexer::{ArtifactPaths, Indexer};
use crate::ingest::Orchestrator;
use crate::llm::{ChatModel, ResilientClient};
use crate::migrate;
use crate::query::QueryEngine;
use crate::sqlite_store::SqliteStore;

/// Everything a front end needs, built once from the configuration.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn EntryStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub query: Arc<QueryEngine>,
    pub assistant: Arc<Assistant>,
}

impl Services {
    /// Open the SQLite store (creating the schema if needed) and connect
    /// the configured model and embedding provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::new(pool));
        let model: Arc<dyn ChatModel> = Arc::new(ResilientClient::new(&config.llm)?);
        let provider = create_provider(&config.embedding)?;
        Ok(Self::assemble(config, store, model, provider))
    }

    /// Build the services over explicit collaborators.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn EntryStore>,
        model: Arc<dyn ChatModel>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let paths = ArtifactPaths::new(config.storage.dir.clone());

        let analyzer = Analyzer::new(Arc::clone(&model), config.analysis.temperature);
        let chunker = Chunker::new(Arc::clone(&model), &config.chunking);
        let indexer = Indexer::new(
            Arc::clone(&provider),
            paths.clone(),
            config.embedding.batch_size,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            analyzer,
            chunker,
            indexer,
        ));

        let query = Arc::new(QueryEngine::new(provider, paths));
        let assistant = Arc::new(Assistant::new(
            model,
            Arc::clone(&query),
            &config.retrieval,
        ));

        Self {
            config: Arc::new(config.clone()),
            store,
            orchestrator,
            query,
            assistant,
        }
    }
}
