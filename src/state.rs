//! Application State
//!
//! Wires configuration into the long-lived services: structured store,
//! document index, LLM provider, step modules and graph executor.

use std::sync::Arc;

use retail_copilot_llm::{create_provider, LlmProvider};

use crate::models::settings::AppConfig;
use crate::services::batch::BatchRunner;
use crate::services::graph::GraphExecutor;
use crate::services::knowledge::Bm25Index;
use crate::services::steps::build_step_set;
use crate::storage::SqliteGateway;
use crate::utils::error::{AppError, AppResult};

/// Everything a batch needs, built once per process.
pub struct AppState {
    config: AppConfig,
    gateway: Arc<SqliteGateway>,
    index: Arc<Bm25Index>,
    provider: Arc<dyn LlmProvider>,
    executor: GraphExecutor,
}

impl AppState {
    /// Initialize all services from a validated configuration.
    pub fn initialize(config: AppConfig) -> AppResult<Self> {
        config.validate().map_err(AppError::validation)?;

        // one connection per concurrent question, plus one for schema reads
        let pool_size = config.batch.concurrency as u32 + 1;
        let gateway = Arc::new(SqliteGateway::open(&config.paths.database, pool_size)?);
        let index = Arc::new(Bm25Index::from_dir(&config.paths.docs_dir)?);
        let provider = create_provider(config.llm.clone())?;
        let steps = build_step_set(&config, Arc::clone(&provider))?;

        let executor = GraphExecutor::new(
            steps,
            index.clone(),
            gateway.clone(),
            config.graph.clone(),
        );

        Ok(Self {
            config,
            gateway,
            index,
            provider,
            executor,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gateway(&self) -> &SqliteGateway {
        &self.gateway
    }

    pub fn index(&self) -> &Bm25Index {
        &self.index
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    /// Batch runner using the configured concurrency.
    pub fn batch_runner(&self) -> BatchRunner {
        BatchRunner::new(self.executor.clone(), self.config.batch.concurrency)
    }

    /// Check that the model backend answers. Failures are logged, not fatal:
    /// runs will report the backend as unavailable.
    pub async fn check_backend(&self) -> bool {
        match self.provider.health_check().await {
            Ok(()) => {
                tracing::info!(
                    provider = self.provider.name(),
                    model = self.provider.model(),
                    "model backend reachable"
                );
                true
            }
            Err(e) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "model backend health check failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("database", &self.gateway.path())
            .field("chunks", &crate::services::knowledge::DocumentIndex::len(self.index.as_ref()))
            .field("provider", &self.provider.name())
            .finish()
    }
}
