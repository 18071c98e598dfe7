//! Settings Models
//!
//! Application configuration data structures, stored as a JSON file.

use std::path::PathBuf;

use retail_copilot_llm::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

/// Application configuration stored in the copilot's JSON config file.
///
/// Every section has defaults, so a partial (or absent) file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model backend
    #[serde(default)]
    pub llm: ProviderConfig,
    /// Orchestration graph limits
    #[serde(default)]
    pub graph: GraphSettings,
    /// Corpus and database locations
    #[serde(default)]
    pub paths: PathSettings,
    /// Step module selection
    #[serde(default)]
    pub steps: StepSettings,
    /// Batch runner
    #[serde(default)]
    pub batch: BatchSettings,
}

/// Limits enforced by the graph executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Maximum repairs per run (all targets combined)
    #[serde(default = "default_max_repairs")]
    pub max_repairs: u32,
    /// Maximum repairs targeting the synthesizer
    #[serde(default = "default_max_synth_repairs")]
    pub max_synth_repairs: u32,
    /// Chunks retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Per-node time budget in seconds
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Per-query time budget in seconds
    #[serde(default = "default_sql_timeout_secs")]
    pub sql_timeout_secs: u64,
    /// Characters of retrieved context shown to the Router
    #[serde(default = "default_route_preview_chars")]
    pub route_preview_chars: usize,
}

fn default_max_repairs() -> u32 {
    2
}

fn default_max_synth_repairs() -> u32 {
    1
}

fn default_top_k() -> usize {
    3
}

fn default_node_timeout_secs() -> u64 {
    60
}

fn default_sql_timeout_secs() -> u64 {
    10
}

fn default_route_preview_chars() -> usize {
    400
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            max_repairs: default_max_repairs(),
            max_synth_repairs: default_max_synth_repairs(),
            top_k: default_top_k(),
            node_timeout_secs: default_node_timeout_secs(),
            sql_timeout_secs: default_sql_timeout_secs(),
            route_preview_chars: default_route_preview_chars(),
        }
    }
}

/// Where the corpus and the structured store live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

fn default_database() -> PathBuf {
    PathBuf::from("data/northwind.sqlite")
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            database: default_database(),
        }
    }
}

/// Which Router implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    /// Model-backed classification
    #[default]
    Llm,
    /// Deterministic keyword rules
    Keyword,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSettings {
    #[serde(default)]
    pub router: RouterKind,
    /// Optional tuned prompt bundle for the SQL-Generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_prompt_bundle: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Questions processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl AppConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.graph.max_synth_repairs > self.graph.max_repairs {
            return Err(format!(
                "graph.max_synth_repairs ({}) cannot exceed graph.max_repairs ({})",
                self.graph.max_synth_repairs, self.graph.max_repairs
            ));
        }

        if self.graph.max_repairs > 10 {
            return Err("graph.max_repairs cannot exceed 10".to_string());
        }

        if self.graph.top_k == 0 {
            return Err("graph.top_k must be at least 1".to_string());
        }

        if self.graph.node_timeout_secs == 0 || self.graph.sql_timeout_secs == 0 {
            return Err("graph timeouts must be at least 1 second".to_string());
        }

        if self.batch.concurrency == 0 || self.batch.concurrency > 64 {
            return Err(format!(
                "batch.concurrency must be between 1 and 64, got {}",
                self.batch.concurrency
            ));
        }

        if self.llm.model.trim().is_empty() {
            return Err("llm.model cannot be empty".to_string());
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(format!(
                "llm.temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            ));
        }

        if self.llm.provider == ProviderType::OpenAI
            && self.llm.base_url.is_none()
            && self.llm.api_key.is_none()
        {
            return Err("llm.api_key is required for the hosted OpenAI endpoint".to_string());
        }

        Ok(())
    }
}
