//! Retail Copilot LLM
//!
//! Provides a unified interface for the language-model backends that power
//! the copilot's step modules:
//! - Ollama (local inference, default)
//! - OpenAI-compatible chat completions endpoints
//!
//! Also includes the HTTP client factory and a constructor that picks a
//! provider from configuration.

pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod types;

use std::sync::Arc;

// Re-export main types
pub use http_client::build_http_client;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use provider::LlmProvider;
pub use types::*;

/// Instantiate the provider named by `config.provider`.
pub fn create_provider(config: ProviderConfig) -> LlmResult<Arc<dyn LlmProvider>> {
    match config.provider {
        ProviderType::Ollama => Ok(Arc::new(OllamaProvider::new(config))),
        ProviderType::OpenAI => Ok(Arc::new(OpenAIProvider::new(config)?)),
    }
}
