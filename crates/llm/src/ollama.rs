//! Ollama Provider
//!
//! Implementation of the LlmProvider trait for Ollama local inference
//! using the ollama-rs native SDK. Supports local model inference without
//! API keys and JSON-constrained output.

use async_trait::async_trait;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::{ChatMessage, ChatMessageResponse, MessageRole as OllamaRole};
use ollama_rs::generation::parameters::FormatType;
use ollama_rs::models::ModelOptions;
use ollama_rs::Ollama;

use crate::http_client::build_http_client;
use crate::provider::{error_chain_text, is_timeout, looks_like_connect_failure, LlmProvider};
use crate::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, MessageRole, ProviderConfig,
    StopReason, UsageStats,
};

/// Default Ollama API endpoint
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Ollama provider for local inference using the native ollama-rs SDK
pub struct OllamaProvider {
    config: ProviderConfig,
    client: Ollama,
}

impl OllamaProvider {
    /// Create a new Ollama provider with the given configuration
    pub fn new(config: ProviderConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_URL);

        let client = Self::create_client(base_url, config.request_timeout_secs);

        Self { config, client }
    }

    /// Create an Ollama SDK client from a base URL string.
    ///
    /// Parses the URL to extract host and port for `Ollama::new()`.
    /// Falls back to `Ollama::default()` if parsing fails.
    fn create_client(base_url: &str, timeout_secs: u64) -> Ollama {
        let Ok(parsed) = url::Url::parse(base_url) else {
            tracing::warn!(base_url, "unparseable Ollama URL, using default endpoint");
            return Ollama::default();
        };
        let scheme = parsed.scheme();
        let host = parsed.host_str().unwrap_or("localhost");
        let port = parsed.port().unwrap_or(11434);
        let host_url = format!("{}://{}", scheme, host);
        match build_http_client(timeout_secs) {
            Ok(http_client) => Ollama::new_with_client(host_url, port, http_client),
            Err(_) => Ollama::new(host_url, port),
        }
    }

    /// Get the base URL for the Ollama server (used in error messages)
    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(OLLAMA_DEFAULT_URL)
    }

    /// Build a ChatMessageRequest from our unified types
    fn build_chat_request(
        &self,
        messages: &[Message],
        system: Option<&str>,
        request_options: &LlmRequestOptions,
    ) -> ChatMessageRequest {
        let mut chat_messages: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);

        if let Some(sys) = system {
            chat_messages.push(ChatMessage::system(sys.to_string()));
        }
        chat_messages.extend(messages.iter().map(Self::convert_message));

        let mut request = ChatMessageRequest::new(self.config.model.clone(), chat_messages);

        let temperature = request_options
            .temperature_override
            .unwrap_or(self.config.temperature);
        let mut opts = ModelOptions::default().temperature(temperature);
        if self.config.max_tokens > 0 {
            opts = opts.num_predict(self.config.max_tokens as i32);
        }
        request = request.options(opts);

        if request_options.json_output {
            request = request.format(FormatType::Json);
        }

        request
    }

    fn convert_message(message: &Message) -> ChatMessage {
        let role = match message.role {
            MessageRole::User => OllamaRole::User,
            MessageRole::Assistant => OllamaRole::Assistant,
            MessageRole::System => OllamaRole::System,
        };
        ChatMessage::new(role, message.content.clone())
    }

    /// Convert an ollama-rs ChatMessageResponse to our unified LlmResponse.
    fn convert_response(&self, response: &ChatMessageResponse) -> LlmResponse {
        let content = response.message.content.trim();

        let usage = response
            .final_data
            .as_ref()
            .map(|final_data| UsageStats {
                input_tokens: final_data.prompt_eval_count as u32,
                output_tokens: final_data.eval_count as u32,
            })
            .unwrap_or_default();

        let stop_reason = match &response.final_data {
            Some(final_data) if final_data.eval_count as u32 >= self.config.max_tokens
                && self.config.max_tokens > 0 =>
            {
                StopReason::MaxTokens
            }
            _ => StopReason::EndTurn,
        };

        LlmResponse {
            content: if content.is_empty() {
                None
            } else {
                Some(content.to_string())
            },
            stop_reason,
            usage,
            model: response.model.clone(),
        }
    }

    fn map_sdk_error(&self, err: &(dyn std::error::Error + 'static)) -> LlmError {
        let msg = error_chain_text(err);
        if is_timeout(err) {
            LlmError::Timeout {
                seconds: self.config.request_timeout_secs.max(1),
            }
        } else if looks_like_connect_failure(&msg) {
            LlmError::ProviderUnavailable {
                message: format!("Cannot connect to Ollama at {}: {}", self.base_url(), msg),
            }
        } else if msg.contains("not found") || msg.contains("404") {
            LlmError::ModelNotFound {
                model: self.config.model.clone(),
            }
        } else {
            LlmError::NetworkError { message: msg }
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let request = self.build_chat_request(&messages, system.as_deref(), &options);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| self.map_sdk_error(&e))?;

        let converted = self.convert_response(&response);
        tracing::debug!(
            model = %converted.model,
            input_tokens = converted.usage.input_tokens,
            output_tokens = converted.usage.output_tokens,
            "ollama chat completed"
        );
        Ok(converted)
    }

    async fn health_check(&self) -> LlmResult<()> {
        self.client
            .list_local_models()
            .await
            .map_err(|e| self.map_sdk_error(&e))?;

        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
