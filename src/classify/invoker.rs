//! Single chat-completion call per job, bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use super::prompt::{BuiltPrompt, SYSTEM_PROMPT};
use super::ClassifyError;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmErrorKind, Role};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Sends a built prompt to the model and returns its raw text.
///
/// One call per job. The whole call, including reading the body, is bounded
/// by `timeout`.
pub struct ClassificationInvoker {
    client: Arc<dyn LlmClient>,
    model: String,
    options: ChatOptions,
    timeout: Duration,
}

impl ClassificationInvoker {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
            options: ChatOptions {
                temperature: Some(DEFAULT_TEMPERATURE),
                max_tokens: None,
            },
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn invoke(&self, prompt: &BuiltPrompt<'_>) -> Result<String, ClassifyError> {
        let messages = [
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, prompt.text.as_str()),
        ];

        tracing::info!(
            "Invoking {} for {} input texts ({} prompt chars)",
            self.model,
            prompt.request.input_texts.len(),
            prompt.text.len()
        );

        let call = self
            .client
            .chat_completion(&self.model, &messages, &self.options);

        let response = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.kind == LlmErrorKind::Timeout => {
                tracing::warn!("Model call timed out in transport: {}", e);
                return Err(ClassifyError::Timeout(self.timeout));
            }
            Ok(Err(e)) => return Err(ClassifyError::ServiceError(e.to_string())),
            Err(_) => {
                tracing::warn!("Model call exceeded {:?}", self.timeout);
                return Err(ClassifyError::Timeout(self.timeout));
            }
        };

        if let Some(usage) = response.usage {
            tracing::debug!(
                "{} reported {} prompt / {} completion tokens",
                response.model.as_deref().unwrap_or(&self.model),
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }

        match response.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(ClassifyError::ServiceError(format!(
                "model returned no content (finish_reason={})",
                response.finish_reason.as_deref().unwrap_or("unknown")
            ))),
        }
    }
}
