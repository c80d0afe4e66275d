//! Classification of input texts against user categories.
//!
//! ```text
//! ClassificationRequest ──▶ build_prompt ──▶ ClassificationInvoker ──▶ parse_labels
//!                                              (LlmClient)
//! ```
//!
//! Callers only see [`ClassificationService`]. [`LlmClassifier`] runs the
//! pipeline above in process; [`RemoteClassifier`] posts the same envelope to
//! a hosted classify endpoint.

mod invoker;
mod parser;
mod prompt;
mod remote;
mod service;

pub use invoker::{ClassificationInvoker, DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT};
pub use parser::{parse_labels, parse_response, validate_mapping, Mismatch, ResponseError};
pub use prompt::{build_prompt, BuiltPrompt, SYSTEM_PROMPT};
pub use remote::RemoteClassifier;
pub use service::LlmClassifier;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::records::{CategorySet, ExampleSet, InputTextSet, LabeledItem};

/// Everything a classifier needs for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    pub input_texts: InputTextSet,
    pub categories: CategorySet,
    pub examples: ExampleSet,
}

/// Tokens consumed by one classification call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

/// Labels as returned by a classifier, not yet checked against the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub results: Vec<LabeledItem>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Classification service error: {0}")]
    ServiceError(String),

    #[error("Classification timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl ClassifyError {
    /// Text safe to show an end user. Upstream detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::ServiceError(_) => {
                "The classification service failed. Please try again in a moment.".to_string()
            }
            Self::Timeout(_) => {
                "The classification service took too long to respond. Please try again."
                    .to_string()
            }
            Self::Response(e) => format!("{}. Please try again.", e),
        }
    }
}

/// A backend that labels every input text with one category.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifyError>;
}
