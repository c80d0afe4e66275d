//! Client for a hosted classify endpoint speaking the JSON envelope.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{
    ClassificationRequest, ClassificationResponse, ClassificationService, ClassifyError,
    DEFAULT_TIMEOUT,
};
use crate::llm::extract_error_detail;

/// Posts `{inputTexts, categories, examples}` and reads back
/// `{results, usage}` or `{error}`.
pub struct RemoteClassifier {
    client: Client,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteClassifier {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        Self::with_timeout(url, api_key, DEFAULT_TIMEOUT)
    }

    /// The timeout bounds the whole exchange, including reading the body.
    pub fn with_timeout(url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
            timeout,
        }
    }

    async fn post(&self, request: &ClassificationRequest) -> Result<(u16, bool, String), ClassifyError> {
        let mut call = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(|e| {
            ClassifyError::ServiceError(format!("classify request failed: {}", e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ClassifyError::ServiceError(format!("failed to read classify response: {}", e))
        })?;
        Ok((status.as_u16(), status.is_success(), body))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Success(ClassificationResponse),
    Failure { error: String },
}

/// Decode an envelope body. An `{error}` body is a service error whatever the
/// HTTP status says.
fn decode_envelope(
    success: bool,
    status: u16,
    body: &str,
) -> Result<ClassificationResponse, ClassifyError> {
    match serde_json::from_str::<Envelope>(body) {
        Ok(Envelope::Success(response)) if success => Ok(response),
        Ok(Envelope::Failure { error }) => Err(ClassifyError::ServiceError(format!(
            "classify endpoint returned {}: {}",
            status, error
        ))),
        _ if !success => Err(ClassifyError::ServiceError(format!(
            "classify endpoint returned {}: {}",
            status,
            extract_error_detail(body)
        ))),
        _ => Err(ClassifyError::ServiceError(format!(
            "classify endpoint returned an unreadable envelope: {}",
            body.chars().take(200).collect::<String>()
        ))),
    }
}

#[async_trait]
impl ClassificationService for RemoteClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifyError> {
        tracing::info!(
            "Posting {} input texts to {}",
            request.input_texts.len(),
            self.url
        );

        let (status, success, body) =
            match tokio::time::timeout(self.timeout, self.post(request)).await {
                Ok(exchange) => exchange?,
                Err(_) => {
                    tracing::warn!("Classify endpoint exceeded {:?}", self.timeout);
                    return Err(ClassifyError::Timeout(self.timeout));
                }
            };

        let decoded = decode_envelope(success, status, &body);
        if let Err(e) = &decoded {
            tracing::error!("Remote classification failed: {}", e);
        }
        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Usage;
    use crate::records::{Category, CategorySet, Example, ExampleSet, InputTextSet, LabeledItem};

    #[test]
    fn test_decode_success_envelope() {
        let body = r#"{
            "results": [{"text": "Hello", "category": "Greeting"}],
            "usage": {"inputTokens": 812, "outputTokens": 12}
        }"#;
        let response = decode_envelope(true, 200, body).unwrap();
        assert_eq!(response.results, vec![LabeledItem::new("Hello", "Greeting")]);
        assert_eq!(response.usage, Usage::new(812, 12));
    }

    #[test]
    fn test_decode_error_envelope() {
        let err = decode_envelope(false, 500, r#"{"error": "OpenAI API error: quota"}"#).unwrap_err();
        match err {
            ClassifyError::ServiceError(detail) => {
                assert!(detail.contains("500"));
                assert!(detail.contains("quota"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_envelope_failure() {
        let err = decode_envelope(false, 502, "Bad Gateway").unwrap_err();
        assert!(err.to_string().contains("Bad Gateway"));

        let err = decode_envelope(true, 200, "<html>").unwrap_err();
        assert!(matches!(err, ClassifyError::ServiceError(_)));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let classifier = RemoteClassifier::with_timeout(
            format!("http://{}/classify", addr),
            Some("key".into()),
            Duration::from_millis(100),
        );
        let request = ClassificationRequest {
            input_texts: InputTextSet::new(vec!["Hello".into()]).unwrap(),
            categories: CategorySet::new(vec![Category::new("Greeting", "says hi")]).unwrap(),
            examples: ExampleSet::new(vec![Example::new("Hi", "Greeting")]).unwrap(),
        };

        let err = classifier.classify(&request).await.unwrap_err();
        assert!(matches!(err, ClassifyError::Timeout(t) if t == Duration::from_millis(100)));
    }
}
