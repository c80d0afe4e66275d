//! Classification backed by an in-process model client.

use std::sync::Arc;

use async_trait::async_trait;

use super::{
    build_prompt, parse_labels, ClassificationInvoker, ClassificationRequest,
    ClassificationResponse, ClassificationService, ClassifyError, Usage,
};
use crate::budget::TokenEstimator;

/// In-process classifier: prompt, model call, parse.
///
/// Usage is measured with the same estimator that produces cost estimates,
/// applied to the prompt and to the raw response.
pub struct LlmClassifier {
    invoker: ClassificationInvoker,
    estimator: Arc<dyn TokenEstimator>,
}

impl LlmClassifier {
    pub fn new(invoker: ClassificationInvoker, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { invoker, estimator }
    }
}

#[async_trait]
impl ClassificationService for LlmClassifier {
    async fn classify(
        &self,
        request: &ClassificationRequest,
    ) -> Result<ClassificationResponse, ClassifyError> {
        let prompt = build_prompt(request);
        let raw = self.invoker.invoke(&prompt).await?;

        let usage = Usage::new(
            self.estimator.estimate(&prompt.text),
            self.estimator.estimate(&raw),
        );

        let results = parse_labels(&raw).map_err(|e| {
            tracing::warn!(
                "Unparsable response from {} ({} input / {} output tokens not billed): {}",
                self.invoker.model(),
                usage.input_tokens,
                usage.output_tokens,
                e
            );
            e
        })?;

        tracing::debug!("Parsed {} labels from model response", results.len());

        Ok(ClassificationResponse { results, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::CharRatioEstimator;
    use crate::classify::ResponseError;
    use crate::llm::{ChatMessage, ChatOptions, ChatResponse, LlmClient, LlmError};
    use crate::records::{Category, CategorySet, Example, ExampleSet, InputTextSet, LabeledItem};

    struct FixedReply(&'static str);

    #[async_trait]
    impl LlmClient for FixedReply {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: Some(self.0.to_string()),
                finish_reason: Some("stop".into()),
                usage: None,
                model: None,
            })
        }
    }

    fn classifier(reply: &'static str) -> LlmClassifier {
        LlmClassifier::new(
            ClassificationInvoker::new(Arc::new(FixedReply(reply))),
            Arc::new(CharRatioEstimator::default()),
        )
    }

    fn request() -> ClassificationRequest {
        ClassificationRequest {
            input_texts: InputTextSet::new(vec![
                "Great service!".into(),
                "Where is my order?".into(),
            ])
            .unwrap(),
            categories: CategorySet::new(vec![
                Category::new("Positive", "praise"),
                Category::new("Question", "asks for help"),
            ])
            .unwrap(),
            examples: ExampleSet::new(vec![Example::new("I love it", "Positive")]).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_usage_from_prompt_and_response_length() {
        const REPLY: &str = r#"[{"text":"Great service!","category":"Positive"},{"text":"Where is my order?","category":"Question"}]"#;
        let request = request();
        let response = classifier(REPLY).classify(&request).await.unwrap();

        let prompt_chars = build_prompt(&request).text.chars().count() as u64;
        assert_eq!(response.usage.input_tokens, prompt_chars.div_ceil(4));
        assert_eq!(response.usage.output_tokens, (REPLY.len() as u64).div_ceil(4));
        assert_eq!(
            response.results,
            vec![
                LabeledItem::new("Great service!", "Positive"),
                LabeledItem::new("Where is my order?", "Question"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unparsable_response() {
        let err = classifier("Sorry, I can't help with that.")
            .classify(&request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::Response(ResponseError::Unparsable { .. })
        ));
    }
}
