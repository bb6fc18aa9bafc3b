//! Structured output on top of plain chat completion.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    split_model_id, ChatMessage, CompletionConfig, DispatchRequest, DispatchResponse, LlmProvider,
    ModelExecutor, ProviderError,
};
use crate::prompts::{feedback_prompt, system_prompt};

/// Adapts an [`LlmProvider`] to [`ModelExecutor`].
///
/// The Output Model's JSON Schema goes into the system message and the
/// first JSON object in the reply is returned. A reply with no JSON object
/// is returned as a string so that validation rejects it and the retry loop
/// can send feedback.
pub struct StructuredExecutor<P: LlmProvider + ?Sized> {
    provider: Arc<P>,
}

impl<P: LlmProvider + ?Sized> StructuredExecutor<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Messages for one attempt.
    pub fn messages(request: &DispatchRequest<'_>) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(system_prompt(request.instructions, request.output_model)),
            ChatMessage::user(request.prompt),
        ];
        if let Some(feedback) = request.feedback {
            messages.push(ChatMessage::user(feedback_prompt(feedback)));
        }
        messages
    }
}

#[async_trait]
impl<P: LlmProvider + ?Sized> ModelExecutor for StructuredExecutor<P> {
    async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<DispatchResponse, ProviderError> {
        let (_, model) = split_model_id(request.model);
        let config = CompletionConfig::from_settings(model, request.settings)?;
        let messages = Self::messages(request);

        let response = self.provider.complete(messages, &config).await?;
        tracing::debug!(
            provider = %self.provider.name(),
            model = %response.model,
            attempt = request.attempt,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "completion received"
        );

        let data = match extract_json(&response.content) {
            Some(value) => value,
            None => {
                tracing::warn!(attempt = request.attempt, "reply contained no JSON object");
                Value::String(response.content)
            }
        };

        Ok(DispatchResponse {
            data,
            usage: response.usage,
        })
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Find the first JSON object in a model reply.
///
/// Handles bare JSON, fenced code blocks and objects surrounded by prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for (start, _) in trimmed.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&trimmed[start..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next() {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, TokenUsage};
    use parking_lot::Mutex;
    use serde_json::json;
    use textagent_core::{compile_model, FieldSpec, ModelDefinition, ModelKind, Settings};

    struct CannedProvider {
        reply: String,
        seen: Mutex<Vec<(Vec<ChatMessage>, CompletionConfig)>>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.seen.lock().push((messages, config.clone()));
            Ok(CompletionResponse {
                content: self.reply.clone(),
                usage: TokenUsage {
                    prompt_tokens: 12,
                    completion_tokens: 3,
                },
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn output_model() -> ModelDefinition {
        compile_model(ModelKind::Output, "AgentOutput", None, &[FieldSpec::new("ok")]).unwrap()
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json(r#"{"ok": true}"#), Some(json!({"ok": true})));
        assert_eq!(
            extract_json("```json\n{\"ok\": false}\n```"),
            Some(json!({"ok": false}))
        );
        assert_eq!(
            extract_json("Sure! Here it is: {\"ok\": true} Hope that helps {x}"),
            Some(json!({"ok": true}))
        );
        assert_eq!(extract_json("[1, 2]"), None);
        assert_eq!(extract_json("no json here"), None);
    }

    #[tokio::test]
    async fn test_dispatch_builds_messages_and_parses_reply() {
        let provider = Arc::new(CannedProvider {
            reply: "```json\n{\"ok\": true}\n```".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let executor = StructuredExecutor::new(provider.clone());
        let model = output_model();
        let settings: Settings = json!({"max_tokens": 64}).as_object().cloned().unwrap();

        let response = executor
            .dispatch(&DispatchRequest {
                model: "canned:tiny-1",
                prompt: "Is this ok?",
                instructions: Some("Be brief."),
                output_model: &model,
                settings: &settings,
                feedback: Some("field 'ok' is required"),
                attempt: 2,
            })
            .await
            .unwrap();

        assert_eq!(response.data, json!({"ok": true}));
        assert_eq!(response.usage.total(), 15);

        let seen = provider.seen.lock();
        let (messages, config) = &seen[0];
        assert_eq!(config.model, "tiny-1");
        assert_eq!(config.max_tokens, 64);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.starts_with("Be brief."));
        assert_eq!(messages[1].content, "Is this ok?");
        assert!(messages[2].content.contains("field 'ok' is required"));
        assert_eq!(executor.name(), "canned");
    }

    #[tokio::test]
    async fn test_unparseable_reply_becomes_string() {
        let provider = Arc::new(CannedProvider {
            reply: "I cannot answer that.".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let executor = StructuredExecutor::new(provider);
        let model = output_model();
        let settings = Settings::new();

        let response = executor
            .dispatch(&DispatchRequest {
                model: "canned:tiny-1",
                prompt: "p",
                instructions: None,
                output_model: &model,
                settings: &settings,
                feedback: None,
                attempt: 1,
            })
            .await
            .unwrap();
        assert_eq!(response.data, json!("I cannot answer that."));
    }
}
