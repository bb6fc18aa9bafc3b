//! Provider registry keyed by the `provider:` prefix of a model identifier.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let executor = registry.resolve("anthropic:claude-sonnet-4-5", &serde_json::json!({}))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ModelExecutor, ProviderError, StructuredExecutor};

/// Split `provider:model` into its parts. Identifiers without a prefix
/// return `None` for the provider.
pub fn split_model_id(model_id: &str) -> (Option<&str>, &str) {
    match model_id.split_once(':') {
        Some((provider, model)) if !provider.is_empty() => (Some(provider), model),
        _ => (None, model_id),
    }
}

/// Builds providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Prefix this factory answers to, e.g. `anthropic`.
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance from JSON configuration.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "LLM Provider"
    }
}

/// Registry of available provider factories.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a chat provider by type name.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unknown provider type: '{}'. Available: {:?}",
                    provider_type,
                    self.available_types()
                ))
            })?
            .create(config)
    }

    /// Build an executor for a full `provider:model` identifier.
    pub fn resolve(
        &self,
        model_id: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn ModelExecutor>, ProviderError> {
        let (Some(provider_type), _) = split_model_id(model_id) else {
            return Err(ProviderError::NotConfigured(format!(
                "model '{}' has no provider prefix; expected 'provider:model' (available: {:?})",
                model_id,
                self.available_types()
            )));
        };
        let provider = self.create(provider_type, config)?;
        tracing::debug!(model = %model_id, provider = %provider.name(), "resolved model executor");
        Ok(Arc::new(StructuredExecutor::new(provider)))
    }

    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("Unknown provider type: '{}'", provider_type))
            })?
            .validate_config(config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// A registry with every provider enabled by cargo features.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;

    struct MockProvider {
        name: String,
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "{}".to_string(),
                usage: TokenUsage::default(),
                model: "mock".to_string(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct MockProviderFactory;

    impl ProviderFactory for MockProviderFactory {
        fn provider_type(&self) -> &'static str {
            "mock"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("mock-provider").to_string();
            Ok(Arc::new(MockProvider { name }))
        }

        fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn test_split_model_id() {
        assert_eq!(split_model_id("openai:gpt-4o"), (Some("openai"), "gpt-4o"));
        assert_eq!(split_model_id("gpt-4o"), (None, "gpt-4o"));
        assert_eq!(split_model_id(":x"), (None, ":x"));
        assert_eq!(
            split_model_id("ollama:llama3:8b"),
            (Some("ollama"), "llama3:8b")
        );
    }

    #[test]
    fn test_registry_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProviderFactory));

        assert!(registry.has_provider("mock"));
        assert!(!registry.has_provider("unknown"));

        let provider = registry
            .create("mock", &serde_json::json!({"name": "test-mock"}))
            .unwrap();
        assert_eq!(provider.name(), "test-mock");
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProviderFactory));

        assert!(registry.resolve("mock:anything", &serde_json::json!({})).is_ok());

        match registry.resolve("nope:model", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("Unknown provider type")),
            _ => panic!("Expected NotConfigured error"),
        }
        match registry.resolve("bare-model", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => assert!(msg.contains("no provider prefix")),
            _ => panic!("Expected NotConfigured error"),
        }
    }

    #[test]
    fn test_registry_validate() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockProviderFactory));

        let config = serde_json::json!({});
        assert!(registry.validate("mock", &config).is_ok());
        assert!(registry.validate("unknown", &config).is_err());
        assert_eq!(registry.available_types(), vec!["mock"]);
    }
}
