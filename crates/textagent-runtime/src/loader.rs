//! Loading agent files into runnable [`Agent`]s.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use textagent_core::{AgentDefinition, Error};

use crate::agent::Agent;
use crate::providers::{ModelExecutor, ProviderError, ProviderRegistry};
use crate::trace::TraceSink;

/// Errors from [`load_agent`].
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Definition(#[from] Error),

    #[error("cannot resolve model '{model}': {source}")]
    Provider {
        model: String,
        #[source]
        source: ProviderError,
    },
}

/// Runtime overrides applied when loading an agent.
#[derive(Default, Clone)]
pub struct LoadOptions {
    /// Replaces the model identifier from the file.
    pub model_override: Option<String>,

    /// Use this executor instead of resolving one from the registry.
    pub executor: Option<Arc<dyn ModelExecutor>>,

    pub trace_sink: Option<Arc<dyn TraceSink>>,

    /// Registry used when no executor is given. Defaults to
    /// [`ProviderRegistry::with_defaults`].
    pub registry: Option<ProviderRegistry>,

    /// Config passed to the provider factory (API key, base URL).
    pub provider_config: JsonValue,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ModelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_provider_config(mut self, config: JsonValue) -> Self {
        self.provider_config = config;
        self
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("model_override", &self.model_override)
            .field("executor", &self.executor.as_ref().map(|e| e.name().to_string()))
            .field("trace_sink", &self.trace_sink.is_some())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Parse, compile and bind an agent file.
pub fn load_agent(path: impl AsRef<Path>, options: LoadOptions) -> Result<Agent, LoadError> {
    let path = path.as_ref();
    let definition = AgentDefinition::from_file(path)?;
    tracing::debug!(path = %path.display(), agent = %definition.name(), "loaded agent file");
    bind(definition, options)
}

/// Same as [`load_agent`] for a document already in memory.
pub fn load_agent_from_str(text: &str, options: LoadOptions) -> Result<Agent, LoadError> {
    bind(AgentDefinition::parse(text, None)?, options)
}

fn bind(definition: AgentDefinition, options: LoadOptions) -> Result<Agent, LoadError> {
    let definition = match &options.model_override {
        Some(model) => definition.with_model(model.clone()),
        None => definition,
    };

    let executor = match options.executor {
        Some(executor) => executor,
        None => {
            let registry = options.registry.unwrap_or_else(ProviderRegistry::with_defaults);
            registry
                .resolve(definition.model(), &options.provider_config)
                .map_err(|source| LoadError::Provider {
                    model: definition.model().to_string(),
                    source,
                })?
        }
    };

    let mut builder = Agent::builder().definition(definition).executor(executor);
    if let Some(sink) = options.trace_sink {
        builder = builder.trace_sink(sink);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use async_trait::async_trait;
    use textagent_core::ErrorKind;

    use crate::providers::{
        ChatMessage, CompletionConfig, CompletionResponse, DispatchRequest, DispatchResponse,
        LlmProvider, ProviderFactory, TokenUsage,
    };

    const DOC: &str = r#"---
[agent]
model = "echo:v1"

[agent.output_type.ok]
---
Say {word}
"#;

    struct Fixed;

    #[async_trait]
    impl ModelExecutor for Fixed {
        async fn dispatch(&self, _request: &DispatchRequest<'_>) -> Result<DispatchResponse, ProviderError> {
            Ok(DispatchResponse::new(serde_json::json!({"ok": true})))
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "{\"ok\": false}".to_string(),
                usage: TokenUsage::default(),
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct EchoFactory;

    impl ProviderFactory for EchoFactory {
        fn provider_type(&self) -> &'static str {
            "echo"
        }

        fn create(&self, _config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            Ok(Arc::new(EchoProvider))
        }

        fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_from_file_with_executor() {
        let mut file = tempfile::Builder::new().suffix(".agent").tempfile().unwrap();
        file.write_all(DOC.as_bytes()).unwrap();

        let agent = load_agent(
            file.path(),
            LoadOptions::new().with_executor(Arc::new(Fixed)).with_model("fixed:any"),
        )
        .unwrap();
        let stem = file.path().file_stem().unwrap().to_str().unwrap().to_string();
        assert_eq!(agent.name(), stem);
        assert_eq!(agent.model(), "fixed:any");

        let output = agent
            .run(&textagent_core::Inputs::new().with("word", "hi"))
            .await
            .unwrap();
        assert_eq!(output.get_bool("ok"), Some(true));
    }

    #[tokio::test]
    async fn test_registry_resolution() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(EchoFactory));

        let agent = load_agent_from_str(DOC, LoadOptions::new().with_registry(registry)).unwrap();
        let output = agent
            .run(&textagent_core::Inputs::new().with("word", "hi"))
            .await
            .unwrap();
        assert_eq!(output.get_bool("ok"), Some(false));
    }

    #[test]
    fn test_unknown_provider() {
        let err = load_agent_from_str(DOC, LoadOptions::new().with_registry(ProviderRegistry::new()))
            .unwrap_err();
        match err {
            LoadError::Provider { model, .. } => assert_eq!(model, "echo:v1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_definition_errors_pass_through() {
        let err = load_agent_from_str("---\n[agent]\nmodel = \"m\"\n---\nno placeholders", LoadOptions::new())
            .unwrap_err();
        match err {
            LoadError::Definition(inner) => assert_eq!(inner.kind(), ErrorKind::AgentDefinition),
            other => panic!("unexpected error: {other}"),
        }

        let err = load_agent("/definitely/not/here.agent", LoadOptions::new()).unwrap_err();
        assert!(matches!(err, LoadError::Definition(ref inner) if inner.kind() == ErrorKind::Io));
    }
}
