//! The callable agent.
//!
//! An [`Agent`] pairs an immutable [`AgentDefinition`] with a
//! [`ModelExecutor`]. Every call renders the template, dispatches, validates
//! the reply against the Output Model and, while retries remain, dispatches
//! again with feedback describing what was wrong.
//!
//! All per-call state lives on the stack of [`Agent::run`], so one agent can
//! serve any number of concurrent calls.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;

use textagent_core::{
    feedback_for, AgentDefinition, ConstraintViolation, Error, Inputs, RenderedPrompt,
    StructuredOutput,
};

use crate::providers::{DispatchRequest, ModelExecutor, TokenUsage};
use crate::trace::{self, TraceEvent, TraceSink};

/// Result of a successful run with its bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub output: StructuredOutput,

    /// Dispatches made, including the successful one.
    pub attempts: u32,

    /// Token usage summed over all attempts.
    pub usage: TokenUsage,

    #[serde(skip)]
    pub elapsed: Duration,
}

/// A loaded agent, ready to call.
#[derive(Clone)]
pub struct Agent {
    definition: Arc<AgentDefinition>,
    executor: Arc<dyn ModelExecutor>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.definition.name())
            .field("model", &self.definition.model())
            .field("executor", &self.executor.name())
            .field("traced", &self.trace.is_some())
            .finish()
    }
}

impl Agent {
    pub fn new(definition: impl Into<Arc<AgentDefinition>>, executor: Arc<dyn ModelExecutor>) -> Self {
        Self {
            definition: definition.into(),
            executor,
            trace: None,
        }
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn model(&self) -> &str {
        self.definition.model()
    }

    pub fn retries(&self) -> u32 {
        self.definition.retries()
    }

    /// Declared inputs followed by inputs inferred from the template.
    pub fn input_names(&self) -> Vec<String> {
        self.definition.input_names()
    }

    pub fn required_inputs(&self) -> Vec<String> {
        self.definition.required_inputs()
    }

    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    /// Render the prompt without calling the model.
    pub fn render(&self, inputs: &Inputs) -> Result<RenderedPrompt, Error> {
        self.definition.render(inputs)
    }

    /// Run the agent once.
    pub async fn run(&self, inputs: &Inputs) -> Result<StructuredOutput, Error> {
        self.run_with_report(inputs).await.map(|report| report.output)
    }

    /// Run the agent once and report attempts, token usage and timing.
    pub async fn run_with_report(&self, inputs: &Inputs) -> Result<RunReport, Error> {
        let started = Instant::now();
        let rendered = match self.definition.render(inputs) {
            Ok(rendered) => rendered,
            Err(error) => {
                self.trace_failure(0, started.elapsed(), &error);
                return Err(error);
            }
        };

        trace::emit(
            self.trace.as_ref(),
            TraceEvent::RunStarted {
                agent: self.name().to_string(),
                model: self.model().to_string(),
                inputs: rendered.inputs.clone().into_iter().collect(),
            },
        );

        let mut attempts = 0;
        let result = self.dispatch_until_valid(&rendered, &mut attempts).await;
        let elapsed = started.elapsed();

        match result {
            Ok((output, usage)) => {
                tracing::debug!(agent = %self.name(), attempts, elapsed = ?elapsed, "run completed");
                trace::emit(
                    self.trace.as_ref(),
                    TraceEvent::RunCompleted {
                        agent: self.name().to_string(),
                        model: self.model().to_string(),
                        attempts,
                        elapsed,
                        output: output.to_json().as_object().cloned().unwrap_or_default(),
                        usage,
                    },
                );
                Ok(RunReport {
                    output,
                    attempts,
                    usage,
                    elapsed,
                })
            }
            Err(error) => {
                self.trace_failure(attempts, elapsed, &error);
                Err(error)
            }
        }
    }

    fn trace_failure(&self, attempts: u32, elapsed: Duration, error: &Error) {
        trace::emit(
            self.trace.as_ref(),
            TraceEvent::RunFailed {
                agent: self.name().to_string(),
                model: self.model().to_string(),
                attempts,
                elapsed,
                error: error.to_string(),
            },
        );
    }

    async fn dispatch_until_valid(
        &self,
        rendered: &RenderedPrompt,
        attempts: &mut u32,
    ) -> Result<(StructuredOutput, TokenUsage), Error> {
        let retries = self.definition.retries();
        let mut usage = TokenUsage::default();
        let mut feedback: Option<String> = None;
        let mut violations: Vec<ConstraintViolation> = Vec::new();

        for index in 0..=retries {
            let attempt = index.saturating_add(1);
            *attempts = attempt;
            let request = DispatchRequest {
                model: self.definition.model(),
                prompt: &rendered.prompt,
                instructions: rendered.instructions.as_deref(),
                output_model: self.definition.output_model(),
                settings: self.definition.settings(),
                feedback: feedback.as_deref(),
                attempt,
            };

            let response = self.executor.dispatch(&request).await.map_err(|e| {
                tracing::warn!(agent = %self.name(), model = %self.model(), attempt, error = %e, "dispatch failed");
                Error::dispatch(e)
            })?;
            usage.add(&response.usage);

            match self.definition.validate_output(&response.data) {
                Ok(output) => return Ok((output, usage)),
                Err(rejected) => {
                    let text = feedback_for(&rejected);
                    tracing::debug!(
                        agent = %self.name(),
                        attempt,
                        remaining = retries - index,
                        violations = rejected.len(),
                        "output rejected"
                    );
                    trace::emit(
                        self.trace.as_ref(),
                        TraceEvent::AttemptRejected {
                            agent: self.name().to_string(),
                            attempt,
                            feedback: text.clone(),
                        },
                    );
                    feedback = Some(text);
                    violations = rejected;
                }
            }
        }

        tracing::warn!(agent = %self.name(), retries, "output still invalid after all retries");
        Err(Error::OutputValidation {
            violations,
            retries,
        })
    }

    /// Blocking variant of [`run`](Self::run).
    ///
    /// Fails with a usage error when called from inside a Tokio runtime
    /// instead of blocking one of its threads.
    pub fn run_sync(&self, inputs: &Inputs) -> Result<StructuredOutput, Error> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::Usage(
                "run_sync cannot be called from inside an async runtime; use `run(..).await`".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(inputs))
    }

    /// Run several calls concurrently. Results come back in input order.
    pub async fn run_many(&self, batch: &[Inputs]) -> Vec<Result<StructuredOutput, Error>> {
        join_all(batch.iter().map(|inputs| self.run(inputs))).await
    }
}

/// Builder for [`Agent`].
#[derive(Default)]
pub struct AgentBuilder {
    definition: Option<Arc<AgentDefinition>>,
    executor: Option<Arc<dyn ModelExecutor>>,
    model_override: Option<String>,
    trace: Option<Arc<dyn TraceSink>>,
}

impl AgentBuilder {
    pub fn definition(mut self, definition: impl Into<Arc<AgentDefinition>>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ModelExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the model identifier from the agent file.
    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn build(self) -> Result<Agent, Error> {
        let definition = self
            .definition
            .ok_or_else(|| Error::Usage("agent builder needs a definition".to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| Error::Usage("agent builder needs an executor".to_string()))?;

        let definition = match self.model_override {
            Some(model) if model != definition.model() => Arc::new(definition.with_model(model)),
            _ => definition,
        };

        Ok(Agent {
            definition,
            executor,
            trace: self.trace,
        })
    }
}
