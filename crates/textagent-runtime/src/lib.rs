//! # textagent-runtime
//!
//! Async execution for agents compiled by `textagent-core`.
//!
//! The core crate is deterministic and never touches the network. This
//! crate adds the retry-with-feedback loop, the model-execution boundary
//! ([`ModelExecutor`]), HTTP providers behind cargo features, and tracing
//! hooks.
//!
//! ## Example
//!
//! ```rust,ignore
//! use textagent_runtime::{load_agent, Inputs, LoadOptions};
//!
//! let agent = load_agent("safety.agent", LoadOptions::new())?;
//! let output = agent
//!     .run(&Inputs::new().with("text", "@draft.txt"))
//!     .await?;
//! println!("{}", output.to_json_pretty());
//! ```

pub mod agent;
pub mod loader;
pub mod prompts;
pub mod providers;
pub mod trace;

pub use agent::{Agent, AgentBuilder, RunReport};
pub use loader::{load_agent, load_agent_from_str, LoadError, LoadOptions};
pub use providers::{
    CompletionConfig, DispatchRequest, DispatchResponse, LlmProvider, ModelExecutor, ProviderError,
    ProviderRegistry, StructuredExecutor, TokenUsage,
};
pub use trace::{LogSink, MemorySink, TraceError, TraceEvent, TraceSink};

pub use textagent_core::{AgentDefinition, Error, ErrorKind, Inputs, StructuredOutput};
