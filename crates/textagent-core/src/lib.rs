//! # textagent-core
//!
//! Deterministic compiler for text-file LLM agents.
//!
//! An agent file is a TOML front-matter block (model, retries, settings,
//! typed inputs and outputs) followed by a prompt template. This crate turns
//! that file into an [`AgentDefinition`]:
//!
//! - **Constraint resolution**: each declared field becomes a typed
//!   [`FieldDescriptor`] with checked bounds, lengths, patterns and enums
//! - **Schema compilation**: fields are assembled into Input and Output
//!   [`ModelDefinition`]s, with `reasoning` always first in the output
//! - **Templating**: placeholders are cross-checked against the inputs,
//!   raw values are coerced to their declared types and the prompt rendered
//! - **Output validation**: model replies are checked against the Output
//!   Model and returned as a [`StructuredOutput`]
//!
//! Nothing here talks to a network; dispatching to a model lives in
//! `textagent-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use textagent_core::{AgentDefinition, Inputs};
//!
//! let agent = AgentDefinition::from_file("agents/safety.md")?;
//! let rendered = agent.render(&Inputs::new().with("text", "hello"))?;
//! println!("{}", rendered.prompt);
//!
//! let output = agent.validate_output(&serde_json::json!({ "is_safe": true }));
//! ```

pub mod definition;
pub mod error;
pub mod field;
pub mod model;
pub mod output;
pub mod schema;
pub mod template;

pub use definition::{compile, AgentConfig, AgentDefinition, Settings};
pub use error::{ConstraintViolation, DefinitionIssue, Error, ErrorKind};
pub use field::{
    resolve_field, Constraint, FieldDescriptor, FieldRole, FieldSpec, FieldType, ScalarType,
};
pub use model::{compile_model, compile_models, ModelDefinition, ModelKind};
pub use output::{feedback_for, validate_output, StructuredOutput};
pub use template::{Inputs, MagicVariable, RenderedPrompt, Template, TemplateEngine};

/// Result alias used across textagent.
pub type Result<T> = std::result::Result<T, Error>;
