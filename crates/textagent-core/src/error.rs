//! Error taxonomy shared by the compiler, the template engine and the runtime.
//!
//! Every failure surfaces as one [`Error`]; callers that only care about the
//! category can match on [`Error::kind`].

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Category tag for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The agent file or configuration is invalid. Raised at compile time only.
    AgentDefinition,
    /// A required input was not supplied at call time.
    MissingInput,
    /// An input could not be coerced to its declared type or violates a constraint.
    InputType,
    /// The model output still failed validation after all retries.
    OutputValidation,
    /// A template placeholder could not be resolved.
    Template,
    /// The API was used incorrectly (e.g. blocking call inside an async runtime).
    Usage,
    /// The model-execution service failed (transport, auth, rate limit, ...).
    Dispatch,
    /// Filesystem or runtime setup failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AgentDefinition => "agent definition",
            ErrorKind::MissingInput => "missing input",
            ErrorKind::InputType => "input type",
            ErrorKind::OutputValidation => "output validation",
            ErrorKind::Template => "template",
            ErrorKind::Usage => "usage",
            ErrorKind::Dispatch => "dispatch",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// One problem found while compiling an agent definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionIssue {
    /// Where the problem is, e.g. `agent.output_type.confidence`.
    pub location: String,

    /// What is wrong.
    pub message: String,
}

impl DefinitionIssue {
    /// Create an issue at a location.
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for DefinitionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.location, self.message)
        }
    }
}

/// A value that does not satisfy a field descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintViolation {
    /// Field name.
    pub field: String,

    /// The offending value (`null` when the value was absent).
    pub value: Value,

    /// The violated constraint in declaration form, e.g. `le=1.0` or `type=int`.
    pub constraint: String,

    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {} ({})", self.field, self.message, self.constraint)
    }
}

/// Errors produced by textagent.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid agent definition:\n{}", bullet_list(.0))]
    Definition(Vec<DefinitionIssue>),

    #[error("missing required input(s): {} (provided: {}; expected: {})", quoted(.missing), quoted(.provided), quoted(.expected))]
    MissingInput {
        missing: Vec<String>,
        provided: Vec<String>,
        expected: Vec<String>,
    },

    #[error("cannot convert input '{field}' to {expected}: received {received}")]
    InputType {
        field: String,
        received: String,
        expected: String,
    },

    #[error("output validation failed after {retries} {}:\n{}", retries_label(.retries), bullet_list(.violations))]
    OutputValidation {
        violations: Vec<ConstraintViolation>,
        retries: u32,
    },

    #[error("template placeholder '{{{placeholder}}}' has no value (available: {})", quoted(.available))]
    Template {
        placeholder: String,
        available: Vec<String>,
    },

    #[error("usage error: {0}")]
    Usage(String),

    #[error("model execution failed: {0}")]
    Dispatch(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Definition(_) => ErrorKind::AgentDefinition,
            Error::MissingInput { .. } => ErrorKind::MissingInput,
            Error::InputType { .. } => ErrorKind::InputType,
            Error::OutputValidation { .. } => ErrorKind::OutputValidation,
            Error::Template { .. } => ErrorKind::Template,
            Error::Usage(_) => ErrorKind::Usage,
            Error::Dispatch(_) => ErrorKind::Dispatch,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Shorthand for a single-issue definition error.
    pub fn definition(location: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Definition(vec![DefinitionIssue::new(location, message)])
    }

    /// Wrap a model-execution failure.
    pub fn dispatch(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Dispatch(Box::new(err))
    }

    /// Definition issues, if this is a definition error.
    pub fn issues(&self) -> &[DefinitionIssue] {
        match self {
            Error::Definition(issues) => issues,
            _ => &[],
        }
    }

    pub(crate) fn input_type(field: &str, received: &Value, expected: impl Into<String>) -> Self {
        Error::InputType {
            field: field.to_string(),
            received: describe_value(received),
            expected: expected.into(),
        }
    }
}

/// Render a JSON value for an error message, truncating long strings.
pub(crate) fn describe_value(value: &Value) -> String {
    const MAX: usize = 80;
    match value {
        Value::String(s) if s.chars().count() > MAX => {
            let head: String = s.chars().take(MAX).collect();
            format!("{:?}... (str)", head)
        }
        Value::String(s) => format!("{:?} (str)", s),
        Value::Null => "null".to_string(),
        Value::Bool(_) => format!("{} (bool)", value),
        Value::Number(n) if n.is_f64() => format!("{} (float)", value),
        Value::Number(_) => format!("{} (int)", value),
        Value::Array(_) => format!("{} (list)", value),
        Value::Object(_) => format!("{} (object)", value),
    }
}

fn bullet_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn retries_label(retries: &u32) -> &'static str {
    if *retries == 1 {
        "retry"
    } else {
        "retries"
    }
}

fn quoted(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("'{}'", item))
        .collect::<Vec<_>>()
        .join(", ")
}
