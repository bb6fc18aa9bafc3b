//! Compiled agent definitions.
//!
//! An agent file is TOML front-matter followed by a prompt template:
//!
//! ```text
//! ---
//! [agent]
//! model = "anthropic:claude-sonnet-4-5"
//!
//! [agent.output_type.is_safe]
//! description = "Is the text safe?"
//! ---
//! Analyze: {text}
//! ```
//!
//! [`compile`] turns the parsed pieces into an immutable [`AgentDefinition`],
//! collecting every problem it finds along the way.

pub mod parser;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::{ConstraintViolation, DefinitionIssue, Error};
use crate::model::{compile_models, ModelDefinition};
use crate::output::{validate_output, StructuredOutput};
use crate::template::{is_magic, Inputs, RenderedPrompt, TemplateEngine};

pub use parser::{parse_config, split_document, AgentConfig};

/// Name used when neither the file nor the config names the agent.
pub const UNNAMED_AGENT: &str = "unnamed_agent";

/// Opaque execution settings passed through to the model.
pub type Settings = Map<String, Value>;

/// The compiled, immutable form of one agent file.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDefinition {
    name: String,
    model: String,
    retries: u32,
    settings: Settings,
    output_model: ModelDefinition,
    template: TemplateEngine,
    source: Option<PathBuf>,
}

impl AgentDefinition {
    /// Parse and compile a whole document.
    pub fn parse(text: &str, source: Option<&Path>) -> Result<Self, Error> {
        let (config, body) = split_document(text);
        let table = parse_config(config)?;
        compile(&table, body, source)
    }

    /// Read, parse and compile an agent file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::parse(&text, Some(path))
    }

    /// A copy bound to a different model identifier.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn input_model(&self) -> &ModelDefinition {
        self.template.input_model()
    }

    pub fn output_model(&self) -> &ModelDefinition {
        &self.output_model
    }

    pub fn template(&self) -> &TemplateEngine {
        &self.template
    }

    /// The prompt template text.
    pub fn prompt_template(&self) -> &str {
        self.template.prompt().source()
    }

    /// The instruction template text, if any.
    pub fn instructions(&self) -> Option<&str> {
        self.template.instructions().map(|t| t.source())
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn input_names(&self) -> Vec<String> {
        self.template.input_names()
    }

    pub fn required_inputs(&self) -> Vec<String> {
        self.template.required_inputs()
    }

    /// JSON Schema of the Output Model.
    pub fn output_schema(&self) -> Value {
        self.output_model.json_schema()
    }

    pub fn render(&self, inputs: &Inputs) -> Result<RenderedPrompt, Error> {
        self.template.render(inputs)
    }

    pub fn render_at(&self, inputs: &Inputs, now: NaiveDateTime) -> Result<RenderedPrompt, Error> {
        self.template.render_at(inputs, now)
    }

    pub fn validate_output(&self, data: &Value) -> Result<StructuredOutput, Vec<ConstraintViolation>> {
        validate_output(&self.output_model, data)
    }
}

impl FromStr for AgentDefinition {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text, None)
    }
}

/// Compile parsed front-matter and a template body into an agent definition.
///
/// Every issue across the config, the fields and the template is reported
/// in one [`Error::Definition`].
pub fn compile(
    config: &toml::Table,
    template: &str,
    source: Option<&Path>,
) -> Result<AgentDefinition, Error> {
    let mut issues: Vec<DefinitionIssue> = Vec::new();

    let body = template.trim();
    if body.is_empty() {
        issues.push(DefinitionIssue::new("template", "prompt body is empty"));
    }

    let (config, mut config_issues) = AgentConfig::read(config);
    config_issues.append(&mut issues);
    let mut issues = config_issues;

    let models = compile_models(
        &config.inputs,
        &config.outputs,
        config.output_name.clone(),
        config.output_description.clone(),
    );
    let engine = match models {
        Ok((input_model, output_model)) => {
            if let Err(message) = output_model.compile_json_schema() {
                issues.push(DefinitionIssue::new("agent.output_type", message));
            }
            let engine = if body.is_empty() {
                None
            } else {
                match TemplateEngine::new(body, config.instructions.as_deref(), input_model) {
                    Ok(engine) => Some(engine),
                    Err(mut template_issues) => {
                        issues.append(&mut template_issues);
                        None
                    }
                }
            };
            engine.map(|engine| (engine, output_model))
        }
        Err(mut model_issues) => {
            issues.append(&mut model_issues);
            issues.extend(input_issues_without_model(&config, body));
            None
        }
    };

    let (template, output_model) = match engine {
        Some(compiled) if issues.is_empty() => compiled,
        _ => return Err(Error::Definition(issues)),
    };

    let name = config
        .name
        .or_else(|| {
            source
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| UNNAMED_AGENT.to_string());

    tracing::debug!(
        agent = %name,
        model = %config.model,
        inputs = template.input_names().len(),
        outputs = output_model.len(),
        "compiled agent definition"
    );

    Ok(AgentDefinition {
        name,
        model: config.model,
        retries: config.retries,
        settings: config.settings,
        output_model,
        template,
        source: source.map(Path::to_path_buf),
    })
}

/// Template checks that still apply when the fields failed to compile.
fn input_issues_without_model(config: &AgentConfig, body: &str) -> Vec<DefinitionIssue> {
    let mut issues: Vec<DefinitionIssue> = config
        .inputs
        .iter()
        .filter(|spec| is_magic(&spec.name))
        .map(|spec| {
            DefinitionIssue::new(
                format!("agent.input_type.{}", spec.name),
                format!("'{}' is a built-in variable and cannot be declared as an input", spec.name),
            )
        })
        .collect();

    if !body.is_empty() {
        if let Err(template_issues) = TemplateEngine::new(
            body,
            config.instructions.as_deref(),
            ModelDefinition::empty_input(),
        ) {
            issues.extend(template_issues);
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::FieldType;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::io::Write;

    const SAFETY: &str = r#"---
[agent]
model = "openai:gpt-4o-mini"

[agent.output_type.is_safe]
description = "Whether the text is safe"
---
Analyze: {text}
"#;

    #[test]
    fn test_minimal_agent() {
        let agent: AgentDefinition = SAFETY.parse().unwrap();
        assert_eq!(agent.name(), UNNAMED_AGENT);
        assert_eq!(agent.model(), "openai:gpt-4o-mini");
        assert_eq!(agent.retries(), 0);
        assert!(agent.settings().is_empty());
        assert!(agent.input_model().is_empty());
        assert_eq!(agent.required_inputs(), vec!["text"]);
        assert_eq!(agent.prompt_template(), "Analyze: {text}");

        let field = &agent.output_model().fields()[0];
        assert_eq!(field.name(), "is_safe");
        assert_eq!(field.field_type(), FieldType::BOOL);
        assert!(field.constraints().is_empty());
        assert!(!field.is_optional());
    }

    #[test]
    fn test_name_from_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safety_check.agent");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(SAFETY.as_bytes())
            .unwrap();

        let agent = AgentDefinition::from_file(&path).unwrap();
        assert_eq!(agent.name(), "safety_check");
        assert_eq!(agent.source(), Some(path.as_path()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AgentDefinition::from_file("/no/such/agent.md").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_with_model_override() {
        let agent: AgentDefinition = SAFETY.parse().unwrap();
        let other = agent.with_model("anthropic:claude-haiku");
        assert_eq!(other.model(), "anthropic:claude-haiku");
        assert_eq!(agent.model(), "openai:gpt-4o-mini");
        assert_eq!(other.output_model(), agent.output_model());
    }

    #[test]
    fn test_every_issue_is_reported() {
        let doc = r#"---
[agent]
model = "openai:gpt-4o"

[agent.input_type.CURRENT_DATE]
type = "str"

[agent.output_type.score]
type = "float"
ge = 1.0
le = 0.0

[agent.output_type.label]
type = "str"
ge = 3
---
Today is {CURRENT_DATE}.
"#;
        let err = doc.parse::<AgentDefinition>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentDefinition);
        let issues = err.issues();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].location, "agent.output_type.score");
        assert_eq!(issues[1].location, "agent.output_type.label");
        assert_eq!(issues[2].location, "agent.input_type.CURRENT_DATE");
        assert!(issues[2].message.contains("built-in variable"));
    }

    #[test]
    fn test_config_issues_do_not_hide_field_issues() {
        let doc = r#"---
[agent]
retries = 1

[agent.output_type.amount]
type = "decimal"
---
Total: {total}
"#;
        let issues = doc.parse::<AgentDefinition>().unwrap_err().issues().to_vec();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("missing field 'model'"));
        assert_eq!(issues[1].location, "agent.output_type.amount");
        assert!(issues[1].message.contains("unsupported type 'decimal'"));
    }

    #[test]
    fn test_template_issues_survive_field_issues() {
        let doc = r#"---
[agent]
model = "m"

[agent.output_type.amount]
type = "decimal"
---
No placeholders here.
"#;
        let issues = doc.parse::<AgentDefinition>().unwrap_err().issues().to_vec();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].location, "agent.output_type.amount");
        assert_eq!(issues[1].location, "template");
        assert!(issues[1].message.contains("no {placeholders}"));
    }

    #[test]
    fn test_template_issues_join_config_issues() {
        let doc = r#"---
[agent]
model = "m"

[agent.input_type.CURRENT_DATE]
type = "str"

[agent.output_type.ok]
---
Today is {CURRENT_DATE}.
"#;
        let err = doc.parse::<AgentDefinition>().unwrap_err();
        assert!(err.to_string().contains("built-in variable"));
    }

    #[test]
    fn test_empty_body_and_missing_outputs() {
        let doc = "---\n[agent]\nmodel = \"m\"\n---\n   \n";
        let issues = doc.parse::<AgentDefinition>().unwrap_err().issues().to_vec();
        let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("at least one field")));
        assert!(messages.iter().any(|m| m.contains("prompt body is empty")));
    }

    #[test]
    fn test_document_without_front_matter() {
        let err = "Summarize {text}".parse::<AgentDefinition>().unwrap_err();
        assert!(err.issues()[0].message.contains("missing [agent] section"));
    }

    #[test]
    fn test_render_and_validate_through_definition() {
        let agent: AgentDefinition = SAFETY.parse().unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap();
        let rendered = agent
            .render_at(&Inputs::new().with("text", "hello"), now)
            .unwrap();
        assert_eq!(rendered.prompt, "Analyze: hello");
        assert!(rendered.instructions.is_none());

        let output = agent.validate_output(&json!({"is_safe": true})).unwrap();
        assert_eq!(output.get_bool("is_safe"), Some(true));
        assert_eq!(agent.output_schema()["required"], json!(["is_safe"]));
    }
}
