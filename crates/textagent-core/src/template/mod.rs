//! Prompt templates: placeholder discovery, input resolution and rendering.
//!
//! Templates use `{name}` placeholders. `{{` and `}}` produce literal
//! braces and any other brace is plain text, so JSON examples inside a
//! prompt survive untouched as long as they do not look like `{name}`.

mod input;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{Local, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DefinitionIssue, Error};
use crate::field::FieldDescriptor;
use crate::model::ModelDefinition;

pub use input::{coerce_input, coerce_value, Inputs};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Reserved placeholders filled from the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicVariable {
    CurrentDate,
    CurrentTime,
    CurrentDateTime,
}

impl MagicVariable {
    pub const ALL: [MagicVariable; 3] = [
        MagicVariable::CurrentDate,
        MagicVariable::CurrentTime,
        MagicVariable::CurrentDateTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MagicVariable::CurrentDate => "CURRENT_DATE",
            MagicVariable::CurrentTime => "CURRENT_TIME",
            MagicVariable::CurrentDateTime => "CURRENT_DATETIME",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn resolve(self, now: NaiveDateTime) -> String {
        let format = match self {
            MagicVariable::CurrentDate => "%Y-%m-%d",
            MagicVariable::CurrentTime => "%H:%M:%S",
            MagicVariable::CurrentDateTime => "%Y-%m-%d %H:%M:%S",
        };
        now.format(format).to_string()
    }
}

pub fn is_magic(name: &str) -> bool {
    MagicVariable::from_name(name).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A template parsed into literal and placeholder segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find(['{', '}']) {
            literal.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("{{") {
                literal.push('{');
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                literal.push('}');
                rest = &tail[2..];
            } else if let Some(caps) = PLACEHOLDER.captures(tail) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(caps[1].to_string()));
                rest = &tail[caps[0].len()..];
            } else {
                literal.push_str(&tail[..1]);
                rest = &tail[1..];
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) if seen.insert(name.as_str()) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenate segments, looking placeholder values up by name.
    pub fn render_with<F>(&self, mut lookup: F) -> Result<String, Error>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        return Err(Error::Template {
                            placeholder: name.clone(),
                            available: Vec::new(),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Text form of a resolved value inside a prompt.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Output of one render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPrompt {
    /// The user prompt.
    pub prompt: String,

    /// Rendered system instructions, if the agent has any.
    pub instructions: Option<String>,

    /// Resolved, coerced input values (magic variables excluded).
    pub inputs: BTreeMap<String, Value>,
}

/// Binds the prompt and instruction templates to the Input Model.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEngine {
    prompt: Template,
    instructions: Option<Template>,
    input_model: ModelDefinition,
    inferred: Vec<FieldDescriptor>,
}

impl TemplateEngine {
    /// Parse both templates and cross-check them against the Input Model.
    pub fn new(
        prompt: &str,
        instructions: Option<&str>,
        input_model: ModelDefinition,
    ) -> Result<Self, Vec<DefinitionIssue>> {
        let prompt = Template::parse(prompt);
        let instructions = instructions.map(Template::parse);
        let mut issues = Vec::new();

        let mut referenced: Vec<&str> = Vec::new();
        for template in std::iter::once(&prompt).chain(instructions.as_ref()) {
            for name in template.placeholders() {
                if !referenced.contains(&name) {
                    referenced.push(name);
                }
            }
        }

        if referenced.is_empty() {
            issues.push(DefinitionIssue::new(
                "template",
                "prompt has no {placeholders}; an agent needs at least one input",
            ));
        }

        for field in input_model.fields() {
            if is_magic(field.name()) {
                issues.push(DefinitionIssue::new(
                    format!("agent.input_type.{}", field.name()),
                    format!("'{}' is a built-in variable and cannot be declared as an input", field.name()),
                ));
            } else if field.is_required() && !referenced.contains(&field.name()) {
                issues.push(DefinitionIssue::new(
                    format!("agent.input_type.{}", field.name()),
                    format!(
                        "required input '{}' is never used in the prompt or instructions",
                        field.name()
                    ),
                ));
            }
        }

        let inferred: Vec<FieldDescriptor> = referenced
            .iter()
            .filter(|name| !is_magic(name) && input_model.field(name).is_none())
            .map(|name| FieldDescriptor::inferred(*name))
            .collect();

        if !issues.is_empty() {
            return Err(issues);
        }

        Ok(Self {
            prompt,
            instructions,
            input_model,
            inferred,
        })
    }

    pub fn prompt(&self) -> &Template {
        &self.prompt
    }

    pub fn instructions(&self) -> Option<&Template> {
        self.instructions.as_ref()
    }

    pub fn input_model(&self) -> &ModelDefinition {
        &self.input_model
    }

    /// Placeholders with no declaration, treated as required strings.
    pub fn inferred_inputs(&self) -> &[FieldDescriptor] {
        &self.inferred
    }

    /// Declared inputs followed by inferred ones.
    pub fn inputs(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.input_model.fields().iter().chain(self.inferred.iter())
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs().map(|f| f.name().to_string()).collect()
    }

    /// Inputs the caller must supply.
    pub fn required_inputs(&self) -> Vec<String> {
        self.inputs()
            .filter(|f| f.is_required())
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Render with the local wall clock.
    pub fn render(&self, inputs: &Inputs) -> Result<RenderedPrompt, Error> {
        self.render_at(inputs, Local::now().naive_local())
    }

    /// Validate, coerce and render against a fixed wall-clock time.
    pub fn render_at(&self, inputs: &Inputs, now: NaiveDateTime) -> Result<RenderedPrompt, Error> {
        for name in inputs.names() {
            if is_magic(&name) {
                tracing::warn!(input = %name, "ignoring caller value for built-in variable");
            } else if !self.inputs().any(|f| f.name() == name) {
                tracing::debug!(input = %name, "ignoring unknown input");
            }
        }

        let missing: Vec<String> = self
            .inputs()
            .filter(|f| f.is_required() && inputs.supplied(f.name()).is_none())
            .map(|f| f.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingInput {
                missing,
                provided: inputs.names(),
                expected: self.input_names(),
            });
        }

        let mut resolved = BTreeMap::new();
        for field in self.inputs() {
            let value = match inputs.supplied(field.name()) {
                Some(raw) => coerce_input(field, raw)?,
                None => field.default().cloned().unwrap_or(Value::Null),
            };
            resolved.insert(field.name().to_string(), value);
        }

        let lookup = |name: &str| -> Option<String> {
            MagicVariable::from_name(name)
                .map(|m| m.resolve(now))
                .or_else(|| resolved.get(name).map(display_value))
        };
        let with_available = |err: Error| match err {
            Error::Template { placeholder, .. } => Error::Template {
                placeholder,
                available: resolved.keys().cloned().collect(),
            },
            other => other,
        };

        let prompt = self.prompt.render_with(lookup).map_err(with_available)?;
        let instructions = match &self.instructions {
            Some(template) => Some(template.render_with(lookup).map_err(with_available)?),
            None => None,
        };

        Ok(RenderedPrompt {
            prompt,
            instructions,
            inputs: resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::FieldSpec;
    use crate::model::{compile_model, ModelKind};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use serde_json::json;

    fn inputs_model(specs: &[FieldSpec]) -> ModelDefinition {
        compile_model(ModelKind::Input, "AgentInput", None, specs).unwrap()
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_parse_segments_and_escapes() {
        let t = Template::parse("Hi {name}, {{literal}} {not valid} {} {x1}{name}");
        assert_eq!(t.placeholders(), vec!["name", "x1"]);
        let out = t
            .render_with(|n| Some(format!("<{}>", n)))
            .unwrap();
        assert_eq!(out, "Hi <name>, {literal} {not valid} {} <x1><name>");
    }

    #[test]
    fn test_json_braces_are_literal() {
        let t = Template::parse(r#"Reply like {"ok": true} for {text}"#);
        assert_eq!(t.placeholders(), vec!["text"]);
    }

    #[test]
    fn test_undeclared_placeholder_is_required_string() {
        let engine = TemplateEngine::new("Analyze: {text}", None, ModelDefinition::empty_input()).unwrap();
        assert_eq!(engine.required_inputs(), vec!["text"]);

        let err = engine.render_at(&Inputs::new(), noon()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingInput);
        match err {
            Error::MissingInput { missing, .. } => assert_eq!(missing, vec!["text"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_render_coerces_and_substitutes() {
        let model = inputs_model(&[
            FieldSpec::new("count").with_type("int"),
            FieldSpec::new("tags").with_type("list[str]"),
            FieldSpec::new("tone").with("default", "neutral"),
            FieldSpec::new("note").with("optional", true),
        ]);
        let engine = TemplateEngine::new(
            "{count} items {tags} in a {tone} tone.{note} Today is {CURRENT_DATE}.",
            Some("You are {name}. Time: {CURRENT_TIME}"),
            model,
        )
        .unwrap();
        assert_eq!(engine.required_inputs(), vec!["count", "tags", "name"]);

        let inputs = Inputs::new()
            .with("count", "3")
            .with("tags", "a,b")
            .with("name", "Ada");
        let rendered = engine.render_at(&inputs, noon()).unwrap();
        assert_eq!(
            rendered.prompt,
            r#"3 items ["a","b"] in a neutral tone. Today is 2024-03-09."#
        );
        assert_eq!(rendered.instructions.as_deref(), Some("You are Ada. Time: 12:05:07"));
        assert_eq!(rendered.inputs["count"], json!(3));
        assert_eq!(rendered.inputs["note"], Value::Null);
    }

    #[test]
    fn test_magic_values_cannot_be_overridden() {
        let engine = TemplateEngine::new("{CURRENT_DATETIME} {text}", None, ModelDefinition::empty_input()).unwrap();
        let inputs = Inputs::new()
            .with("text", "hello")
            .with("CURRENT_DATETIME", "yesterday")
            .with("unused", 1);
        let rendered = engine.render_at(&inputs, noon()).unwrap();
        assert_eq!(rendered.prompt, "2024-03-09 12:05:07 hello");
        assert!(!rendered.inputs.contains_key("unused"));
    }

    #[test]
    fn test_magic_name_input_is_a_definition_error() {
        let issues = TemplateEngine::new(
            "{CURRENT_DATE}",
            None,
            inputs_model(&[FieldSpec::new("CURRENT_DATE")]),
        )
        .unwrap_err();
        assert!(issues[0].message.contains("built-in variable"));
    }

    #[test]
    fn test_required_input_missing_from_template_is_a_definition_error() {
        let issues = TemplateEngine::new(
            "Hello {name}",
            None,
            inputs_model(&[FieldSpec::new("name"), FieldSpec::new("age").with_type("int")]),
        )
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location, "agent.input_type.age");
    }

    #[test]
    fn test_no_placeholders_is_a_definition_error() {
        let issues = TemplateEngine::new("Just text", None, ModelDefinition::empty_input()).unwrap_err();
        assert_eq!(issues[0].location, "template");
    }

    #[test]
    fn test_null_counts_as_missing() {
        let engine = TemplateEngine::new("{text}", None, ModelDefinition::empty_input()).unwrap();
        let err = engine
            .render_at(&Inputs::new().with("text", Value::Null), noon())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingInput);
    }

    #[test]
    fn test_bad_input_reports_field() {
        let engine = TemplateEngine::new(
            "{count}",
            None,
            inputs_model(&[FieldSpec::new("count").with_type("int")]),
        )
        .unwrap();
        let err = engine
            .render_at(&Inputs::new().with("count", "many"), noon())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputType);
        assert!(err.to_string().contains("'count'"));
    }

    proptest! {
        #[test]
        fn prop_render_is_deterministic(
            text in "[ -~]{0,40}",
            count in any::<i32>(),
            secs in 0u32..86_400,
        ) {
            let engine = TemplateEngine::new(
                "{text} / {count} @ {CURRENT_DATETIME}",
                None,
                inputs_model(&[FieldSpec::new("text"), FieldSpec::new("count").with_type("int")]),
            ).unwrap();
            let now = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
                + chrono::Duration::seconds(secs as i64);
            let inputs = Inputs::new().with("text", text.clone()).with("count", count);

            let first = engine.render_at(&inputs, now).unwrap();
            let second = engine.render_at(&inputs, now).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert!(first.prompt.starts_with(&text));
        }
    }
}
