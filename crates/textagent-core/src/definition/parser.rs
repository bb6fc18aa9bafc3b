//! Agent document parsing: front-matter splitting and the untyped config pass.

use serde_json::{Map, Number, Value};

use crate::error::{DefinitionIssue, Error};
use crate::field::FieldSpec;

const DELIMITER: &str = "---";

/// Keys of `[agent.output_type]` that describe the model rather than a field.
const OUTPUT_METADATA_KEYS: [&str; 2] = ["name", "description"];

const AGENT_KEYS: [&str; 7] = [
    "model",
    "name",
    "retries",
    "instructions",
    "settings",
    "input_type",
    "output_type",
];

/// Split a document into its TOML front-matter and template body.
///
/// Without an opening `---` line, or without a closing one, the whole text
/// is the body and the configuration is empty.
pub fn split_document(text: &str) -> (&str, &str) {
    let mut lines = text.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim() == DELIMITER => {}
        _ => return ("", text),
    }

    let config_start = text.len() - lines.clone().map(str::len).sum::<usize>();
    let mut offset = config_start;
    for line in lines {
        if line.trim() == DELIMITER {
            return (&text[config_start..offset], &text[offset + line.len()..]);
        }
        offset += line.len();
    }
    ("", text)
}

/// Parse the front-matter into an untyped TOML table.
pub fn parse_config(config: &str) -> Result<toml::Table, Error> {
    config
        .parse::<toml::Table>()
        .map_err(|e| Error::definition("front-matter", format!("invalid TOML: {}", e)))
}

/// The `[agent]` section, read but not yet compiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    pub name: Option<String>,
    pub retries: u32,
    pub instructions: Option<String>,
    pub settings: Map<String, Value>,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
    pub output_name: Option<String>,
    pub output_description: Option<String>,
}

impl AgentConfig {
    /// Read the `[agent]` table, reporting every structural problem.
    pub fn from_table(table: &toml::Table) -> Result<Self, Vec<DefinitionIssue>> {
        let (config, issues) = Self::read(table);
        if issues.is_empty() {
            Ok(config)
        } else {
            Err(issues)
        }
    }

    /// Read as much of `[agent]` as possible.
    ///
    /// The config is partial when issues are returned: entries that failed
    /// are left out and everything else is kept for further checking.
    pub fn read(table: &toml::Table) -> (Self, Vec<DefinitionIssue>) {
        let mut issues = Vec::new();
        let mut config = AgentConfig::default();

        let agent = match table.get("agent") {
            Some(toml::Value::Table(agent)) => agent,
            Some(_) => {
                issues.push(DefinitionIssue::new("agent", "[agent] must be a table"));
                return (config, issues);
            }
            None => {
                issues.push(DefinitionIssue::new("agent", "missing [agent] section"));
                return (config, issues);
            }
        };

        for key in table.keys().filter(|k| k.as_str() != "agent") {
            tracing::warn!(key = %key, "ignoring unknown top-level key");
        }
        for key in agent.keys().filter(|k| !AGENT_KEYS.contains(&k.as_str())) {
            tracing::warn!(key = %key, "ignoring unknown key in [agent]");
        }

        match agent.get("model") {
            Some(toml::Value::String(model)) if !model.trim().is_empty() => {
                config.model = model.clone()
            }
            Some(other) => issues.push(DefinitionIssue::new(
                "agent.model",
                format!("expected a non-empty string, got {}", other),
            )),
            None => issues.push(DefinitionIssue::new(
                "agent",
                "missing field 'model' (e.g. model = \"openai:gpt-4o\")",
            )),
        }

        config.name = optional_string(agent, "name", "agent.name", &mut issues);
        config.instructions =
            optional_string(agent, "instructions", "agent.instructions", &mut issues);

        match agent.get("retries") {
            None => {}
            Some(toml::Value::Integer(n)) => match u32::try_from(*n) {
                Ok(n) => config.retries = n,
                Err(_) => issues.push(DefinitionIssue::new(
                    "agent.retries",
                    format!("must be a non-negative integer, got {}", n),
                )),
            },
            Some(other) => issues.push(DefinitionIssue::new(
                "agent.retries",
                format!("must be a non-negative integer, got {}", other),
            )),
        }

        match agent.get("settings") {
            None => {}
            Some(toml::Value::Table(settings)) => config.settings = table_to_json(settings),
            Some(other) => issues.push(DefinitionIssue::new(
                "agent.settings",
                format!("must be a table, got {}", other),
            )),
        }

        if let Some(section) = section(agent, "input_type", &mut issues) {
            for (name, value) in section {
                let location = format!("agent.input_type.{}", name);
                match value {
                    toml::Value::String(token) => {
                        config.inputs.push(FieldSpec::new(name).with_type(token))
                    }
                    toml::Value::Table(spec) => match field_spec(name, spec, &location) {
                        Ok(spec) => config.inputs.push(spec),
                        Err(issue) => issues.push(issue),
                    },
                    other => issues.push(DefinitionIssue::new(
                        location,
                        format!("expected a table or a type name, got {}", other.type_str()),
                    )),
                }
            }
        }

        if let Some(section) = section(agent, "output_type", &mut issues) {
            for (name, value) in section {
                let location = format!("agent.output_type.{}", name);
                match (name.as_str(), value) {
                    (key, toml::Value::String(text)) if OUTPUT_METADATA_KEYS.contains(&key) => {
                        if key == "name" {
                            config.output_name = Some(text.clone());
                        } else {
                            config.output_description = Some(text.clone());
                        }
                    }
                    (_, toml::Value::Table(spec)) => match field_spec(name, spec, &location) {
                        Ok(spec) => config.outputs.push(spec),
                        Err(issue) => issues.push(issue),
                    },
                    (_, other) => issues.push(DefinitionIssue::new(
                        location,
                        format!("expected a field table, got {}", other.type_str()),
                    )),
                }
            }
        }

        (config, issues)
    }
}

fn optional_string(
    table: &toml::Table,
    key: &str,
    location: &str,
    issues: &mut Vec<DefinitionIssue>,
) -> Option<String> {
    match table.get(key) {
        None => None,
        Some(toml::Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(DefinitionIssue::new(
                location,
                format!("expected a string, got {}", other.type_str()),
            ));
            None
        }
    }
}

fn section<'a>(
    agent: &'a toml::Table,
    key: &str,
    issues: &mut Vec<DefinitionIssue>,
) -> Option<&'a toml::Table> {
    match agent.get(key) {
        None => None,
        Some(toml::Value::Table(t)) => Some(t),
        Some(other) => {
            issues.push(DefinitionIssue::new(
                format!("agent.{}", key),
                format!("must be a table, got {}", other.type_str()),
            ));
            None
        }
    }
}

fn field_spec(name: &str, table: &toml::Table, location: &str) -> Result<FieldSpec, DefinitionIssue> {
    let mut spec = FieldSpec::new(name);
    for (key, value) in table {
        match (key.as_str(), value) {
            ("type", toml::Value::String(token)) => spec.type_token = Some(token.clone()),
            ("description", toml::Value::String(text)) => spec.description = Some(text.clone()),
            ("type" | "description", other) => {
                return Err(DefinitionIssue::new(
                    location,
                    format!("'{}' must be a string, got {}", key, other.type_str()),
                ))
            }
            (_, value) => {
                spec.constraints.insert(key.clone(), toml_to_json(value));
            }
        }
    }
    Ok(spec)
}

/// Convert a TOML value into JSON. Datetimes become strings.
pub fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(n) => Value::from(*n),
        toml::Value::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(table_to_json(table)),
    }
}

fn table_to_json(table: &toml::Table) -> Map<String, Value> {
    table
        .iter()
        .map(|(k, v)| (k.clone(), toml_to_json(v)))
        .collect()
}
