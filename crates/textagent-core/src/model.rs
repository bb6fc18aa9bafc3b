//! Schema compilation: ordered field specifications into model definitions.

use std::collections::HashSet;

use crate::error::DefinitionIssue;
use crate::field::{resolve_field, FieldDescriptor, FieldRole, FieldSpec};

/// Name of the output field that is always placed first.
pub const REASONING_FIELD: &str = "reasoning";

/// Default name of the Output Model.
pub const DEFAULT_OUTPUT_NAME: &str = "AgentOutput";

/// Default name of the Input Model.
pub const DEFAULT_INPUT_NAME: &str = "AgentInput";

/// Which model a definition describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Input,
    Output,
}

impl ModelKind {
    fn role(self) -> FieldRole {
        match self {
            ModelKind::Input => FieldRole::Input,
            ModelKind::Output => FieldRole::Output,
        }
    }
}

/// An ordered, duplicate-free sequence of field descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    kind: ModelKind,
    name: String,
    description: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl ModelDefinition {
    /// An Input Model with no declared fields.
    pub fn empty_input() -> Self {
        Self {
            kind: ModelKind::Input,
            name: DEFAULT_INPUT_NAME.to_string(),
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Compile one model from ordered field specifications.
///
/// Every field is resolved even after a failure so that all issues are
/// reported together. Output models move `reasoning` to the front and must
/// not be empty.
pub fn compile_model(
    kind: ModelKind,
    name: impl Into<String>,
    description: Option<String>,
    specs: &[FieldSpec],
) -> Result<ModelDefinition, Vec<DefinitionIssue>> {
    let role = kind.role();
    let mut issues = Vec::new();
    let mut fields = Vec::with_capacity(specs.len());
    let mut seen = HashSet::new();

    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            issues.push(DefinitionIssue::new(
                role.location(&spec.name),
                format!("duplicate field name '{}'", spec.name),
            ));
            continue;
        }
        match resolve_field(spec, role) {
            Ok(descriptor) => fields.push(descriptor),
            Err(mut field_issues) => issues.append(&mut field_issues),
        }
    }

    if kind == ModelKind::Output && specs.is_empty() {
        issues.push(DefinitionIssue::new(
            role.section(),
            "output model must declare at least one field",
        ));
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    if kind == ModelKind::Output {
        reasoning_first(&mut fields);
    }

    Ok(ModelDefinition {
        kind,
        name: name.into(),
        description,
        fields,
    })
}

/// Compile the Input and Output models, aggregating issues from both.
pub fn compile_models(
    inputs: &[FieldSpec],
    outputs: &[FieldSpec],
    output_name: Option<String>,
    output_description: Option<String>,
) -> Result<(ModelDefinition, ModelDefinition), Vec<DefinitionIssue>> {
    let input = compile_model(ModelKind::Input, DEFAULT_INPUT_NAME, None, inputs);
    let output = compile_model(
        ModelKind::Output,
        output_name.unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string()),
        output_description,
        outputs,
    );
    match (input, output) {
        (Ok(input), Ok(output)) => Ok((input, output)),
        (input, output) => {
            let mut issues = input.err().unwrap_or_default();
            issues.extend(output.err().unwrap_or_default());
            Err(issues)
        }
    }
}

/// Stable move of the reasoning field to index 0.
fn reasoning_first(fields: &mut [FieldDescriptor]) {
    if let Some(index) = fields.iter().position(|f| f.name() == REASONING_FIELD) {
        fields[..=index].rotate_right(1);
    }
}
