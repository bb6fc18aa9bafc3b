//! JSON Schema export for model definitions.
//!
//! The Output Model schema is what the structured-output adapter shows to
//! the model, and it is compiled once with `jsonschema` while the agent
//! definition is built so that a malformed schema is caught at load time.

use serde_json::{json, Map, Value};

use crate::field::{Constraint, FieldDescriptor, FieldType};
use crate::model::ModelDefinition;

const DRAFT: &str = "https://json-schema.org/draft/2020-12/schema";

impl ModelDefinition {
    /// Render this model as a JSON Schema object.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in self.fields() {
            properties.insert(field.name().to_string(), field_schema(field));
            if field.is_required() {
                required.push(Value::from(field.name()));
            }
        }

        let mut schema = Map::new();
        schema.insert("$schema".into(), json!(DRAFT));
        schema.insert("title".into(), json!(self.name()));
        if let Some(description) = self.description() {
            schema.insert("description".into(), json!(description));
        }
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), Value::Array(required));
        schema.insert("additionalProperties".into(), json!(false));
        Value::Object(schema)
    }

    /// Compile the exported schema, returning the compiler's message on failure.
    pub fn compile_json_schema(&self) -> Result<jsonschema::Validator, String> {
        jsonschema::options()
            .build(&self.json_schema())
            .map_err(|e| format!("failed to compile JSON Schema: {}", e))
    }
}

fn field_schema(field: &FieldDescriptor) -> Value {
    let mut schema = Map::new();
    let field_type = field.field_type();

    match field_type {
        FieldType::Scalar(scalar) => {
            let type_name = scalar.json_type();
            if field.is_optional() {
                schema.insert("type".into(), json!([type_name, "null"]));
            } else {
                schema.insert("type".into(), json!(type_name));
            }
        }
        FieldType::List(element) => {
            if field.is_optional() {
                schema.insert("type".into(), json!(["array", "null"]));
            } else {
                schema.insert("type".into(), json!("array"));
            }
            schema.insert("items".into(), json!({ "type": element.json_type() }));
        }
    }

    if let Some(description) = field.description() {
        schema.insert("description".into(), json!(description));
    }

    for constraint in field.constraints() {
        match constraint {
            Constraint::Enum(values) => {
                let mut allowed = values.clone();
                if field_type.is_list() {
                    if let Some(Value::Object(items)) = schema.get_mut("items") {
                        items.insert("enum".into(), Value::Array(allowed));
                    }
                } else {
                    if field.is_optional() {
                        allowed.push(Value::Null);
                    }
                    schema.insert("enum".into(), Value::Array(allowed));
                }
            }
            Constraint::MinLength(n) => {
                schema.insert("minLength".into(), json!(n));
            }
            Constraint::MaxLength(n) => {
                schema.insert("maxLength".into(), json!(n));
            }
            Constraint::Pattern(p) => {
                schema.insert("pattern".into(), json!(p.as_str()));
            }
            Constraint::Ge(n) => {
                schema.insert("minimum".into(), Value::Number(n.clone()));
            }
            Constraint::Le(n) => {
                schema.insert("maximum".into(), Value::Number(n.clone()));
            }
            Constraint::Gt(n) => {
                schema.insert("exclusiveMinimum".into(), Value::Number(n.clone()));
            }
            Constraint::Lt(n) => {
                schema.insert("exclusiveMaximum".into(), Value::Number(n.clone()));
            }
            Constraint::MinItems(n) => {
                schema.insert("minItems".into(), json!(n));
            }
            Constraint::MaxItems(n) => {
                schema.insert("maxItems".into(), json!(n));
            }
        }
    }

    if let Some(default) = field.default() {
        schema.insert("default".into(), default.clone());
    }

    Value::Object(schema)
}
