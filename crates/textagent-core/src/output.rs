//! Validation of model output against the Output Model.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{describe_value, ConstraintViolation};
use crate::model::ModelDefinition;

/// A validated result. Field order follows the Output Model.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    fields: Map<String, Value>,
}

impl StructuredOutput {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The result as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.fields).unwrap_or_else(|_| self.to_json().to_string())
    }

    /// Convert into a caller-defined type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_json())
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

impl Serialize for StructuredOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Validate raw model output, collecting every violation.
pub fn validate_output(
    model: &ModelDefinition,
    data: &Value,
) -> Result<StructuredOutput, Vec<ConstraintViolation>> {
    let Some(object) = data.as_object() else {
        return Err(vec![ConstraintViolation {
            field: model.name().to_string(),
            value: data.clone(),
            constraint: "type=object".to_string(),
            message: format!("output must be a JSON object, got {}", describe_value(data)),
        }]);
    };

    let mut fields = Map::new();
    let mut violations = Vec::new();

    for field in model.fields() {
        match field.validate(object.get(field.name())) {
            Ok(value) => {
                fields.insert(field.name().to_string(), value);
            }
            Err(mut field_violations) => violations.append(&mut field_violations),
        }
    }

    for key in object.keys() {
        if model.field(key).is_none() {
            tracing::debug!(field = %key, "dropping unexpected output field");
        }
    }

    if violations.is_empty() {
        Ok(StructuredOutput { fields })
    } else {
        Err(violations)
    }
}

/// Corrective feedback describing why an attempt was rejected.
pub fn feedback_for(violations: &[ConstraintViolation]) -> String {
    let mut text = String::from("The previous response did not satisfy the output schema:\n");
    for violation in violations {
        text.push_str(&format!(
            "- field '{}': {} (value: {}, constraint: {})\n",
            violation.field, violation.message, violation.value, violation.constraint
        ));
    }
    text.push_str("Return a corrected JSON object that satisfies every constraint.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use crate::model::{compile_model, ModelKind};
    use serde::Deserialize;
    use serde_json::json;

    fn model() -> ModelDefinition {
        compile_model(
            ModelKind::Output,
            "AgentOutput",
            None,
            &[
                FieldSpec::new("is_safe"),
                FieldSpec::new("confidence")
                    .with_type("float")
                    .with("ge", 0.0)
                    .with("le", 1.0),
                FieldSpec::new("count").with_type("int"),
                FieldSpec::new("note").with_type("str").with("optional", true),
                FieldSpec::new("reasoning").with_type("str"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_valid_output() {
        let output = validate_output(
            &model(),
            &json!({
                "is_safe": true,
                "confidence": 1,
                "count": 2.0,
                "reasoning": "fine",
                "extra": "dropped",
            }),
        )
        .unwrap();
        assert_eq!(output.get_bool("is_safe"), Some(true));
        assert_eq!(output.get_f64("confidence"), Some(1.0));
        assert_eq!(output.get_i64("count"), Some(2));
        assert_eq!(output.get("note"), Some(&Value::Null));
        assert!(output.get("extra").is_none());

        let keys: Vec<&String> = output.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["reasoning", "is_safe", "confidence", "count", "note"]);
    }

    #[test]
    fn test_confidence_out_of_range() {
        let violations = validate_output(
            &model(),
            &json!({"is_safe": true, "confidence": 1.5, "count": 1, "reasoning": "x"}),
        )
        .unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "confidence");
        assert_eq!(violations[0].value, json!(1.5));
        assert_eq!(violations[0].constraint, "le=1.0");
    }

    #[test]
    fn test_all_violations_collected() {
        let violations = validate_output(&model(), &json!({"is_safe": "yes", "count": 1.5})).unwrap_err();
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["reasoning", "is_safe", "confidence", "count"]);
    }

    #[test]
    fn test_non_object_output() {
        let violations = validate_output(&model(), &json!("not json")).unwrap_err();
        assert_eq!(violations[0].constraint, "type=object");
    }

    #[test]
    fn test_deserialize_and_serialize() {
        #[derive(Deserialize)]
        struct Verdict {
            is_safe: bool,
            confidence: f64,
            note: Option<String>,
        }

        let output = validate_output(
            &model(),
            &json!({"is_safe": false, "confidence": 0.5, "count": 0, "reasoning": "r"}),
        )
        .unwrap();
        let verdict: Verdict = output.deserialize().unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.confidence, 0.5);
        assert!(verdict.note.is_none());

        let text = serde_json::to_string(&output).unwrap();
        assert!(text.starts_with(r#"{"reasoning":"r""#));
    }

    #[test]
    fn test_feedback_names_each_violation() {
        let violations = validate_output(
            &model(),
            &json!({"is_safe": true, "confidence": 1.5, "count": 1, "reasoning": "x"}),
        )
        .unwrap_err();
        let feedback = feedback_for(&violations);
        assert!(feedback.contains("field 'confidence'"));
        assert!(feedback.contains("le=1.0"));
    }
}
