//! Call-time inputs and their coercion toward declared field types.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{describe_value, Error};
use crate::field::{FieldDescriptor, FieldType, ScalarType};

/// Raw values supplied for one invocation, keyed by input name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A present, non-null value.
    pub(crate) fn supplied(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Inputs from a JSON object such as the contents of an `--inputs` file.
    pub fn from_json(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(Error::Usage(format!(
                "inputs must be a JSON object, got {}",
                describe_value(&other)
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Inputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Inputs {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

/// Resolve `@path` references, then coerce and check the value for `field`.
pub fn coerce_input(field: &FieldDescriptor, raw: &Value) -> Result<Value, Error> {
    let field_type = field.field_type();
    let loaded = load_file_reference(field.name(), raw, field_type)?;

    let value = coerce_value(field_type, &loaded)
        .ok_or_else(|| Error::input_type(field.name(), &loaded, field_type.to_string()))?;

    if let Some(violation) = field.check_constraints(&value).into_iter().next() {
        return Err(Error::InputType {
            field: field.name().to_string(),
            received: describe_value(&value),
            expected: format!("{} satisfying {} ({})", field_type, violation.constraint, violation.message),
        });
    }
    Ok(value)
}

/// `@path` becomes the file's text, `@@text` becomes the literal `@text`.
fn load_file_reference<'a>(
    name: &str,
    raw: &'a Value,
    field_type: FieldType,
) -> Result<Cow<'a, Value>, Error> {
    let Some(text) = raw.as_str() else {
        return Ok(Cow::Borrowed(raw));
    };
    if let Some(escaped) = text.strip_prefix("@@") {
        return Ok(Cow::Owned(Value::String(format!("@{}", escaped))));
    }
    let Some(path) = text.strip_prefix('@') else {
        return Ok(Cow::Borrowed(raw));
    };

    match fs::read_to_string(path) {
        Ok(contents) => {
            tracing::debug!(field = %name, path = %path, bytes = contents.len(), "loaded input from file");
            Ok(Cow::Owned(Value::String(contents)))
        }
        Err(e) => Err(Error::InputType {
            field: name.to_string(),
            received: format!("{:?} (cannot read file: {})", text, e),
            expected: field_type.to_string(),
        }),
    }
}

/// Coerce a raw value toward `field_type`. Values already of the right
/// type come back unchanged.
pub fn coerce_value(field_type: FieldType, value: &Value) -> Option<Value> {
    match field_type {
        FieldType::Scalar(scalar) => coerce_scalar(scalar, value),
        FieldType::List(element) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| coerce_scalar(element, item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Value::String(text) => split_list(text)?
                .iter()
                .map(|item| coerce_scalar(element, item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            _ => None,
        },
    }
}

fn coerce_scalar(scalar: ScalarType, value: &Value) -> Option<Value> {
    if let Some(typed) = scalar.conform(value) {
        return Some(typed);
    }
    match (scalar, value) {
        (ScalarType::Str, Value::Number(_) | Value::Bool(_)) => Some(Value::String(value.to_string())),
        (ScalarType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        (ScalarType::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ScalarType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

/// Split a string into list items: JSON array if it starts with `[`,
/// otherwise one item per line, or per comma for single-line text.
fn split_list(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        };
    }
    let delimiter = if trimmed.contains('\n') { '\n' } else { ',' };
    Some(
        trimmed
            .split(delimiter)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::{resolve_field, FieldRole, FieldSpec};
    use proptest::prelude::*;
    use serde_json::json;
    use std::io::Write;

    fn field(spec: FieldSpec) -> FieldDescriptor {
        resolve_field(&spec, FieldRole::Input).unwrap()
    }

    #[test]
    fn test_bool_coercion() {
        let f = field(FieldSpec::new("flag").with_type("bool"));
        for (raw, expected) in [("TRUE", true), ("yes", true), ("1", true), ("No", false), ("0", false)] {
            assert_eq!(coerce_input(&f, &json!(raw)).unwrap(), json!(expected));
        }
        let err = coerce_input(&f, &json!("maybe")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputType);
        assert!(err.to_string().contains("'flag'"));
        assert!(err.to_string().contains("bool"));
    }

    #[test]
    fn test_numeric_coercion() {
        let count = field(FieldSpec::new("count").with_type("int"));
        assert_eq!(coerce_input(&count, &json!(" 42 ")).unwrap(), json!(42));
        assert!(coerce_input(&count, &json!("4.5")).is_err());

        let ratio = field(FieldSpec::new("ratio").with_type("float"));
        assert_eq!(coerce_input(&ratio, &json!("0.25")).unwrap(), json!(0.25));
        assert_eq!(coerce_input(&ratio, &json!(2)).unwrap(), json!(2.0));
        assert!(coerce_input(&ratio, &json!("NaN")).is_err());
    }

    #[test]
    fn test_str_accepts_scalars() {
        let f = field(FieldSpec::new("text"));
        assert_eq!(coerce_input(&f, &json!(7)).unwrap(), json!("7"));
        assert!(coerce_input(&f, &json!(["a"])).is_err());
    }

    #[test]
    fn test_list_coercion() {
        let tags = field(FieldSpec::new("tags").with_type("list[str]"));
        assert_eq!(coerce_input(&tags, &json!("a, b,,c")).unwrap(), json!(["a", "b", "c"]));
        assert_eq!(
            coerce_input(&tags, &json!("one, two\nthree\n")).unwrap(),
            json!(["one, two", "three"])
        );

        let ids = field(FieldSpec::new("ids").with_type("list[int]"));
        assert_eq!(coerce_input(&ids, &json!("[1, 2, 3]")).unwrap(), json!([1, 2, 3]));
        assert_eq!(coerce_input(&ids, &json!(["4", 5])).unwrap(), json!([4, 5]));
        assert!(coerce_input(&ids, &json!("1, x")).is_err());
    }

    #[test]
    fn test_constraints_checked_after_coercion() {
        let f = field(FieldSpec::new("count").with_type("int").with("le", 5));
        let err = coerce_input(&f, &json!("9")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputType);
        assert!(err.to_string().contains("le=5"));
    }

    #[test]
    fn test_file_reference_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Hi there!").unwrap();
        let raw = json!(format!("@{}", file.path().display()));

        let f = field(FieldSpec::new("model_output"));
        assert_eq!(coerce_input(&f, &raw).unwrap(), json!("Hi there!"));
    }

    #[test]
    fn test_file_contents_are_coerced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha\nbeta").unwrap();
        let raw = json!(format!("@{}", file.path().display()));

        let f = field(FieldSpec::new("items").with_type("list[str]"));
        assert_eq!(coerce_input(&f, &raw).unwrap(), json!(["alpha", "beta"]));
    }

    #[test]
    fn test_missing_file_is_input_type_error() {
        let f = field(FieldSpec::new("doc"));
        let err = coerce_input(&f, &json!("@/definitely/not/here.txt")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputType);
        assert!(err.to_string().contains("cannot read file"));
    }

    #[test]
    fn test_double_at_is_literal() {
        let f = field(FieldSpec::new("handle"));
        assert_eq!(coerce_input(&f, &json!("@@someone")).unwrap(), json!("@someone"));
    }

    #[test]
    fn test_inputs_from_json() {
        let inputs = Inputs::from_json(json!({"a": 1, "b": "x"})).unwrap();
        assert_eq!(inputs.names(), vec!["a", "b"]);
        let err = Inputs::from_json(json!([1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    fn typed_value() -> impl Strategy<Value = (FieldType, Value)> {
        prop_oneof![
            any::<bool>().prop_map(|b| (FieldType::BOOL, json!(b))),
            "[a-zA-Z0-9 ]{0,12}".prop_map(|s| (FieldType::STR, json!(s))),
            any::<i64>().prop_map(|n| (FieldType::INT, json!(n))),
            (-1.0e9f64..1.0e9).prop_map(|f| (FieldType::FLOAT, json!(f))),
            prop::collection::vec(any::<i32>(), 0..5)
                .prop_map(|v| (FieldType::List(ScalarType::Int), json!(v))),
            prop::collection::vec("[a-z]{1,5}", 0..5)
                .prop_map(|v| (FieldType::List(ScalarType::Str), json!(v))),
        ]
    }

    proptest! {
        #[test]
        fn prop_coercion_is_idempotent_on_typed_values((field_type, value) in typed_value()) {
            let once = coerce_value(field_type, &value).unwrap();
            prop_assert_eq!(&once, &value);
            let twice = coerce_value(field_type, &once).unwrap();
            prop_assert_eq!(twice, once);
        }
    }
}
