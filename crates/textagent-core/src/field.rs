//! Constraint resolution for a single field.
//!
//! A [`FieldSpec`] is the loosely-typed form straight out of the agent file:
//! a type token and a bag of constraint keys. [`resolve_field`] checks every
//! key against the declared type and produces an immutable
//! [`FieldDescriptor`], or the full list of problems found.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::{describe_value, ConstraintViolation, DefinitionIssue};

lazy_static! {
    /// Field names double as template placeholders, so they must be identifiers.
    static ref FIELD_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Type of a scalar value or of a list element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Str,
    Int,
    Float,
}

impl ScalarType {
    fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "bool" | "boolean" => Some(ScalarType::Bool),
            "str" | "string" => Some(ScalarType::Str),
            "int" | "integer" => Some(ScalarType::Int),
            "float" | "number" => Some(ScalarType::Float),
            _ => None,
        }
    }

    /// Check a value against this type without any string parsing.
    ///
    /// Integers are widened to floats, and floats with no fractional part
    /// are accepted as integers.
    pub fn conform(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ScalarType::Bool, Value::Bool(_)) => Some(value.clone()),
            (ScalarType::Str, Value::String(_)) => Some(value.clone()),
            (ScalarType::Int, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        Some(Value::from(f as i64))
                    } else {
                        None
                    }
                }
            }
            (ScalarType::Float, Value::Number(n)) => {
                if n.is_f64() {
                    Some(value.clone())
                } else {
                    n.as_f64().and_then(Number::from_f64).map(Value::Number)
                }
            }
            _ => None,
        }
    }

    /// JSON Schema type name.
    pub fn json_type(self) -> &'static str {
        match self {
            ScalarType::Bool => "boolean",
            ScalarType::Str => "string",
            ScalarType::Int => "integer",
            ScalarType::Float => "number",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ScalarType::Bool => "bool",
            ScalarType::Str => "str",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
        };
        f.write_str(token)
    }
}

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    List(ScalarType),
}

impl FieldType {
    pub const BOOL: FieldType = FieldType::Scalar(ScalarType::Bool);
    pub const STR: FieldType = FieldType::Scalar(ScalarType::Str);
    pub const INT: FieldType = FieldType::Scalar(ScalarType::Int);
    pub const FLOAT: FieldType = FieldType::Scalar(ScalarType::Float);

    /// Parse a type token such as `int`, `list[str]` or `list[integer]`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Some(inner) = token
            .strip_prefix("list[")
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return ScalarType::parse(inner).map(FieldType::List);
        }
        ScalarType::parse(token).map(FieldType::Scalar)
    }

    /// Canonical type tokens, for error messages.
    pub fn supported() -> &'static [&'static str] {
        &[
            "bool",
            "str",
            "int",
            "float",
            "list[str]",
            "list[int]",
            "list[float]",
            "list[bool]",
        ]
    }

    pub fn is_string(self) -> bool {
        self == FieldType::STR
    }

    pub fn is_numeric(self) -> bool {
        self == FieldType::INT || self == FieldType::FLOAT
    }

    pub fn is_list(self) -> bool {
        matches!(self, FieldType::List(_))
    }

    /// The scalar type itself, or the element type of a list.
    pub fn element(self) -> ScalarType {
        match self {
            FieldType::Scalar(s) | FieldType::List(s) => s,
        }
    }

    /// Strict type check, see [`ScalarType::conform`].
    pub fn conform(self, value: &Value) -> Option<Value> {
        match self {
            FieldType::Scalar(s) => s.conform(value),
            FieldType::List(s) => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| s.conform(item))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array),
                _ => None,
            },
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(s) => write!(f, "{}", s),
            FieldType::List(s) => write!(f, "list[{}]", s),
        }
    }
}

/// A compiled regular-expression constraint.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// One validated constraint on a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Allowed literals; for list fields, allowed element literals.
    Enum(Vec<Value>),
    MinLength(usize),
    MaxLength(usize),
    Pattern(Pattern),
    Ge(Number),
    Le(Number),
    Gt(Number),
    Lt(Number),
    MinItems(usize),
    MaxItems(usize),
}

impl Constraint {
    /// The declaration key, e.g. `ge`.
    pub fn key(&self) -> &'static str {
        match self {
            Constraint::Enum(_) => "enum",
            Constraint::MinLength(_) => "min_length",
            Constraint::MaxLength(_) => "max_length",
            Constraint::Pattern(_) => "pattern",
            Constraint::Ge(_) => "ge",
            Constraint::Le(_) => "le",
            Constraint::Gt(_) => "gt",
            Constraint::Lt(_) => "lt",
            Constraint::MinItems(_) => "min_items",
            Constraint::MaxItems(_) => "max_items",
        }
    }

    /// Check an already-typed value. Returns a message when violated.
    pub fn check(&self, value: &Value) -> Option<String> {
        match self {
            Constraint::Enum(allowed) => {
                let items: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                items
                    .into_iter()
                    .find(|item| !allowed.iter().any(|a| values_equal(a, item)))
                    .map(|bad| {
                        format!("must be one of {}, got {}", Value::from(allowed.clone()), bad)
                    })
            }
            Constraint::MinLength(min) => {
                let len = value.as_str()?.chars().count();
                (len < *min).then(|| format!("below min_length of {} (got {} chars)", min, len))
            }
            Constraint::MaxLength(max) => {
                let len = value.as_str()?.chars().count();
                (len > *max).then(|| format!("exceeds max_length of {} (got {} chars)", max, len))
            }
            Constraint::Pattern(pattern) => {
                let text = value.as_str()?;
                (!pattern.is_match(text))
                    .then(|| format!("must match pattern '{}'", pattern.as_str()))
            }
            Constraint::Ge(bound) => {
                let v = value.as_f64()?;
                (v < bound.as_f64()?).then(|| format!("must be >= {}, got {}", bound, value))
            }
            Constraint::Le(bound) => {
                let v = value.as_f64()?;
                (v > bound.as_f64()?).then(|| format!("must be <= {}, got {}", bound, value))
            }
            Constraint::Gt(bound) => {
                let v = value.as_f64()?;
                (v <= bound.as_f64()?).then(|| format!("must be > {}, got {}", bound, value))
            }
            Constraint::Lt(bound) => {
                let v = value.as_f64()?;
                (v >= bound.as_f64()?).then(|| format!("must be < {}, got {}", bound, value))
            }
            Constraint::MinItems(min) => {
                let len = value.as_array()?.len();
                (len < *min).then(|| format!("below min_items of {} (got {} items)", min, len))
            }
            Constraint::MaxItems(max) => {
                let len = value.as_array()?.len();
                (len > *max).then(|| format!("exceeds max_items of {} (got {} items)", max, len))
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Enum(values) => write!(f, "enum={}", Value::from(values.clone())),
            Constraint::MinLength(n) => write!(f, "min_length={}", n),
            Constraint::MaxLength(n) => write!(f, "max_length={}", n),
            Constraint::Pattern(p) => write!(f, "pattern={:?}", p.as_str()),
            Constraint::Ge(n) => write!(f, "ge={}", n),
            Constraint::Le(n) => write!(f, "le={}", n),
            Constraint::Gt(n) => write!(f, "gt={}", n),
            Constraint::Lt(n) => write!(f, "lt={}", n),
            Constraint::MinItems(n) => write!(f, "min_items={}", n),
            Constraint::MaxItems(n) => write!(f, "max_items={}", n),
        }
    }
}

/// Numbers compare by value so that `1` matches `1.0` in enum lists.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Which side of the agent a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Input,
    Output,
}

impl FieldRole {
    /// Type used when a field omits `type`.
    pub fn default_type(self) -> FieldType {
        match self {
            FieldRole::Input => FieldType::STR,
            FieldRole::Output => FieldType::BOOL,
        }
    }

    /// The configuration section the field is declared in.
    pub fn section(self) -> &'static str {
        match self {
            FieldRole::Input => "agent.input_type",
            FieldRole::Output => "agent.output_type",
        }
    }

    pub fn location(self, name: &str) -> String {
        format!("{}.{}", self.section(), name)
    }
}

/// Raw declarative field specification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub type_token: Option<String>,
    pub description: Option<String>,
    /// Remaining keys (`optional`, `default`, `enum`, bounds, lengths, ...).
    pub constraints: Map<String, Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, token: impl Into<String>) -> Self {
        self.type_token = Some(token.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a constraint key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }
}

/// Compiled, immutable form of a [`FieldSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    field_type: FieldType,
    description: Option<String>,
    constraints: Vec<Constraint>,
    optional: bool,
    default: Option<Value>,
}

impl FieldDescriptor {
    /// Descriptor for a template placeholder with no declaration: a required string.
    pub fn inferred(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::STR,
            description: None,
            constraints: Vec::new(),
            optional: false,
            default: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Required means: absence is an error.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }

    /// Run every constraint against an already-typed value.
    pub fn check_constraints(&self, value: &Value) -> Vec<ConstraintViolation> {
        self.constraints
            .iter()
            .filter_map(|c| {
                c.check(value).map(|message| ConstraintViolation {
                    field: self.name.clone(),
                    value: value.clone(),
                    constraint: c.to_string(),
                    message,
                })
            })
            .collect()
    }

    /// Validate a value produced by a model (or any typed source).
    ///
    /// Absent values (`None` or `null`) resolve to the default, to `null`
    /// for optional fields, or fail as required. Present values are type
    /// checked strictly and then checked against every constraint.
    pub fn validate(&self, value: Option<&Value>) -> Result<Value, Vec<ConstraintViolation>> {
        let value = match value {
            None | Some(Value::Null) => {
                if let Some(default) = &self.default {
                    return Ok(default.clone());
                }
                if self.optional {
                    return Ok(Value::Null);
                }
                return Err(vec![ConstraintViolation {
                    field: self.name.clone(),
                    value: Value::Null,
                    constraint: "required".to_string(),
                    message: "is required but was missing".to_string(),
                }]);
            }
            Some(value) => value,
        };

        let typed = self.field_type.conform(value).ok_or_else(|| {
            vec![ConstraintViolation {
                field: self.name.clone(),
                value: value.clone(),
                constraint: format!("type={}", self.field_type),
                message: format!(
                    "must be of type {}, got {}",
                    self.field_type,
                    describe_value(value)
                ),
            }]
        })?;

        let violations = self.check_constraints(&typed);
        if violations.is_empty() {
            Ok(typed)
        } else {
            Err(violations)
        }
    }
}

/// Resolve a field specification into a descriptor.
///
/// All problems with the field are reported, not just the first.
pub fn resolve_field(
    spec: &FieldSpec,
    role: FieldRole,
) -> Result<FieldDescriptor, Vec<DefinitionIssue>> {
    let location = role.location(&spec.name);
    let mut issues = Vec::new();

    if !FIELD_NAME.is_match(&spec.name) {
        issues.push(DefinitionIssue::new(
            &location,
            format!("field name '{}' is not a valid identifier", spec.name),
        ));
    }

    let field_type = match spec.type_token.as_deref() {
        None => role.default_type(),
        Some(token) => match FieldType::parse(token) {
            Some(t) => t,
            None => {
                issues.push(DefinitionIssue::new(
                    &location,
                    format!(
                        "unsupported type '{}' (supported: {})",
                        token,
                        FieldType::supported().join(", ")
                    ),
                ));
                return Err(issues);
            }
        },
    };

    let mut optional = false;
    let mut default = None;
    let mut enum_values = None;
    let mut others = Vec::new();

    for (key, value) in &spec.constraints {
        match key.as_str() {
            "optional" => match value.as_bool() {
                Some(flag) => optional = flag,
                None => issues.push(DefinitionIssue::new(
                    &location,
                    format!("'optional' must be true or false, got {}", value),
                )),
            },
            "default" => default = Some(value),
            "enum" => enum_values = Some(value),
            "min_length" | "max_length" | "pattern" | "ge" | "le" | "gt" | "lt" | "min_items"
            | "max_items" => others.push((key.as_str(), value)),
            "type" | "description" => {}
            unknown => issues.push(DefinitionIssue::new(
                &location,
                format!("unknown constraint key '{}'", unknown),
            )),
        }
    }

    let mut constraints = Vec::new();
    if let Some(values) = enum_values {
        match resolve_enum(field_type, values) {
            Ok(c) => constraints.push(c),
            Err(message) => issues.push(DefinitionIssue::new(&location, message)),
        }
        if !others.is_empty() {
            let ignored: Vec<&str> = others.iter().map(|(k, _)| *k).collect();
            tracing::debug!(field = %spec.name, ?ignored, "enum present, ignoring other constraints");
        }
    } else {
        for (key, value) in others {
            match resolve_constraint(field_type, key, value) {
                Ok(c) => constraints.push(c),
                Err(message) => issues.push(DefinitionIssue::new(&location, message)),
            }
        }
        for message in contradictions(&constraints) {
            issues.push(DefinitionIssue::new(&location, message));
        }
    }

    let mut descriptor = FieldDescriptor {
        name: spec.name.clone(),
        field_type,
        description: spec.description.clone(),
        constraints,
        optional,
        default: None,
    };

    if let Some(value) = default {
        match field_type.conform(value) {
            None => issues.push(DefinitionIssue::new(
                &location,
                format!("default {} is not a valid {}", value, field_type),
            )),
            Some(typed) => {
                let violations = descriptor.check_constraints(&typed);
                if violations.is_empty() {
                    descriptor.default = Some(typed);
                } else {
                    for v in violations {
                        issues.push(DefinitionIssue::new(
                            &location,
                            format!("default {}: {} ({})", value, v.message, v.constraint),
                        ));
                    }
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(descriptor)
    } else {
        Err(issues)
    }
}

fn resolve_enum(field_type: FieldType, values: &Value) -> Result<Constraint, String> {
    let items = match values {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(format!("'enum' must be a non-empty list, got {}", values)),
    };
    let element = field_type.element();
    let mut allowed = Vec::with_capacity(items.len());
    for item in items {
        match element.conform(item) {
            Some(v) => allowed.push(v),
            None => {
                return Err(format!(
                    "enum value {} does not match type {}",
                    item, element
                ))
            }
        }
    }
    Ok(Constraint::Enum(allowed))
}

fn resolve_constraint(field_type: FieldType, key: &str, value: &Value) -> Result<Constraint, String> {
    let not_applicable = |kind: &str| {
        format!(
            "'{}' only applies to {} fields, not {}",
            key, kind, field_type
        )
    };
    let count = || {
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| format!("'{}' must be a non-negative integer, got {}", key, value))
    };
    let bound = || match value {
        Value::Number(n) => Ok(n.clone()),
        _ => Err(format!("'{}' must be a number, got {}", key, value)),
    };

    match key {
        "min_length" | "max_length" | "pattern" if !field_type.is_string() => {
            Err(not_applicable("string"))
        }
        "ge" | "le" | "gt" | "lt" if !field_type.is_numeric() => Err(not_applicable("int or float")),
        "min_items" | "max_items" if !field_type.is_list() => Err(not_applicable("list")),
        "min_length" => count().map(Constraint::MinLength),
        "max_length" => count().map(Constraint::MaxLength),
        "min_items" => count().map(Constraint::MinItems),
        "max_items" => count().map(Constraint::MaxItems),
        "ge" => bound().map(Constraint::Ge),
        "le" => bound().map(Constraint::Le),
        "gt" => bound().map(Constraint::Gt),
        "lt" => bound().map(Constraint::Lt),
        "pattern" => {
            let source = value
                .as_str()
                .ok_or_else(|| format!("'pattern' must be a string, got {}", value))?;
            let regex =
                Regex::new(source).map_err(|e| format!("invalid pattern {:?}: {}", source, e))?;
            Ok(Constraint::Pattern(Pattern {
                source: source.to_string(),
                regex,
            }))
        }
        other => Err(format!("unknown constraint key '{}'", other)),
    }
}

/// Bounds or sizes that no value could ever satisfy.
fn contradictions(constraints: &[Constraint]) -> Vec<String> {
    let mut messages = Vec::new();
    let find = |key: &str| constraints.iter().find(|c| c.key() == key);
    let number = |key: &str| match find(key) {
        Some(Constraint::Ge(n) | Constraint::Le(n) | Constraint::Gt(n) | Constraint::Lt(n)) => {
            n.as_f64()
        }
        _ => None,
    };
    let size = |key: &str| match find(key) {
        Some(
            Constraint::MinLength(n)
            | Constraint::MaxLength(n)
            | Constraint::MinItems(n)
            | Constraint::MaxItems(n),
        ) => Some(*n),
        _ => None,
    };

    let (ge, le, gt, lt) = (number("ge"), number("le"), number("gt"), number("lt"));
    if let (Some(ge), Some(le)) = (ge, le) {
        if ge > le {
            messages.push(format!("contradictory bounds: ge={} exceeds le={}", ge, le));
        }
    }
    for (lower_key, lower, upper_key, upper) in [("gt", gt, "lt", lt), ("ge", ge, "lt", lt), ("gt", gt, "le", le)] {
        if let (Some(lower), Some(upper)) = (lower, upper) {
            if lower >= upper {
                messages.push(format!(
                    "contradictory bounds: {}={} and {}={} leave no valid value",
                    lower_key, lower, upper_key, upper
                ));
            }
        }
    }
    for (min_key, max_key) in [("min_length", "max_length"), ("min_items", "max_items")] {
        if let (Some(min), Some(max)) = (size(min_key), size(max_key)) {
            if min > max {
                messages.push(format!("{}={} exceeds {}={}", min_key, min, max_key, max));
            }
        }
    }
    messages
}
