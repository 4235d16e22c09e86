use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::format::TomlScalar;
use super::{Format, InstancePath, JsonType, SchemaError};

const MAX_SHOWN_STRING: usize = 40;

#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The input is not valid in its source serialization.
    #[error("invalid {format} document: {message}")]
    Parse { format: Format, message: String },

    /// The schema driving validation is unusable.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The input parsed but broke one or more schema constraints.
    #[error("found {} schema violation(s)", .0.len())]
    Violations(Vec<Violation>),

    /// The input satisfied a custom schema but cannot be read as a meta-package.
    #[error("document satisfies the schema but is not a meta-package descriptor: {0}")]
    Incompatible(String),

    #[error("failed to serialize descriptor: {0}")]
    Serialize(String),
}

impl DescriptorError {
    pub fn violations(&self) -> &[Violation] {
        match self {
            DescriptorError::Violations(violations) => violations,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViolationKind {
    WrongType {
        expected: Vec<JsonType>,
        actual: Value,
    },
    MissingField {
        field: String,
    },
    UnknownField {
        field: String,
        actual: Value,
    },
    Forbidden {
        actual: Value,
    },
}

/// A single broken constraint, located by the path of the offending node.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub path: InstancePath,
    pub kind: ViolationKind,
}

impl Violation {
    pub fn expected(&self) -> String {
        match &self.kind {
            ViolationKind::WrongType { expected, .. } => expected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" or "),
            ViolationKind::MissingField { field } => format!("required field `{field}`"),
            ViolationKind::UnknownField { .. } => "no such field".to_owned(),
            ViolationKind::Forbidden { .. } => "no value".to_owned(),
        }
    }

    pub fn actual(&self) -> String {
        match &self.kind {
            ViolationKind::WrongType { actual, .. }
            | ViolationKind::UnknownField { actual, .. }
            | ViolationKind::Forbidden { actual } => describe_value(actual),
            ViolationKind::MissingField { .. } => "nothing".to_owned(),
        }
    }

    /// Names the field a missing/unknown field violation is about.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            ViolationKind::MissingField { field } | ViolationKind::UnknownField { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }

    pub fn report(&self) -> ViolationReport {
        ViolationReport {
            path: self.path.to_string(),
            pointer: self.path.to_json_pointer(),
            kind: match self.kind {
                ViolationKind::WrongType { .. } => "wrong_type",
                ViolationKind::MissingField { .. } => "missing_field",
                ViolationKind::UnknownField { .. } => "unknown_field",
                ViolationKind::Forbidden { .. } => "forbidden",
            },
            field: self.field().map(str::to_owned),
            expected: self.expected(),
            actual: self.actual(),
            message: self.to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::WrongType { .. } => write!(
                f,
                "{}: expected {}, found {}",
                self.path,
                self.expected(),
                self.actual()
            ),
            ViolationKind::MissingField { field } => {
                write!(f, "{}: missing required field `{field}`", self.path)
            }
            ViolationKind::UnknownField { .. } => {
                write!(f, "{}: unrecognized field, found {}", self.path, self.actual())
            }
            ViolationKind::Forbidden { .. } => {
                write!(f, "{}: no value allowed here, found {}", self.path, self.actual())
            }
        }
    }
}

/// Flat, serializable form of a [`Violation`] for machine-readable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationReport {
    pub path: String,
    pub pointer: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub expected: String,
    pub actual: String,
    pub message: String,
}

fn describe_value(value: &Value) -> String {
    match TomlScalar::of(value) {
        Some(TomlScalar::Datetime(text)) => return format!("datetime {text}"),
        Some(TomlScalar::NonFinite(text)) => return format!("number {text}"),
        None => {}
    }
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) if s.chars().count() > MAX_SHOWN_STRING => {
            let shown: String = s.chars().take(MAX_SHOWN_STRING).collect();
            format!("string \"{shown}…\"")
        }
        Value::String(s) => format!("string {s:?}"),
        Value::Array(items) => format!("array of {} item(s)", items.len()),
        Value::Object(map) => format!("object with {} field(s)", map.len()),
    }
}
