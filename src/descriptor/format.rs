use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use strum_macros::{Display, EnumIter, EnumString};

use super::DescriptorError;

const DATETIME_KEY: &str = "$__mcm_datetime";
const NON_FINITE_KEY: &str = "$__mcm_non_finite";

/// Serialization a descriptor document can be written in.
#[derive(
    Debug,
    Default,
    Display,
    Clone,
    Copy,
    EnumIter,
    EnumString,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Toml,
    Json,
    Json5,
}

impl Format {
    /// Picks the format from a file extension. Meta-packages are stored as TOML, so anything
    /// unrecognised is read as TOML.
    pub fn from_path(path: &Path) -> Format {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Format::Json,
            Some("json5") => Format::Json5,
            _ => Format::Toml,
        }
    }
}

/// Parses `text` into an untyped document tree.
pub fn parse_document(text: &str, format: Format) -> Result<Value, DescriptorError> {
    let parsed = match format {
        Format::Toml => toml::from_str::<toml::Table>(text)
            .map(|table| toml_to_json(toml::Value::Table(table)))
            .map_err(|err| err.to_string()),
        Format::Json => serde_json::from_str::<Value>(text).map_err(|err| err.to_string()),
        Format::Json5 => json5::from_str::<Value>(text).map_err(|err| err.to_string()),
    };

    parsed.map_err(|message| DescriptorError::Parse {
        format,
        message: message.trim_end().to_owned(),
    })
}

/// A TOML scalar with no JSON counterpart. These are carried through the document tree as
/// single-field tagged objects and reported under their TOML type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TomlScalar<'a> {
    Datetime(&'a str),
    /// `nan`, `inf` or `-inf`.
    NonFinite(&'a str),
}

impl<'a> TomlScalar<'a> {
    pub(crate) fn of(value: &'a Value) -> Option<Self> {
        let Value::Object(fields) = value else {
            return None;
        };
        if fields.len() != 1 {
            return None;
        }
        let (key, text) = fields.iter().next()?;
        match (key.as_str(), text.as_str()?) {
            (DATETIME_KEY, text) => Some(TomlScalar::Datetime(text)),
            (NON_FINITE_KEY, text) => Some(TomlScalar::NonFinite(text)),
            _ => None,
        }
    }
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => match Number::from_f64(f) {
            Some(n) => Value::Number(n),
            None => tagged(NON_FINITE_KEY, non_finite_text(f)),
        },
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(datetime) => tagged(DATETIME_KEY, datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}

fn non_finite_text(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_sign_negative() {
        "-inf".to_owned()
    } else {
        "inf".to_owned()
    }
}

fn tagged(key: &str, text: String) -> Value {
    let mut fields = Map::new();
    fields.insert(key.to_owned(), Value::String(text));
    Value::Object(fields)
}
