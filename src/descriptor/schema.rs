//! Compiled form of the draft-07 JSON Schema that defines meta-package descriptors.
//!
//! Only the subset of draft-07 the descriptor format needs is understood: `type`,
//! `properties`, `required`, `items`, `additionalProperties`, `$ref` and root-level
//! `definitions`. Anything else is refused at compile time instead of being skipped, so a
//! custom schema can never validate less than it claims to.
//!
//! `$ref`s are resolved while compiling; compiled nodes point straight at each other by index.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use super::format::TomlScalar;
use super::InstancePath;

const BUILTIN_SCHEMA: &str = include_str!("../../static/meta_package_config_schema.json");

/// Keywords that carry no validation meaning.
const ANNOTATIONS: [&str; 7] = [
    "$schema",
    "$id",
    "$comment",
    "title",
    "description",
    "default",
    "examples",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unresolved schema reference `{reference}` at {location}")]
    UnresolvedReference { reference: String, location: String },

    #[error(
        "unsupported schema reference `{reference}` at {location}: only `#` and `#/definitions/<name>` are supported"
    )]
    UnsupportedReference { reference: String, location: String },

    #[error("unsupported schema keyword `{keyword}` at {location}")]
    UnsupportedKeyword { keyword: String, location: String },

    #[error("malformed schema at {location}: {message}")]
    Malformed { location: String, message: String },
}

/// Primitive JSON Schema types.
#[derive(Debug, Display, Clone, Copy, EnumString, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum JsonType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

impl JsonType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::Null => value.is_null(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Object => value.is_object() && TomlScalar::of(value).is_none(),
            JsonType::Array => value.is_array(),
            JsonType::Number => {
                value.is_number()
                    || matches!(TomlScalar::of(value), Some(TomlScalar::NonFinite(_)))
            }
            JsonType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            JsonType::String => value.is_string(),
        }
    }
}

pub(crate) type NodeId = usize;

/// What to do with object keys not named under `properties`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Additional {
    /// The schema says nothing; validation mode decides.
    #[default]
    Unspecified,
    Allowed,
    Denied,
    Schema(NodeId),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Node {
    pub(crate) types: Option<Vec<JsonType>>,
    pub(crate) properties: IndexMap<String, NodeId>,
    pub(crate) required: Vec<String>,
    pub(crate) items: Option<NodeId>,
    pub(crate) additional: Additional,
    /// Compiled from the `false` schema.
    pub(crate) never: bool,
}

#[derive(Debug, Clone)]
pub struct Schema {
    nodes: Vec<Node>,
    document: Value,
}

impl Schema {
    const ROOT: NodeId = 0;

    /// The schema shipped with mcm.
    pub fn builtin() -> Result<Schema, SchemaError> {
        let document: Value =
            serde_json::from_str(BUILTIN_SCHEMA).map_err(|err| SchemaError::Malformed {
                location: "#".to_owned(),
                message: err.to_string(),
            })?;
        Schema::compile(document)
    }

    pub fn compile(document: Value) -> Result<Schema, SchemaError> {
        let nodes = Compiler::run(&document)?;
        Ok(Schema { nodes, document })
    }

    /// The schema document this was compiled from.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub(crate) fn root(&self) -> &Node {
        &self.nodes[Self::ROOT]
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

/// A slot waiting to be filled.
enum Slot {
    Compiled(Node),
    /// The schema at this slot is itself a `$ref`.
    Alias(NodeId, String),
}

struct Compiler<'a> {
    slots: Vec<Slot>,
    definitions: HashMap<&'a str, NodeId>,
}

impl<'a> Compiler<'a> {
    fn run(document: &'a Value) -> Result<Vec<Node>, SchemaError> {
        let mut compiler = Compiler {
            slots: vec![Slot::Compiled(Node::default())],
            definitions: HashMap::new(),
        };

        let definitions = match document.get("definitions") {
            None => None,
            Some(Value::Object(definitions)) => Some(definitions),
            Some(_) => {
                return Err(malformed(
                    &InstancePath::root().key("definitions"),
                    "`definitions` must be an object",
                ))
            }
        };

        // Reserve a slot per definition first so references can point anywhere.
        let mut pending = Vec::new();
        if let Some(definitions) = definitions {
            for (name, schema) in definitions {
                let id = compiler.reserve();
                compiler.definitions.insert(name.as_str(), id);
                pending.push((id, schema, InstancePath::root().key("definitions").key(name)));
            }
        }

        compiler.fill(Schema::ROOT, document, &InstancePath::root(), true)?;
        for (id, schema, location) in pending {
            compiler.fill(id, schema, &location, false)?;
        }

        compiler.finish()
    }

    fn reserve(&mut self) -> NodeId {
        self.slots.push(Slot::Compiled(Node::default()));
        self.slots.len() - 1
    }

    /// Compiles a sub-schema, reusing the target node when it is a plain `$ref`.
    fn compile(&mut self, schema: &Value, location: &InstancePath) -> Result<NodeId, SchemaError> {
        if let Some(reference) = reference_of(schema, location)? {
            return self.resolve(reference, location);
        }
        let id = self.reserve();
        self.fill(id, schema, location, false)?;
        Ok(id)
    }

    fn fill(
        &mut self,
        id: NodeId,
        schema: &Value,
        location: &InstancePath,
        is_root: bool,
    ) -> Result<(), SchemaError> {
        if let Some(reference) = reference_of(schema, location)? {
            let target = self.resolve(reference, location)?;
            self.slots[id] = Slot::Alias(target, pointer(location));
            return Ok(());
        }

        let node = match schema {
            Value::Bool(true) => Node::default(),
            Value::Bool(false) => Node {
                never: true,
                ..Node::default()
            },
            Value::Object(keywords) => self.compile_object(keywords, location, is_root)?,
            _ => {
                return Err(malformed(
                    location,
                    "a schema must be an object or a boolean",
                ))
            }
        };
        self.slots[id] = Slot::Compiled(node);
        Ok(())
    }

    fn compile_object(
        &mut self,
        keywords: &Map<String, Value>,
        location: &InstancePath,
        is_root: bool,
    ) -> Result<Node, SchemaError> {
        let mut node = Node::default();

        for (keyword, value) in keywords {
            let here = location.key(keyword);
            match keyword.as_str() {
                "type" => node.types = Some(parse_types(value, &here)?),
                "properties" => {
                    let Value::Object(properties) = value else {
                        return Err(malformed(&here, "`properties` must be an object"));
                    };
                    for (name, schema) in properties {
                        let id = self.compile(schema, &here.key(name))?;
                        node.properties.insert(name.clone(), id);
                    }
                }
                "required" => {
                    let names = value.as_array().ok_or_else(|| {
                        malformed(&here, "`required` must be an array of strings")
                    })?;
                    for name in names {
                        let name = name.as_str().ok_or_else(|| {
                            malformed(&here, "`required` must be an array of strings")
                        })?;
                        node.required.push(name.to_owned());
                    }
                }
                "items" => match value {
                    Value::Array(_) => {
                        return Err(SchemaError::UnsupportedKeyword {
                            keyword: "items (tuple form)".to_owned(),
                            location: pointer(&here),
                        })
                    }
                    schema => node.items = Some(self.compile(schema, &here)?),
                },
                "additionalProperties" => {
                    node.additional = match value {
                        Value::Bool(true) => Additional::Allowed,
                        Value::Bool(false) => Additional::Denied,
                        schema => Additional::Schema(self.compile(schema, &here)?),
                    }
                }
                "definitions" if is_root => {}
                keyword if ANNOTATIONS.contains(&keyword) => {}
                keyword => {
                    return Err(SchemaError::UnsupportedKeyword {
                        keyword: keyword.to_owned(),
                        location: pointer(&here),
                    })
                }
            }
        }

        Ok(node)
    }

    fn resolve(&self, reference: &str, location: &InstancePath) -> Result<NodeId, SchemaError> {
        if reference == "#" {
            return Ok(Schema::ROOT);
        }

        let Some(name) = reference.strip_prefix("#/definitions/") else {
            return Err(SchemaError::UnsupportedReference {
                reference: reference.to_owned(),
                location: pointer(location),
            });
        };
        if name.contains('/') {
            return Err(SchemaError::UnsupportedReference {
                reference: reference.to_owned(),
                location: pointer(location),
            });
        }

        let name = name.replace("~1", "/").replace("~0", "~");
        self.definitions
            .get(name.as_str())
            .copied()
            .ok_or_else(|| SchemaError::UnresolvedReference {
                reference: reference.to_owned(),
                location: pointer(location),
            })
    }

    /// Replaces alias slots with copies of the nodes they point at.
    fn finish(self) -> Result<Vec<Node>, SchemaError> {
        let mut nodes = Vec::with_capacity(self.slots.len());
        for start in 0..self.slots.len() {
            let mut current = start;
            let mut hops = 0;
            let node = loop {
                match &self.slots[current] {
                    Slot::Compiled(node) => break node.clone(),
                    Slot::Alias(target, location) => {
                        hops += 1;
                        if hops > self.slots.len() {
                            return Err(SchemaError::Malformed {
                                location: location.clone(),
                                message: "`$ref` chain never reaches a schema".to_owned(),
                            });
                        }
                        current = *target;
                    }
                }
            };
            nodes.push(node);
        }
        Ok(nodes)
    }
}

fn reference_of<'v>(
    schema: &'v Value,
    location: &InstancePath,
) -> Result<Option<&'v str>, SchemaError> {
    match schema.get("$ref") {
        None => Ok(None),
        Some(Value::String(reference)) => Ok(Some(reference)),
        Some(_) => Err(malformed(&location.key("$ref"), "`$ref` must be a string")),
    }
}

fn parse_types(value: &Value, location: &InstancePath) -> Result<Vec<JsonType>, SchemaError> {
    let parse = |value: &Value| {
        value
            .as_str()
            .and_then(|name| name.parse::<JsonType>().ok())
            .ok_or_else(|| malformed(location, &format!("unknown type {value}")))
    };

    match value {
        Value::Array(names) => names.iter().map(parse).collect(),
        name => Ok(vec![parse(name)?]),
    }
}

fn pointer(location: &InstancePath) -> String {
    format!("#{}", location.to_json_pointer())
}

fn malformed(location: &InstancePath, message: &str) -> SchemaError {
    SchemaError::Malformed {
        location: pointer(location),
        message: message.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_builtin_schema_compiles() {
        let schema = Schema::builtin().unwrap();
        let root = schema.root();
        assert_eq!(root.types, Some(vec![JsonType::Object]));
        assert_eq!(
            root.properties.keys().collect::<Vec<_>>(),
            vec!["name", "uri", "description", "version", "packages"]
        );
    }

    #[test]
    fn test_builtin_references_resolve_to_definitions() {
        let schema = Schema::builtin().unwrap();
        let packages = schema.node(schema.root().properties["packages"]);
        let Additional::Schema(package) = packages.additional else {
            panic!("packages should validate extra keys as packages");
        };
        let package = schema.node(package);

        let dependencies = schema.node(package.properties["dependencies"]);
        let dependency = schema.node(dependencies.items.unwrap());
        assert_eq!(dependency.required, vec!["meta-package", "package-regex"]);

        let mechanisms = schema.node(package.properties["installation_mechanisms"]);
        let git = schema.node(mechanisms.properties["git"]);
        assert_eq!(git.required, vec!["uri"]);
    }

    #[test]
    fn test_unresolved_reference() {
        let err = Schema::compile(json!({
            "properties": { "a": { "$ref": "#/definitions/missing" } }
        }))
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnresolvedReference {
                reference: "#/definitions/missing".into(),
                location: "#/properties/a".into(),
            }
        );
    }

    #[test]
    fn test_external_reference_is_unsupported() {
        let err = Schema::compile(json!({
            "properties": { "a": { "$ref": "other.json#/definitions/a" } }
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedReference { .. }));
    }

    #[test]
    fn test_unknown_keyword_is_refused() {
        let err = Schema::compile(json!({ "properties": { "a": { "minLength": 1 } } })).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnsupportedKeyword {
                keyword: "minLength".into(),
                location: "#/properties/a/minLength".into(),
            }
        );
    }

    #[test]
    fn test_definition_aliases_follow_chain() {
        let schema = Schema::compile(json!({
            "definitions": {
                "a": { "$ref": "#/definitions/b" },
                "b": { "type": "string" }
            },
            "properties": { "x": { "$ref": "#/definitions/a" } }
        }))
        .unwrap();
        let x = schema.node(schema.root().properties["x"]);
        assert_eq!(x.types, Some(vec![JsonType::String]));
    }

    #[test]
    fn test_reference_cycle_is_malformed() {
        let err = Schema::compile(json!({
            "definitions": {
                "a": { "$ref": "#/definitions/b" },
                "b": { "$ref": "#/definitions/a" }
            }
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::Malformed { .. }));
    }

    #[test]
    fn test_recursive_root_reference() {
        let schema = Schema::compile(json!({
            "type": "object",
            "properties": { "child": { "$ref": "#" } }
        }))
        .unwrap();
        let child = schema.node(schema.root().properties["child"]);
        assert_eq!(child.types, Some(vec![JsonType::Object]));
    }

    #[test]
    fn test_integer_matching() {
        assert!(JsonType::Integer.matches(&json!(3)));
        assert!(JsonType::Integer.matches(&json!(3.0)));
        assert!(!JsonType::Integer.matches(&json!(3.5)));
        assert!(JsonType::Number.matches(&json!(3.5)));
    }

    #[test]
    fn test_toml_scalars_keep_their_type() {
        let doc = crate::descriptor::parse_document(
            "when = 2024-01-01\nsize = inf\n",
            crate::descriptor::Format::Toml,
        )
        .unwrap();
        assert!(!JsonType::Object.matches(&doc["when"]));
        assert!(!JsonType::String.matches(&doc["when"]));
        assert!(JsonType::Number.matches(&doc["size"]));
        assert!(!JsonType::Integer.matches(&doc["size"]));
        assert!(!JsonType::Object.matches(&doc["size"]));
    }
}
