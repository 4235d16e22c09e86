use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};
use tracing::{debug, trace};

use super::format::TomlScalar;
use super::schema::{Additional, Node, NodeId};
use super::{
    parse_document, DescriptorError, Format, InstancePath, MetaPackageDescriptor, Schema,
    Violation, ViolationKind,
};

/// How to treat fields the schema does not declare.
#[derive(
    Debug, Default, Display, Clone, Copy, EnumString, PartialEq, Eq, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Undeclared fields are ignored.
    #[default]
    Lenient,
    /// Undeclared fields are violations, including unknown installation mechanisms.
    Strict,
}

/// Checks documents against a compiled schema and turns valid ones into descriptors.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Schema,
    mode: Mode,
}

impl Validator {
    /// A validator for the built-in meta-package schema.
    pub fn new(mode: Mode) -> Result<Self, DescriptorError> {
        Ok(Self::with_schema(Schema::builtin()?, mode))
    }

    pub fn with_schema(schema: Schema, mode: Mode) -> Self {
        Self { schema, mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Collects every violation in `document`. An empty result means the document is valid.
    pub fn check(&self, document: &Value) -> Vec<Violation> {
        let mut walk = Walk {
            schema: &self.schema,
            mode: self.mode,
            violations: Vec::new(),
        };
        walk.visit(self.schema.root(), document, &InstancePath::root());
        walk.violations
    }

    pub fn validate(&self, document: &Value) -> Result<MetaPackageDescriptor, DescriptorError> {
        let violations = self.check(document);
        if !violations.is_empty() {
            debug!("document has {} violation(s)", violations.len());
            return Err(DescriptorError::Violations(violations));
        }

        serde_json::from_value(document.clone())
            .map_err(|err| DescriptorError::Incompatible(err.to_string()))
    }

    pub fn validate_str(
        &self,
        text: &str,
        format: Format,
    ) -> Result<MetaPackageDescriptor, DescriptorError> {
        let document = parse_document(text, format)?;
        self.validate(&document)
    }
}

struct Walk<'s> {
    schema: &'s Schema,
    mode: Mode,
    violations: Vec<Violation>,
}

impl Walk<'_> {
    fn visit_id(&mut self, id: NodeId, value: &Value, path: &InstancePath) {
        let schema = self.schema;
        self.visit(schema.node(id), value, path);
    }

    fn visit(&mut self, node: &Node, value: &Value, path: &InstancePath) {
        if node.never {
            self.push(path, ViolationKind::Forbidden {
                actual: value.clone(),
            });
            return;
        }

        if let Some(types) = &node.types {
            if !types.iter().any(|ty| ty.matches(value)) {
                self.push(path, ViolationKind::WrongType {
                    expected: types.clone(),
                    actual: value.clone(),
                });
                return;
            }
        }

        match value {
            Value::Object(fields) if TomlScalar::of(value).is_none() => {
                for field in &node.required {
                    if !fields.contains_key(field) {
                        self.push(path, ViolationKind::MissingField {
                            field: field.clone(),
                        });
                    }
                }

                for (key, child) in fields {
                    if let Some(&id) = node.properties.get(key) {
                        self.visit_id(id, child, &path.key(key));
                        continue;
                    }
                    match node.additional {
                        Additional::Schema(id) => self.visit_id(id, child, &path.key(key)),
                        Additional::Allowed => {}
                        Additional::Denied => self.unknown(path, key, child),
                        Additional::Unspecified => {
                            if self.mode == Mode::Strict && !node.properties.is_empty() {
                                self.unknown(path, key, child);
                            } else {
                                trace!("ignoring undeclared field {}", path.key(key));
                            }
                        }
                    }
                }
            }
            Value::Array(items) => {
                if let Some(id) = node.items {
                    for (index, item) in items.iter().enumerate() {
                        self.visit_id(id, item, &path.index(index));
                    }
                }
            }
            _ => {}
        }
    }

    fn unknown(&mut self, parent: &InstancePath, key: &str, value: &Value) {
        self.push(&parent.key(key), ViolationKind::UnknownField {
            field: key.to_owned(),
            actual: value.clone(),
        });
    }

    fn push(&mut self, path: &InstancePath, kind: ViolationKind) {
        self.violations.push(Violation {
            path: path.clone(),
            kind,
        });
    }
}
