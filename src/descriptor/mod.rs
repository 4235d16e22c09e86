//! Meta-package descriptors: parsing, schema validation and the typed model.

mod error;
mod format;
mod model;
mod path;
mod schema;
mod validator;

pub use error::{DescriptorError, Violation, ViolationKind, ViolationReport};
pub use format::{parse_document, Format};
pub use model::MetaPackageDescriptor;
pub use path::InstancePath;
pub use schema::{JsonType, Schema, SchemaError};
pub use validator::{Mode, Validator};
