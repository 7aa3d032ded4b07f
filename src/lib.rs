//! API Schema synthesis
//!
//! Compiles a resolved data-model graph (entities, properties, references and
//! merge directives) into the artifacts an API runtime serves from: JSON
//! Schemas, JSON path maps, OpenAPI documents, and equality and array
//! uniqueness constraints, keyed per resource.
//!
//! # Example
//!
//! ```
//! use api_schema::{build_api_schemas, load_model_str, BuildOptions};
//!
//! let input = load_model_str(r#"{
//!     "projects": [{
//!         "namespaceName": "EdFi",
//!         "projectName": "Ed-Fi",
//!         "projectVersion": "5.0.0",
//!         "entities": [{
//!             "kind": "domainEntity",
//!             "name": "School",
//!             "properties": [
//!                 { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
//!             ]
//!         }]
//!     }]
//! }"#).unwrap();
//!
//! let schemas = build_api_schemas(&input, &BuildOptions::default()).unwrap();
//! let school = schemas[0].project_schema.resource("schools").unwrap();
//!
//! assert_eq!(school.identity_json_paths[0].as_str(), "$.schoolId");
//! assert_eq!(school.json_schema_for_insert["required"][0], "schoolId");
//! ```
//!
//! # Passes
//!
//! | Pass | Produces |
//! |------|----------|
//! | model | entity arena in dependency order |
//! | reference components | identity trees of references |
//! | identity flattening | leaf identity properties, merge coverage |
//! | API mapping, collection | document names, inlined properties |
//! | JSON paths | every JSON path of every property path |
//! | derived paths | document paths, identity and query field maps |
//! | JSON Schema, OpenAPI | insert/update/query schemas, components |
//! | constraints | equality and array uniqueness constraints |
//! | assembly | one `ApiSchema` per project |
//!
//! Each pass reads only what earlier passes wrote. Violated invariants abort
//! the run with an [`InvariantError`].

mod annotation;
mod assembly;
mod collect;
mod constraints;
mod document_paths;
mod error;
mod flatten;
mod json_path;
mod json_paths;
mod json_schema;
mod loader;
mod model;
mod naming;
mod openapi;
mod openapi_document;
mod pipeline;
mod reference_component;
mod types;
mod validator;

pub use assembly::{
    AbstractResource, ApiSchema, ProjectSchema, ResourceExtensionSchema, ResourceSchema, ResourceSchemaEntry,
    Superclass,
};
pub use constraints::{ArrayUniquenessConstraint, EqualityConstraint};
pub use document_paths::{DocumentPaths, DocumentPathsMapping, QueryFieldMapping, QueryFieldPathInfo};
pub use error::{BuildError, InvariantError, LoadError, ModelError, SchemaError, ValidateError};
pub use json_path::{JsonPath, JsonPathError, PropertyPath};
pub use loader::{load_json, load_model, load_model_str};
pub use model::{EntityKind, Model, ModelInput};
pub use naming::{pluralize, singularize, uncapitalize};
pub use openapi_document::ExtensionFragments;
pub use pipeline::build_api_schemas;
pub use types::{BuildOptions, PathType, SchemaVariant};
pub use validator::{find_resource, validate_against_schema, validate_document};
