//! Error types for model loading, schema synthesis and document validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while reading the model or configuration from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {source}")]
    Config {
        #[source]
        source: config::ConfigError,
    },

    #[error("invalid configuration: {message}")]
    InvalidOptions { message: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            _ => 2,
        }
    }
}

/// The input graph is not a well-formed resolved model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown namespace '{namespace}' referenced from '{from}'")]
    UnknownNamespace { namespace: String, from: String },

    #[error("entity '{entity}' references unknown entity '{reference}'")]
    UnknownEntity { entity: String, reference: String },

    #[error("duplicate entity '{name}' in namespace '{namespace}'")]
    DuplicateEntity { namespace: String, name: String },

    #[error("entity '{entity}' of kind {kind} requires a base entity")]
    MissingBaseEntity { entity: String, kind: String },

    #[error("property '{property}' on '{entity}' has type {property_type} but references {referenced_kind} '{referenced}'")]
    ReferenceKindMismatch {
        entity: String,
        property: String,
        property_type: String,
        referenced: String,
        referenced_kind: String,
    },

    #[error("property '{property}' on '{entity}' needs a referenced entity")]
    MissingReference { entity: String, property: String },

    #[error("merge directive on '{entity}.{property}': path '{path}' has no property named '{segment}'")]
    UnknownMergePath {
        entity: String,
        property: String,
        path: String,
        segment: String,
    },

    #[error("reference cycle through entity '{entity}'")]
    ReferenceCycle { entity: String },

    #[error("column conflict names unknown entity '{entity}' in namespace '{namespace}'")]
    UnknownConflictEntity { namespace: String, entity: String },
}

impl ModelError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// A violated internal invariant. These are defects in an upstream pass or an
/// unsupported model shape, never recoverable conditions.
#[derive(Debug, Error)]
pub enum InvariantError {
    #[error("merge coverage missing: '{property_path}' on '{entity}' is merged away but no flattened identity property covers it")]
    MergeCoverageMissing {
        entity: String,
        property_path: String,
    },

    #[error("merge length mismatch on '{entity}': '{source_path}' has {source_count} JSON path(s) but '{target_path}' has {target_count}")]
    MergeLengthMismatch {
        entity: String,
        source_path: String,
        target_path: String,
        source_count: usize,
        target_count: usize,
    },

    #[error("array nesting too deep on '{entity}' at property '{property}': {json_path} exceeds two [*] levels")]
    ArrayNestingTooDeep {
        entity: String,
        property: String,
        json_path: String,
    },

    #[error("no JSON paths for merge path '{property_path}' on '{entity}'")]
    MissingMergeJsonPaths {
        entity: String,
        property_path: String,
    },

    #[error("reference '{property_path}' on '{entity}' has no identity JSON path in '{referenced}' for '{identity_path}'")]
    MissingReferenceJsonPath {
        entity: String,
        referenced: String,
        property_path: String,
        identity_path: String,
    },

    #[error("identity property path '{property_path}' on '{entity}' has no JSON path")]
    MissingIdentityJsonPath {
        entity: String,
        property_path: String,
    },

    #[error("annotation '{annotation}' missing on '{entity}'")]
    MissingAnnotation { entity: String, annotation: String },

    #[error("reference chain from '{entity}.{property}' exceeds {max_depth} levels or cycles")]
    ReferenceDepthExceeded {
        entity: String,
        property: String,
        max_depth: usize,
    },

    #[error("column conflict path '{property_path}' on '{entity}' has no JSON paths")]
    ColumnConflictPathMissing {
        entity: String,
        property_path: String,
    },
}

impl InvariantError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        4
    }
}

/// Errors from a full pipeline run.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

impl BuildError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::Model(e) => e.exit_code(),
            BuildError::Invariant(e) => e.exit_code(),
        }
    }
}

/// Errors during document validation.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("no resource '{endpoint}' in project '{project}'")]
    UnknownResource { project: String, endpoint: String },

    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    #[error("validation failed with {} error(s)", errors.len())]
    Invalid { errors: Vec<SchemaError> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Invalid { .. } => 1,
            _ => 2,
        }
    }
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// JSON Pointer (RFC 6901) to the invalid field.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
