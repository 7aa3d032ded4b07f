//! Core types and build configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Default lower bound of the shared school year schema.
pub const DEFAULT_MIN_SCHOOL_YEAR: i64 = 1991;

/// Default upper bound of the shared school year schema.
pub const DEFAULT_MAX_SCHOOL_YEAR: i64 = 2037;

/// Version stamped on every emitted `ApiSchema`.
pub const API_SCHEMA_VERSION: &str = "1.0.0";

/// Config file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "api-schema.toml";

/// Prefix of environment variables that override configuration.
pub const ENV_PREFIX: &str = "API_SCHEMA";

/// JSON Schema dialect used by every synthesized schema.
pub const JSON_SCHEMA_DIALECT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Project and resource names of the built-in school year resource.
pub const SCHOOL_YEAR_PROJECT_NAME: &str = "Ed-Fi";
pub const SCHOOL_YEAR_RESOURCE_NAME: &str = "SchoolYearType";

/// Upper bound on reference chain length while building reference components.
pub const MAX_REFERENCE_DEPTH: usize = 32;

/// Maximum number of `[*]` steps in any JSON path.
pub const MAX_ARRAY_DEPTH: usize = 2;

/// Type of the value found at a document path, used for query coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathType {
    Boolean,
    Number,
    Date,
    DateTime,
    Time,
    String,
}

impl PathType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PathType::Boolean => "boolean",
            PathType::Number => "number",
            PathType::Date => "date",
            PathType::DateTime => "date-time",
            PathType::Time => "time",
            PathType::String => "string",
        }
    }
}

/// Which JSON Schema flavor to synthesize for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaVariant {
    /// POST body: identity and required fields enforced.
    Insert,
    /// PUT body: insert schema plus a required `id`.
    Update,
    /// Query shape: every `required` relaxed.
    Query,
}

/// Options for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Lowest year accepted by the shared school year schema.
    pub min_school_year: i64,
    /// Highest year accepted by the shared school year schema.
    pub max_school_year: i64,
    /// Copied into every extension ProjectSchema when set.
    pub compatible_ds_range: Option<String>,
    /// Version stamped on every emitted `ApiSchema`.
    pub api_schema_version: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            min_school_year: DEFAULT_MIN_SCHOOL_YEAR,
            max_school_year: DEFAULT_MAX_SCHOOL_YEAR,
            compatible_ds_range: None,
            api_schema_version: API_SCHEMA_VERSION.to_string(),
        }
    }
}

impl BuildOptions {
    /// Create options with the default school year range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options layered as defaults, then `api-schema.toml` in the working
    /// directory (or `path`, which must exist), then `API_SCHEMA_*` variables.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Config` if a source cannot be parsed, or
    /// `LoadError::InvalidOptions` if the resulting range is empty.
    pub fn load(path: Option<&Path>) -> Result<Self, LoadError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            if !path.exists() {
                return Err(LoadError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let options: BuildOptions = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|source| LoadError::Config { source })?;

        options.validate()?;
        Ok(options)
    }

    /// Set the school year range.
    pub fn with_school_years(mut self, min: i64, max: i64) -> Self {
        self.min_school_year = min;
        self.max_school_year = max;
        self
    }

    /// Set the compatible data standard range.
    pub fn with_compatible_ds_range(mut self, range: impl Into<String>) -> Self {
        self.compatible_ds_range = Some(range.into());
        self
    }

    /// Reject an empty school year range.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.min_school_year > self.max_school_year {
            return Err(LoadError::InvalidOptions {
                message: format!(
                    "min_school_year {} is greater than max_school_year {}",
                    self.min_school_year, self.max_school_year
                ),
            });
        }
        Ok(())
    }
}
