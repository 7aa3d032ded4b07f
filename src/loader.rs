//! Model loading from files and strings.
//!
//! The input is the resolved semantic model as JSON; see [`ModelInput`].

use std::path::Path;

use serde_json::Value;

use crate::error::LoadError;
use crate::model::ModelInput;

/// Load a resolved model from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't a valid model document.
pub fn load_model(path: &Path) -> Result<ModelInput, LoadError> {
    let content = read_file(path)?;
    load_model_str(&content)
}

/// Load a resolved model from a JSON string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't a valid model document.
pub fn load_model_str(content: &str) -> Result<ModelInput, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Load an arbitrary JSON document, such as a payload to validate.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    let content = read_file(path)?;
    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson { source })
}

fn read_file(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "projects": [{
            "namespaceName": "EdFi",
            "projectName": "Ed-Fi",
            "projectVersion": "5.0.0",
            "entities": []
        }]
    }"#;

    #[test]
    fn load_model_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", MINIMAL).unwrap();

        let model = load_model(file.path()).unwrap();
        assert_eq!(model.projects.len(), 1);
        assert_eq!(model.projects[0].namespace_name, "EdFi");
        assert!(model.column_conflicts.is_empty());
    }

    #[test]
    fn load_model_file_not_found() {
        let result = load_model(Path::new("/nonexistent/model.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }

    #[test]
    fn load_model_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_model(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_model_str_rejects_unknown_entity_kind() {
        let content = r#"{
            "projects": [{
                "namespaceName": "EdFi",
                "projectName": "Ed-Fi",
                "projectVersion": "5.0.0",
                "entities": [{ "kind": "interchange", "name": "X" }]
            }]
        }"#;
        let result = load_model_str(content);
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_json_document() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"schoolId": 123}}"#).unwrap();

        let doc = load_json(file.path()).unwrap();
        assert_eq!(doc["schoolId"], 123);
    }
}
