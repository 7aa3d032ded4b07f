//! Document validation against synthesized resource schemas.

use serde_json::Value;
use tracing::debug;

use crate::assembly::{ApiSchema, ResourceSchema};
use crate::error::{SchemaError, ValidateError};

/// Find the resource served at `endpoint` in `project`.
///
/// The project matches by name or by project endpoint name, and the endpoint
/// matches case-insensitively.
pub fn find_resource<'a>(api_schemas: &'a [ApiSchema], project: &str, endpoint: &str) -> Option<&'a ResourceSchema> {
    let project_schema = api_schemas
        .iter()
        .map(|api_schema| &api_schema.project_schema)
        .find(|p| p.project_name == project || p.project_endpoint_name == project.to_lowercase())?;
    let endpoint = project_schema
        .case_insensitive_endpoint_name_mapping
        .get(&endpoint.to_lowercase())?;
    project_schema.resource(endpoint)
}

/// Validate `document` as the body of a POST (or, with `for_update`, a PUT)
/// to `endpoint` in `project`.
///
/// # Errors
///
/// Returns `ValidateError::UnknownResource` if no such resource exists, or
/// `ValidateError::Invalid` with every violation found.
pub fn validate_document(
    api_schemas: &[ApiSchema],
    project: &str,
    endpoint: &str,
    document: &Value,
    for_update: bool,
) -> Result<(), ValidateError> {
    let resource = find_resource(api_schemas, project, endpoint).ok_or_else(|| ValidateError::UnknownResource {
        project: project.to_string(),
        endpoint: endpoint.to_string(),
    })?;
    let schema = if for_update {
        &resource.json_schema_for_update
    } else {
        &resource.json_schema_for_insert
    };
    debug!(resource = %resource.resource_name, for_update, "validating document");
    validate_against_schema(schema, document)
}

/// Validate a document against a JSON Schema.
pub fn validate_against_schema(schema: &Value, document: &Value) -> Result<(), ValidateError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ValidateError::InvalidSchema {
        message: e.to_string(),
    })?;

    let errors: Vec<SchemaError> = validator
        .iter_errors(document)
        .map(|e| SchemaError {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidateError::Invalid { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_model_str;
    use crate::pipeline::build_api_schemas;
    use crate::types::BuildOptions;
    use serde_json::json;

    fn schemas() -> Vec<ApiSchema> {
        let input = load_model_str(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "School", "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true },
                        { "name": "NameOfInstitution", "type": "string", "isRequired": true, "maxLength": 10 }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        build_api_schemas(&input, &BuildOptions::default()).unwrap()
    }

    #[test]
    fn valid_document_passes() {
        let document = json!({ "schoolId": 1, "nameOfInstitution": "Lincoln" });
        assert!(validate_document(&schemas(), "Ed-Fi", "schools", &document, false).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let document = json!({ "nameOfInstitution": "A name far too long", "extra": true });
        match validate_document(&schemas(), "ed-fi", "Schools", &document, false) {
            Err(ValidateError::Invalid { errors }) => assert_eq!(errors.len(), 3),
            other => panic!("expected violations, got {:?}", other),
        }
    }

    #[test]
    fn update_requires_id() {
        let document = json!({ "schoolId": 1, "nameOfInstitution": "Lincoln" });
        let result = validate_document(&schemas(), "Ed-Fi", "schools", &document, true);
        assert!(matches!(result, Err(ValidateError::Invalid { .. })));

        let with_id = json!({ "id": "abc", "schoolId": 1, "nameOfInstitution": "Lincoln" });
        assert!(validate_document(&schemas(), "Ed-Fi", "schools", &with_id, true).is_ok());
    }

    #[test]
    fn unknown_resource_is_reported() {
        let result = validate_document(&schemas(), "Ed-Fi", "students", &json!({}), false);
        assert!(matches!(result, Err(ValidateError::UnknownResource { .. })));
    }

    #[test]
    fn school_year_type_is_served() {
        let document = json!({ "schoolYear": 2024, "currentSchoolYear": true, "schoolYearDescription": "2023-2024" });
        assert!(validate_document(&schemas(), "Ed-Fi", "schoolYearTypes", &document, false).is_ok());
    }
}
