//! The full pass sequence, from a loaded model to one `ApiSchema` per project.

use tracing::{info, info_span};

use crate::assembly::{assemble, ApiSchema, PassOutputs};
use crate::collect::{build_api_mappings, collect_properties};
use crate::constraints::build_constraints;
use crate::document_paths::build_derived_paths;
use crate::error::BuildError;
use crate::flatten::flatten_identities;
use crate::json_paths::build_all_json_paths;
use crate::json_schema::build_json_schemas;
use crate::model::{Model, ModelInput};
use crate::openapi::build_openapi_components;
use crate::reference_component::build_reference_components;
use crate::types::BuildOptions;

/// Run `f` inside a `pass` span named `name`.
fn pass<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let _span = info_span!("pass", name).entered();
    f()
}

/// Build the API schemas of every project in `input`.
///
/// Passes run in a fixed order, each reading only annotations written by the
/// passes before it; within a pass, entities are visited in the model's
/// processing order.
///
/// # Errors
///
/// Returns `BuildError::Model` when the input is not a well-formed resolved
/// model and `BuildError::Invariant` when a pass finds a violated invariant.
pub fn build_api_schemas(input: &ModelInput, options: &BuildOptions) -> Result<Vec<ApiSchema>, BuildError> {
    let model = pass("model", || Model::build(input))?;
    let reference_components = pass("referenceComponents", || build_reference_components(&model))?;
    let identities = pass("flattenIdentities", || flatten_identities(&model, &reference_components))?;
    let mappings = pass("apiMappings", || build_api_mappings(&model));
    let collected = pass("collectProperties", || collect_properties(&model));
    let all_paths = pass("allJsonPaths", || {
        build_all_json_paths(&model, &mappings, &collected, &identities)
    })?;
    let derived = pass("derivedPaths", || build_derived_paths(&model, &all_paths, &identities))?;
    let json_schemas = pass("jsonSchemas", || {
        build_json_schemas(&model, &mappings, &collected, &identities, options)
    })?;
    let openapi = pass("openApiComponents", || {
        build_openapi_components(&model, &mappings, &collected, &identities, options)
    })?;
    let constraints = pass("constraints", || build_constraints(&model, &collected, &all_paths))?;

    let schemas = pass("assembly", || {
        assemble(&PassOutputs {
            model: &model,
            json_schemas: &json_schemas,
            derived: &derived,
            constraints: &constraints,
            openapi: &openapi,
            options,
        })
    })?;
    info!(projects = schemas.len(), "api schemas built");
    Ok(schemas)
}
