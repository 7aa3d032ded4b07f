//! Final aggregation of every pass's annotations.
//!
//! One [`ApiSchema`] per namespace, in input order. Assembly derives nothing
//! new: a missing upstream annotation is an [`InvariantError`].

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::constraints::{ArrayUniquenessConstraint, ConstraintAnnotations, Constraints, EqualityConstraint};
use crate::document_paths::{
    DerivedPaths, DerivedPathsAnnotations, DocumentPaths, DocumentPathsMapping, QueryFieldMapping,
    QueryFieldPathInfo, ScalarPath,
};
use crate::error::InvariantError;
use crate::json_path::{JsonPath, PropertyPath};
use crate::json_schema::{schema_for_variant, school_year_type_schema, JsonSchemas};
use crate::model::{EntityId, EntityKind, Model, Namespace};
use crate::naming::{endpoint_name, pluralize, project_endpoint_name, resource_name, uncapitalize};
use crate::openapi::OpenApiAnnotations;
use crate::openapi_document::{core_document, extension_fragments, DocumentKind, ExtensionFragments};
use crate::types::{BuildOptions, PathType, SchemaVariant, SCHOOL_YEAR_RESOURCE_NAME};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSchema {
    pub api_schema_version: String,
    pub project_schema: ProjectSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSchema {
    pub project_name: String,
    pub project_version: String,
    pub project_endpoint_name: String,
    pub description: String,
    pub is_extension_project: bool,
    pub compatible_ds_range: Option<String>,
    pub abstract_resources: BTreeMap<String, AbstractResource>,
    pub resource_name_mapping: BTreeMap<String, String>,
    pub case_insensitive_endpoint_name_mapping: BTreeMap<String, String>,
    /// Keyed by endpoint name.
    pub resource_schemas: BTreeMap<String, ResourceSchemaEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_api_core_resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_api_core_descriptors: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_api_extension_resource_fragments: Option<ExtensionFragments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_api_extension_descriptor_fragments: Option<ExtensionFragments>,
}

impl ProjectSchema {
    /// The full resource schema served at `endpoint`, if any.
    pub fn resource(&self, endpoint: &str) -> Option<&ResourceSchema> {
        match self.resource_schemas.get(endpoint)? {
            ResourceSchemaEntry::Resource(resource) => Some(resource.as_ref()),
            ResourceSchemaEntry::Extension(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbstractResource {
    pub identity_json_paths: Vec<JsonPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceSchemaEntry {
    Resource(Box<ResourceSchema>),
    Extension(Box<ResourceExtensionSchema>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSchema {
    pub resource_name: String,
    pub endpoint_name: String,
    pub is_descriptor: bool,
    pub is_school_year_enumeration: bool,
    pub allow_identity_updates: bool,
    pub json_schema_for_insert: Value,
    pub json_schema_for_update: Value,
    pub json_schema_for_query: Value,
    pub document_paths_mapping: DocumentPathsMapping,
    pub identity_json_paths: Vec<JsonPath>,
    pub identity_path_order: Vec<PropertyPath>,
    pub equality_constraints: Vec<EqualityConstraint>,
    pub array_uniqueness_constraints: Vec<ArrayUniquenessConstraint>,
    pub query_field_mapping: QueryFieldMapping,
    pub boolean_json_paths: Vec<JsonPath>,
    pub numeric_json_paths: Vec<JsonPath>,
    pub date_json_paths: Vec<JsonPath>,
    pub date_time_json_paths: Vec<JsonPath>,
    pub is_subclass: bool,
    #[serde(flatten)]
    pub superclass: Option<Superclass>,
    pub is_resource_extension: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Superclass {
    pub subclass_type: String,
    pub superclass_project_name: String,
    pub superclass_resource_name: String,
    /// The subclass identity renamed from the superclass identity, as the superclass names it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superclass_identity_json_path: Option<JsonPath>,
}

/// What an extension adds to the resource it extends. Its paths are rooted
/// at `$._ext.<projectEndpoint>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceExtensionSchema {
    pub resource_name: String,
    pub endpoint_name: String,
    pub is_resource_extension: bool,
    pub json_schema_for_insert: Value,
    pub document_paths_mapping: DocumentPathsMapping,
    pub equality_constraints: Vec<EqualityConstraint>,
    pub array_uniqueness_constraints: Vec<ArrayUniquenessConstraint>,
    pub boolean_json_paths: Vec<JsonPath>,
    pub numeric_json_paths: Vec<JsonPath>,
    pub date_json_paths: Vec<JsonPath>,
    pub date_time_json_paths: Vec<JsonPath>,
}

/// Annotations produced by the passes, as assembly reads them.
pub struct PassOutputs<'a> {
    pub model: &'a Model,
    pub json_schemas: &'a JsonSchemas,
    pub derived: &'a DerivedPathsAnnotations,
    pub constraints: &'a ConstraintAnnotations,
    pub openapi: &'a OpenApiAnnotations,
    pub options: &'a BuildOptions,
}

/// Assemble one `ApiSchema` per namespace.
pub fn assemble(outputs: &PassOutputs<'_>) -> Result<Vec<ApiSchema>, InvariantError> {
    outputs
        .model
        .namespaces()
        .iter()
        .map(|namespace| {
            Ok(ApiSchema {
                api_schema_version: outputs.options.api_schema_version.clone(),
                project_schema: project_schema(outputs, namespace)?,
            })
        })
        .collect()
}

fn project_schema(outputs: &PassOutputs<'_>, namespace: &Namespace) -> Result<ProjectSchema, InvariantError> {
    let model = outputs.model;
    let mut project = ProjectSchema {
        project_name: namespace.project_name.clone(),
        project_version: namespace.project_version.clone(),
        project_endpoint_name: project_endpoint_name(&namespace.project_name),
        description: namespace.description.clone(),
        is_extension_project: namespace.is_extension,
        compatible_ds_range: None,
        abstract_resources: BTreeMap::new(),
        resource_name_mapping: BTreeMap::new(),
        case_insensitive_endpoint_name_mapping: BTreeMap::new(),
        resource_schemas: BTreeMap::new(),
        open_api_core_resources: None,
        open_api_core_descriptors: None,
        open_api_extension_resource_fragments: None,
        open_api_extension_descriptor_fragments: None,
    };

    for &entity in &namespace.entities {
        let entity_def = model.entity(entity);
        if !entity_def.kind.is_resource() {
            continue;
        }
        let derived = outputs.derived.get(model, entity)?;
        if entity_def.is_abstract {
            project.abstract_resources.insert(
                entity_def.name.clone(),
                AbstractResource {
                    identity_json_paths: derived.identity_json_paths.clone(),
                },
            );
            continue;
        }

        let endpoint = endpoint_name(model, entity);
        let entry = if entity_def.kind.is_extension() {
            ResourceSchemaEntry::Extension(Box::new(extension_schema(outputs, entity, &endpoint, derived)?))
        } else {
            project
                .resource_name_mapping
                .insert(resource_name(model, entity), endpoint.clone());
            project
                .case_insensitive_endpoint_name_mapping
                .insert(endpoint.to_lowercase(), endpoint.clone());
            ResourceSchemaEntry::Resource(Box::new(resource_schema(outputs, entity, &endpoint, derived)?))
        };
        debug!(entity = %entity_def.name, endpoint = %endpoint, "assembled resource schema");
        project.resource_schemas.insert(endpoint, entry);
    }

    if namespace.is_extension {
        project.compatible_ds_range = outputs.options.compatible_ds_range.clone();
        project.open_api_extension_resource_fragments = Some(extension_fragments(
            model,
            namespace.id,
            DocumentKind::Resources,
            outputs.openapi,
            outputs.derived,
        )?);
        project.open_api_extension_descriptor_fragments = Some(extension_fragments(
            model,
            namespace.id,
            DocumentKind::Descriptors,
            outputs.openapi,
            outputs.derived,
        )?);
    } else {
        let school_year = school_year_type_resource(outputs.options);
        project
            .resource_name_mapping
            .insert(school_year.resource_name.clone(), school_year.endpoint_name.clone());
        project
            .case_insensitive_endpoint_name_mapping
            .insert(school_year.endpoint_name.to_lowercase(), school_year.endpoint_name.clone());
        project.resource_schemas.insert(
            school_year.endpoint_name.clone(),
            ResourceSchemaEntry::Resource(Box::new(school_year)),
        );
        project.open_api_core_resources = Some(core_document(
            model,
            namespace.id,
            DocumentKind::Resources,
            outputs.openapi,
            outputs.derived,
            outputs.options,
        )?);
        project.open_api_core_descriptors = Some(core_document(
            model,
            namespace.id,
            DocumentKind::Descriptors,
            outputs.openapi,
            outputs.derived,
            outputs.options,
        )?);
    }
    Ok(project)
}

fn constraints_of(outputs: &PassOutputs<'_>, entity: EntityId) -> Result<Constraints, InvariantError> {
    Ok(outputs.constraints.get(outputs.model, entity)?.clone())
}

fn resource_schema(
    outputs: &PassOutputs<'_>,
    entity: EntityId,
    endpoint: &str,
    derived: &DerivedPaths,
) -> Result<ResourceSchema, InvariantError> {
    let model = outputs.model;
    let entity_def = model.entity(entity);
    let insert = outputs.json_schemas.get(model, entity)?;
    let constraints = constraints_of(outputs, entity)?;

    Ok(ResourceSchema {
        resource_name: resource_name(model, entity),
        endpoint_name: endpoint.to_string(),
        is_descriptor: entity_def.kind == EntityKind::Descriptor,
        is_school_year_enumeration: entity_def.kind == EntityKind::SchoolYearEnumeration,
        allow_identity_updates: entity_def.allow_primary_key_updates,
        json_schema_for_update: schema_for_variant(insert, SchemaVariant::Update),
        json_schema_for_query: schema_for_variant(insert, SchemaVariant::Query),
        json_schema_for_insert: insert.clone(),
        document_paths_mapping: derived.document_paths.clone(),
        identity_json_paths: derived.identity_json_paths.clone(),
        identity_path_order: derived.identity_path_order.clone(),
        equality_constraints: constraints.equality,
        array_uniqueness_constraints: constraints.array_uniqueness,
        query_field_mapping: derived.query_fields.clone(),
        boolean_json_paths: derived.boolean_json_paths.clone(),
        numeric_json_paths: derived.numeric_json_paths.clone(),
        date_json_paths: derived.date_json_paths.clone(),
        date_time_json_paths: derived.date_time_json_paths.clone(),
        is_subclass: entity_def.kind.is_subclass(),
        superclass: superclass(model, entity),
        is_resource_extension: false,
    })
}

fn superclass(model: &Model, entity: EntityId) -> Option<Superclass> {
    let kind = model.entity(entity).kind;
    let base = model.superclass(entity)?;
    let subclass_type = match kind {
        EntityKind::DomainEntitySubclass => "domainEntity",
        EntityKind::AssociationSubclass => "association",
        _ => return None,
    };
    let superclass_identity_json_path = match kind {
        EntityKind::DomainEntitySubclass => model
            .identity_rename(entity)
            .map(|rename| JsonPath::root().child(&uncapitalize(&rename.base_key_name))),
        _ => None,
    };
    Some(Superclass {
        subclass_type: subclass_type.to_string(),
        superclass_project_name: model.project_name(base).to_string(),
        superclass_resource_name: resource_name(model, base),
        superclass_identity_json_path,
    })
}

fn extension_schema(
    outputs: &PassOutputs<'_>,
    entity: EntityId,
    endpoint: &str,
    derived: &DerivedPaths,
) -> Result<ResourceExtensionSchema, InvariantError> {
    let model = outputs.model;
    let constraints = constraints_of(outputs, entity)?;
    Ok(ResourceExtensionSchema {
        resource_name: resource_name(model, entity),
        endpoint_name: endpoint.to_string(),
        is_resource_extension: true,
        json_schema_for_insert: outputs.json_schemas.get(model, entity)?.clone(),
        document_paths_mapping: derived.document_paths.clone(),
        equality_constraints: constraints.equality,
        array_uniqueness_constraints: constraints.array_uniqueness,
        boolean_json_paths: derived.boolean_json_paths.clone(),
        numeric_json_paths: derived.numeric_json_paths.clone(),
        date_json_paths: derived.date_json_paths.clone(),
        date_time_json_paths: derived.date_time_json_paths.clone(),
    })
}

/// The school year enumeration is not modeled; every core project serves it.
pub fn school_year_type_resource(options: &BuildOptions) -> ResourceSchema {
    let insert = school_year_type_schema(options);
    let fields = [
        ("CurrentSchoolYear", "currentSchoolYear", PathType::Boolean),
        ("SchoolYear", "schoolYear", PathType::Number),
        ("SchoolYearDescription", "schoolYearDescription", PathType::String),
    ];

    let mut document_paths = DocumentPathsMapping::new();
    let mut query_fields = QueryFieldMapping::new();
    for (property_path, key, path_type) in fields {
        let path = JsonPath::root().child(key);
        document_paths.insert(
            PropertyPath::new(property_path),
            DocumentPaths::Scalar(ScalarPath {
                is_reference: false,
                path: path.clone(),
                path_type,
                source_property: None,
            }),
        );
        query_fields.insert(
            key.to_string(),
            vec![QueryFieldPathInfo {
                path,
                path_type,
                source_property: None,
            }],
        );
    }
    let endpoint = uncapitalize(&pluralize(SCHOOL_YEAR_RESOURCE_NAME));

    ResourceSchema {
        resource_name: SCHOOL_YEAR_RESOURCE_NAME.to_string(),
        endpoint_name: endpoint,
        is_descriptor: false,
        is_school_year_enumeration: true,
        allow_identity_updates: false,
        json_schema_for_update: schema_for_variant(&insert, SchemaVariant::Update),
        json_schema_for_query: schema_for_variant(&insert, SchemaVariant::Query),
        json_schema_for_insert: insert,
        document_paths_mapping: document_paths,
        identity_json_paths: vec![JsonPath::root().child("schoolYear")],
        identity_path_order: vec![PropertyPath::new("SchoolYear")],
        equality_constraints: Vec::new(),
        array_uniqueness_constraints: Vec::new(),
        query_field_mapping: query_fields,
        boolean_json_paths: vec![JsonPath::root().child("currentSchoolYear")],
        numeric_json_paths: vec![JsonPath::root().child("schoolYear")],
        date_json_paths: Vec::new(),
        date_time_json_paths: Vec::new(),
        is_subclass: false,
        superclass: None,
        is_resource_extension: false,
    }
}
