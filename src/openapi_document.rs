//! OpenAPI documents per namespace.
//!
//! A core namespace produces two whole documents, one for resources and one
//! for descriptors. An extension namespace produces fragment bundles instead:
//! new paths, new component schemas, `exts` overlays onto bodies of the
//! namespace it extends, and new tags.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::document_paths::DerivedPathsAnnotations;
use crate::error::InvariantError;
use crate::model::{name_order, EntityId, EntityKind, Model, NamespaceId, PropertyKind};
use crate::naming::{endpoint_name, pluralize, project_endpoint_name, resource_name};
use crate::openapi::{
    parameter_schema, school_year_enumeration_openapi, OpenApiAnnotations, SCHOOL_YEAR_REFERENCE_COMPONENT,
};
use crate::types::BuildOptions;

const OPENAPI_VERSION: &str = "3.0.0";
const NOT_ALLOWED_WITH_SNAPSHOT: &str =
    "Method Is Not Allowed. When the Use-Snapshot header is set to true, the method is not allowed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Resources,
    Descriptors,
}

impl DocumentKind {
    fn includes(self, kind: EntityKind) -> bool {
        match self {
            DocumentKind::Resources => kind != EntityKind::Descriptor,
            DocumentKind::Descriptors => kind == EntityKind::Descriptor,
        }
    }
}

/// Fragments an extension namespace contributes to the documents it extends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionFragments {
    pub new_paths: Map<String, Value>,
    pub new_schemas: Map<String, Value>,
    pub exts: Map<String, Value>,
    pub new_tags: Vec<Value>,
}

fn response_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/responses/{}", name) })
}

fn parameter_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/parameters/{}", name) })
}

fn schema_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/schemas/{}", name) })
}

/// Responses every document registers.
pub fn standard_responses() -> Value {
    let with_body = |description: &str| json!({ "description": description, "content": { "application/json": {} } });
    json!({
        "Created": { "description": "The resource was created.  An ETag value is available in the ETag header, and the location of the resource is available in the Location header of the response." },
        "Updated": { "description": "The resource was updated.  An updated ETag value is available in the ETag header of the response." },
        "Deleted": { "description": "The resource was successfully deleted." },
        "NotModified": { "description": "The resource's current server-side ETag value matched the If-None-Match header value supplied with the request indicating the resource has not been modified." },
        "BadRequest": with_body("Bad Request. The request was invalid and cannot be completed. See the response body for specific validation errors. This will typically be an issue with the query parameters or their values."),
        "Unauthorized": { "description": "Unauthorized. The request requires authentication. The OAuth bearer token was either not provided or is invalid. The operation may succeed once authentication has been successfully completed." },
        "Forbidden": { "description": "Forbidden. The request cannot be completed in the current authorization context. Contact your administrator if you believe this operation should be allowed." },
        "NotFound": { "description": "The resource could not be found." },
        "NotFoundUseSnapshot": { "description": "The resource could not be found. If Use-Snapshot header is set to true, this response can indicate the snapshot may have been removed." },
        "Conflict": with_body("Conflict.  The request cannot be completed because it would result in an invalid state.  See the response body for details."),
        "PreconditionFailed": { "description": "The resource's current server-side ETag value does not match the supplied If-Match header value in the request. This indicates the resource has been modified by another consumer." },
        "Error": with_body("An unhandled error occurred on the server. See the response body for details.")
    })
}

/// Parameters every document registers.
pub fn standard_parameters() -> Value {
    json!({
        "offset": {
            "name": "offset", "in": "query",
            "description": "Indicates how many items should be skipped before returning results.",
            "schema": { "type": "integer", "format": "int32" }
        },
        "limit": {
            "name": "limit", "in": "query",
            "description": "Indicates the maximum number of items that should be returned in the results.",
            "schema": { "maximum": 500, "minimum": 0, "type": "integer", "format": "int32", "default": 25 }
        },
        "MinChangeVersion": {
            "name": "minChangeVersion", "in": "query",
            "description": "Used in synchronization to set sequence minimum ChangeVersion",
            "schema": { "type": "integer", "format": "int64" }
        },
        "MaxChangeVersion": {
            "name": "maxChangeVersion", "in": "query",
            "description": "Used in synchronization to set sequence maximum ChangeVersion",
            "schema": { "type": "integer", "format": "int64" }
        },
        "If-None-Match": {
            "name": "If-None-Match", "in": "header",
            "description": "The previously returned ETag header value, used here to prevent the unnecessary data transfer of an unchanged resource.",
            "schema": { "type": "string" }
        },
        "fields": {
            "name": "fields", "in": "query",
            "description": "Specifies a subset of properties that should be returned for each entity (e.g. \"property1,collection1(collProp1,collProp2)\").",
            "schema": { "type": "string" }
        },
        "queryExpression": {
            "name": "q", "in": "query",
            "description": "Specifies a query filter expression for the request. Currently only supports range-based queries on dates and numbers (e.g. \"schoolId:[255901000...255901002]\" and \"BeginDate:[2016-03-07...2016-03-10]\").",
            "schema": { "type": "string" }
        },
        "totalCount": {
            "name": "totalCount", "in": "query",
            "description": "Indicates if the total number of items available should be returned in the 'Total-Count' header of the response.  If set to false, 'Total-Count' header will not be provided. Must be false when using cursor paging (with pageToken).",
            "schema": { "type": "boolean", "default": false }
        },
        "pageToken": {
            "name": "pageToken", "in": "query",
            "description": "The token of the page to retrieve, obtained either from the \"Next-Page-Token\" header of the previous request, or from the \"partitions\" endpoint for the resource. Cannot be used with limit/offset paging.",
            "schema": { "type": "string" }
        },
        "pageSize": {
            "name": "pageSize", "in": "query",
            "description": "The maximum number of items to retrieve in the page. For use with pageToken (cursor paging) only.",
            "schema": { "minimum": 0, "type": "integer", "format": "int32", "default": 25 }
        },
        "numberOfPartitions": {
            "name": "number", "in": "query",
            "description": "The number of evenly distributed partitions to provide for client-side parallel processing. If unspecified, a reasonable set of partitions will be determined based on the total number of accessible items.",
            "schema": { "maximum": 200, "minimum": 1, "type": "integer", "format": "int32" }
        }
    })
}

fn descriptor_query_parameters() -> Vec<Value> {
    vec![
        json!({
            "name": "codeValue", "in": "query",
            "description": "A code or abbreviation that is used to refer to the descriptor.",
            "schema": { "maxLength": 50, "type": "string" },
            "x-Ed-Fi-isIdentity": true
        }),
        json!({
            "name": "description", "in": "query",
            "description": "The description of the descriptor.",
            "schema": { "maxLength": 1024, "type": "string" }
        }),
        json!({
            "name": "effectiveBeginDate", "in": "query",
            "description": "The beginning date of the period when the descriptor is in effect. If omitted, the default is immediate effectiveness.",
            "schema": { "type": "string", "format": "date" }
        }),
        json!({
            "name": "effectiveEndDate", "in": "query",
            "description": "The end date of the period when the descriptor is in effect.",
            "schema": { "type": "string", "format": "date" }
        }),
        json!({
            "name": "namespace", "in": "query",
            "description": "A globally unique namespace that identifies this descriptor set. Author is strongly encouraged to use the Universal Resource Identifier (http, ftp, file, etc.) for the source of the descriptor definition. Best practice is for this source to be the descriptor file itself, so that it can be machine-readable and be fetched in real-time, if necessary.",
            "schema": { "maxLength": 255, "type": "string" },
            "x-Ed-Fi-isIdentity": true
        }),
        json!({
            "name": "shortDescription", "in": "query",
            "description": "A shortened description for the descriptor.",
            "schema": { "maxLength": 75, "type": "string" }
        }),
    ]
}

/// Query parameters of a resource: one per query field whose values come
/// from a scalar-like property.
pub fn query_parameters(
    model: &Model,
    entity: EntityId,
    derived: &DerivedPathsAnnotations,
) -> Result<Vec<Value>, InvariantError> {
    if model.entity(entity).kind == EntityKind::Descriptor {
        return Ok(descriptor_query_parameters());
    }
    let mut parameters = Vec::new();
    for (field, infos) in &derived.get(model, entity)?.query_fields {
        let Some(source_id) = infos.first().and_then(|info| info.source_property) else {
            continue;
        };
        let source = model.property(source_id);
        if matches!(
            source.kind,
            PropertyKind::Reference { .. }
                | PropertyKind::Common { .. }
                | PropertyKind::InlineCommon { .. }
                | PropertyKind::Choice { .. }
        ) {
            continue;
        }
        let mut parameter = Map::new();
        parameter.insert("name".to_string(), json!(field));
        parameter.insert("in".to_string(), json!("query"));
        parameter.insert("description".to_string(), json!(source.documentation));
        parameter.insert("schema".to_string(), parameter_schema(model, source_id));
        if source.is_part_of_identity {
            parameter.insert("x-Ed-Fi-isIdentity".to_string(), json!(true));
        }
        parameters.push(Value::Object(parameter));
    }
    Ok(parameters)
}

/// What the operations of one resource need to know.
struct ResourceOperations {
    name: String,
    endpoint: String,
    body_schema: String,
    query_parameters: Vec<Value>,
}

fn by_id_parameters() -> Vec<Value> {
    vec![
        json!({
            "name": "id", "in": "path",
            "description": "A resource identifier that uniquely identifies the resource.",
            "required": true,
            "schema": { "type": "string" }
        }),
        parameter_ref("If-None-Match"),
    ]
}

fn use_snapshot_parameter() -> Value {
    json!({
        "name": "Use-Snapshot", "in": "header",
        "description": "Indicates if the configured Snapshot should be used.",
        "schema": { "type": "boolean", "default": false }
    })
}

impl ResourceOperations {
    fn request_body(&self, required: bool) -> Value {
        let mut body = json!({
            "description": format!("The JSON representation of the {} resource to be created or updated.", self.name),
            "content": { "application/json": { "schema": schema_ref(&self.body_schema) } }
        });
        if required {
            body["required"] = json!(true);
            body["x-bodyName"] = json!(self.name);
        }
        body
    }

    fn read_responses(&self, found: Value) -> Value {
        json!({
            "200": {
                "description": "The requested resource was successfully retrieved.",
                "content": { "application/json": { "schema": found } }
            },
            "304": response_ref("NotModified"),
            "400": response_ref("BadRequest"),
            "401": response_ref("Unauthorized"),
            "403": response_ref("Forbidden"),
            "404": response_ref("NotFoundUseSnapshot"),
            "500": response_ref("Error")
        })
    }

    fn write_responses(&self, success: (&str, &str), not_found: bool) -> Value {
        let mut responses = Map::new();
        responses.insert(success.0.to_string(), response_ref(success.1));
        if success.0 == "200" {
            responses.insert("201".to_string(), response_ref("Created"));
        }
        responses.insert("400".to_string(), response_ref("BadRequest"));
        responses.insert("401".to_string(), response_ref("Unauthorized"));
        responses.insert("403".to_string(), response_ref("Forbidden"));
        if not_found {
            responses.insert("404".to_string(), response_ref("NotFound"));
        }
        responses.insert("405".to_string(), json!({ "description": NOT_ALLOWED_WITH_SNAPSHOT }));
        responses.insert("409".to_string(), response_ref("Conflict"));
        responses.insert("412".to_string(), response_ref("PreconditionFailed"));
        responses.insert("500".to_string(), response_ref("Error"));
        Value::Object(responses)
    }

    fn post(&self) -> Value {
        json!({
            "description": "The POST operation can be used to create or update resources. In database terms, this is often referred to as an \"upsert\" operation (insert + update). Clients should NOT include the resource \"id\" in the JSON body because it will result in an error. The web service will identify whether the resource already exists based on the natural key values provided, and update or create the resource appropriately. It is recommended to use POST for both create and update except while updating natural key of a resource in which case PUT operation must be used.",
            "operationId": format!("post{}", self.name),
            "requestBody": self.request_body(true),
            "responses": self.write_responses(("200", "Updated"), false),
            "summary": "Creates or updates resources based on the natural key values of the supplied resource.",
            "tags": [self.endpoint]
        })
    }

    fn get_by_query(&self) -> Value {
        let mut parameters = vec![
            parameter_ref("offset"),
            parameter_ref("limit"),
            parameter_ref("MinChangeVersion"),
            parameter_ref("MaxChangeVersion"),
            parameter_ref("totalCount"),
            json!({ "name": "id", "in": "query", "description": "", "schema": { "type": "string" } }),
        ];
        parameters.extend(self.query_parameters.iter().cloned());
        json!({
            "description": "This GET operation provides access to resources using the \"Get\" search pattern.  The values of any properties of the resource that are specified will be used to return all matching results (if it exists).",
            "operationId": format!("get{}", pluralize(&self.name)),
            "parameters": parameters,
            "responses": self.read_responses(json!({ "type": "array", "items": schema_ref(&self.body_schema) })),
            "summary": "Retrieves specific resources using the resource's property values (using the \"Get\" pattern).",
            "tags": [self.endpoint]
        })
    }

    fn get_by_id(&self) -> Value {
        let mut parameters = by_id_parameters();
        parameters.push(use_snapshot_parameter());
        json!({
            "description": "This GET operation retrieves a resource by the specified resource identifier.",
            "operationId": format!("get{}ById", pluralize(&self.name)),
            "parameters": parameters,
            "responses": self.read_responses(schema_ref(&self.body_schema)),
            "summary": "Retrieves a specific resource using the resource's identifier (using the \"Get By Id\" pattern).",
            "tags": [self.endpoint]
        })
    }

    fn put(&self) -> Value {
        let mut parameters = by_id_parameters();
        parameters.push(use_snapshot_parameter());
        json!({
            "description": "The PUT operation is used to update a resource by identifier. If the resource identifier (\"id\") is provided in the JSON body, it will be ignored. Additionally, this API resource is not configured for cascading natural key updates. Natural key values for this resource cannot be changed using PUT operation, so the recommendation is to use POST as that supports upsert behavior.",
            "operationId": format!("put{}", self.name),
            "parameters": parameters,
            "requestBody": self.request_body(false),
            "responses": self.write_responses(("204", "Updated"), true),
            "summary": "Updates a resource based on the resource identifier.",
            "tags": [self.endpoint]
        })
    }

    fn delete(&self) -> Value {
        json!({
            "description": "The DELETE operation is used to delete an existing resource by identifier. If the resource doesn't exist, an error will result (the resource will not be found).",
            "operationId": format!("delete{}ById", pluralize(&self.name)),
            "parameters": by_id_parameters(),
            "responses": self.write_responses(("204", "Updated"), true),
            "summary": "Deletes an existing resource using the resource identifier.",
            "tags": [self.endpoint]
        })
    }

    fn paths(&self, project_endpoint: &str, paths: &mut Map<String, Value>) {
        let base = format!("/{}/{}", project_endpoint, self.endpoint);
        paths.insert(base.clone(), json!({ "post": self.post(), "get": self.get_by_query() }));
        paths.insert(
            format!("{}/{{id}}", base),
            json!({ "get": self.get_by_id(), "put": self.put(), "delete": self.delete() }),
        );
    }
}

/// Entities of `namespace` in name order.
fn namespace_entities(model: &Model, namespace: NamespaceId) -> Vec<EntityId> {
    let mut entities = model.namespace(namespace).entities.clone();
    entities.sort_by(|&a, &b| name_order(&resource_name(model, a), &resource_name(model, b)));
    entities
}

/// Resources of `namespace` that get their own paths.
fn document_entities(model: &Model, namespace: NamespaceId, kind: DocumentKind) -> Vec<EntityId> {
    namespace_entities(model, namespace)
        .into_iter()
        .filter(|&id| {
            let entity = model.entity(id);
            entity.kind.is_resource() && !entity.kind.is_extension() && !entity.is_abstract && kind.includes(entity.kind)
        })
        .collect()
}

/// Paths, component schemas and tags contributed by the resources of a namespace.
struct Contribution {
    paths: Map<String, Value>,
    schemas: Map<String, Value>,
    tags: Vec<Value>,
}

fn contribution(
    model: &Model,
    namespace: NamespaceId,
    kind: DocumentKind,
    components: &OpenApiAnnotations,
    derived: &DerivedPathsAnnotations,
) -> Result<Contribution, InvariantError> {
    let project_endpoint = project_endpoint_name(&model.namespace(namespace).project_name);
    let mut paths = Map::new();
    let mut schemas = Map::new();
    let mut tags = Vec::new();

    if kind == DocumentKind::Resources {
        // Abstract entities are referenced but have no paths of their own.
        for entity in namespace_entities(model, namespace) {
            let entity_def = model.entity(entity);
            if entity_def.is_abstract && entity_def.kind.is_resource() {
                schemas.extend(components.get(model, entity)?.schemas());
            }
        }
    }

    for entity in document_entities(model, namespace, kind) {
        let entity_def = model.entity(entity);
        let entity_components = components.get(model, entity)?;
        let operations = ResourceOperations {
            name: entity_def.name.clone(),
            endpoint: endpoint_name(model, entity),
            body_schema: entity_components.request_body_name.clone(),
            query_parameters: query_parameters(model, entity, derived)?,
        };
        operations.paths(&project_endpoint, &mut paths);
        schemas.extend(entity_components.schemas());
        tags.push(json!({ "name": operations.endpoint, "description": entity_def.documentation }));
    }
    tags.sort_by(|a, b| {
        let name = |tag: &Value| tag["name"].as_str().unwrap_or_default().to_string();
        name(a).cmp(&name(b))
    });
    Ok(Contribution { paths, schemas, tags })
}

/// Whole OpenAPI document of a core namespace.
pub fn core_document(
    model: &Model,
    namespace: NamespaceId,
    kind: DocumentKind,
    components: &OpenApiAnnotations,
    derived: &DerivedPathsAnnotations,
    options: &BuildOptions,
) -> Result<Value, InvariantError> {
    let Contribution { paths, mut schemas, tags } = contribution(model, namespace, kind, components, derived)?;
    if kind == DocumentKind::Resources {
        schemas.insert(
            SCHOOL_YEAR_REFERENCE_COMPONENT.to_string(),
            school_year_enumeration_openapi(options),
        );
    }
    let project = model.namespace(namespace);
    let title = match kind {
        DocumentKind::Resources => format!("{} Resources API", project.project_name),
        DocumentKind::Descriptors => format!("{} Descriptors API", project.project_name),
    };
    Ok(json!({
        "openapi": OPENAPI_VERSION,
        "info": {
            "title": title,
            "version": project.project_version,
            "description": project.description
        },
        "servers": [{ "url": "" }],
        "paths": paths,
        "components": {
            "schemas": schemas,
            "responses": standard_responses(),
            "parameters": standard_parameters()
        },
        "tags": tags
    }))
}

/// Fragments an extension namespace contributes to the documents of `kind`.
pub fn extension_fragments(
    model: &Model,
    namespace: NamespaceId,
    kind: DocumentKind,
    components: &OpenApiAnnotations,
    derived: &DerivedPathsAnnotations,
) -> Result<ExtensionFragments, InvariantError> {
    let Contribution { paths, mut schemas, tags } = contribution(model, namespace, kind, components, derived)?;
    let mut exts = Map::new();

    if kind == DocumentKind::Resources {
        for entity in namespace_entities(model, namespace) {
            let entity_def = model.entity(entity);
            if !entity_def.kind.is_extension() {
                continue;
            }
            let entity_components = components.get(model, entity)?;
            if let Some(body) = &entity_components.request_body {
                let mut overlay = body.clone();
                if let Some(object) = overlay.as_object_mut() {
                    object.insert("description".to_string(), json!(""));
                }
                exts.insert(entity_components.request_body_name.clone(), overlay);
            }
            for (name, schema) in &entity_components.collection_components {
                schemas.insert(name.clone(), schema.clone());
            }
        }
    }

    Ok(ExtensionFragments {
        new_paths: paths,
        new_schemas: schemas,
        exts,
        new_tags: tags,
    })
}
