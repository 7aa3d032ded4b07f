//! OpenAPI component schemas.
//!
//! Each resource gets a request body component named `{Namespace}_{Entity}`,
//! each referable entity a `{Namespace}_{Entity}_Reference` component, and every
//! collection an item component `{Namespace}_{Entity}_{CollectionPath}`. Bodies
//! refer to references and collection items by `$ref` instead of inlining them.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::annotation::EntityAnnotations;
use crate::collect::{ApiMappings, CollectedProperties};
use crate::error::InvariantError;
use crate::flatten::FlattenedIdentities;
use crate::model::{EntityId, EntityKind, Model, PropertyId, PropertyKind, ScalarType};
use crate::naming::{collapse_parent_name, document_key, identical_role_name_prefix, PropertyModifier};
use crate::types::BuildOptions;

/// Shared school year reference body, registered once per core document.
pub const SCHOOL_YEAR_REFERENCE_COMPONENT: &str = "EdFi_SchoolYearTypeReference";

/// Whitespace may not lead or trail a descriptor field.
const NO_SURROUNDING_WHITESPACE: &str = r"^(?!\s).*(?<!\s)$";

/// Components contributed by one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenApiComponents {
    pub request_body_name: String,
    pub request_body: Option<Value>,
    pub reference_name: Option<String>,
    pub reference: Option<Value>,
    /// Collection item components, in property order.
    pub collection_components: Vec<(String, Value)>,
}

impl OpenApiComponents {
    /// Every component schema, keyed by component name.
    pub fn schemas(&self) -> Map<String, Value> {
        let mut schemas = Map::new();
        if let (Some(name), Some(reference)) = (&self.reference_name, &self.reference) {
            schemas.insert(name.clone(), reference.clone());
        }
        if let Some(body) = &self.request_body {
            schemas.insert(self.request_body_name.clone(), body.clone());
        }
        for (name, schema) in &self.collection_components {
            schemas.insert(name.clone(), schema.clone());
        }
        schemas
    }
}

pub type OpenApiAnnotations = EntityAnnotations<OpenApiComponents>;

pub fn component_ref(name: &str) -> Value {
    json!({ "$ref": format!("#/components/schemas/{}", name) })
}

/// Request body shared by every descriptor.
pub fn descriptor_openapi() -> Value {
    json!({
        "type": "object",
        "description": "An Ed-Fi Descriptor",
        "properties": {
            "id": { "type": "string", "description": "" },
            "namespace": {
                "type": "string",
                "description": "The descriptor namespace as a URI",
                "maxLength": 255,
                "minLength": 1,
                "pattern": NO_SURROUNDING_WHITESPACE
            },
            "codeValue": {
                "type": "string",
                "description": "The descriptor code value",
                "maxLength": 50,
                "minLength": 1,
                "pattern": NO_SURROUNDING_WHITESPACE
            },
            "shortDescription": {
                "type": "string",
                "description": "The descriptor short description",
                "maxLength": 75,
                "minLength": 1,
                "pattern": NO_SURROUNDING_WHITESPACE
            },
            "description": { "type": "string", "description": "The descriptor description", "maxLength": 1024 },
            "effectiveBeginDate": { "type": "string", "format": "date", "description": "The descriptor effective begin date" },
            "effectiveEndDate": { "type": "string", "format": "date", "description": "The descriptor effective end date" }
        },
        "required": ["namespace", "codeValue", "shortDescription"]
    })
}

fn school_year_openapi_value(options: &BuildOptions) -> Value {
    json!({
        "type": "integer",
        "description": format!(
            "A school year between {} and {}",
            options.min_school_year, options.max_school_year
        ),
        "format": "int32",
        "minimum": options.min_school_year,
        "maximum": options.max_school_year
    })
}

/// A school year reference body.
pub fn school_year_enumeration_openapi(options: &BuildOptions) -> Value {
    json!({
        "type": "object",
        "description": "A school year enumeration",
        "properties": { "schoolYear": school_year_openapi_value(options) },
        "required": ["schoolYear"]
    })
}

/// Parameter schema of a query field with values held by `property`.
pub fn parameter_schema(model: &Model, property: PropertyId) -> Value {
    let property = model.property(property);
    match property.kind {
        PropertyKind::Scalar(scalar) => match scalar {
            ScalarType::Boolean => json!({ "type": "boolean" }),
            ScalarType::Duration => json!({ "type": "string", "maxLength": 30 }),
            ScalarType::Currency | ScalarType::Decimal | ScalarType::Percent | ScalarType::SharedDecimal => {
                json!({ "type": "number", "format": "double" })
            }
            ScalarType::Date => json!({ "type": "string", "format": "date" }),
            ScalarType::Datetime => json!({ "type": "string", "format": "date-time" }),
            ScalarType::Enumeration => json!({ "type": "string", "maxLength": 306 }),
            ScalarType::Integer
            | ScalarType::SharedInteger
            | ScalarType::Short
            | ScalarType::SharedShort
            | ScalarType::Year => json!({ "type": "integer", "format": "int32" }),
            ScalarType::String | ScalarType::SharedString => {
                let mut schema = Map::new();
                schema.insert("type".to_string(), json!("string"));
                if let Some(min) = property.facets.min_length {
                    schema.insert("minLength".to_string(), json!(min));
                }
                if let Some(max) = property.facets.max_length {
                    schema.insert("maxLength".to_string(), json!(max));
                }
                Value::Object(schema)
            }
            ScalarType::Time => json!({ "type": "string" }),
        },
        PropertyKind::Descriptor { .. } => json!({ "type": "string", "maxLength": 306 }),
        PropertyKind::SchoolYearEnumeration => json!({ "type": "integer", "format": "int32" }),
        _ => json!({ "type": "string" }),
    }
}

fn object_from(properties: Map<String, Value>, required: Vec<String>) -> Value {
    let mut object = Map::new();
    object.insert("type".to_string(), json!("object"));
    object.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        object.insert("required".to_string(), json!(required));
    }
    Value::Object(object)
}

fn array_from(items: Value, min_items: u64) -> Value {
    json!({ "type": "array", "items": items, "minItems": min_items, "uniqueItems": false })
}

fn is_required(model: &Model, property: PropertyId, modifier: &PropertyModifier) -> bool {
    let property = model.property(property);
    (property.is_part_of_identity || property.is_required || property.is_required_collection)
        && !modifier.optional_due_to_parent
}

/// Build the OpenAPI components of every resource.
pub fn build_openapi_components(
    model: &Model,
    mappings: &ApiMappings,
    collected: &CollectedProperties,
    identities: &FlattenedIdentities,
    options: &BuildOptions,
) -> Result<OpenApiAnnotations, InvariantError> {
    let mut result = OpenApiAnnotations::new("openApiComponents", model.entities().len());
    for &entity in model.processing_order() {
        let entity_def = model.entity(entity);
        if !entity_def.kind.is_resource() {
            continue;
        }
        let namespace = &model.namespace(entity_def.namespace).name;
        let mut builder = ComponentBuilder {
            model,
            mappings,
            collected,
            identities,
            options,
            component_prefix: format!("{}_{}", namespace, entity_def.name),
            collection_components: Vec::new(),
        };

        let components = match entity_def.kind {
            EntityKind::Descriptor => OpenApiComponents {
                request_body_name: format!("{}_{}Descriptor", namespace, entity_def.name),
                request_body: Some(descriptor_openapi()),
                ..OpenApiComponents::default()
            },
            kind if kind.is_extension() => {
                let body = builder.request_body(entity)?;
                let base_namespace = entity_def
                    .base_entity
                    .map(|base| &model.namespace(model.entity(base).namespace).name)
                    .unwrap_or(namespace);
                OpenApiComponents {
                    // The overlay is keyed by the body it extends.
                    request_body_name: format!("{}_{}", base_namespace, entity_def.name),
                    request_body: Some(body),
                    collection_components: builder.collection_components,
                    ..OpenApiComponents::default()
                }
            }
            _ => {
                let reference = builder.reference_component(entity)?;
                let body = if entity_def.is_abstract {
                    None
                } else {
                    Some(builder.request_body(entity)?)
                };
                OpenApiComponents {
                    request_body_name: builder.component_prefix.clone(),
                    request_body: body,
                    reference_name: Some(format!("{}_Reference", builder.component_prefix)),
                    reference: Some(reference),
                    collection_components: builder.collection_components,
                }
            }
        };
        debug!(
            entity = %entity_def.name,
            collections = components.collection_components.len(),
            "openapi components"
        );
        result.insert(entity, components);
    }
    Ok(result)
}

struct ComponentBuilder<'a> {
    model: &'a Model,
    mappings: &'a ApiMappings,
    collected: &'a CollectedProperties,
    identities: &'a FlattenedIdentities,
    options: &'a BuildOptions,
    component_prefix: String,
    collection_components: Vec<(String, Value)>,
}

impl ComponentBuilder<'_> {
    fn request_body(&mut self, entity: EntityId) -> Result<Value, InvariantError> {
        let (properties, required) = self.collected_object(entity, &PropertyModifier::default(), &[], true)?;
        let mut body = Map::new();
        body.insert("type".to_string(), json!("object"));
        body.insert(
            "description".to_string(),
            json!(self.model.entity(entity).documentation),
        );
        body.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            body.insert("required".to_string(), json!(required));
        }
        Ok(Value::Object(body))
    }

    /// The identity values a reference to `entity` carries.
    fn reference_component(&self, entity: EntityId) -> Result<Value, InvariantError> {
        let identity = self.identities.get(self.model, entity)?;
        let mut properties = Map::new();
        let mut required = Vec::new();
        for flattened in identity.omitting_merges() {
            let identity_property = flattened.identity_property;
            let mapping = self.mappings.get(self.model, identity_property)?;
            let special_prefix = identical_role_name_prefix(self.model, &flattened.property_chain);
            let key = document_key(&mapping.full_name, &PropertyModifier::default(), &special_prefix);
            let property = self.model.property(identity_property);
            let schema = if property.kind == PropertyKind::SchoolYearEnumeration
                && self.model.entity(property.parent).kind == EntityKind::Common
            {
                component_ref(SCHOOL_YEAR_REFERENCE_COMPONENT)
            } else {
                self.value_schema(identity_property)
            };
            if !required.contains(&key) {
                required.push(key.clone());
            }
            properties.insert(key, schema);
        }
        Ok(object_from(properties, required))
    }

    /// Name of the item component of a collection reached through `chain`.
    fn collection_name(&self, property: PropertyId, modifier: &PropertyModifier, chain: &[PropertyId]) -> String {
        let collapsed = |id: PropertyId| {
            let link = self.model.property(id);
            collapse_parent_name(&link.full_name, &self.model.entity(link.parent).name)
        };
        let mut name = format!("{}_", self.component_prefix);
        for &link in chain {
            name.push_str(&collapsed(link));
        }
        name.push_str(&modifier.prefixed_name(&collapsed(property)));
        name
    }

    fn collected_object(
        &mut self,
        entity: EntityId,
        modifier: &PropertyModifier,
        chain: &[PropertyId],
        top_level: bool,
    ) -> Result<(Map<String, Value>, Vec<String>), InvariantError> {
        let (model, mappings, collected_properties) = (self.model, self.mappings, self.collected);
        let mut properties = Map::new();
        let mut required = Vec::new();
        for collected in collected_properties.get(model, entity)? {
            let property_modifier = modifier.concat(&collected.modifier);
            let mapping = mappings.get(model, collected.property)?;
            let key = document_key(&mapping.top_level_name, &property_modifier, "");
            let schema = self.property_schema(collected.property, &property_modifier, chain, top_level)?;
            if is_required(model, collected.property, &property_modifier) {
                required.push(key.clone());
            }
            properties.insert(key, schema);
        }
        Ok((properties, required))
    }

    fn property_schema(
        &mut self,
        property_id: PropertyId,
        modifier: &PropertyModifier,
        chain: &[PropertyId],
        top_level: bool,
    ) -> Result<Value, InvariantError> {
        let (model, mappings) = (self.model, self.mappings);
        let property = model.property(property_id);
        let mapping = mappings.get(model, property_id)?;
        let min_items = u64::from(property.is_required_collection);
        let reference_ref = |referenced: EntityId| {
            let referenced = model.entity(referenced);
            component_ref(&format!(
                "{}_{}_Reference",
                model.namespace(referenced.namespace).name,
                referenced.name
            ))
        };

        if mapping.is_reference_collection || mapping.is_scalar_reference {
            let Some(referenced) = property.kind.referenced_entity() else {
                return Ok(object_from(Map::new(), Vec::new()));
            };
            if mapping.is_scalar_reference {
                return Ok(reference_ref(referenced));
            }
            let key = document_key(&mapping.reference_collection_name, modifier, "");
            let mut item = Map::new();
            item.insert(key.clone(), reference_ref(referenced));
            return Ok(array_from(object_from(item, vec![key]), min_items));
        }

        if mapping.is_common_collection || mapping.is_scalar_common {
            let Some(common) = property.kind.referenced_entity() else {
                return Ok(object_from(Map::new(), Vec::new()));
            };
            let mut inner_chain = chain.to_vec();
            inner_chain.push(property_id);
            let (properties, required) = self.collected_object(common, modifier, &inner_chain, false)?;
            let object = object_from(properties, required);
            if mapping.is_scalar_common {
                return Ok(object);
            }
            let name = self.collection_name(property_id, modifier, chain);
            self.collection_components.push((name.clone(), object));
            return Ok(array_from(component_ref(&name), min_items));
        }

        let school_year_in_common = property.kind == PropertyKind::SchoolYearEnumeration
            && model.entity(property.parent).kind == EntityKind::Common;
        if mapping.is_descriptor_collection || property.is_collection() {
            let element_name = if mapping.is_descriptor_collection {
                &mapping.descriptor_collection_name
            } else {
                &mapping.full_name
            };
            let key = document_key(element_name, modifier, "");
            let value = if school_year_in_common {
                component_ref(SCHOOL_YEAR_REFERENCE_COMPONENT)
            } else {
                self.value_schema(property_id)
            };
            let mut item = Map::new();
            item.insert(key.clone(), value);
            let name = self.collection_name(property_id, modifier, chain);
            self.collection_components.push((name.clone(), object_from(item, vec![key])));
            return Ok(array_from(component_ref(&name), min_items));
        }

        if property.kind == PropertyKind::SchoolYearEnumeration && (top_level || school_year_in_common) {
            return Ok(component_ref(SCHOOL_YEAR_REFERENCE_COMPONENT));
        }
        Ok(self.value_schema(property_id))
    }

    fn value_schema(&self, property_id: PropertyId) -> Value {
        let property = self.model.property(property_id);
        let mut schema = match property.kind {
            PropertyKind::SchoolYearEnumeration => return school_year_openapi_value(self.options),
            _ => match parameter_schema(self.model, property_id) {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        };
        if let PropertyKind::Scalar(
            ScalarType::Integer | ScalarType::SharedInteger | ScalarType::Short | ScalarType::SharedShort,
        ) = property.kind
        {
            let bound = |value: &Option<String>| value.as_deref().and_then(|v| v.trim().parse::<i64>().ok());
            if let Some(min) = bound(&property.facets.min_value) {
                schema.insert("minimum".to_string(), json!(min));
            }
            if let Some(max) = bound(&property.facets.max_value) {
                schema.insert("maximum".to_string(), json!(max));
            }
        }
        schema.insert("description".to_string(), json!(property.documentation));
        Value::Object(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{build_api_mappings, collect_properties};
    use crate::flatten::flatten_identities;
    use crate::loader::load_model_str;
    use crate::reference_component::build_reference_components;

    fn components(json: &str) -> (Model, OpenApiAnnotations) {
        let model = Model::build(&load_model_str(json).unwrap()).unwrap();
        let components = build_reference_components(&model).unwrap();
        let identities = flatten_identities(&model, &components).unwrap();
        let mappings = build_api_mappings(&model);
        let collected = collect_properties(&model);
        let openapi =
            build_openapi_components(&model, &mappings, &collected, &identities, &BuildOptions::default()).unwrap();
        (model, openapi)
    }

    const STUDENT: &str = r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
        "entities": [
            { "kind": "descriptor", "name": "AddressType" },
            { "kind": "domainEntity", "name": "Student", "documentation": "A student", "properties": [
                { "name": "StudentUniqueId", "type": "string", "isPartOfIdentity": true, "maxLength": 32 },
                { "name": "StudentAddress", "type": "common", "isRequiredCollection": true },
                { "name": "School", "type": "domainEntity" }
            ]},
            { "kind": "common", "name": "StudentAddress", "properties": [
                { "name": "AddressType", "type": "descriptor", "isPartOfIdentity": true },
                { "name": "Period", "type": "common", "isOptionalCollection": true }
            ]},
            { "kind": "common", "name": "Period", "properties": [
                { "name": "BeginDate", "type": "date", "isPartOfIdentity": true }
            ]},
            { "kind": "domainEntity", "name": "School", "properties": [
                { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
            ]}
        ]}]}"#;

    #[test]
    fn request_body_refers_to_components() {
        let (model, openapi) = components(STUDENT);
        let student = openapi
            .get(&model, model.find_entity("EdFi", "Student", false).unwrap())
            .unwrap();

        assert_eq!(student.request_body_name, "EdFi_Student");
        let body = student.request_body.as_ref().unwrap();
        assert_eq!(body["required"], json!(["studentUniqueId", "addresses"]));
        assert_eq!(
            body["properties"]["schoolReference"],
            json!({ "$ref": "#/components/schemas/EdFi_School_Reference" })
        );
        assert_eq!(body["properties"]["addresses"]["minItems"], 1);
        assert_eq!(
            body["properties"]["addresses"]["items"],
            json!({ "$ref": "#/components/schemas/EdFi_Student_Address" })
        );

        let names: Vec<&str> = student
            .collection_components
            .iter()
            .map(|(name, _)| name.as_str())
            .collect();
        assert_eq!(names, vec!["EdFi_Student_AddressPeriod", "EdFi_Student_Address"]);
    }

    #[test]
    fn school_year_collection_in_common_refers_to_enumeration() {
        let (model, openapi) = components(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Student", "properties": [
                        { "name": "StudentUniqueId", "type": "string", "isPartOfIdentity": true },
                        { "name": "Program", "type": "common", "isOptionalCollection": true }
                    ]},
                    { "kind": "common", "name": "Program", "properties": [
                        { "name": "ProgramName", "type": "string", "isPartOfIdentity": true },
                        { "name": "SchoolYear", "type": "schoolYearEnumeration", "isOptionalCollection": true }
                    ]}
                ]}]}"#,
        );
        let student = openapi
            .get(&model, model.find_entity("EdFi", "Student", false).unwrap())
            .unwrap();
        let component = |reference: &Value| {
            let name = reference["$ref"].as_str().unwrap().trim_start_matches("#/components/schemas/");
            student
                .collection_components
                .iter()
                .find(|(candidate, _)| candidate == name)
                .map(|(_, schema)| schema.clone())
                .unwrap()
        };

        let body = student.request_body.as_ref().unwrap();
        let program = component(&body["properties"]["programs"]["items"]);
        let item = component(&program["properties"]["schoolYears"]["items"]);
        assert_eq!(
            item["properties"]["schoolYear"],
            json!({ "$ref": "#/components/schemas/EdFi_SchoolYearTypeReference" })
        );
    }

    #[test]
    fn reference_component_lists_identity() {
        let (model, openapi) = components(STUDENT);
        let school = openapi
            .get(&model, model.find_entity("EdFi", "School", false).unwrap())
            .unwrap();
        assert_eq!(school.reference_name.as_deref(), Some("EdFi_School_Reference"));
        assert_eq!(
            school.reference.as_ref().unwrap(),
            &json!({
                "type": "object",
                "properties": { "schoolId": { "type": "integer", "format": "int32", "description": "" } },
                "required": ["schoolId"]
            })
        );
        assert!(school.schemas().contains_key("EdFi_School"));
    }

    #[test]
    fn descriptors_share_request_body() {
        let (model, openapi) = components(STUDENT);
        let descriptor = openapi
            .get(&model, model.find_entity("EdFi", "AddressType", true).unwrap())
            .unwrap();
        assert_eq!(descriptor.request_body_name, "EdFi_AddressTypeDescriptor");
        assert_eq!(descriptor.request_body.as_ref().unwrap(), &descriptor_openapi());
        assert!(descriptor.reference.is_none());
    }
}
