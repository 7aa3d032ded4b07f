//! JSON Schema documents for resource bodies.
//!
//! The insert schema mirrors the all-paths walk: every key named here is the
//! key a JSON path walks through. Update and query shapes derive from it.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::annotation::EntityAnnotations;
use crate::collect::{ApiMappings, CollectedProperties};
use crate::error::InvariantError;
use crate::flatten::FlattenedIdentities;
use crate::model::{EntityId, EntityKind, Model, PropertyId, PropertyKind, ScalarType};
use crate::naming::{document_key, identical_role_name_prefix, project_endpoint_name, PropertyModifier};
use crate::types::{BuildOptions, SchemaVariant, JSON_SCHEMA_DIALECT};

pub type JsonSchemas = EntityAnnotations<Value>;

const DESCRIPTOR_DESCRIPTION: &str = "An Ed-Fi Descriptor";

/// Build the insert schema of every resource.
pub fn build_json_schemas(
    model: &Model,
    mappings: &ApiMappings,
    collected: &CollectedProperties,
    identities: &FlattenedIdentities,
    options: &BuildOptions,
) -> Result<JsonSchemas, InvariantError> {
    let mut schemas = JsonSchemas::new("jsonSchemaForInsert", model.entities().len());
    let builder = SchemaBuilder {
        model,
        mappings,
        collected,
        identities,
        options,
    };

    for &entity in model.processing_order() {
        let kind = model.entity(entity).kind;
        if !kind.is_resource() {
            continue;
        }
        let schema = if kind == EntityKind::Descriptor {
            descriptor_schema()
        } else if kind.is_extension() {
            builder.extension_schema(entity)?
        } else {
            builder.resource_schema(entity)?
        };
        debug!(entity = %model.entity(entity).name, "json schema");
        schemas.insert(entity, schema);
    }
    Ok(schemas)
}

/// The update or query shape of an insert schema.
pub fn schema_for_variant(insert: &Value, variant: SchemaVariant) -> Value {
    let mut schema = insert.clone();
    match variant {
        SchemaVariant::Insert => {}
        SchemaVariant::Update => {
            if let Some(Value::Object(properties)) = schema.get_mut("properties") {
                let mut with_id = Map::new();
                with_id.insert(
                    "id".to_string(),
                    json!({ "type": "string", "description": "The item id" }),
                );
                with_id.extend(std::mem::take(properties));
                *properties = with_id;
            }
            if let Value::Object(map) = &mut schema {
                let required = map
                    .entry("required")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(required) = required {
                    required.insert(0, Value::String("id".to_string()));
                }
            }
        }
        SchemaVariant::Query => relax_required(&mut schema),
    }
    schema
}

/// Recursively drop `required` and `minItems` so any subset of fields validates.
fn relax_required(value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };
    map.remove("required");
    map.remove("minItems");

    for (key, child) in map.iter_mut() {
        match key.as_str() {
            "properties" => {
                if let Value::Object(properties) = child {
                    for property in properties.values_mut() {
                        relax_required(property);
                    }
                }
            }
            "items" => relax_required(child),
            _ => {}
        }
    }
}

/// Shared body schema of every descriptor resource.
pub fn descriptor_schema() -> Value {
    json!({
        "$schema": JSON_SCHEMA_DIALECT,
        "additionalProperties": false,
        "description": DESCRIPTOR_DESCRIPTION,
        "properties": {
            "namespace": { "type": "string", "maxLength": 255, "description": "The descriptor namespace as a URI" },
            "codeValue": { "type": "string", "maxLength": 50, "description": "The descriptor value" },
            "shortDescription": { "type": "string", "maxLength": 75, "description": "A shortened description for the descriptor" },
            "description": { "type": "string", "maxLength": 1024, "description": "The description of the descriptor" },
            "effectiveBeginDate": { "type": "string", "format": "date", "description": "The beginning date of the period when the descriptor is in effect" },
            "effectiveEndDate": { "type": "string", "format": "date", "description": "The end date of the period when the descriptor is in effect" }
        },
        "required": ["namespace", "codeValue", "shortDescription"],
        "title": "EdFi.Descriptor",
        "type": "object"
    })
}

/// A school year value bounded by the configured range.
pub fn school_year_schema(options: &BuildOptions) -> Value {
    json!({
        "type": "integer",
        "description": format!(
            "A school year between {} and {}",
            options.min_school_year, options.max_school_year
        ),
        "minimum": options.min_school_year,
        "maximum": options.max_school_year
    })
}

/// An object wrapping a school year, the shape of a school year reference.
pub fn school_year_enumeration_schema(options: &BuildOptions) -> Value {
    json!({
        "type": "object",
        "title": "EdFi.SchoolYearType",
        "description": "A school year enumeration",
        "properties": { "schoolYear": school_year_schema(options) },
        "additionalProperties": false,
        "required": ["schoolYear"]
    })
}

/// Body schema of the SchoolYearType resource itself.
pub fn school_year_type_schema(options: &BuildOptions) -> Value {
    json!({
        "$schema": JSON_SCHEMA_DIALECT,
        "additionalProperties": false,
        "description": "A school year enumeration",
        "properties": {
            "schoolYear": school_year_schema(options),
            "currentSchoolYear": { "type": "boolean", "description": "The code for the current school year" },
            "schoolYearDescription": { "type": "string", "maxLength": 50, "description": "The description for the SchoolYear type" }
        },
        "required": ["schoolYear", "currentSchoolYear", "schoolYearDescription"],
        "title": "EdFi.SchoolYearType",
        "type": "object"
    })
}

fn object_schema(properties: Map<String, Value>, required: Vec<String>) -> Value {
    let mut schema = Map::new();
    schema.insert("type".to_string(), json!("object"));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("additionalProperties".to_string(), Value::Bool(false));
    if !required.is_empty() {
        schema.insert("required".to_string(), json!(required));
    }
    Value::Object(schema)
}

fn array_schema(items: Value, min_items: u64) -> Value {
    json!({
        "type": "array",
        "items": items,
        "minItems": min_items,
        "uniqueItems": false
    })
}

fn descriptor_value_schema(description: &str) -> Value {
    let description = if description.is_empty() {
        DESCRIPTOR_DESCRIPTION
    } else {
        description
    };
    json!({ "type": "string", "description": description })
}

fn is_required(model: &Model, property: PropertyId, modifier: &PropertyModifier) -> bool {
    let property = model.property(property);
    (property.is_part_of_identity || property.is_required || property.is_required_collection)
        && !modifier.optional_due_to_parent
}

/// A facet value as a JSON number, integral when `integral`.
fn facet_number(value: Option<&String>, integral: bool) -> Option<Value> {
    let value = value?.trim();
    if integral {
        value.parse::<i64>().ok().map(Value::from)
    } else {
        value
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
    }
}

struct SchemaBuilder<'a> {
    model: &'a Model,
    mappings: &'a ApiMappings,
    collected: &'a CollectedProperties,
    identities: &'a FlattenedIdentities,
    options: &'a BuildOptions,
}

impl SchemaBuilder<'_> {
    fn resource_schema(&self, entity: EntityId) -> Result<Value, InvariantError> {
        let (mut properties, required) = self.collected_object(entity, &PropertyModifier::default(), true)?;
        properties.insert(
            "_ext".to_string(),
            json!({
                "description": "optional extension collection",
                "type": "object",
                "properties": {},
                "additionalProperties": true
            }),
        );

        let entity_def = self.model.entity(entity);
        let mut schema = Map::new();
        schema.insert("$schema".to_string(), json!(JSON_SCHEMA_DIALECT));
        schema.insert("additionalProperties".to_string(), Value::Bool(false));
        schema.insert("description".to_string(), json!(entity_def.documentation));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), json!(required));
        }
        schema.insert(
            "title".to_string(),
            json!(format!("{}.{}", self.model.namespace(entity_def.namespace).name, entity_def.name)),
        );
        schema.insert("type".to_string(), json!("object"));
        Ok(Value::Object(schema))
    }

    /// Extension properties nest under `_ext.<project>`.
    fn extension_schema(&self, entity: EntityId) -> Result<Value, InvariantError> {
        let (properties, required) = self.collected_object(entity, &PropertyModifier::default(), true)?;
        let project = project_endpoint_name(self.model.project_name(entity));
        let mut ext = Map::new();
        ext.insert(project.clone(), object_schema(properties, required));

        let entity_def = self.model.entity(entity);
        Ok(json!({
            "$schema": JSON_SCHEMA_DIALECT,
            "additionalProperties": true,
            "description": entity_def.documentation,
            "properties": {
                "_ext": {
                    "additionalProperties": true,
                    "description": "optional extension collection",
                    "properties": Value::Object(ext),
                    "required": [project],
                    "type": "object"
                }
            },
            "required": ["_ext"],
            "title": format!("{}.{}", self.model.namespace(entity_def.namespace).name, entity_def.name),
            "type": "object"
        }))
    }

    /// Properties and required keys of an entity or common body.
    fn collected_object(
        &self,
        entity: EntityId,
        modifier: &PropertyModifier,
        top_level: bool,
    ) -> Result<(Map<String, Value>, Vec<String>), InvariantError> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for collected in self.collected.get(self.model, entity)? {
            let property_modifier = modifier.concat(&collected.modifier);
            let mapping = self.mappings.get(self.model, collected.property)?;
            let key = document_key(&mapping.top_level_name, &property_modifier, "");
            let schema = self.property_schema(collected.property, &property_modifier, top_level)?;
            if is_required(self.model, collected.property, &property_modifier) {
                required.push(key.clone());
            }
            properties.insert(key, schema);
        }
        Ok((properties, required))
    }

    fn property_schema(
        &self,
        property_id: PropertyId,
        modifier: &PropertyModifier,
        top_level: bool,
    ) -> Result<Value, InvariantError> {
        let property = self.model.property(property_id);
        let mapping = self.mappings.get(self.model, property_id)?;
        let min_items = u64::from(property.is_required_collection);

        if mapping.is_reference_collection {
            let reset = PropertyModifier {
                optional_due_to_parent: modifier.optional_due_to_parent,
                parent_prefixes: Vec::new(),
            };
            let key = document_key(&mapping.reference_collection_name, modifier, "");
            let mut item = Map::new();
            item.insert(key.clone(), self.reference_schema(property_id, &reset)?);
            return Ok(array_schema(object_schema(item, vec![key]), min_items));
        }
        if mapping.is_scalar_reference {
            return self.reference_schema(property_id, modifier);
        }
        if mapping.is_descriptor_collection {
            let key = document_key(&mapping.descriptor_collection_name, modifier, "");
            let mut item = Map::new();
            item.insert(key.clone(), descriptor_value_schema(&property.documentation));
            return Ok(array_schema(object_schema(item, vec![key]), min_items));
        }
        if mapping.is_common_collection || mapping.is_scalar_common {
            let Some(common) = property.kind.referenced_entity() else {
                return Ok(object_schema(Map::new(), Vec::new()));
            };
            let (properties, required) = self.collected_object(common, modifier, false)?;
            let object = object_schema(properties, required);
            return Ok(if mapping.is_common_collection {
                array_schema(object, min_items)
            } else {
                object
            });
        }
        let school_year_in_common = property.kind == PropertyKind::SchoolYearEnumeration
            && self.model.entity(property.parent).kind == EntityKind::Common;
        if property.is_collection() {
            let key = document_key(&mapping.full_name, modifier, "");
            let value = if school_year_in_common {
                school_year_enumeration_schema(self.options)
            } else {
                self.value_schema(property_id)
            };
            let mut item = Map::new();
            item.insert(key.clone(), value);
            return Ok(array_schema(object_schema(item, vec![key]), min_items));
        }
        if property.kind == PropertyKind::SchoolYearEnumeration && (top_level || school_year_in_common) {
            return Ok(school_year_enumeration_schema(self.options));
        }
        Ok(self.value_schema(property_id))
    }

    /// A reference object: the referenced entity's surviving identity values.
    fn reference_schema(&self, property_id: PropertyId, modifier: &PropertyModifier) -> Result<Value, InvariantError> {
        let Some(referenced) = self.model.property(property_id).kind.referenced_entity() else {
            return Ok(object_schema(Map::new(), Vec::new()));
        };
        let identity = self.identities.get(self.model, referenced)?;

        let mut properties = Map::new();
        let mut required = Vec::new();
        for flattened in identity.omitting_merges() {
            let identity_property = flattened.identity_property;
            let mapping = self.mappings.get(self.model, identity_property)?;
            let special_prefix = identical_role_name_prefix(self.model, &flattened.property_chain);
            let key = document_key(&mapping.full_name, modifier, &special_prefix);

            let property = self.model.property(identity_property);
            let in_common = self.model.entity(property.parent).kind == EntityKind::Common;
            let schema = if property.kind == PropertyKind::SchoolYearEnumeration && in_common {
                school_year_enumeration_schema(self.options)
            } else {
                self.value_schema(identity_property)
            };

            if is_required(self.model, identity_property, modifier) && !required.contains(&key) {
                required.push(key.clone());
            }
            properties.insert(key, schema);
        }
        Ok(object_schema(properties, required))
    }

    /// Schema of a single value.
    fn value_schema(&self, property_id: PropertyId) -> Value {
        let property = self.model.property(property_id);
        let description = property.documentation.as_str();
        let facets = &property.facets;

        let scalar = match property.kind {
            PropertyKind::Descriptor { .. } => return descriptor_value_schema(description),
            PropertyKind::SchoolYearEnumeration => return school_year_schema(self.options),
            PropertyKind::Scalar(scalar) => scalar,
            _ => return json!({ "type": "object", "description": description }),
        };

        let mut schema = Map::new();
        let mut set = |key: &str, value: Value| {
            schema.insert(key.to_string(), value);
        };
        match scalar {
            ScalarType::Boolean => set("type", json!("boolean")),
            ScalarType::Currency | ScalarType::Decimal | ScalarType::Percent | ScalarType::SharedDecimal => {
                set("type", json!("number"));
                if let Some(min) = facet_number(facets.min_value.as_ref(), false) {
                    set("minimum", min);
                }
                if let Some(max) = facet_number(facets.max_value.as_ref(), false) {
                    set("maximum", max);
                }
            }
            ScalarType::Duration => set("type", json!("number")),
            ScalarType::Integer | ScalarType::SharedInteger | ScalarType::Short | ScalarType::SharedShort => {
                set("type", json!("integer"));
                if let Some(min) = facet_number(facets.min_value.as_ref(), true) {
                    set("minimum", min);
                }
                if let Some(max) = facet_number(facets.max_value.as_ref(), true) {
                    set("maximum", max);
                }
            }
            ScalarType::Year => set("type", json!("integer")),
            ScalarType::Date => {
                set("type", json!("string"));
                set("format", json!("date"));
            }
            ScalarType::Datetime => {
                set("type", json!("string"));
                set("format", json!("date-time"));
            }
            ScalarType::Time => {
                set("type", json!("string"));
                set("format", json!("time"));
            }
            ScalarType::Enumeration | ScalarType::SharedString | ScalarType::String => {
                set("type", json!("string"));
                if let Some(min) = facets.min_length {
                    set("minLength", json!(min));
                }
                if let Some(max) = facets.max_length {
                    set("maxLength", json!(max));
                }
            }
        }
        schema.insert("description".to_string(), json!(description));
        Value::Object(schema)
    }
}
