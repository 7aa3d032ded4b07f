//! Maps derived from the all-JSON-paths map.
//!
//! The document paths of a resource are the top-level entries of its
//! all-paths map, each classified as a reference, a descriptor or a scalar.
//! A reference entry pairs every identity JSON path of the referenced resource
//! with where that value sits inside the referencing document. Identity JSON
//! paths, query fields and the type coercion lists are read off the same
//! entries.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, error};

use crate::annotation::EntityAnnotations;
use crate::error::InvariantError;
use crate::flatten::{FlattenedIdentities, FlattenedIdentityProperty};
use crate::json_path::{JsonPath, PropertyPath};
use crate::json_paths::{AllJsonPaths, JsonPathsInfo, JsonPathsMapping};
use crate::model::{EntityId, EntityKind, Model, PropertyId, PropertyKind, ScalarType};
use crate::naming::resource_name;
use crate::types::{PathType, SCHOOL_YEAR_PROJECT_NAME, SCHOOL_YEAR_RESOURCE_NAME};

/// Where one identity value of a referenced resource sits in the referencing document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceJsonPaths {
    pub identity_json_path: JsonPath,
    pub reference_json_path: JsonPath,
    #[serde(rename = "type")]
    pub path_type: PathType,
    /// The property holding the value in the referencing document.
    #[serde(skip)]
    pub source_property: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReferencePaths {
    pub is_reference: bool,
    pub is_descriptor: bool,
    pub project_name: String,
    pub resource_name: String,
    pub reference_json_paths: Vec<ReferenceJsonPaths>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorReferencePath {
    pub is_reference: bool,
    pub is_descriptor: bool,
    pub project_name: String,
    pub resource_name: String,
    pub path: JsonPath,
    #[serde(rename = "type")]
    pub path_type: PathType,
    #[serde(skip)]
    pub source_property: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarPath {
    pub is_reference: bool,
    pub path: JsonPath,
    #[serde(rename = "type")]
    pub path_type: PathType,
    /// Absent for hardcoded resources.
    #[serde(skip)]
    pub source_property: Option<PropertyId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DocumentPaths {
    Reference(DocumentReferencePaths),
    Descriptor(DescriptorReferencePath),
    Scalar(ScalarPath),
}

pub type DocumentPathsMapping = BTreeMap<PropertyPath, DocumentPaths>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct QueryFieldPathInfo {
    pub path: JsonPath,
    #[serde(rename = "type")]
    pub path_type: PathType,
    #[serde(skip)]
    pub source_property: Option<PropertyId>,
}

/// Query field name to the document paths it filters on.
pub type QueryFieldMapping = BTreeMap<String, Vec<QueryFieldPathInfo>>;

/// Every map derived from a resource's all-paths map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedPaths {
    pub document_paths: DocumentPathsMapping,
    /// Sorted.
    pub identity_json_paths: Vec<JsonPath>,
    /// Property paths of the identity values, in identity order.
    pub identity_path_order: Vec<PropertyPath>,
    pub query_fields: QueryFieldMapping,
    pub boolean_json_paths: Vec<JsonPath>,
    pub numeric_json_paths: Vec<JsonPath>,
    pub date_json_paths: Vec<JsonPath>,
    pub date_time_json_paths: Vec<JsonPath>,
}

pub type DerivedPathsAnnotations = EntityAnnotations<DerivedPaths>;

/// Coercion type of the value held by a property.
pub fn path_type(kind: &PropertyKind) -> PathType {
    match kind {
        PropertyKind::Scalar(scalar) => match scalar {
            ScalarType::Boolean => PathType::Boolean,
            ScalarType::Currency
            | ScalarType::Decimal
            | ScalarType::Duration
            | ScalarType::Percent
            | ScalarType::SharedDecimal
            | ScalarType::Integer
            | ScalarType::SharedInteger
            | ScalarType::Short
            | ScalarType::SharedShort
            | ScalarType::Year => PathType::Number,
            ScalarType::Date => PathType::Date,
            ScalarType::Datetime => PathType::DateTime,
            ScalarType::Time => PathType::Time,
            ScalarType::Enumeration | ScalarType::SharedString | ScalarType::String => PathType::String,
        },
        PropertyKind::SchoolYearEnumeration => PathType::Number,
        _ => PathType::String,
    }
}

/// Property kinds that hold a single value in a document.
fn is_scalar_like(kind: &PropertyKind) -> bool {
    matches!(
        kind,
        PropertyKind::Scalar(_) | PropertyKind::Descriptor { .. } | PropertyKind::SchoolYearEnumeration
    )
}

/// The all-paths key of a flattened identity property.
pub fn flattened_identity_key(model: &Model, flattened: &FlattenedIdentityProperty) -> PropertyPath {
    let terminal = flattened.terminal_path();
    if model.property(flattened.identity_property).kind.is_descriptor() {
        PropertyPath::new(format!("{}Descriptor", terminal))
    } else {
        terminal.clone()
    }
}

/// Derive the document paths and related maps of every resource.
pub fn build_derived_paths(
    model: &Model,
    all_paths: &AllJsonPaths,
    identities: &FlattenedIdentities,
) -> Result<DerivedPathsAnnotations, InvariantError> {
    let mut result = DerivedPathsAnnotations::new("derivedPaths", model.entities().len());
    for &entity in model.processing_order() {
        let kind = model.entity(entity).kind;
        if kind == EntityKind::Descriptor {
            result.insert(entity, descriptor_derived_paths());
            continue;
        }
        let Some(mapping) = all_paths.try_get(entity) else {
            continue;
        };

        let document_paths = document_paths_for(model, entity, mapping, all_paths)?;
        let (identity_json_paths, identity_path_order) =
            identity_paths_for(model, entity, mapping, identities)?;
        let mut derived = DerivedPaths {
            query_fields: query_fields_for(&document_paths),
            document_paths,
            identity_json_paths,
            identity_path_order,
            ..DerivedPaths::default()
        };
        fill_type_coercion(&mut derived);

        debug!(
            entity = %model.entity(entity).name,
            document_paths = derived.document_paths.len(),
            identity = derived.identity_json_paths.len(),
            "derived paths"
        );
        result.insert(entity, derived);
    }
    Ok(result)
}

/// Descriptors all share one document shape. Their query parameters are
/// fixed, so no query fields are derived.
fn descriptor_derived_paths() -> DerivedPaths {
    let path = |name: &str| JsonPath::root().child(name);
    DerivedPaths {
        identity_json_paths: vec![path("codeValue"), path("namespace")],
        identity_path_order: vec![PropertyPath::new("Namespace"), PropertyPath::new("CodeValue")],
        ..DerivedPaths::default()
    }
}

fn document_paths_for(
    model: &Model,
    entity: EntityId,
    mapping: &JsonPathsMapping,
    all_paths: &AllJsonPaths,
) -> Result<DocumentPathsMapping, InvariantError> {
    let mut result = DocumentPathsMapping::new();
    for (property_path, info) in mapping {
        if !info.is_top_level {
            continue;
        }
        let Some(terminal) = info.terminal_property else {
            continue;
        };
        let property = model.property(terminal);
        let Some(first) = info.pairs.first() else {
            continue;
        };

        let paths = match property.kind {
            PropertyKind::Reference { referenced, .. } => DocumentPaths::Reference(DocumentReferencePaths {
                is_reference: true,
                is_descriptor: false,
                project_name: model.project_name(referenced).to_string(),
                resource_name: resource_name(model, referenced),
                reference_json_paths: reference_json_paths(
                    model,
                    entity,
                    property_path,
                    referenced,
                    mapping,
                    all_paths,
                )?,
            }),
            PropertyKind::Descriptor { descriptor } => DocumentPaths::Descriptor(DescriptorReferencePath {
                is_reference: true,
                is_descriptor: true,
                project_name: model.project_name(descriptor).to_string(),
                resource_name: resource_name(model, descriptor),
                path: first.json_path.clone(),
                path_type: PathType::String,
                source_property: terminal,
            }),
            PropertyKind::SchoolYearEnumeration => DocumentPaths::Reference(DocumentReferencePaths {
                is_reference: true,
                is_descriptor: false,
                project_name: SCHOOL_YEAR_PROJECT_NAME.to_string(),
                resource_name: SCHOOL_YEAR_RESOURCE_NAME.to_string(),
                reference_json_paths: vec![ReferenceJsonPaths {
                    identity_json_path: JsonPath::root().child("schoolYear"),
                    reference_json_path: first.json_path.clone(),
                    path_type: PathType::Number,
                    source_property: terminal,
                }],
            }),
            _ => DocumentPaths::Scalar(ScalarPath {
                is_reference: false,
                path: first.json_path.clone(),
                path_type: path_type(&property.kind),
                source_property: Some(terminal),
            }),
        };
        result.insert(property_path.clone(), paths);
    }
    Ok(result)
}

/// Entries below `start` holding exactly one scalar value.
fn deep_scalar_paths<'a>(
    model: &Model,
    mapping: &'a JsonPathsMapping,
    start: &PropertyPath,
) -> Vec<(PropertyPath, &'a JsonPathsInfo)> {
    mapping
        .iter()
        .filter_map(|(key, info)| {
            let stripped = key.strip_prefix(start)?;
            match info.pairs.as_slice() {
                [pair] if is_scalar_like(&model.property(pair.source_property).kind) => Some((stripped, info)),
                _ => None,
            }
        })
        .collect()
}

fn reference_json_paths(
    model: &Model,
    entity: EntityId,
    property_path: &PropertyPath,
    referenced: EntityId,
    mapping: &JsonPathsMapping,
    all_paths: &AllJsonPaths,
) -> Result<Vec<ReferenceJsonPaths>, InvariantError> {
    let referenced_paths = all_paths.get(model, referenced)?;
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();

    for (identity_key, referencing) in deep_scalar_paths(model, mapping, property_path) {
        let Some(matching) = referenced_paths.get(&identity_key) else {
            let entity = model.entity(entity).name.clone();
            error!(entity = %entity, property_path = %property_path, identity_path = %identity_key, "reference json path missing");
            return Err(InvariantError::MissingReferenceJsonPath {
                entity,
                referenced: model.entity(referenced).name.clone(),
                property_path: property_path.to_string(),
                identity_path: identity_key.to_string(),
            });
        };

        let (Some(referencing_pair), [identity_pair]) = (referencing.pairs.first(), matching.pairs.as_slice()) else {
            continue;
        };
        if !is_scalar_like(&model.property(identity_pair.source_property).kind) {
            continue;
        }
        let paths = ReferenceJsonPaths {
            identity_json_path: identity_pair.json_path.clone(),
            reference_json_path: referencing_pair.json_path.clone(),
            path_type: path_type(&model.property(referencing_pair.source_property).kind),
            source_property: referencing_pair.source_property,
        };
        if seen.insert((paths.identity_json_path.clone(), paths.reference_json_path.clone())) {
            result.push(paths);
        }
    }

    result.sort_by(|a, b| a.identity_json_path.cmp(&b.identity_json_path));
    Ok(result)
}

fn identity_paths_for(
    model: &Model,
    entity: EntityId,
    mapping: &JsonPathsMapping,
    identities: &FlattenedIdentities,
) -> Result<(Vec<JsonPath>, Vec<PropertyPath>), InvariantError> {
    let identity = identities.get(model, entity)?;
    let mut json_paths = BTreeSet::new();
    let mut order = Vec::new();

    for flattened in identity.omitting_merges() {
        let key = flattened_identity_key(model, flattened);
        let Some(info) = mapping.get(&key) else {
            let entity = model.entity(entity).name.clone();
            error!(entity = %entity, property_path = %key, "identity json path missing");
            return Err(InvariantError::MissingIdentityJsonPath {
                entity,
                property_path: key.to_string(),
            });
        };
        json_paths.extend(info.json_paths().cloned());
        order.push(key);
    }
    Ok((json_paths.into_iter().collect(), order))
}

/// Query fields are named by the last segment of each path outside any array.
fn query_fields_for(document_paths: &DocumentPathsMapping) -> QueryFieldMapping {
    let mut fields: BTreeMap<String, BTreeSet<QueryFieldPathInfo>> = BTreeMap::new();
    let mut add = |path: &JsonPath, path_type: PathType, source_property: Option<PropertyId>| {
        if path.array_depth() > 0 {
            return;
        }
        if let Some(name) = path.last_name() {
            fields.entry(name.to_string()).or_default().insert(QueryFieldPathInfo {
                path: path.clone(),
                path_type,
                source_property,
            });
        }
    };

    for paths in document_paths.values() {
        match paths {
            DocumentPaths::Reference(reference) => {
                for reference_paths in &reference.reference_json_paths {
                    add(
                        &reference_paths.reference_json_path,
                        reference_paths.path_type,
                        Some(reference_paths.source_property),
                    );
                }
            }
            DocumentPaths::Descriptor(descriptor) => {
                add(&descriptor.path, descriptor.path_type, Some(descriptor.source_property))
            }
            DocumentPaths::Scalar(scalar) => add(&scalar.path, scalar.path_type, scalar.source_property),
        }
    }

    fields
        .into_iter()
        .map(|(name, infos)| (name, infos.into_iter().collect()))
        .collect()
}

fn fill_type_coercion(derived: &mut DerivedPaths) {
    let mut by_type: BTreeMap<PathType, BTreeSet<JsonPath>> = BTreeMap::new();
    for paths in derived.document_paths.values() {
        match paths {
            DocumentPaths::Reference(reference) => {
                for reference_paths in &reference.reference_json_paths {
                    by_type
                        .entry(reference_paths.path_type)
                        .or_default()
                        .insert(reference_paths.reference_json_path.clone());
                }
            }
            DocumentPaths::Scalar(scalar) => {
                by_type.entry(scalar.path_type).or_default().insert(scalar.path.clone());
            }
            DocumentPaths::Descriptor(_) => {}
        }
    }

    let mut take = |path_type: PathType| -> Vec<JsonPath> {
        by_type.remove(&path_type).map(|set| set.into_iter().collect()).unwrap_or_default()
    };
    derived.boolean_json_paths = take(PathType::Boolean);
    derived.numeric_json_paths = take(PathType::Number);
    derived.date_json_paths = take(PathType::Date);
    derived.date_time_json_paths = take(PathType::DateTime);
}
