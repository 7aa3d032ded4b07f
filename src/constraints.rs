//! Equality and array uniqueness constraints.
//!
//! Equality constraints come from two sources: merge directives, and column
//! conflicts where two property paths of one resource land in one storage
//! column. Array uniqueness constraints list the identity paths of each
//! collection, grouped by the top-level collection they belong to.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, error, trace};

use crate::annotation::EntityAnnotations;
use crate::collect::CollectedProperties;
use crate::error::InvariantError;
use crate::json_path::{JsonPath, PropertyPath};
use crate::json_paths::{has_document_properties, AllJsonPaths, JsonPathsInfo, JsonPathsMapping};
use crate::model::{ColumnConflict, EntityId, Model, PropertyId, PropertyKind};

/// Two document locations that must hold the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EqualityConstraint {
    pub source_json_path: JsonPath,
    pub target_json_path: JsonPath,
}

impl EqualityConstraint {
    fn same_pair(&self, a: &JsonPath, b: &JsonPath) -> bool {
        (&self.source_json_path == a && &self.target_json_path == b)
            || (&self.source_json_path == b && &self.target_json_path == a)
    }
}

/// Paths whose combined values must be unique across the elements of an
/// array. Nested constraints apply within each element of `base_path`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayUniquenessConstraint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<JsonPath>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<JsonPath>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested_constraints: Vec<ArrayUniquenessConstraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Sorted by source, then target path.
    pub equality: Vec<EqualityConstraint>,
    pub array_uniqueness: Vec<ArrayUniquenessConstraint>,
}

pub type ConstraintAnnotations = EntityAnnotations<Constraints>;

/// Derive the constraints of every resource. Descriptors get none.
pub fn build_constraints(
    model: &Model,
    collected: &CollectedProperties,
    all_paths: &AllJsonPaths,
) -> Result<ConstraintAnnotations, InvariantError> {
    let mut equality: BTreeMap<EntityId, Vec<EqualityConstraint>> = BTreeMap::new();

    for &entity in model.processing_order() {
        if !has_document_properties(model.entity(entity).kind) {
            continue;
        }
        let mapping = all_paths.get(model, entity)?;
        let constraints = equality.entry(entity).or_default();
        merge_directive_constraints(model, entity, collected, mapping, constraints)?;
    }

    let conflicts = model.column_conflicts();
    for conflict in conflicts {
        column_conflict_constraints(model, conflict, conflicts, all_paths, &mut equality)?;
    }

    let mut result = ConstraintAnnotations::new("constraints", model.entities().len());
    for &entity in model.processing_order() {
        let kind = model.entity(entity).kind;
        if !kind.is_resource() {
            continue;
        }
        if !has_document_properties(kind) {
            result.insert(entity, Constraints::default());
            continue;
        }
        let mut equality = equality.remove(&entity).unwrap_or_default();
        equality.sort();
        let array_uniqueness = array_uniqueness_constraints(all_paths.get(model, entity)?);
        debug!(
            entity = %model.entity(entity).name,
            equality = equality.len(),
            array_uniqueness = array_uniqueness.len(),
            "constraints"
        );
        result.insert(
            entity,
            Constraints {
                equality,
                array_uniqueness,
            },
        );
    }
    Ok(result)
}

/// A merge or conflict path, tried as given and then with the descriptor suffix.
fn find_paths<'a>(mapping: &'a JsonPathsMapping, property_path: &PropertyPath) -> Option<&'a JsonPathsInfo> {
    mapping
        .get(property_path)
        .or_else(|| mapping.get(&PropertyPath::new(format!("{}Descriptor", property_path))))
}

fn push_unique(constraints: &mut Vec<EqualityConstraint>, source: &JsonPath, target: &JsonPath) -> bool {
    if source == target || constraints.iter().any(|c| c.same_pair(source, target)) {
        return false;
    }
    constraints.push(EqualityConstraint {
        source_json_path: source.clone(),
        target_json_path: target.clone(),
    });
    true
}

fn merge_directive_constraints(
    model: &Model,
    entity: EntityId,
    collected: &CollectedProperties,
    mapping: &JsonPathsMapping,
    constraints: &mut Vec<EqualityConstraint>,
) -> Result<(), InvariantError> {
    for collected_property in collected.get(model, entity)? {
        let property = model.property(collected_property.property);
        for &directive_id in &property.merge_directives {
            let directive = model.merge_directive(directive_id);
            let prefix = &collected_property.path_prefix;
            let source = merge_paths(model, entity, mapping, prefix.join(&directive.source_path))?;
            let target = merge_paths(model, entity, mapping, prefix.join(&directive.target_path))?;

            if source.pairs.len() != target.pairs.len() {
                let entity = model.entity(entity).name.clone();
                error!(
                    entity = %entity,
                    source_path = %directive.source_path,
                    target_path = %directive.target_path,
                    "merge length mismatch"
                );
                return Err(InvariantError::MergeLengthMismatch {
                    entity,
                    source_path: directive.source_path.clone(),
                    target_path: directive.target_path.clone(),
                    source_count: source.pairs.len(),
                    target_count: target.pairs.len(),
                });
            }

            for (source_path, target_path) in source.json_paths().zip(target.json_paths()) {
                if push_unique(constraints, source_path, target_path) {
                    trace!(source = %source_path, target = %target_path, "merge equality constraint");
                }
            }
        }
    }
    Ok(())
}

fn merge_paths<'a>(
    model: &Model,
    entity: EntityId,
    mapping: &'a JsonPathsMapping,
    property_path: PropertyPath,
) -> Result<&'a JsonPathsInfo, InvariantError> {
    find_paths(mapping, &property_path).ok_or_else(|| {
        let entity = model.entity(entity).name.clone();
        error!(entity = %entity, property_path = %property_path, "merge path has no json paths");
        InvariantError::MissingMergeJsonPaths {
            entity,
            property_path: property_path.to_string(),
        }
    })
}

/// The property a conflict path names inside the collection it starts with.
fn collection_member(model: &Model, entity: EntityId, property_path: &PropertyPath) -> Option<(PropertyId, PropertyId)> {
    let mut segments = property_path.segments();
    let collection_name = segments.next()?;
    let member_name = segments.next()?;
    let collection = model
        .properties_with_base(entity)
        .into_iter()
        .find(|&p| model.property(p).full_name == collection_name)?;
    let inner = model.property(collection).kind.referenced_entity()?;
    let member = model
        .properties_with_base(inner)
        .into_iter()
        .find(|&p| model.property(p).full_name == member_name)?;
    Some((collection, member))
}

/// Whether a conflict with exactly one side inside a collection constrains.
fn collection_side_constrains(
    model: &Model,
    entity: EntityId,
    collection_side: &PropertyPath,
    conflicts: &[ColumnConflict],
) -> bool {
    let Some((collection, member)) = collection_member(model, entity, collection_side) else {
        return true;
    };
    if model.property(member).kind.is_reference() {
        return true;
    }
    let collection_property = model.property(collection);
    let PropertyKind::Common { common } = collection_property.kind else {
        return true;
    };
    if !collection_property.is_collection() {
        return true;
    }

    let identity_count = model
        .entity(common)
        .properties
        .iter()
        .filter(|&&p| model.property(p).is_part_of_identity)
        .count();
    if identity_count == 0 {
        return true;
    }
    if !model.property(member).is_part_of_identity {
        return false;
    }
    if identity_count > 1 {
        let conflicting_identities = conflicts
            .iter()
            .filter(|c| c.entity == entity)
            .filter(|c| {
                [&c.first_property_path, &c.second_property_path].into_iter().any(|path| {
                    let path = PropertyPath::new(path.as_str());
                    path.first_segment() == collection_property.full_name
                        && collection_member(model, entity, &path)
                            .is_some_and(|(_, m)| model.property(m).is_part_of_identity)
                })
            })
            .count();
        if conflicting_identities < identity_count {
            return false;
        }
    }
    true
}

fn column_conflict_constraints(
    model: &Model,
    conflict: &ColumnConflict,
    conflicts: &[ColumnConflict],
    all_paths: &AllJsonPaths,
    equality: &mut BTreeMap<EntityId, Vec<EqualityConstraint>>,
) -> Result<(), InvariantError> {
    if conflict.first_original_entity != conflict.second_original_entity {
        return Ok(());
    }
    let entity = conflict.first_original_entity;
    let kind = model.entity(entity).kind;
    if kind.is_extension() || !has_document_properties(kind) {
        return Ok(());
    }

    let mapping = all_paths.get(model, entity)?;
    let first = PropertyPath::new(conflict.first_property_path.as_str());
    let second = PropertyPath::new(conflict.second_property_path.as_str());
    let resolve = |path: &PropertyPath| {
        find_paths(mapping, path).ok_or_else(|| {
            let entity = model.entity(entity).name.clone();
            error!(entity = %entity, property_path = %path, "column conflict path has no json paths");
            InvariantError::ColumnConflictPathMissing {
                entity,
                property_path: path.to_string(),
            }
        })
    };
    let first_info = resolve(&first)?;
    let second_info = resolve(&second)?;

    let constraints = equality.entry(entity).or_default();
    for (source, target) in first_info.json_paths().zip(second_info.json_paths()) {
        if source == target || constraints.iter().any(|c| c.same_pair(source, target)) {
            continue;
        }
        let source_in_array = source.array_depth() > 0;
        if source_in_array != (target.array_depth() > 0) {
            let collection_side = if source_in_array { &first } else { &second };
            if !collection_side_constrains(model, entity, collection_side, conflicts) {
                trace!(source = %source, target = %target, "column conflict skipped");
                continue;
            }
        }
        push_unique(constraints, source, target);
    }
    Ok(())
}

/// Group array identity paths by top-level collection, nesting second-level
/// arrays under their first-level element.
pub fn array_uniqueness_constraints(mapping: &JsonPathsMapping) -> Vec<ArrayUniquenessConstraint> {
    let mut groups: BTreeMap<&str, BTreeSet<&JsonPath>> = BTreeMap::new();
    for (property_path, info) in mapping {
        if !info.is_array_identity {
            continue;
        }
        groups
            .entry(property_path.first_segment())
            .or_default()
            .extend(info.json_paths().filter(|p| p.array_depth() > 0));
    }

    let mut result = Vec::new();
    for paths in groups.into_values() {
        if paths.is_empty() {
            continue;
        }
        let mut constraint = ArrayUniquenessConstraint::default();
        let mut nested: BTreeMap<JsonPath, ArrayUniquenessConstraint> = BTreeMap::new();

        for path in paths {
            if path.array_depth() == 1 {
                constraint.paths.push(path.clone());
                continue;
            }
            let (Some(base), Some(inner)) = (path.array_prefix(1), path.array_prefix(2)) else {
                continue;
            };
            let Some(relative) = path.strip_prefix(&base) else {
                continue;
            };
            let group = nested.entry(inner).or_insert_with(|| ArrayUniquenessConstraint {
                base_path: Some(base),
                ..ArrayUniquenessConstraint::default()
            });
            group.paths.push(relative);
        }

        constraint.nested_constraints = nested.into_values().collect();
        result.push(constraint);
    }
    result
}
