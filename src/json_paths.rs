//! The all-JSON-paths map of every resource.
//!
//! Walks a resource's collected properties and records, for every property
//! path reachable from the resource root, the JSON paths of the document
//! values found there. A reference contributes the flattened identity of the
//! entity it references, both under its own property path and under the
//! property path of every identity property along the way.

use std::collections::BTreeMap;

use tracing::{debug, error};

use crate::annotation::EntityAnnotations;
use crate::collect::{ApiMappings, CollectedProperties};
use crate::error::InvariantError;
use crate::flatten::FlattenedIdentities;
use crate::json_path::{JsonPath, PropertyPath};
use crate::model::{EntityId, EntityKind, Model, PropertyId, PropertyKind};
use crate::naming::{document_key, identical_role_name_prefix, project_endpoint_name, PropertyModifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPathPropertyPair {
    pub json_path: JsonPath,
    /// The property whose value is found at `json_path`: the terminal
    /// property, or the reference property for a reference's own key.
    pub source_property: PropertyId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPathsInfo {
    /// Sorted by JSON path, no duplicate paths.
    pub pairs: Vec<JsonPathPropertyPair>,
    /// The property path starts at a property of the resource itself rather
    /// than inside a referenced entity's identity.
    pub is_top_level: bool,
    /// Set for top-level entries only.
    pub terminal_property: Option<PropertyId>,
    /// The values identify an element of their enclosing array.
    pub is_array_identity: bool,
}

impl JsonPathsInfo {
    pub fn json_paths(&self) -> impl Iterator<Item = &JsonPath> {
        self.pairs.iter().map(|pair| &pair.json_path)
    }
}

pub type JsonPathsMapping = BTreeMap<PropertyPath, JsonPathsInfo>;

pub type AllJsonPaths = EntityAnnotations<JsonPathsMapping>;

/// Root of a resource's paths: `$`, or `$._ext.<project>` for an extension.
pub fn json_path_root(model: &Model, entity: EntityId) -> JsonPath {
    if model.entity(entity).kind.is_extension() {
        JsonPath::root()
            .child("_ext")
            .child(&project_endpoint_name(model.project_name(entity)))
    } else {
        JsonPath::root()
    }
}

/// Resources whose documents carry properties: everything but descriptors.
pub fn has_document_properties(kind: EntityKind) -> bool {
    kind.is_resource() && kind != EntityKind::Descriptor
}

/// Build the all-JSON-paths map of every resource.
pub fn build_all_json_paths(
    model: &Model,
    mappings: &ApiMappings,
    collected: &CollectedProperties,
    identities: &FlattenedIdentities,
) -> Result<AllJsonPaths, InvariantError> {
    let mut result = AllJsonPaths::new("allJsonPaths", model.entities().len());
    for &entity in model.processing_order() {
        if !has_document_properties(model.entity(entity).kind) {
            continue;
        }
        let walk = PathWalk {
            model,
            mappings,
            collected,
            identities,
            entity,
        };
        let mapping = walk.entity_paths()?;
        debug!(entity = %model.entity(entity).name, paths = mapping.len(), "json paths");
        result.insert(entity, mapping);
    }
    Ok(result)
}

/// Add `json_path` under each property path. The first insertion of a
/// property path fixes its flags.
fn add_json_path(
    mapping: &mut JsonPathsMapping,
    property_paths: &[PropertyPath],
    json_path: &JsonPath,
    is_top_level: bool,
    source_property: PropertyId,
    is_array_identity: bool,
) {
    for property_path in property_paths {
        let info = mapping
            .entry(property_path.clone())
            .or_insert_with(|| JsonPathsInfo {
                pairs: Vec::new(),
                is_top_level,
                terminal_property: is_top_level.then_some(source_property),
                is_array_identity,
            });
        if info.pairs.iter().any(|pair| &pair.json_path == json_path) {
            continue;
        }
        info.pairs.push(JsonPathPropertyPair {
            json_path: json_path.clone(),
            source_property,
        });
    }
}

/// `path` with `Descriptor` appended to its final segment.
fn descriptor_suffixed(path: &PropertyPath) -> PropertyPath {
    PropertyPath::new(format!("{}Descriptor", path))
}

struct PathWalk<'a> {
    model: &'a Model,
    mappings: &'a ApiMappings,
    collected: &'a CollectedProperties,
    identities: &'a FlattenedIdentities,
    entity: EntityId,
}

impl PathWalk<'_> {
    fn entity_paths(&self) -> Result<JsonPathsMapping, InvariantError> {
        let mut mapping = JsonPathsMapping::new();
        let root = json_path_root(self.model, self.entity);

        for collected in self.collected.get(self.model, self.entity)? {
            let property = self.model.property(collected.property);
            let api_mapping = self.mappings.get(self.model, collected.property)?;
            let json_path = root.child(&document_key(&api_mapping.top_level_name, &collected.modifier, ""));
            let property_path = collected.property_path(self.model);

            if property.kind == PropertyKind::SchoolYearEnumeration && !property.is_collection() {
                add_json_path(
                    &mut mapping,
                    &[property_path],
                    &json_path.child("schoolYear"),
                    true,
                    collected.property,
                    false,
                );
            } else {
                self.property_paths(
                    collected.property,
                    &collected.modifier,
                    &mut mapping,
                    &property_path,
                    &json_path,
                    true,
                    false,
                )?;
            }
        }

        for info in mapping.values_mut() {
            info.pairs.sort_by(|a, b| a.json_path.cmp(&b.json_path));
        }
        Ok(mapping)
    }

    fn array(&self, path: &JsonPath, property: PropertyId) -> Result<JsonPath, InvariantError> {
        path.array().map_err(|_| {
            let entity = self.model.entity(self.entity).name.clone();
            let property = self.model.property(property).full_name.clone();
            let json_path = format!("{}[*]", path);
            error!(entity = %entity, property = %property, json_path = %json_path, "array nesting too deep");
            InvariantError::ArrayNestingTooDeep {
                entity,
                property,
                json_path,
            }
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn property_paths(
        &self,
        property_id: PropertyId,
        modifier: &PropertyModifier,
        mapping: &mut JsonPathsMapping,
        property_path: &PropertyPath,
        json_path: &JsonPath,
        is_top_level: bool,
        is_array_identity: bool,
    ) -> Result<(), InvariantError> {
        let property = self.model.property(property_id);
        let api_mapping = self.mappings.get(self.model, property_id)?;

        if api_mapping.is_reference_collection {
            let element = self.array(json_path, property_id)?.child(&document_key(
                &api_mapping.reference_collection_name,
                modifier,
                "",
            ));
            let reset = PropertyModifier {
                optional_due_to_parent: modifier.optional_due_to_parent,
                parent_prefixes: Vec::new(),
            };
            return self.reference_paths(property_id, &reset, mapping, property_path, &element, is_top_level, true);
        }
        if api_mapping.is_scalar_reference {
            return self.reference_paths(
                property_id,
                modifier,
                mapping,
                property_path,
                json_path,
                is_top_level,
                is_array_identity && property.is_part_of_identity,
            );
        }
        if api_mapping.is_descriptor_collection {
            let element = self.array(json_path, property_id)?.child(&document_key(
                &api_mapping.descriptor_collection_name,
                modifier,
                "",
            ));
            add_json_path(
                mapping,
                &[descriptor_suffixed(property_path)],
                &element,
                is_top_level,
                property_id,
                true,
            );
            return Ok(());
        }
        if api_mapping.is_common_collection {
            let element = self.array(json_path, property_id)?;
            return self.common_paths(property_id, modifier, mapping, property_path, &element, is_top_level, None);
        }
        if api_mapping.is_scalar_common {
            return self.common_paths(
                property_id,
                modifier,
                mapping,
                property_path,
                json_path,
                is_top_level,
                Some(is_array_identity && property.is_part_of_identity),
            );
        }
        if api_mapping.is_choice || api_mapping.is_inline_common {
            // Collected properties already carry the children of choices and inline commons.
            return Ok(());
        }
        if property.is_collection() {
            let element = self
                .array(json_path, property_id)?
                .child(&document_key(&api_mapping.full_name, modifier, ""));
            self.leaf(property_id, mapping, &[property_path.clone()], &element, is_top_level, true);
            return Ok(());
        }
        if property.kind.is_descriptor() {
            self.leaf(
                property_id,
                mapping,
                &[descriptor_suffixed(property_path)],
                json_path,
                is_top_level,
                is_array_identity,
            );
            return Ok(());
        }
        self.leaf(
            property_id,
            mapping,
            &[property_path.clone()],
            json_path,
            is_top_level,
            is_array_identity,
        );
        Ok(())
    }

    /// A terminal value. School years inside a common nest under `schoolYear`.
    fn leaf(
        &self,
        property_id: PropertyId,
        mapping: &mut JsonPathsMapping,
        property_paths: &[PropertyPath],
        json_path: &JsonPath,
        is_top_level: bool,
        is_array_identity: bool,
    ) {
        let property = self.model.property(property_id);
        let in_common = self.model.entity(property.parent).kind == EntityKind::Common;
        if property.kind == PropertyKind::SchoolYearEnumeration && in_common {
            add_json_path(
                mapping,
                property_paths,
                &json_path.child("schoolYear"),
                is_top_level,
                property_id,
                is_array_identity,
            );
        } else {
            add_json_path(mapping, property_paths, json_path, is_top_level, property_id, is_array_identity);
        }
    }

    /// Children of a common. With `scalar_identity` unset the common is an
    /// array element and each identity child identifies it.
    #[allow(clippy::too_many_arguments)]
    fn common_paths(
        &self,
        property_id: PropertyId,
        modifier: &PropertyModifier,
        mapping: &mut JsonPathsMapping,
        property_path: &PropertyPath,
        json_path: &JsonPath,
        is_top_level: bool,
        scalar_identity: Option<bool>,
    ) -> Result<(), InvariantError> {
        let Some(common) = self.model.property(property_id).kind.referenced_entity() else {
            return Ok(());
        };
        for child in self.collected.get(self.model, common)? {
            let child_property = self.model.property(child.property);
            let child_mapping = self.mappings.get(self.model, child.property)?;
            let child_modifier = modifier.concat(&child.modifier);
            let child_path = property_path
                .join(child.path_prefix.as_str())
                .join(&child_property.full_name);
            let child_json = json_path.child(&document_key(&child_mapping.top_level_name, &child_modifier, ""));
            let child_identity = match scalar_identity {
                None => child_property.is_part_of_identity,
                Some(parent) => parent && child_property.is_part_of_identity,
            };
            self.property_paths(
                child.property,
                &child_modifier,
                mapping,
                &child_path,
                &child_json,
                is_top_level,
                child_identity,
            )?;
        }
        Ok(())
    }

    /// The referenced entity's surviving flattened identity, keyed under the
    /// reference's property path and under each identity property path.
    #[allow(clippy::too_many_arguments)]
    fn reference_paths(
        &self,
        property_id: PropertyId,
        modifier: &PropertyModifier,
        mapping: &mut JsonPathsMapping,
        property_path: &PropertyPath,
        json_path: &JsonPath,
        is_top_level: bool,
        is_array_identity: bool,
    ) -> Result<(), InvariantError> {
        let Some(referenced) = self.model.property(property_id).kind.referenced_entity() else {
            return Ok(());
        };
        let identity = self.identities.get(self.model, referenced)?;

        let mut identity_paths = JsonPathsMapping::new();
        for flattened in identity.omitting_merges() {
            let identity_property = flattened.identity_property;
            let identity_mapping = self.mappings.get(self.model, identity_property)?;
            let special_prefix = identical_role_name_prefix(self.model, &flattened.property_chain);

            let mut keys: Vec<PropertyPath> = flattened
                .property_paths
                .iter()
                .map(|path| property_path.join(path.as_str()))
                .collect();
            if self.model.property(identity_property).kind.is_descriptor() {
                if let Some(last) = keys.last_mut() {
                    *last = descriptor_suffixed(last);
                }
            }

            let leaf_path = json_path.child(&document_key(&identity_mapping.full_name, modifier, &special_prefix));
            self.leaf(identity_property, &mut identity_paths, &keys, &leaf_path, false, is_array_identity);
        }

        let leaves: Vec<JsonPath> = identity_paths
            .values()
            .flat_map(|info| info.json_paths().cloned())
            .collect();
        for leaf in &leaves {
            add_json_path(
                mapping,
                std::slice::from_ref(property_path),
                leaf,
                is_top_level,
                property_id,
                is_array_identity,
            );
        }
        mapping.extend(identity_paths);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{build_api_mappings, collect_properties};
    use crate::flatten::flatten_identities;
    use crate::loader::load_model_str;
    use crate::reference_component::build_reference_components;

    fn all_paths(json: &str) -> Result<(Model, AllJsonPaths), InvariantError> {
        let model = Model::build(&load_model_str(json).unwrap()).unwrap();
        let components = build_reference_components(&model)?;
        let identities = flatten_identities(&model, &components)?;
        let mappings = build_api_mappings(&model);
        let collected = collect_properties(&model);
        let paths = build_all_json_paths(&model, &mappings, &collected, &identities)?;
        Ok((model, paths))
    }

    fn rendered(mapping: &JsonPathsMapping, key: &str) -> Vec<String> {
        mapping[&PropertyPath::new(key)]
            .json_paths()
            .map(|p| p.to_string())
            .collect()
    }

    fn mapping_for<'a>(model: &Model, paths: &'a AllJsonPaths, namespace: &str, name: &str) -> &'a JsonPathsMapping {
        let id = model.find_entity(namespace, name, false).unwrap();
        paths.get(model, id).unwrap()
    }

    #[test]
    fn references_key_identity_leaves() {
        let (model, paths) = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "association", "name": "StudentSchoolAssociation", "properties": [
                        { "name": "Student", "type": "domainEntity", "isPartOfIdentity": true },
                        { "name": "School", "type": "domainEntity", "isPartOfIdentity": true },
                        { "name": "EntryDate", "type": "date", "isPartOfIdentity": true }
                    ]},
                    { "kind": "domainEntity", "name": "Student", "properties": [
                        { "name": "StudentUniqueId", "type": "string", "isPartOfIdentity": true }
                    ]},
                    { "kind": "domainEntity", "name": "School", "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let mapping = mapping_for(&model, &paths, "EdFi", "StudentSchoolAssociation");

        assert_eq!(rendered(mapping, "Student"), vec!["$.studentReference.studentUniqueId"]);
        assert_eq!(
            rendered(mapping, "Student.StudentUniqueId"),
            vec!["$.studentReference.studentUniqueId"]
        );
        assert_eq!(rendered(mapping, "School"), vec!["$.schoolReference.schoolId"]);
        assert_eq!(rendered(mapping, "EntryDate"), vec!["$.entryDate"]);

        let student = &mapping[&PropertyPath::new("Student")];
        assert!(student.is_top_level);
        assert!(!mapping[&PropertyPath::new("Student.StudentUniqueId")].is_top_level);
        assert_eq!(
            model.property(student.terminal_property.unwrap()).name,
            "Student"
        );
    }

    #[test]
    fn common_collection_nests_one_array() {
        let (model, paths) = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "descriptor", "name": "AddressType" },
                    { "kind": "domainEntity", "name": "Student", "properties": [
                        { "name": "StudentUniqueId", "type": "string", "isPartOfIdentity": true },
                        { "name": "StudentAddress", "type": "common", "isOptionalCollection": true }
                    ]},
                    { "kind": "common", "name": "StudentAddress", "properties": [
                        { "name": "AddressType", "type": "descriptor", "isPartOfIdentity": true },
                        { "name": "City", "type": "string", "isPartOfIdentity": true },
                        { "name": "ApartmentRoomSuite", "type": "string" }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let mapping = mapping_for(&model, &paths, "EdFi", "Student");

        assert_eq!(
            rendered(mapping, "StudentAddress.ApartmentRoomSuite"),
            vec!["$.addresses[*].apartmentRoomSuite"]
        );
        assert_eq!(
            rendered(mapping, "StudentAddress.AddressTypeDescriptor"),
            vec!["$.addresses[*].addressTypeDescriptor"]
        );
        assert!(mapping[&PropertyPath::new("StudentAddress.City")].is_array_identity);
        assert!(!mapping[&PropertyPath::new("StudentAddress.ApartmentRoomSuite")].is_array_identity);
        assert!(!mapping[&PropertyPath::new("StudentUniqueId")].is_array_identity);
        assert!(!mapping.contains_key(&PropertyPath::new("StudentAddress")));
    }

    #[test]
    fn reference_collection_keys_intermediate_paths() {
        let (model, paths) = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Section", "properties": [
                        { "name": "SectionIdentifier", "type": "string", "isPartOfIdentity": true },
                        { "name": "ClassPeriod", "type": "domainEntity", "isRequiredCollection": true }
                    ]},
                    { "kind": "domainEntity", "name": "ClassPeriod", "properties": [
                        { "name": "ClassPeriodName", "type": "string", "isPartOfIdentity": true },
                        { "name": "School", "type": "domainEntity", "isPartOfIdentity": true }
                    ]},
                    { "kind": "domainEntity", "name": "School", "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let mapping = mapping_for(&model, &paths, "EdFi", "Section");

        assert_eq!(
            rendered(mapping, "ClassPeriod"),
            vec![
                "$.classPeriods[*].classPeriodReference.classPeriodName",
                "$.classPeriods[*].classPeriodReference.schoolId"
            ]
        );
        assert_eq!(
            rendered(mapping, "ClassPeriod.School"),
            vec!["$.classPeriods[*].classPeriodReference.schoolId"]
        );
        assert_eq!(
            rendered(mapping, "ClassPeriod.School.SchoolId"),
            vec!["$.classPeriods[*].classPeriodReference.schoolId"]
        );
        assert!(mapping[&PropertyPath::new("ClassPeriod")].is_array_identity);
    }

    #[test]
    fn role_named_identity_reference_prefixes_leaf() {
        let (model, paths) = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Grade", "properties": [
                        { "name": "ReportCard", "type": "domainEntity", "isRequired": true }
                    ]},
                    { "kind": "domainEntity", "name": "ReportCard", "properties": [
                        { "name": "GradingPeriod", "type": "domainEntity", "isPartOfIdentity": true,
                          "roleName": "GradingPeriod" }
                    ]},
                    { "kind": "domainEntity", "name": "GradingPeriod", "properties": [
                        { "name": "School", "type": "domainEntity", "isPartOfIdentity": true }
                    ]},
                    { "kind": "domainEntity", "name": "School", "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let mapping = mapping_for(&model, &paths, "EdFi", "Grade");
        assert_eq!(
            rendered(mapping, "ReportCard"),
            vec!["$.reportCardReference.gradingPeriodSchoolId"]
        );
    }

    #[test]
    fn school_year_nests_at_top_level() {
        let (model, paths) = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "schoolYearEnumeration", "name": "SchoolYear" },
                    { "kind": "domainEntity", "name": "Calendar", "properties": [
                        { "name": "CalendarCode", "type": "string", "isPartOfIdentity": true },
                        { "name": "SchoolYear", "type": "schoolYearEnumeration", "isPartOfIdentity": true }
                    ]},
                    { "kind": "domainEntity", "name": "CalendarDate", "properties": [
                        { "name": "Calendar", "type": "domainEntity", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let calendar = mapping_for(&model, &paths, "EdFi", "Calendar");
        assert_eq!(
            rendered(calendar, "SchoolYear"),
            vec!["$.schoolYearTypeReference.schoolYear"]
        );

        let calendar_date = mapping_for(&model, &paths, "EdFi", "CalendarDate");
        assert_eq!(
            rendered(calendar_date, "Calendar"),
            vec![
                "$.calendarReference.calendarCode",
                "$.calendarReference.schoolYear"
            ]
        );
    }

    #[test]
    fn extension_paths_are_rooted_under_ext() {
        let (model, paths) = all_paths(
            r#"{ "projects": [
                { "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                  "entities": [ { "kind": "domainEntity", "name": "School", "properties": [
                      { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true } ]} ]},
                { "namespaceName": "Sample", "projectName": "Sample", "projectVersion": "1.0.0",
                  "isExtension": true,
                  "entities": [ { "kind": "domainEntityExtension", "name": "School", "properties": [
                      { "name": "IsExemplary", "type": "boolean" } ]} ]}
            ]}"#,
        )
        .unwrap();
        let extension = model.namespace(crate::model::NamespaceId(1)).entities[0];
        let mapping = paths.get(&model, extension).unwrap();
        assert_eq!(rendered(mapping, "IsExemplary"), vec!["$._ext.sample.isExemplary"]);
    }

    #[test]
    fn third_array_level_is_fatal() {
        let result = all_paths(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Program", "properties": [
                        { "name": "ProgramName", "type": "string", "isPartOfIdentity": true },
                        { "name": "Service", "type": "common", "isOptionalCollection": true }
                    ]},
                    { "kind": "common", "name": "Service", "properties": [
                        { "name": "Period", "type": "common", "isOptionalCollection": true }
                    ]},
                    { "kind": "common", "name": "Period", "properties": [
                        { "name": "Note", "type": "string", "isOptionalCollection": true }
                    ]}
                ]}]}"#,
        );
        match result {
            Err(InvariantError::ArrayNestingTooDeep { entity, property, json_path }) => {
                assert_eq!(entity, "Program");
                assert_eq!(property, "Note");
                assert_eq!(json_path, "$.services[*].periods[*].notes[*]");
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
