//! API property mappings and collected properties.
//!
//! Every renderer walks an entity's *collected* properties rather than its
//! raw property list: choice and inline common properties are replaced by
//! their children, which carry the accumulated [`PropertyModifier`] and the
//! property path of the inlining property.

use tracing::trace;

use crate::annotation::{EntityAnnotations, PropertyAnnotations};
use crate::json_path::PropertyPath;
use crate::model::{EntityId, Model, PropertyId, PropertyKind};
use crate::naming::{ApiPropertyMapping, PropertyModifier};

pub type ApiMappings = PropertyAnnotations<ApiPropertyMapping>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedProperty {
    pub property: PropertyId,
    pub modifier: PropertyModifier,
    /// Property path of the choices and inline commons this property was inlined through.
    pub path_prefix: PropertyPath,
}

impl CollectedProperty {
    /// Property path of this property from the entity root.
    pub fn property_path(&self, model: &Model) -> PropertyPath {
        self.path_prefix.join(&model.property(self.property).full_name)
    }
}

pub type CollectedProperties = EntityAnnotations<Vec<CollectedProperty>>;

/// Compute the API mapping of every property.
pub fn build_api_mappings(model: &Model) -> ApiMappings {
    let mut mappings = ApiMappings::new("apiMapping", model.properties().len());
    for property in model.properties() {
        mappings.insert(property.id, ApiPropertyMapping::new(model, property.id));
    }
    mappings
}

/// Collect the renderable properties of every entity.
pub fn collect_properties(model: &Model) -> CollectedProperties {
    let mut collected = CollectedProperties::new("collectedProperties", model.entities().len());
    for entity in model.entities() {
        let mut out = Vec::new();
        collect_into(
            model,
            entity.id,
            &PropertyModifier::default(),
            &PropertyPath::default(),
            &mut out,
        );
        trace!(entity = %entity.name, count = out.len(), "collected properties");
        collected.insert(entity.id, out);
    }
    collected
}

fn collect_into(
    model: &Model,
    entity: EntityId,
    modifier: &PropertyModifier,
    path_prefix: &PropertyPath,
    out: &mut Vec<CollectedProperty>,
) {
    for property_id in model.properties_with_base(entity) {
        let property = model.property(property_id);
        match property.kind {
            PropertyKind::Choice { choice: inlined } | PropertyKind::InlineCommon { common: inlined } => {
                let parent_prefixes = if !property.role_name.is_empty() && property.role_name != property.name {
                    vec![property.role_name.clone()]
                } else {
                    Vec::new()
                };
                let child_modifier = modifier.concat(&PropertyModifier {
                    optional_due_to_parent: !(property.is_required || property.is_part_of_identity),
                    parent_prefixes,
                });
                let child_prefix = path_prefix.join(&property.full_name);
                collect_into(model, inlined, &child_modifier, &child_prefix, out);
            }
            _ => out.push(CollectedProperty {
                property: property_id,
                modifier: modifier.clone(),
                path_prefix: path_prefix.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_model_str;

    #[test]
    fn choice_children_are_inlined_with_modifier() {
        let model = Model::build(
            &load_model_str(
                r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                    "entities": [
                        { "kind": "domainEntity", "name": "Section", "properties": [
                            { "name": "SectionIdentifier", "type": "string", "isPartOfIdentity": true },
                            { "name": "MeetingChoice", "type": "choice", "roleName": "Primary" }
                        ]},
                        { "kind": "choice", "name": "MeetingChoice", "properties": [
                            { "name": "MeetingTime", "type": "time", "isRequired": true },
                            { "name": "MeetingNotes", "type": "inlineCommon", "isRequired": true }
                        ]},
                        { "kind": "inlineCommon", "name": "MeetingNotes", "properties": [
                            { "name": "Note", "type": "string", "isRequired": true }
                        ]}
                    ]}]}"#,
            )
            .unwrap(),
        )
        .unwrap();
        let section = model.find_entity("EdFi", "Section", false).unwrap();
        let collected = collect_properties(&model);
        let section_props = collected.get(&model, section).unwrap();

        let names: Vec<String> = section_props
            .iter()
            .map(|c| c.property_path(&model).to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "SectionIdentifier",
                "PrimaryMeetingChoice.MeetingTime",
                "PrimaryMeetingChoice.MeetingNotes.Note"
            ]
        );

        assert_eq!(section_props[0].modifier, PropertyModifier::default());
        let note = &section_props[2];
        assert!(note.modifier.optional_due_to_parent);
        assert_eq!(note.modifier.parent_prefixes, vec!["Primary".to_string()]);
    }

    #[test]
    fn every_property_has_a_mapping() {
        let model = Model::build(
            &load_model_str(
                r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                    "entities": [
                        { "kind": "descriptor", "name": "GradeLevel" },
                        { "kind": "domainEntity", "name": "School", "properties": [
                            { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true },
                            { "name": "GradeLevel", "type": "descriptor", "isRequiredCollection": true }
                        ]}
                    ]}]}"#,
            )
            .unwrap(),
        )
        .unwrap();
        let mappings = build_api_mappings(&model);
        let grade_level = mappings.get(&model, PropertyId(1)).unwrap();
        assert!(grade_level.is_descriptor_collection);
        assert_eq!(grade_level.top_level_name, "GradeLevels");
        assert_eq!(grade_level.descriptor_collection_name, "GradeLevelDescriptor");
    }
}
