//! Reference components: how a property's identity resolves.
//!
//! A reference property resolves through the identity properties of the
//! entity it references, recursively; anything else is a terminal element.
//! Components are built once per property and shared by every entity that
//! reaches the property.

use tracing::{error, trace};

use crate::annotation::PropertyAnnotations;
use crate::error::InvariantError;
use crate::model::{Model, PropertyId, PropertyKind};
use crate::types::MAX_REFERENCE_DEPTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceComponent {
    /// A terminal property.
    Element { property: PropertyId },
    /// A reference; children are the referenced entity's sorted identity properties,
    /// each with its own component.
    Group {
        property: PropertyId,
        children: Vec<PropertyId>,
    },
}

impl ReferenceComponent {
    pub fn is_group(&self) -> bool {
        matches!(self, ReferenceComponent::Group { .. })
    }
}

pub type ReferenceComponents = PropertyAnnotations<ReferenceComponent>;

/// Build the component of every property in the model.
///
/// # Errors
///
/// Returns `InvariantError::ReferenceDepthExceeded` when a reference chain
/// revisits a property or grows past [`MAX_REFERENCE_DEPTH`].
pub fn build_reference_components(model: &Model) -> Result<ReferenceComponents, InvariantError> {
    let mut components = ReferenceComponents::new("referenceComponent", model.properties().len());
    let mut visiting = Vec::new();
    for property in model.properties() {
        build_for(model, property.id, &mut components, &mut visiting)?;
    }
    Ok(components)
}

fn build_for(
    model: &Model,
    property_id: PropertyId,
    components: &mut ReferenceComponents,
    visiting: &mut Vec<PropertyId>,
) -> Result<(), InvariantError> {
    if components.contains(property_id) {
        return Ok(());
    }
    if visiting.contains(&property_id) || visiting.len() >= MAX_REFERENCE_DEPTH {
        let property = model.property(property_id);
        let entity = model.entity(property.parent).name.clone();
        error!(entity = %entity, property = %property.full_name, "reference chain too deep");
        return Err(InvariantError::ReferenceDepthExceeded {
            entity,
            property: property.full_name.clone(),
            max_depth: MAX_REFERENCE_DEPTH,
        });
    }

    let component = match model.property(property_id).kind {
        PropertyKind::Reference { referenced, .. } => {
            visiting.push(property_id);
            let children = model.identity_properties(referenced);
            for &child in &children {
                build_for(model, child, components, visiting)?;
            }
            visiting.pop();
            ReferenceComponent::Group {
                property: property_id,
                children,
            }
        }
        _ => ReferenceComponent::Element {
            property: property_id,
        },
    };

    trace!(property = %model.property(property_id).full_name, group = component.is_group(), "reference component");
    components.insert(property_id, component);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_model_str;

    #[test]
    fn reference_groups_follow_identity() {
        let input = load_model_str(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Session", "properties": [
                        { "name": "SessionName", "type": "string", "isPartOfIdentity": true },
                        { "name": "School", "type": "domainEntity", "isPartOfIdentity": true },
                        { "name": "TotalInstructionalDays", "type": "integer", "isRequired": true }
                    ]},
                    { "kind": "domainEntity", "name": "School", "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let model = Model::build(&input).unwrap();
        let components = build_reference_components(&model).unwrap();

        let session_name = PropertyId(0);
        let school = PropertyId(1);
        let school_id = PropertyId(3);

        assert_eq!(
            components.get(&model, school).unwrap(),
            &ReferenceComponent::Group {
                property: school,
                children: vec![school_id]
            }
        );
        assert_eq!(
            components.get(&model, session_name).unwrap(),
            &ReferenceComponent::Element {
                property: session_name
            }
        );
        assert!(!components.get(&model, PropertyId(2)).unwrap().is_group());
    }
}
