//! Identity flattening and merge covering.
//!
//! Every identity property of an entity is walked down its reference
//! component to the terminal scalar properties that actually carry the
//! identity values. A terminal reached along a chain that a merge directive
//! declares redundant is marked `merged_away_by`, and the covering pass pairs it
//! with the flattened property reached along the directive's target chain.

use tracing::{debug, error};

use crate::annotation::EntityAnnotations;
use crate::error::InvariantError;
use crate::json_path::PropertyPath;
use crate::model::{EntityId, MergeDirectiveId, Model, PropertyId, PropertyKind};
use crate::reference_component::{ReferenceComponent, ReferenceComponents};

/// A terminal identity property and the chain of properties that reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedIdentityProperty {
    pub identity_property: PropertyId,
    /// Property path of every reference along the chain, ending with the terminal.
    pub property_paths: Vec<PropertyPath>,
    pub property_chain: Vec<PropertyId>,
    pub merged_away_by: Option<MergeDirectiveId>,
    /// Index of the flattened property that covers this merged-away one.
    pub merge_covered_by: Option<usize>,
    /// Indexes of the merged-away flattened properties this one covers.
    pub merge_covers: Vec<usize>,
}

impl FlattenedIdentityProperty {
    /// The deepest property path, ending at the terminal property.
    pub fn terminal_path(&self) -> &PropertyPath {
        // Every entry has at least the terminal path.
        &self.property_paths[self.property_paths.len() - 1]
    }
}

/// Flattened identity of one entity.
#[derive(Debug, Clone, Default)]
pub struct FlattenedIdentity {
    /// Every flattened property, merged-away ones included.
    pub all: Vec<FlattenedIdentityProperty>,
}

impl FlattenedIdentity {
    /// Flattened properties that survive merging.
    pub fn omitting_merges(&self) -> impl Iterator<Item = &FlattenedIdentityProperty> {
        self.all.iter().filter(|f| f.merged_away_by.is_none())
    }
}

pub type FlattenedIdentities = EntityAnnotations<FlattenedIdentity>;

/// Flatten and merge-cover the identity of every entity.
pub fn flatten_identities(
    model: &Model,
    components: &ReferenceComponents,
) -> Result<FlattenedIdentities, InvariantError> {
    let mut result = FlattenedIdentities::new("flattenedIdentity", model.entities().len());
    for &entity in model.processing_order() {
        let identity_properties = model.identity_properties(entity);
        let mut all = flatten_identity_properties(model, components, entity, &identity_properties)?;
        cover_merges(model, entity, &mut all)?;

        debug!(
            entity = %model.entity(entity).name,
            flattened = all.len(),
            merged_away = all.iter().filter(|f| f.merged_away_by.is_some()).count(),
            "flattened identity"
        );
        result.insert(entity, FlattenedIdentity { all });
    }
    Ok(result)
}

/// The directive that merges `property` away when reached along `chain`.
fn merged_away_by(model: &Model, property: PropertyId, chain: &[PropertyId]) -> Option<MergeDirectiveId> {
    let property = model.property(property);
    match property.kind {
        PropertyKind::Choice { .. }
        | PropertyKind::Common { .. }
        | PropertyKind::InlineCommon { .. }
        | PropertyKind::SchoolYearEnumeration => return None,
        _ => {}
    }
    property
        .merge_sourced_by
        .iter()
        .rev()
        .copied()
        .find(|&d| chain.contains(&model.merge_directive(d).parent_property))
}

struct Walk<'a> {
    model: &'a Model,
    components: &'a ReferenceComponents,
    out: Vec<FlattenedIdentityProperty>,
}

impl Walk<'_> {
    fn push_element(
        &mut self,
        property: PropertyId,
        current_path: &PropertyPath,
        chain: &[PropertyId],
        accumulated: &[PropertyPath],
        merged: Option<MergeDirectiveId>,
    ) {
        let mut property_paths = accumulated.to_vec();
        property_paths.push(current_path.join(&self.model.property(property).full_name));
        let mut property_chain = chain.to_vec();
        property_chain.push(property);
        self.out.push(FlattenedIdentityProperty {
            identity_property: property,
            property_paths,
            property_chain,
            merged_away_by: merged,
            merge_covered_by: None,
            merge_covers: Vec::new(),
        });
    }

    fn walk(
        &mut self,
        component: &ReferenceComponent,
        current_path: &PropertyPath,
        chain: &[PropertyId],
        accumulated: &[PropertyPath],
        merged: Option<MergeDirectiveId>,
    ) -> Result<(), InvariantError> {
        let children = match component {
            ReferenceComponent::Element { property } => {
                let merged = merged.or_else(|| merged_away_by(self.model, *property, chain));
                self.push_element(*property, current_path, chain, accumulated, merged);
                return Ok(());
            }
            ReferenceComponent::Group { children, .. } => children,
        };

        let components = self.components;
        for &child in children {
            let merged = merged.or_else(|| merged_away_by(self.model, child, chain));
            let child_component = components.get(self.model, child)?;
            if child_component.is_group() {
                let next_path = current_path.join(&self.model.property(child).full_name);
                let mut next_chain = chain.to_vec();
                next_chain.push(child);
                let mut next_accumulated = accumulated.to_vec();
                next_accumulated.push(next_path.clone());
                self.walk(child_component, &next_path, &next_chain, &next_accumulated, merged)?;
            } else {
                self.push_element(child, current_path, chain, accumulated, merged);
            }
        }
        Ok(())
    }
}

/// Flatten the given identity properties of `entity` to their terminal properties.
pub fn flatten_identity_properties(
    model: &Model,
    components: &ReferenceComponents,
    entity: EntityId,
    identity_properties: &[PropertyId],
) -> Result<Vec<FlattenedIdentityProperty>, InvariantError> {
    let mut walk = Walk {
        model,
        components,
        out: Vec::new(),
    };

    for &identity_property in identity_properties {
        let property = model.property(identity_property);

        // Identity pulled up from an inline common is prefixed with the common's name.
        let prefix = if model.is_own_property(entity, identity_property) {
            PropertyPath::default()
        } else {
            PropertyPath::new(model.entity(property.parent).name.clone())
        };

        let component = components.get(model, identity_property)?;
        if property.kind.is_reference() {
            let initial = prefix.join(&property.full_name);
            walk.walk(
                component,
                &initial,
                &[identity_property],
                std::slice::from_ref(&initial),
                None,
            )?;
        } else {
            walk.walk(component, &prefix, &[], &[], None)?;
        }
    }
    Ok(walk.out)
}

/// Pair each merged-away flattened property with the one reached through the
/// directive's target chain.
fn cover_merges(
    model: &Model,
    entity: EntityId,
    flattened: &mut [FlattenedIdentityProperty],
) -> Result<(), InvariantError> {
    for index in 0..flattened.len() {
        let Some(directive_id) = flattened[index].merged_away_by else {
            continue;
        };
        let directive = model.merge_directive(directive_id);
        let chain = &flattened[index].property_chain;

        let covering_chain = chain
            .iter()
            .position(|&p| p == directive.parent_property)
            .and_then(|start| {
                let end = start + directive.source_chain.len();
                (end <= chain.len()).then(|| {
                    let mut covering = chain[..start].to_vec();
                    covering.extend_from_slice(&directive.target_chain);
                    covering.extend_from_slice(&chain[end..]);
                    covering
                })
            });

        let covering = covering_chain.and_then(|covering| {
            flattened
                .iter()
                .position(|f| f.merged_away_by.is_none() && f.property_chain == covering)
        });

        match covering {
            Some(covering) => {
                flattened[index].merge_covered_by = Some(covering);
                flattened[covering].merge_covers.push(index);
            }
            None => {
                let entity = model.entity(entity).name.clone();
                let property_path = flattened[index].terminal_path().to_string();
                error!(entity = %entity, property_path = %property_path, "merge coverage missing");
                return Err(InvariantError::MergeCoverageMissing {
                    entity,
                    property_path,
                });
            }
        }
    }
    Ok(())
}
