//! The resolved entity graph.
//!
//! [`ModelInput`] is the wire form read by the loader. [`Model::build`] turns it
//! into an arena of entities and properties addressed by typed ids, resolves
//! every reference, base entity and merge directive path, and computes the
//! processing order used by every pass: referenced entities always come before
//! the entities that reference them.

use std::cmp::Ordering;
use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// A resolved model document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInput {
    pub projects: Vec<ProjectInput>,
    #[serde(default)]
    pub column_conflicts: Vec<ColumnConflictInput>,
}

/// One namespace of the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub namespace_name: String,
    pub project_name: String,
    pub project_version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_extension: bool,
    /// Namespaces searched for unqualified references after this one. When
    /// absent, every project listed before this one.
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub entities: Vec<EntityInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInput {
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub allow_primary_key_updates: bool,
    #[serde(default)]
    pub base_entity: Option<EntityRefInput>,
    #[serde(default)]
    pub properties: Vec<PropertyInput>,
}

/// An entity reference, either a bare name or namespace-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EntityRefInput {
    Name(String),
    Qualified { namespace: String, name: String },
}

impl EntityRefInput {
    fn name(&self) -> &str {
        match self {
            EntityRefInput::Name(name) => name,
            EntityRefInput::Qualified { name, .. } => name,
        }
    }

    fn namespace(&self) -> Option<&str> {
        match self {
            EntityRefInput::Name(_) => None,
            EntityRefInput::Qualified { namespace, .. } => Some(namespace),
        }
    }

    fn label(&self) -> String {
        match self {
            EntityRefInput::Name(name) => name.clone(),
            EntityRefInput::Qualified { namespace, name } => format!("{}.{}", namespace, name),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyInput {
    pub name: String,
    #[serde(rename = "type")]
    pub property_type: PropertyType,
    /// Referenced entity; defaults to the property name.
    #[serde(default)]
    pub reference: Option<EntityRefInput>,
    #[serde(default)]
    pub role_name: String,
    #[serde(default)]
    pub shorten_to: String,
    #[serde(default)]
    pub documentation: String,
    #[serde(default)]
    pub is_part_of_identity: bool,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_required_collection: bool,
    #[serde(default)]
    pub is_optional_collection: bool,
    #[serde(default)]
    pub is_identity_rename: bool,
    #[serde(default)]
    pub base_key_name: String,
    #[serde(default)]
    pub min_length: Option<u64>,
    #[serde(default)]
    pub max_length: Option<u64>,
    #[serde(default, deserialize_with = "facet")]
    pub min_value: Option<String>,
    #[serde(default, deserialize_with = "facet")]
    pub max_value: Option<String>,
    #[serde(default, deserialize_with = "facet")]
    pub total_digits: Option<String>,
    #[serde(default, deserialize_with = "facet")]
    pub decimal_places: Option<String>,
    #[serde(default)]
    pub merge_directives: Vec<MergeDirectiveInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDirectiveInput {
    pub source_property_path: String,
    pub target_property_path: String,
}

/// Two property paths of one entity that share a storage column.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConflictInput {
    pub namespace: String,
    pub entity: String,
    pub first_property_path: String,
    pub second_property_path: String,
    #[serde(default)]
    pub first_original_entity: Option<String>,
    #[serde(default)]
    pub second_original_entity: Option<String>,
}

/// Numeric facets arrive as strings or JSON numbers.
fn facet<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Facet {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(Option::<Facet>::deserialize(deserializer)?.map(|f| match f {
        Facet::Text(s) => s,
        Facet::Number(n) => n.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    DomainEntity,
    Association,
    Common,
    InlineCommon,
    Choice,
    Descriptor,
    DomainEntitySubclass,
    AssociationSubclass,
    DomainEntityExtension,
    AssociationExtension,
    SchoolYearEnumeration,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::DomainEntity => "domainEntity",
            EntityKind::Association => "association",
            EntityKind::Common => "common",
            EntityKind::InlineCommon => "inlineCommon",
            EntityKind::Choice => "choice",
            EntityKind::Descriptor => "descriptor",
            EntityKind::DomainEntitySubclass => "domainEntitySubclass",
            EntityKind::AssociationSubclass => "associationSubclass",
            EntityKind::DomainEntityExtension => "domainEntityExtension",
            EntityKind::AssociationExtension => "associationExtension",
            EntityKind::SchoolYearEnumeration => "schoolYearEnumeration",
        }
    }

    /// Kinds that become API resources.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            EntityKind::DomainEntity
                | EntityKind::Association
                | EntityKind::Descriptor
                | EntityKind::DomainEntitySubclass
                | EntityKind::AssociationSubclass
                | EntityKind::DomainEntityExtension
                | EntityKind::AssociationExtension
        )
    }

    pub fn is_subclass(&self) -> bool {
        matches!(
            self,
            EntityKind::DomainEntitySubclass | EntityKind::AssociationSubclass
        )
    }

    pub fn is_extension(&self) -> bool {
        matches!(
            self,
            EntityKind::DomainEntityExtension | EntityKind::AssociationExtension
        )
    }

    /// Kinds a domainEntity or association property may point at.
    fn is_referable(&self) -> bool {
        matches!(
            self,
            EntityKind::DomainEntity
                | EntityKind::Association
                | EntityKind::DomainEntitySubclass
                | EntityKind::AssociationSubclass
        )
    }
}

/// Leaf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScalarType {
    Boolean,
    Currency,
    Date,
    Datetime,
    Decimal,
    Duration,
    Enumeration,
    Integer,
    Percent,
    SharedDecimal,
    SharedInteger,
    SharedShort,
    SharedString,
    Short,
    String,
    Time,
    Year,
}

/// Property `type` as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    Boolean,
    Currency,
    Date,
    Datetime,
    Decimal,
    Duration,
    Enumeration,
    Integer,
    Percent,
    SharedDecimal,
    SharedInteger,
    SharedShort,
    SharedString,
    Short,
    String,
    Time,
    Year,
    Descriptor,
    SchoolYearEnumeration,
    DomainEntity,
    Association,
    Common,
    InlineCommon,
    Choice,
}

impl PropertyType {
    fn scalar(&self) -> Option<ScalarType> {
        Some(match self {
            PropertyType::Boolean => ScalarType::Boolean,
            PropertyType::Currency => ScalarType::Currency,
            PropertyType::Date => ScalarType::Date,
            PropertyType::Datetime => ScalarType::Datetime,
            PropertyType::Decimal => ScalarType::Decimal,
            PropertyType::Duration => ScalarType::Duration,
            PropertyType::Enumeration => ScalarType::Enumeration,
            PropertyType::Integer => ScalarType::Integer,
            PropertyType::Percent => ScalarType::Percent,
            PropertyType::SharedDecimal => ScalarType::SharedDecimal,
            PropertyType::SharedInteger => ScalarType::SharedInteger,
            PropertyType::SharedShort => ScalarType::SharedShort,
            PropertyType::SharedString => ScalarType::SharedString,
            PropertyType::Short => ScalarType::Short,
            PropertyType::String => ScalarType::String,
            PropertyType::Time => ScalarType::Time,
            PropertyType::Year => ScalarType::Year,
            _ => return None,
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Descriptor => "descriptor",
            PropertyType::SchoolYearEnumeration => "schoolYearEnumeration",
            PropertyType::DomainEntity => "domainEntity",
            PropertyType::Association => "association",
            PropertyType::Common => "common",
            PropertyType::InlineCommon => "inlineCommon",
            PropertyType::Choice => "choice",
            _ => "scalar",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    DomainEntity,
    Association,
}

/// Resolved property variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Scalar(ScalarType),
    Descriptor { descriptor: EntityId },
    SchoolYearEnumeration,
    Reference {
        referenced: EntityId,
        kind: ReferenceKind,
    },
    Common { common: EntityId },
    InlineCommon { common: EntityId },
    Choice { choice: EntityId },
}

impl PropertyKind {
    /// The entity this property points at, if any.
    pub fn referenced_entity(&self) -> Option<EntityId> {
        match *self {
            PropertyKind::Descriptor { descriptor } => Some(descriptor),
            PropertyKind::Reference { referenced, .. } => Some(referenced),
            PropertyKind::Common { common } | PropertyKind::InlineCommon { common } => Some(common),
            PropertyKind::Choice { choice } => Some(choice),
            PropertyKind::Scalar(_) | PropertyKind::SchoolYearEnumeration => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, PropertyKind::Reference { .. })
    }

    pub fn is_descriptor(&self) -> bool {
        matches!(self, PropertyKind::Descriptor { .. })
    }

    /// Choice and inline common properties contribute their children inline.
    pub fn is_inlined(&self) -> bool {
        matches!(
            self,
            PropertyKind::Choice { .. } | PropertyKind::InlineCommon { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::Scalar(_) => "scalar",
            PropertyKind::Descriptor { .. } => "descriptor",
            PropertyKind::SchoolYearEnumeration => "schoolYearEnumeration",
            PropertyKind::Reference {
                kind: ReferenceKind::DomainEntity,
                ..
            } => "domainEntity",
            PropertyKind::Reference {
                kind: ReferenceKind::Association,
                ..
            } => "association",
            PropertyKind::Common { .. } => "common",
            PropertyKind::InlineCommon { .. } => "inlineCommon",
            PropertyKind::Choice { .. } => "choice",
        }
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeDirectiveId(pub usize);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min_value: Option<String>,
    pub max_value: Option<String>,
    pub total_digits: Option<String>,
    pub decimal_places: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Namespace {
    pub id: NamespaceId,
    pub name: String,
    pub project_name: String,
    pub project_version: String,
    pub description: String,
    pub is_extension: bool,
    pub dependencies: Vec<NamespaceId>,
    pub entities: Vec<EntityId>,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub namespace: NamespaceId,
    pub kind: EntityKind,
    pub name: String,
    pub documentation: String,
    pub is_abstract: bool,
    pub allow_primary_key_updates: bool,
    pub base_entity: Option<EntityId>,
    pub properties: Vec<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct Property {
    pub id: PropertyId,
    pub parent: EntityId,
    pub name: String,
    pub role_name: String,
    pub shorten_to: String,
    /// Prefix (shorten-to, else a role name differing from the name) followed by the name.
    pub full_name: String,
    pub documentation: String,
    pub kind: PropertyKind,
    pub is_part_of_identity: bool,
    pub is_required: bool,
    pub is_required_collection: bool,
    pub is_optional_collection: bool,
    pub is_identity_rename: bool,
    pub base_key_name: String,
    pub facets: Facets,
    /// Directives declared on this property.
    pub merge_directives: Vec<MergeDirectiveId>,
    /// Directives whose source path ends at this property.
    pub merge_sourced_by: Vec<MergeDirectiveId>,
}

impl Property {
    pub fn is_collection(&self) -> bool {
        self.is_required_collection || self.is_optional_collection
    }

    /// Prefix that distinguishes this property from others of the same name.
    pub fn name_prefix(&self) -> &str {
        if !self.shorten_to.is_empty() {
            &self.shorten_to
        } else if self.role_name != self.name {
            &self.role_name
        } else {
            ""
        }
    }
}

/// A declared equality between two property paths of one entity.
#[derive(Debug, Clone)]
pub struct MergeDirective {
    pub id: MergeDirectiveId,
    /// Property the directive is declared on.
    pub parent_property: PropertyId,
    pub source_path: String,
    pub target_path: String,
    pub source_chain: Vec<PropertyId>,
    pub target_chain: Vec<PropertyId>,
}

#[derive(Debug, Clone)]
pub struct ColumnConflict {
    pub entity: EntityId,
    pub first_property_path: String,
    pub second_property_path: String,
    pub first_original_entity: EntityId,
    pub second_original_entity: EntityId,
}

/// The resolved model arena.
#[derive(Debug, Clone)]
pub struct Model {
    namespaces: Vec<Namespace>,
    entities: Vec<Entity>,
    properties: Vec<Property>,
    merge_directives: Vec<MergeDirective>,
    column_conflicts: Vec<ColumnConflict>,
    order: Vec<EntityId>,
    lookup: HashMap<(NamespaceId, bool, String), EntityId>,
}

/// Ordering of names: case-insensitive first, then ordinal.
pub fn name_order(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

impl Model {
    /// Build the arena from a loaded model.
    ///
    /// # Errors
    ///
    /// Returns a `ModelError` for dangling references, duplicate entities,
    /// mismatched reference kinds, unresolvable merge paths, and cycles among
    /// identity references.
    pub fn build(input: &ModelInput) -> Result<Model, ModelError> {
        let mut model = Model {
            namespaces: Vec::new(),
            entities: Vec::new(),
            properties: Vec::new(),
            merge_directives: Vec::new(),
            column_conflicts: Vec::new(),
            order: Vec::new(),
            lookup: HashMap::new(),
        };

        model.add_namespaces(input)?;
        model.add_entities(input)?;
        model.resolve_base_entities(input)?;
        model.add_properties(input)?;
        model.resolve_merge_directives(input)?;
        model.resolve_column_conflicts(input)?;
        model.order = model.topological_order()?;

        debug!(
            namespaces = model.namespaces.len(),
            entities = model.entities.len(),
            properties = model.properties.len(),
            merge_directives = model.merge_directives.len(),
            "model built"
        );
        Ok(model)
    }

    fn add_namespaces(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        for (index, project) in input.projects.iter().enumerate() {
            self.namespaces.push(Namespace {
                id: NamespaceId(index),
                name: project.namespace_name.clone(),
                project_name: project.project_name.clone(),
                project_version: project.project_version.clone(),
                description: project.description.clone(),
                is_extension: project.is_extension,
                dependencies: Vec::new(),
                entities: Vec::new(),
            });
        }

        for (index, project) in input.projects.iter().enumerate() {
            let dependencies = match &project.dependencies {
                None => (0..index).map(NamespaceId).collect(),
                Some(names) => names
                    .iter()
                    .map(|name| {
                        self.namespace_by_name(name)
                            .ok_or_else(|| ModelError::UnknownNamespace {
                                namespace: name.clone(),
                                from: project.namespace_name.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            };
            self.namespaces[index].dependencies = dependencies;
        }
        Ok(())
    }

    fn add_entities(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        let mut extensions: HashMap<(NamespaceId, String), EntityId> = HashMap::new();

        for (ns_index, project) in input.projects.iter().enumerate() {
            let namespace = NamespaceId(ns_index);
            for entity in &project.entities {
                let id = EntityId(self.entities.len());

                // Extensions share their base entity's name and are never referenced.
                let duplicate = if entity.kind.is_extension() {
                    extensions
                        .insert((namespace, entity.name.clone()), id)
                        .is_some()
                } else {
                    let is_descriptor = entity.kind == EntityKind::Descriptor;
                    self.lookup
                        .insert((namespace, is_descriptor, entity.name.clone()), id)
                        .is_some()
                };
                if duplicate {
                    return Err(ModelError::DuplicateEntity {
                        namespace: project.namespace_name.clone(),
                        name: entity.name.clone(),
                    });
                }

                self.entities.push(Entity {
                    id,
                    namespace,
                    kind: entity.kind,
                    name: entity.name.clone(),
                    documentation: entity.documentation.clone(),
                    is_abstract: entity.is_abstract,
                    allow_primary_key_updates: entity.allow_primary_key_updates,
                    base_entity: None,
                    properties: Vec::new(),
                });
                self.namespaces[ns_index].entities.push(id);
            }
        }
        Ok(())
    }

    fn resolve_base_entities(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        let mut index = 0;
        for (ns_index, project) in input.projects.iter().enumerate() {
            for entity in &project.entities {
                let id = EntityId(index);
                index += 1;

                let needs_base = entity.kind.is_subclass() || entity.kind.is_extension();
                let base_ref = match (&entity.base_entity, needs_base) {
                    (Some(base), _) => base.clone(),
                    // An extension names its base by its own name.
                    (None, true) if entity.kind.is_extension() => {
                        EntityRefInput::Name(entity.name.clone())
                    }
                    (None, true) => {
                        return Err(ModelError::MissingBaseEntity {
                            entity: entity.name.clone(),
                            kind: entity.kind.as_str().to_string(),
                        })
                    }
                    (None, false) => continue,
                };

                let base = self.resolve_ref(NamespaceId(ns_index), &base_ref, false, &entity.name)?;
                self.entities[id.0].base_entity = Some(base);
            }
        }
        Ok(())
    }

    fn add_properties(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        let mut index = 0;
        for (ns_index, project) in input.projects.iter().enumerate() {
            let namespace = NamespaceId(ns_index);
            for entity in &project.entities {
                let entity_id = EntityId(index);
                index += 1;

                for property in &entity.properties {
                    let kind = self.resolve_kind(namespace, &entity.name, property)?;
                    let id = PropertyId(self.properties.len());
                    let mut resolved = Property {
                        id,
                        parent: entity_id,
                        name: property.name.clone(),
                        role_name: property.role_name.clone(),
                        shorten_to: property.shorten_to.clone(),
                        full_name: String::new(),
                        documentation: property.documentation.clone(),
                        kind,
                        is_part_of_identity: property.is_part_of_identity,
                        is_required: property.is_required,
                        is_required_collection: property.is_required_collection,
                        is_optional_collection: property.is_optional_collection,
                        is_identity_rename: property.is_identity_rename,
                        base_key_name: property.base_key_name.clone(),
                        facets: Facets {
                            min_length: property.min_length,
                            max_length: property.max_length,
                            min_value: property.min_value.clone(),
                            max_value: property.max_value.clone(),
                            total_digits: property.total_digits.clone(),
                            decimal_places: property.decimal_places.clone(),
                        },
                        merge_directives: Vec::new(),
                        merge_sourced_by: Vec::new(),
                    };
                    resolved.full_name = format!("{}{}", resolved.name_prefix(), resolved.name);
                    self.properties.push(resolved);
                    self.entities[entity_id.0].properties.push(id);
                }
            }
        }
        Ok(())
    }

    fn resolve_kind(
        &self,
        namespace: NamespaceId,
        entity_name: &str,
        property: &PropertyInput,
    ) -> Result<PropertyKind, ModelError> {
        if let Some(scalar) = property.property_type.scalar() {
            return Ok(PropertyKind::Scalar(scalar));
        }
        if property.property_type == PropertyType::SchoolYearEnumeration {
            return Ok(PropertyKind::SchoolYearEnumeration);
        }

        let reference = property
            .reference
            .clone()
            .unwrap_or_else(|| EntityRefInput::Name(property.name.clone()));
        let is_descriptor = property.property_type == PropertyType::Descriptor;
        let referenced = self.resolve_ref(namespace, &reference, is_descriptor, entity_name)?;
        let referenced_kind = self.entity(referenced).kind;

        let kind = match property.property_type {
            PropertyType::DomainEntity if referenced_kind.is_referable() => PropertyKind::Reference {
                referenced,
                kind: ReferenceKind::DomainEntity,
            },
            PropertyType::Association if referenced_kind.is_referable() => PropertyKind::Reference {
                referenced,
                kind: ReferenceKind::Association,
            },
            PropertyType::Common if referenced_kind == EntityKind::Common => {
                PropertyKind::Common { common: referenced }
            }
            PropertyType::InlineCommon if referenced_kind == EntityKind::InlineCommon => {
                PropertyKind::InlineCommon { common: referenced }
            }
            PropertyType::Choice if referenced_kind == EntityKind::Choice => {
                PropertyKind::Choice { choice: referenced }
            }
            PropertyType::Descriptor if referenced_kind == EntityKind::Descriptor => {
                PropertyKind::Descriptor {
                    descriptor: referenced,
                }
            }
            _ => {
                return Err(ModelError::ReferenceKindMismatch {
                    entity: entity_name.to_string(),
                    property: property.name.clone(),
                    property_type: property.property_type.as_str().to_string(),
                    referenced: reference.label(),
                    referenced_kind: referenced_kind.as_str().to_string(),
                })
            }
        };
        Ok(kind)
    }

    /// Resolve a reference from `from`: the named namespace, or the declaring
    /// namespace followed by its dependencies.
    fn resolve_ref(
        &self,
        from: NamespaceId,
        reference: &EntityRefInput,
        is_descriptor: bool,
        entity_name: &str,
    ) -> Result<EntityId, ModelError> {
        let candidates: Vec<NamespaceId> = match reference.namespace() {
            Some(name) => {
                vec![self
                    .namespace_by_name(name)
                    .ok_or_else(|| ModelError::UnknownNamespace {
                        namespace: name.to_string(),
                        from: entity_name.to_string(),
                    })?]
            }
            None => std::iter::once(from)
                .chain(self.namespaces[from.0].dependencies.iter().copied())
                .collect(),
        };

        candidates
            .into_iter()
            .find_map(|ns| {
                self.lookup
                    .get(&(ns, is_descriptor, reference.name().to_string()))
                    .copied()
            })
            .ok_or_else(|| ModelError::UnknownEntity {
                entity: entity_name.to_string(),
                reference: reference.label(),
            })
    }

    fn resolve_merge_directives(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        let mut property_index = 0;
        let mut pending: Vec<(PropertyId, MergeDirectiveInput)> = Vec::new();
        for project in &input.projects {
            for entity in &project.entities {
                for property in &entity.properties {
                    let id = PropertyId(property_index);
                    property_index += 1;
                    pending.extend(property.merge_directives.iter().map(|d| (id, d.clone())));
                }
            }
        }

        for (parent_property, directive) in pending {
            let entity = self.property(parent_property).parent;
            let source_chain =
                self.resolve_chain(entity, parent_property, &directive.source_property_path)?;
            let target_chain =
                self.resolve_chain(entity, parent_property, &directive.target_property_path)?;

            let id = MergeDirectiveId(self.merge_directives.len());
            if let Some(&terminal) = source_chain.last() {
                self.properties[terminal.0].merge_sourced_by.push(id);
            }
            self.properties[parent_property.0].merge_directives.push(id);
            self.merge_directives.push(MergeDirective {
                id,
                parent_property,
                source_path: directive.source_property_path,
                target_path: directive.target_property_path,
                source_chain,
                target_chain,
            });
        }
        Ok(())
    }

    /// Resolve a dot-separated property path starting at `entity`, following
    /// referenced entities between segments.
    fn resolve_chain(
        &self,
        entity: EntityId,
        declaring: PropertyId,
        path: &str,
    ) -> Result<Vec<PropertyId>, ModelError> {
        let unknown = |segment: &str| ModelError::UnknownMergePath {
            entity: self.entity(entity).name.clone(),
            property: self.property(declaring).name.clone(),
            path: path.to_string(),
            segment: segment.to_string(),
        };

        let mut chain = Vec::new();
        let mut current = Some(entity);
        for segment in path.split('.') {
            let within = current.ok_or_else(|| unknown(segment))?;
            let candidates = self.properties_with_base(within);
            let found = candidates
                .iter()
                .copied()
                .find(|&p| self.property(p).full_name == segment)
                .or_else(|| {
                    candidates
                        .iter()
                        .copied()
                        .find(|&p| self.property(p).name == segment)
                })
                .ok_or_else(|| unknown(segment))?;
            chain.push(found);
            current = self.property(found).kind.referenced_entity();
        }
        Ok(chain)
    }

    fn resolve_column_conflicts(&mut self, input: &ModelInput) -> Result<(), ModelError> {
        for conflict in &input.column_conflicts {
            let unknown = |name: &str| ModelError::UnknownConflictEntity {
                namespace: conflict.namespace.clone(),
                entity: name.to_string(),
            };
            let namespace = self
                .namespace_by_name(&conflict.namespace)
                .ok_or_else(|| unknown(&conflict.entity))?;
            let find = |name: &str| {
                self.namespaces[namespace.0]
                    .entities
                    .iter()
                    .copied()
                    .find(|&e| self.entity(e).name == name)
                    .ok_or_else(|| unknown(name))
            };

            let entity = find(&conflict.entity)?;
            let first_original_entity = match &conflict.first_original_entity {
                Some(name) => find(name)?,
                None => entity,
            };
            let second_original_entity = match &conflict.second_original_entity {
                Some(name) => find(name)?,
                None => entity,
            };

            self.column_conflicts.push(ColumnConflict {
                entity,
                first_property_path: conflict.first_property_path.clone(),
                second_property_path: conflict.second_property_path.clone(),
                first_original_entity,
                second_original_entity,
            });
        }
        Ok(())
    }

    /// Order entities so that everything an entity's identity, commons, or base
    /// depends on is processed first.
    fn topological_order(&self) -> Result<Vec<EntityId>, ModelError> {
        let mut graph: DiGraph<EntityId, ()> = DiGraph::with_capacity(self.entities.len(), 0);
        let nodes: Vec<NodeIndex> = self
            .entities
            .iter()
            .map(|entity| graph.add_node(entity.id))
            .collect();

        for entity in &self.entities {
            if let Some(base) = entity.base_entity {
                graph.add_edge(nodes[base.0], nodes[entity.id.0], ());
            }
            for &property_id in &entity.properties {
                let property = self.property(property_id);
                let dependency = match property.kind {
                    PropertyKind::Reference { referenced, .. } if property.is_part_of_identity => {
                        Some(referenced)
                    }
                    PropertyKind::Common { common } | PropertyKind::InlineCommon { common } => {
                        Some(common)
                    }
                    PropertyKind::Choice { choice } => Some(choice),
                    _ => None,
                };
                if let Some(dependency) = dependency {
                    graph.add_edge(nodes[dependency.0], nodes[entity.id.0], ());
                }
            }
        }

        toposort(&graph, None)
            .map(|sorted| sorted.into_iter().map(|node| graph[node]).collect())
            .map_err(|cycle| ModelError::ReferenceCycle {
                entity: self.entity(graph[cycle.node_id()]).name.clone(),
            })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn property(&self, id: PropertyId) -> &Property {
        &self.properties[id.0]
    }

    pub fn namespace(&self, id: NamespaceId) -> &Namespace {
        &self.namespaces[id.0]
    }

    pub fn merge_directive(&self, id: MergeDirectiveId) -> &MergeDirective {
        &self.merge_directives[id.0]
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn column_conflicts(&self) -> &[ColumnConflict] {
        &self.column_conflicts
    }

    /// Entities with everything they depend on ahead of them.
    pub fn processing_order(&self) -> &[EntityId] {
        &self.order
    }

    pub fn namespace_by_name(&self, name: &str) -> Option<NamespaceId> {
        self.namespaces
            .iter()
            .find(|ns| ns.name == name)
            .map(|ns| ns.id)
    }

    /// Find a non-extension entity by namespace and name.
    pub fn find_entity(&self, namespace: &str, name: &str, is_descriptor: bool) -> Option<EntityId> {
        let ns = self.namespace_by_name(namespace)?;
        self.lookup
            .get(&(ns, is_descriptor, name.to_string()))
            .copied()
    }

    /// Project name of the namespace that owns `entity`.
    pub fn project_name(&self, entity: EntityId) -> &str {
        &self.namespace(self.entity(entity).namespace).project_name
    }

    /// Superclass of a subclass. Extensions are not subclasses.
    pub fn superclass(&self, entity: EntityId) -> Option<EntityId> {
        let entity = self.entity(entity);
        if entity.kind.is_subclass() {
            entity.base_entity
        } else {
            None
        }
    }

    /// Base key names renamed by a subclass's identity rename properties.
    fn renamed_base_keys(&self, entity: EntityId) -> Vec<&str> {
        self.entity(entity)
            .properties
            .iter()
            .map(|&p| self.property(p))
            .filter(|p| p.is_identity_rename)
            .map(|p| p.base_key_name.as_str())
            .collect()
    }

    /// The identity rename property of a subclass, if any.
    pub fn identity_rename(&self, entity: EntityId) -> Option<&Property> {
        self.entity(entity)
            .properties
            .iter()
            .map(|&p| self.property(p))
            .find(|p| p.is_identity_rename)
    }

    /// Own properties, preceded by the superclass's for a subclass. Superclass
    /// properties renamed by an identity rename are left out.
    pub fn properties_with_base(&self, entity: EntityId) -> Vec<PropertyId> {
        let own = &self.entity(entity).properties;
        let Some(base) = self.superclass(entity) else {
            return own.clone();
        };
        let renamed = self.renamed_base_keys(entity);
        self.entity(base)
            .properties
            .iter()
            .copied()
            .filter(|&p| !renamed.contains(&self.property(p).name.as_str()))
            .chain(own.iter().copied())
            .collect()
    }

    /// Identity properties that make up the entity's identity: its own, the
    /// superclass's (less renamed keys), and those of inline commons, sorted by
    /// full name.
    pub fn identity_properties(&self, entity: EntityId) -> Vec<PropertyId> {
        let mut result = self.identity_properties_with_inline_commons(entity);

        if let Some(base) = self.superclass(entity) {
            let renamed = self.renamed_base_keys(entity);
            result.extend(
                self.entity(base)
                    .properties
                    .iter()
                    .copied()
                    .filter(|&p| {
                        let p = self.property(p);
                        p.is_part_of_identity && !renamed.contains(&p.name.as_str())
                    }),
            );
        }

        result.sort_by(|&a, &b| name_order(&self.property(a).full_name, &self.property(b).full_name));
        result
    }

    fn identity_properties_with_inline_commons(&self, entity: EntityId) -> Vec<PropertyId> {
        let mut result: Vec<PropertyId> = self
            .entity(entity)
            .properties
            .iter()
            .copied()
            .filter(|&p| self.property(p).is_part_of_identity)
            .collect();
        for &p in &self.entity(entity).properties {
            if let PropertyKind::InlineCommon { common } = self.property(p).kind {
                result.extend(self.identity_properties_with_inline_commons(common));
            }
        }
        result
    }

    /// True when `entity` is the property's own parent or the superclass it inherits from.
    pub fn is_own_property(&self, entity: EntityId, property: PropertyId) -> bool {
        let parent = self.property(property).parent;
        parent == entity || self.entity(entity).base_entity == Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_model_str;

    fn build(json: &str) -> Result<Model, ModelError> {
        Model::build(&load_model_str(json).unwrap())
    }

    const SESSION_MODEL: &str = r#"{
        "projects": [{
            "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
            "entities": [
                { "kind": "domainEntity", "name": "CourseOffering", "properties": [
                    { "name": "LocalCourseCode", "type": "string", "isPartOfIdentity": true, "maxLength": 60 },
                    { "name": "School", "type": "domainEntity", "isPartOfIdentity": true },
                    { "name": "Session", "type": "domainEntity", "isPartOfIdentity": true,
                      "mergeDirectives": [{ "sourcePropertyPath": "Session.School", "targetPropertyPath": "School" }] }
                ]},
                { "kind": "domainEntity", "name": "Session", "properties": [
                    { "name": "SessionName", "type": "string", "isPartOfIdentity": true },
                    { "name": "School", "type": "domainEntity", "isPartOfIdentity": true }
                ]},
                { "kind": "domainEntity", "name": "School", "properties": [
                    { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true }
                ]}
            ]
        }]
    }"#;

    #[test]
    fn references_resolve_by_property_name() {
        let model = build(SESSION_MODEL).unwrap();
        let school = model.find_entity("EdFi", "School", false).unwrap();
        let offering = model.find_entity("EdFi", "CourseOffering", false).unwrap();

        let school_prop = model.entity(offering).properties[1];
        assert_eq!(
            model.property(school_prop).kind,
            PropertyKind::Reference {
                referenced: school,
                kind: ReferenceKind::DomainEntity
            }
        );
    }

    #[test]
    fn processing_order_puts_referenced_first() {
        let model = build(SESSION_MODEL).unwrap();
        let position = |name: &str| {
            let id = model.find_entity("EdFi", name, false).unwrap();
            model.processing_order().iter().position(|&e| e == id).unwrap()
        };
        assert!(position("School") < position("Session"));
        assert!(position("Session") < position("CourseOffering"));
    }

    #[test]
    fn merge_directive_chains_resolve() {
        let model = build(SESSION_MODEL).unwrap();
        let session = model.find_entity("EdFi", "Session", false).unwrap();
        let offering = model.find_entity("EdFi", "CourseOffering", false).unwrap();

        let directive = model.merge_directive(MergeDirectiveId(0));
        let session_prop = model.entity(offering).properties[2];
        let session_school = model.entity(session).properties[1];
        assert_eq!(directive.parent_property, session_prop);
        assert_eq!(directive.source_chain, vec![session_prop, session_school]);
        assert_eq!(directive.target_chain, vec![model.entity(offering).properties[1]]);
        assert_eq!(
            model.property(session_school).merge_sourced_by,
            vec![MergeDirectiveId(0)]
        );
    }

    #[test]
    fn full_name_uses_role_name_unless_equal() {
        let model = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Thing", "properties": [
                        { "name": "BeginDate", "type": "date", "roleName": "Entry" },
                        { "name": "EndDate", "type": "date", "roleName": "EndDate" },
                        { "name": "Topic", "type": "string", "roleName": "Discussion", "shortenTo": "Short" }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let names: Vec<&str> = model.properties().iter().map(|p| p.full_name.as_str()).collect();
        assert_eq!(names, vec!["EntryBeginDate", "EndDate", "ShortTopic"]);
    }

    #[test]
    fn unknown_reference_is_model_error() {
        let result = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "Section", "properties": [
                        { "name": "Room", "type": "domainEntity", "isPartOfIdentity": true }
                    ]}
                ]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::UnknownEntity { .. })));
    }

    #[test]
    fn reference_kind_mismatch() {
        let result = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "common", "name": "Address", "properties": [] },
                    { "kind": "domainEntity", "name": "Staff", "properties": [
                        { "name": "Address", "type": "domainEntity" }
                    ]}
                ]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::ReferenceKindMismatch { .. })));
    }

    #[test]
    fn identity_cycle_detected() {
        let result = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "A", "properties": [
                        { "name": "B", "type": "domainEntity", "isPartOfIdentity": true } ]},
                    { "kind": "domainEntity", "name": "B", "properties": [
                        { "name": "A", "type": "domainEntity", "isPartOfIdentity": true } ]}
                ]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::ReferenceCycle { .. })));
    }

    #[test]
    fn non_identity_self_reference_allowed() {
        let model = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "LocalEducationAgency", "properties": [
                        { "name": "LocalEducationAgencyId", "type": "integer", "isPartOfIdentity": true },
                        { "name": "LocalEducationAgency", "type": "domainEntity", "roleName": "Parent" }
                    ]}
                ]}]}"#,
        );
        assert!(model.is_ok());
    }

    #[test]
    fn subclass_identity_excludes_renamed_key() {
        let model = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [
                    { "kind": "domainEntity", "name": "EducationOrganization", "isAbstract": true, "properties": [
                        { "name": "EducationOrganizationId", "type": "integer", "isPartOfIdentity": true },
                        { "name": "NameOfInstitution", "type": "string", "isRequired": true }
                    ]},
                    { "kind": "domainEntitySubclass", "name": "School", "baseEntity": "EducationOrganization",
                      "properties": [
                        { "name": "SchoolId", "type": "integer", "isPartOfIdentity": true,
                          "isIdentityRename": true, "baseKeyName": "EducationOrganizationId" }
                    ]}
                ]}]}"#,
        )
        .unwrap();
        let school = model.find_entity("EdFi", "School", false).unwrap();
        let identity: Vec<&str> = model
            .identity_properties(school)
            .into_iter()
            .map(|p| model.property(p).name.as_str())
            .collect();
        assert_eq!(identity, vec!["SchoolId"]);

        let all: Vec<&str> = model
            .properties_with_base(school)
            .into_iter()
            .map(|p| model.property(p).name.as_str())
            .collect();
        assert_eq!(all, vec!["NameOfInstitution", "SchoolId"]);
    }

    #[test]
    fn subclass_without_base_rejected() {
        let result = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [ { "kind": "domainEntitySubclass", "name": "School" } ]}]}"#,
        );
        assert!(matches!(result, Err(ModelError::MissingBaseEntity { .. })));
    }

    #[test]
    fn extension_resolves_base_in_dependency() {
        let model = build(
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
        let core_school = model.find_entity("EdFi", "School", false).unwrap();
        let extension = model.namespace(NamespaceId(1)).entities[0];
        assert_eq!(model.entity(extension).base_entity, Some(core_school));
        assert_eq!(model.superclass(extension), None);
    }

    #[test]
    fn numeric_facets_accept_numbers() {
        let model = build(
            r#"{ "projects": [{ "namespaceName": "EdFi", "projectName": "Ed-Fi", "projectVersion": "5.0.0",
                "entities": [ { "kind": "domainEntity", "name": "Score", "properties": [
                    { "name": "Value", "type": "integer", "minValue": 0, "maxValue": "100" } ]} ]}]}"#,
        )
        .unwrap();
        let facets = &model.properties()[0].facets;
        assert_eq!(facets.min_value.as_deref(), Some("0"));
        assert_eq!(facets.max_value.as_deref(), Some("100"));
    }

    #[test]
    fn name_order_is_case_insensitive_first() {
        let mut names = vec!["schoolId", "SchoolYear", "Alpha", "beta"];
        names.sort_by(|a, b| name_order(a, b));
        assert_eq!(names, vec!["Alpha", "beta", "schoolId", "SchoolYear"]);
    }
}
