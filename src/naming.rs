//! Naming functions shared by every renderer.
//!
//! JSON paths, JSON Schema property keys and OpenAPI property keys are all
//! derived from [`ApiPropertyMapping`] and [`PropertyModifier`] through the
//! functions here, so a document's declared shape and its path map always
//! agree on names.

use crate::model::{EntityId, EntityKind, Model, PropertyId, PropertyKind};

/// Split a PascalCase identifier into words, keeping acronyms together:
/// `IEPBeginDate` → `IEP`, `Begin`, `Date`.
pub fn split_words(s: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = s.char_indices().collect();
    let mut words = Vec::new();
    let mut start = 0;

    for i in 1..chars.len() {
        let (index, current) = chars[i];
        let previous = chars[i - 1].1;
        let next = chars.get(i + 1).map(|&(_, c)| c);

        let boundary = current.is_uppercase()
            && (previous.is_lowercase()
                || previous.is_ascii_digit()
                || (previous.is_uppercase() && next.is_some_and(|c| c.is_lowercase())));
        if boundary {
            words.push(&s[start..index]);
            start = index;
        }
    }
    if start < s.len() {
        words.push(&s[start..]);
    }
    words
}

/// Lowercase the first word, treating a leading acronym as one unit.
pub fn uncapitalize(s: &str) -> String {
    let words = split_words(s);
    let Some(first) = words.first() else {
        return String::new();
    };
    let rest = &s[first.len()..];

    let is_acronym = first.chars().count() > 1 && first.chars().all(|c| !c.is_lowercase());
    if is_acronym {
        format!("{}{}", first.to_lowercase(), rest)
    } else {
        let mut chars = first.chars();
        match chars.next() {
            Some(c) => format!("{}{}{}", c.to_lowercase(), chars.as_str(), rest),
            None => rest.to_string(),
        }
    }
}

const IRREGULAR: &[(&str, &str)] = &[("Person", "People"), ("Child", "Children")];

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u')
}

/// English plural of the final word.
pub fn pluralize(s: &str) -> String {
    for (singular, plural) in IRREGULAR {
        if let Some(stem) = s.strip_suffix(singular) {
            return format!("{}{}", stem, plural);
        }
    }

    let mut chars = s.chars().rev();
    let last = chars.next();
    let before_last = chars.next();
    match (last, before_last) {
        (Some('y'), Some(c)) if !is_vowel(c) => format!("{}ies", &s[..s.len() - 1]),
        (Some('s' | 'x' | 'z'), _) => format!("{}es", s),
        (Some('h'), Some('c' | 's')) => format!("{}es", s),
        (Some(_), _) => format!("{}s", s),
        (None, _) => String::new(),
    }
}

/// English singular of the final word; the inverse of [`pluralize`].
pub fn singularize(s: &str) -> String {
    for (singular, plural) in IRREGULAR {
        if let Some(stem) = s.strip_suffix(plural) {
            return format!("{}{}", stem, singular);
        }
    }

    if let Some(stem) = s.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    for suffix in ["ches", "shes", "sses", "xes", "zes"] {
        if s.ends_with(suffix) {
            return s[..s.len() - 2].to_string();
        }
    }
    match s.strip_suffix('s') {
        Some(stem) if !stem.ends_with('s') => stem.to_string(),
        _ => s.to_string(),
    }
}

/// Prepend `prefix` to `name`, collapsing trailing words of the prefix that
/// the name already begins with.
pub fn prepend_prefix_with_collapse(name: &str, prefix: &str) -> String {
    if prefix.is_empty() || name.starts_with(prefix) {
        return name.to_string();
    }

    let prefix_words = split_words(prefix);
    let name_words = split_words(name);
    let max = prefix_words.len().min(name_words.len().saturating_sub(1));
    for k in (1..=max).rev() {
        if prefix_words[prefix_words.len() - k..] == name_words[..k] {
            return format!("{}{}", prefix, name_words[k..].concat());
        }
    }
    format!("{}{}", prefix, name)
}

/// Drop leading words of `name` that repeat the trailing words of
/// `parent_name`, keeping at least one word.
pub fn collapse_parent_name(name: &str, parent_name: &str) -> String {
    let parent_words = split_words(parent_name);
    let name_words = split_words(name);
    let max = parent_words.len().min(name_words.len().saturating_sub(1));
    for k in (1..=max).rev() {
        if parent_words[parent_words.len() - k..] == name_words[..k] {
            return name_words[k..].concat();
        }
    }
    name.to_string()
}

/// Modifiers accumulated while descending through choices and inline commons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyModifier {
    pub optional_due_to_parent: bool,
    pub parent_prefixes: Vec<String>,
}

impl PropertyModifier {
    pub fn concat(&self, other: &PropertyModifier) -> PropertyModifier {
        let mut parent_prefixes = self.parent_prefixes.clone();
        parent_prefixes.extend(other.parent_prefixes.iter().cloned());
        PropertyModifier {
            optional_due_to_parent: self.optional_due_to_parent || other.optional_due_to_parent,
            parent_prefixes,
        }
    }

    /// The name with every parent prefix prepended.
    pub fn prefixed_name(&self, name: &str) -> String {
        format!("{}{}", self.parent_prefixes.concat(), name)
    }
}

/// Key of a property in a document: parent prefixes, then the special
/// prefix (collapsed), uncapitalized. Paths and schemas both name keys here.
pub fn document_key(api_name: &str, modifier: &PropertyModifier, special_prefix: &str) -> String {
    let name = modifier.prefixed_name(api_name);
    uncapitalize(&prepend_prefix_with_collapse(&name, special_prefix))
}

/// API-facing names and category flags of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPropertyMapping {
    /// Name of a single value: a leaf key, or an array element key.
    pub full_name: String,
    /// Key of the property on its parent object.
    pub top_level_name: String,
    /// Element key inside a reference collection item.
    pub reference_collection_name: String,
    /// Element key inside a descriptor collection item.
    pub descriptor_collection_name: String,
    pub is_reference_collection: bool,
    pub is_scalar_reference: bool,
    pub is_descriptor_collection: bool,
    pub is_scalar_common: bool,
    pub is_common_collection: bool,
    pub is_choice: bool,
    pub is_inline_common: bool,
}

impl ApiPropertyMapping {
    pub fn new(model: &Model, property_id: PropertyId) -> ApiPropertyMapping {
        let property = model.property(property_id);
        let parent_name = &model.entity(property.parent).name;
        let is_collection = property.is_collection();

        let base_name = prepend_prefix_with_collapse(&property.name, property.name_prefix());
        let plural = || pluralize(&collapse_parent_name(&base_name, parent_name));

        let mut mapping = ApiPropertyMapping {
            full_name: base_name.clone(),
            top_level_name: base_name.clone(),
            reference_collection_name: String::new(),
            descriptor_collection_name: String::new(),
            is_reference_collection: false,
            is_scalar_reference: false,
            is_descriptor_collection: false,
            is_scalar_common: false,
            is_common_collection: false,
            is_choice: false,
            is_inline_common: false,
        };

        match property.kind {
            PropertyKind::Reference { .. } if is_collection => {
                mapping.is_reference_collection = true;
                mapping.top_level_name = plural();
                mapping.reference_collection_name = format!("{}Reference", base_name);
            }
            PropertyKind::Reference { .. } => {
                mapping.is_scalar_reference = true;
                mapping.top_level_name = format!("{}Reference", base_name);
            }
            PropertyKind::Descriptor { .. } if is_collection => {
                mapping.is_descriptor_collection = true;
                mapping.top_level_name = plural();
                mapping.descriptor_collection_name = format!("{}Descriptor", base_name);
            }
            PropertyKind::Descriptor { .. } => {
                mapping.full_name = format!("{}Descriptor", base_name);
                mapping.top_level_name = mapping.full_name.clone();
            }
            PropertyKind::Common { .. } if is_collection => {
                mapping.is_common_collection = true;
                mapping.top_level_name = plural();
            }
            PropertyKind::Common { .. } => {
                mapping.is_scalar_common = true;
            }
            PropertyKind::Choice { .. } => mapping.is_choice = true,
            PropertyKind::InlineCommon { .. } => mapping.is_inline_common = true,
            PropertyKind::SchoolYearEnumeration if is_collection => {
                mapping.top_level_name = plural();
            }
            PropertyKind::SchoolYearEnumeration => {
                mapping.top_level_name = format!("{}TypeReference", base_name);
            }
            PropertyKind::Scalar(_) if is_collection => {
                mapping.top_level_name = plural();
            }
            PropertyKind::Scalar(_) => {}
        }
        mapping
    }
}

/// Role name of the first property in the chain whose role name equals its
/// own name. A referenced identity leaf reached through such a property is
/// prefixed with it to keep it apart from same-named leaves.
pub fn identical_role_name_prefix(model: &Model, chain: &[PropertyId]) -> String {
    let Some((_, intermediate)) = chain.split_last() else {
        return String::new();
    };
    intermediate
        .iter()
        .map(|&p| model.property(p))
        .find(|p| !p.role_name.is_empty() && p.role_name == p.name)
        .map(|p| p.role_name.clone())
        .unwrap_or_default()
}

/// Resource name: the entity name, suffixed for descriptors.
pub fn resource_name(model: &Model, entity: EntityId) -> String {
    let entity = model.entity(entity);
    if entity.kind == EntityKind::Descriptor {
        format!("{}Descriptor", entity.name)
    } else {
        entity.name.clone()
    }
}

/// Endpoint name: the uncapitalized plural resource name.
pub fn endpoint_name(model: &Model, entity: EntityId) -> String {
    uncapitalize(&pluralize(&resource_name(model, entity)))
}

pub fn project_endpoint_name(project_name: &str) -> String {
    project_name.to_lowercase()
}
