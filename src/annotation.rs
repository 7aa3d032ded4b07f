//! Typed annotation tables.
//!
//! Each pass writes one table keyed by entity or property id and later passes
//! read it. Reading a slot that was never written is an [`InvariantError`]:
//! it means a pass ran out of order or skipped an entity.

use std::marker::PhantomData;

use crate::error::InvariantError;
use crate::model::{EntityId, Model, PropertyId};

/// An arena id usable as an annotation key.
pub trait ArenaId: Copy {
    fn index(self) -> usize;
    /// Entity label used in diagnostics.
    fn label(self, model: &Model) -> String;
}

impl ArenaId for EntityId {
    fn index(self) -> usize {
        self.0
    }

    fn label(self, model: &Model) -> String {
        model.entity(self).name.clone()
    }
}

impl ArenaId for PropertyId {
    fn index(self) -> usize {
        self.0
    }

    fn label(self, model: &Model) -> String {
        let property = model.property(self);
        format!("{}.{}", model.entity(property.parent).name, property.full_name)
    }
}

/// One annotation slot per arena entry.
#[derive(Debug, Clone)]
pub struct Annotations<I, T> {
    name: &'static str,
    slots: Vec<Option<T>>,
    _id: PhantomData<I>,
}

pub type EntityAnnotations<T> = Annotations<EntityId, T>;
pub type PropertyAnnotations<T> = Annotations<PropertyId, T>;

impl<I: ArenaId, T> Annotations<I, T> {
    pub fn new(name: &'static str, len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Annotations {
            name,
            slots,
            _id: PhantomData,
        }
    }

    pub fn insert(&mut self, id: I, value: T) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            *slot = Some(value);
        }
    }

    pub fn contains(&self, id: I) -> bool {
        self.try_get(id).is_some()
    }

    pub fn try_get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Read a slot that an earlier pass must have written.
    pub fn get(&self, model: &Model, id: I) -> Result<&T, InvariantError> {
        self.try_get(id)
            .ok_or_else(|| InvariantError::MissingAnnotation {
                entity: id.label(model),
                annotation: self.name.to_string(),
            })
    }
}
