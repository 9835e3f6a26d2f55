//! A single replicated entity

use crate::change::{merge_properties, ChangeRecord, Owned, Properties};
use crate::error::SyncError;
use crate::world::{Emit, GameWorld};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Per-call hints for update propagation to bindings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateHints {
    /// Identifiers of bindings that must not see this update, typically the
    /// binding that produced it
    pub skip_bindings: Vec<String>,
}

impl UpdateHints {
    pub fn skipping(binding: impl Into<String>) -> Self {
        Self {
            skip_bindings: vec![binding.into()],
        }
    }

    pub fn skips(&self, binding: &str) -> bool {
        self.skip_bindings.iter().any(|skipped| skipped == binding)
    }

    pub fn merge(&mut self, other: UpdateHints) {
        for binding in other.skip_bindings {
            if !self.skips(&binding) {
                self.skip_bindings.push(binding);
            }
        }
    }
}

/// Identity, owner and property bag of one object.
///
/// `id` and `owner` never change once constructed. Bindings hang their own
/// representation off the object through the linked-object slots.
pub struct GameObject {
    id: String,
    owner: String,
    properties: Properties,
    linked: HashMap<String, Box<dyn Any>>,
}

impl GameObject {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        properties: Properties,
    ) -> Result<Self, SyncError> {
        let id = id.into();
        let owner = owner.into();
        if owner.is_empty() {
            return Err(SyncError::MissingOwner { id });
        }

        Ok(Self {
            id,
            owner,
            properties,
            linked: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub(crate) fn merge_properties(&mut self, properties: &Properties) {
        merge_properties(&mut self.properties, properties);
    }

    /// An `add` record carrying the full current property set
    pub fn creation_record(&self) -> ChangeRecord {
        ChangeRecord::add(self.id.clone(), self.owner.clone(), self.properties.clone())
    }

    pub fn linked_object<T: Any>(&self, binding: &str) -> Option<&T> {
        self.linked.get(binding).and_then(|linked| linked.downcast_ref::<T>())
    }

    pub fn linked_object_mut<T: Any>(&mut self, binding: &str) -> Option<&mut T> {
        self.linked
            .get_mut(binding)
            .and_then(|linked| linked.downcast_mut::<T>())
    }

    pub fn set_linked_object<T: Any>(&mut self, binding: impl Into<String>, linked: T) {
        self.linked.insert(binding.into(), Box::new(linked));
    }

    pub fn remove_linked_object(&mut self, binding: &str) -> Option<Box<dyn Any>> {
        self.linked.remove(binding)
    }
}

impl Owned for GameObject {
    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.owner)
    }
}

impl fmt::Debug for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("properties", &self.properties)
            .field("linked", &self.linked.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Mutable handle to an object that lives in a [`GameWorld`].
///
/// Mutations go through the world so bindings run and change records are
/// emitted. `delete` consumes the handle: a deleted object is gone for good.
pub struct GameObjectMut<'w> {
    world: &'w mut GameWorld,
    id: String,
}

impl<'w> GameObjectMut<'w> {
    pub(crate) fn new(world: &'w mut GameWorld, id: String) -> Self {
        Self { world, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn object(&self) -> &GameObject {
        self.world.object_unchecked(&self.id)
    }

    pub fn owner(&self) -> &str {
        self.object().owner()
    }

    pub fn properties(&self) -> &Properties {
        self.object().properties()
    }

    /// Merges `properties`, runs bindings and emits an `update` record if the
    /// world's filter accepts this object
    pub fn update(&mut self, properties: Properties, hints: &UpdateHints) -> Result<(), SyncError> {
        self.world.apply_update(&self.id, properties, hints, Emit::Now)
    }

    /// Like [`update`](Self::update) but collects the record into `batch`
    pub fn update_into(
        &mut self,
        properties: Properties,
        hints: &UpdateHints,
        batch: &mut Vec<ChangeRecord>,
    ) -> Result<(), SyncError> {
        self.world
            .apply_update(&self.id, properties, hints, Emit::Into(batch))
    }

    /// The `add` record that seeds a newly joined peer, if the filter allows
    pub fn batch_create(&self) -> Option<ChangeRecord> {
        self.world.batch_create(&self.id)
    }

    pub fn delete(self) -> Result<(), SyncError> {
        self.world.apply_delete(&self.id, Emit::Now)
    }

    pub fn delete_into(self, batch: &mut Vec<ChangeRecord>) -> Result<(), SyncError> {
        self.world.apply_delete(&self.id, Emit::Into(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_requires_owner() {
        let err = GameObject::new("a", "", Properties::new()).unwrap_err();
        assert_eq!(err, SyncError::MissingOwner { id: "a".into() });

        let object = GameObject::new("a", "W", Properties::new()).unwrap();
        assert_eq!(object.owner(), "W");
    }

    #[test]
    fn test_merge_never_removes_keys() {
        let mut object = GameObject::new("a", "W", props(json!({ "x": 1, "y": 2 }))).unwrap();
        object.merge_properties(&props(json!({ "y": 3 })));

        assert_eq!(object.property("x"), Some(&json!(1)));
        assert_eq!(object.property("y"), Some(&json!(3)));
    }

    #[test]
    fn test_creation_record_carries_full_state() {
        let object = GameObject::new("a", "W", props(json!({ "x": 1 }))).unwrap();
        assert_eq!(
            object.creation_record(),
            ChangeRecord::add("a", "W", props(json!({ "x": 1 })))
        );
    }

    #[test]
    fn test_linked_objects_are_typed() {
        let mut object = GameObject::new("a", "W", Properties::new()).unwrap();
        object.set_linked_object("mesh", 42u32);

        assert_eq!(object.linked_object::<u32>("mesh"), Some(&42));
        assert!(object.linked_object::<String>("mesh").is_none());

        *object.linked_object_mut::<u32>("mesh").unwrap() += 1;
        assert_eq!(object.linked_object::<u32>("mesh"), Some(&43));

        assert!(object.remove_linked_object("mesh").is_some());
        assert!(object.linked_object::<u32>("mesh").is_none());
    }

    #[test]
    fn test_update_hints_merge() {
        let mut hints = UpdateHints::skipping("physics");
        hints.merge(UpdateHints {
            skip_bindings: vec!["physics".into(), "render".into()],
        });

        assert_eq!(hints.skip_bindings, vec!["physics", "render"]);
        assert!(hints.skips("render"));
        assert!(!hints.skips("audio"));
    }
}
