//! The authoritative local object store

use crate::binding::Binding;
use crate::change::{merge_properties, ChangeRecord, Owned, Properties};
use crate::error::SyncError;
use crate::events::{EventEmitter, ListenerId};
use crate::game_object::{GameObject, GameObjectMut, UpdateHints};
use crate::id::{IdGenerator, RandomIdGenerator};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::rc::Rc;

/// How many fresh ids to try before giving up on avoiding a collision
const MAX_ID_ATTEMPTS: usize = 8;

/// Decides which objects this world announces in its change events
pub type WorldFilter = Rc<dyn Fn(&dyn Owned) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorldEvent {
    /// Payload is one batch of change records
    WorldChange,
}

/// What a world tells a peer about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldMetadata {
    pub identifier: String,
    pub identifier_chain: Vec<String>,
}

/// Where a change record goes: straight out as its own event, or into a
/// batch the caller emits later
pub(crate) enum Emit<'a> {
    Now,
    Into(&'a mut Vec<ChangeRecord>),
}

/// Staged add/update waiting for `flush_queue`
#[derive(Debug, Default)]
struct PendingChange {
    properties: Properties,
    hints: UpdateHints,
    add: bool,
    owner: Option<String>,
}

/// A local authoritative store of replicated objects.
///
/// Mutations happen synchronously and emit `WorldChange` events in call
/// order. By default only objects owned by this world are announced, so a
/// world never re-broadcasts a change it merely received. Remote changes are
/// staged with `queue_add`/`queue_update` and applied by `flush_queue`,
/// which emits the whole burst as a single event.
pub struct GameWorld {
    identifier: String,
    identifier_chain: Vec<String>,
    objects: HashMap<String, GameObject>,
    order: Vec<String>,
    bindings: Vec<Box<dyn Binding>>,
    filter: WorldFilter,
    queue: HashMap<String, PendingChange>,
    queue_order: Vec<String>,
    emitter: EventEmitter<WorldEvent, [ChangeRecord]>,
    ids: Box<dyn IdGenerator>,
}

impl GameWorld {
    /// Creates a world identified as `<name>-<random id>`
    pub fn new(name: &str) -> Self {
        Self::with_id_generator(name, Box::new(RandomIdGenerator::new()))
    }

    pub fn with_id_generator(name: &str, mut ids: Box<dyn IdGenerator>) -> Self {
        let identifier = format!("{}-{}", name, ids.next_id());
        let own_identifier = identifier.clone();
        let filter: WorldFilter =
            Rc::new(move |subject: &dyn Owned| subject.owner() == Some(own_identifier.as_str()));

        Self {
            identifier_chain: vec![identifier.clone()],
            identifier,
            objects: HashMap::new(),
            order: Vec::new(),
            bindings: Vec::new(),
            filter,
            queue: HashMap::new(),
            queue_order: Vec::new(),
            emitter: EventEmitter::new(),
            ids,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Every hop this world's changes pass through, starting with itself
    pub fn identifier_chain(&self) -> &[String] {
        &self.identifier_chain
    }

    /// Records upstream hops for a world that proxies another
    pub fn extend_identifier_chain(&mut self, hops: impl IntoIterator<Item = String>) {
        for hop in hops {
            if !self.identifier_chain.contains(&hop) {
                self.identifier_chain.push(hop);
            }
        }
    }

    pub fn metadata(&self) -> WorldMetadata {
        WorldMetadata {
            identifier: self.identifier.clone(),
            identifier_chain: self.identifier_chain.clone(),
        }
    }

    /// Attaches a binding. Bindings see objects added from now on, in
    /// registration order.
    pub fn add_binding(&mut self, mut binding: Box<dyn Binding>) {
        binding.bind_to(self);
        info!("{} bound to {}", binding.identifier(), self.identifier);
        self.bindings.push(binding);
    }

    /// Adds an object and emits an `add` record if the filter accepts it.
    ///
    /// A repeat add of an existing id is ignored and returns `Ok(None)`.
    /// `id` and `owner` default to a generated id and this world's identifier.
    pub fn add(
        &mut self,
        properties: Properties,
        id: Option<String>,
        owner: Option<String>,
    ) -> Result<Option<GameObjectMut<'_>>, SyncError> {
        let id = self.insert_object(properties, id, owner, Emit::Now)?;
        Ok(id.map(move |id| GameObjectMut::new(self, id)))
    }

    /// Like [`add`](Self::add) but collects the record into `batch`
    pub fn add_into(
        &mut self,
        properties: Properties,
        id: Option<String>,
        owner: Option<String>,
        batch: &mut Vec<ChangeRecord>,
    ) -> Result<Option<GameObjectMut<'_>>, SyncError> {
        let id = self.insert_object(properties, id, owner, Emit::Into(batch))?;
        Ok(id.map(move |id| GameObjectMut::new(self, id)))
    }

    fn insert_object(
        &mut self,
        properties: Properties,
        id: Option<String>,
        owner: Option<String>,
        emit: Emit<'_>,
    ) -> Result<Option<String>, SyncError> {
        let id = id.filter(|id| !id.is_empty());
        if let Some(id) = id.as_deref() {
            if self.objects.contains_key(id) {
                warn!("{} ignoring repeat add of object {}", self.identifier, id);
                return Ok(None);
            }
        }

        let id = match id {
            Some(id) => id,
            None => self.next_id(),
        };
        let owner = owner.unwrap_or_else(|| self.identifier.clone());
        let mut object = GameObject::new(id.clone(), owner, properties.clone())?;

        for binding in self.bindings.iter_mut() {
            binding.add_to_game_object(&mut object, &properties)?;
        }

        let accepted = (self.filter)(&object);
        let owner = object.owner().to_string();
        self.objects.insert(id.clone(), object);
        self.order.push(id.clone());

        if accepted {
            self.emit_change(ChangeRecord::add(id.clone(), owner, properties), emit);
        } else {
            trace!("Syncing object {} into {}", id, self.identifier);
        }

        Ok(Some(id))
    }

    /// Pushes a partial change to every binding not skipped by `hints`
    pub fn update_game_object(
        &mut self,
        id: &str,
        properties: &Properties,
        hints: &UpdateHints,
    ) -> Result<(), SyncError> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| SyncError::UnknownObject { id: id.to_string() })?;

        for binding in self.bindings.iter_mut() {
            if hints.skips(binding.identifier()) {
                continue;
            }
            binding.update_game_object(object, properties)?;
        }
        Ok(())
    }

    /// Runs binding removal hooks and drops the object from the index
    pub fn remove_game_object(&mut self, id: &str) -> Option<GameObject> {
        let mut object = self.objects.remove(id)?;
        self.order.retain(|existing| existing != id);

        for binding in self.bindings.iter_mut() {
            binding.remove_game_object(&mut object);
        }
        Some(object)
    }

    pub(crate) fn apply_update(
        &mut self,
        id: &str,
        properties: Properties,
        hints: &UpdateHints,
        emit: Emit<'_>,
    ) -> Result<(), SyncError> {
        let object = self
            .objects
            .get_mut(id)
            .ok_or_else(|| SyncError::UnknownObject { id: id.to_string() })?;
        object.merge_properties(&properties);

        self.update_game_object(id, &properties, hints)?;

        let object = self.object_unchecked(id);
        if (self.filter)(object) {
            let owner = object.owner().to_string();
            self.emit_change(ChangeRecord::update(id, Some(owner), properties), emit);
        }
        Ok(())
    }

    pub(crate) fn apply_delete(&mut self, id: &str, emit: Emit<'_>) -> Result<(), SyncError> {
        let object = self
            .remove_game_object(id)
            .ok_or_else(|| SyncError::UnknownObject { id: id.to_string() })?;
        trace!("Removing object {} from world {}", id, self.identifier);

        if (self.filter)(&object) {
            self.emit_change(ChangeRecord::remove(id, object.owner()), emit);
        }
        Ok(())
    }

    /// The full `add` record for `id`, if the object exists and the filter
    /// accepts it
    pub fn batch_create(&self, id: &str) -> Option<ChangeRecord> {
        self.objects
            .get(id)
            .filter(|object| (self.filter)(*object))
            .map(GameObject::creation_record)
    }

    /// Emits a pre-assembled batch as one `WorldChange` event. Empty entries
    /// are dropped; nothing is emitted if none remain.
    pub fn send_batched_world_changes(
        &mut self,
        changes: impl IntoIterator<Item = Option<ChangeRecord>>,
    ) {
        let batch: Vec<ChangeRecord> = changes.into_iter().flatten().collect();
        if !batch.is_empty() {
            self.emitter.emit(WorldEvent::WorldChange, &batch);
        }
    }

    fn emit_change(&mut self, record: ChangeRecord, emit: Emit<'_>) {
        match emit {
            Emit::Now => self
                .emitter
                .emit(WorldEvent::WorldChange, std::slice::from_ref(&record)),
            Emit::Into(batch) => batch.push(record),
        }
    }

    pub fn on(
        &mut self,
        event: WorldEvent,
        listener: impl FnMut(&[ChangeRecord]) + 'static,
    ) -> ListenerId {
        self.emitter.on(event, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.emitter.off(id)
    }

    /// A fresh object id, retried a few times if it is already taken
    pub fn next_id(&mut self) -> String {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.next_id();
            if !self.objects.contains_key(&id) && !self.queue.contains_key(&id) {
                return id;
            }
            warn!("{} generated id {} already in use, retrying", self.identifier, id);
        }
        self.ids.next_id()
    }

    /// Objects whose properties satisfy `predicate`, in insertion order
    pub fn filter_objects(&self, predicate: impl Fn(&Properties) -> bool) -> Vec<&GameObject> {
        self.objects()
            .filter(|object| predicate(object.properties()))
            .collect()
    }

    pub fn has_object(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }

    pub fn object(&self, id: &str) -> Option<&GameObject> {
        self.objects.get(id)
    }

    pub(crate) fn object_unchecked(&self, id: &str) -> &GameObject {
        &self.objects[id]
    }

    pub fn object_mut(&mut self, id: &str) -> Option<GameObjectMut<'_>> {
        if self.objects.contains_key(id) {
            Some(GameObjectMut::new(self, id.to_string()))
        } else {
            None
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn object_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Replaces the ownership filter, e.g. with `|_| true` for a relay hub
    pub fn set_change_record_filter(&mut self, filter: impl Fn(&dyn Owned) -> bool + 'static) {
        self.filter = Rc::new(filter);
    }

    pub fn change_record_filter(&self, subject: &dyn Owned) -> bool {
        (self.filter)(subject)
    }

    fn pending_entry(&mut self, id: String) -> &mut PendingChange {
        if !self.queue.contains_key(&id) {
            self.queue_order.push(id.clone());
        }
        self.queue.entry(id).or_default()
    }

    /// Stages an update for the next `flush_queue`
    pub fn queue_update(&mut self, id: impl Into<String>, properties: Properties, hints: UpdateHints) {
        let entry = self.pending_entry(id.into());
        entry.hints.merge(hints);
        merge_properties(&mut entry.properties, &properties);
    }

    /// Stages an add for the next `flush_queue` and returns the id used
    pub fn queue_add(
        &mut self,
        id: Option<String>,
        properties: Properties,
        owner: Option<String>,
    ) -> String {
        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => self.next_id(),
        };

        let entry = self.pending_entry(id.clone());
        entry.add = true;
        if entry.owner.is_none() {
            entry.owner = owner;
        }
        merge_properties(&mut entry.properties, &properties);
        id
    }

    pub fn pending_changes(&self) -> usize {
        self.queue_order.len()
    }

    /// Applies every staged change and emits the resulting records as one
    /// `WorldChange` event.
    ///
    /// Staged updates for unknown ids are an error. Processing stops at the
    /// first error; records already produced are still emitted and the queue
    /// is left empty either way.
    pub fn flush_queue(&mut self) -> Result<(), SyncError> {
        let mut pending = std::mem::take(&mut self.queue);
        let order = std::mem::take(&mut self.queue_order);
        let mut batch = Vec::new();
        let mut result = Ok(());

        for id in order {
            let Some(change) = pending.remove(&id) else {
                continue;
            };

            let outcome = if self.objects.contains_key(&id) {
                self.apply_update(&id, change.properties, &change.hints, Emit::Into(&mut batch))
            } else if change.add {
                self.insert_object(change.properties, Some(id), change.owner, Emit::Into(&mut batch))
                    .map(|_| ())
            } else {
                Err(SyncError::UnknownObject { id })
            };

            if let Err(err) = outcome {
                result = Err(err);
                break;
            }
        }

        if !batch.is_empty() {
            debug!("{} flushing {} queued changes", self.identifier, batch.len());
            self.emitter.emit(WorldEvent::WorldChange, &batch);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SequentialIdGenerator;
    use serde_json::{json, Value};
    use std::cell::RefCell;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn world(name: &str) -> GameWorld {
        GameWorld::with_id_generator(name, Box::new(SequentialIdGenerator::new(name)))
    }

    fn record_events(world: &mut GameWorld) -> Rc<RefCell<Vec<Vec<ChangeRecord>>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        world.on(WorldEvent::WorldChange, move |batch| {
            sink.borrow_mut().push(batch.to_vec())
        });
        events
    }

    #[test]
    fn test_identifier_and_metadata() {
        let world = world("A");
        assert_eq!(world.identifier(), "A-A-1");
        assert_eq!(
            world.metadata(),
            WorldMetadata {
                identifier: "A-A-1".into(),
                identifier_chain: vec!["A-A-1".into()],
            }
        );
    }

    #[test]
    fn test_random_identifier_has_name_prefix() {
        let world = GameWorld::new("server");
        assert!(world.identifier().starts_with("server-"));
        assert_eq!(world.identifier().len(), "server-".len() + 17);
    }

    #[test]
    fn test_extend_identifier_chain() {
        let mut world = world("proxy");
        world.extend_identifier_chain(vec!["upstream".to_string(), "upstream".to_string()]);
        assert_eq!(world.identifier_chain(), &["proxy-proxy-1", "upstream"]);
    }

    #[test]
    fn test_add_emits_owned_object() {
        let mut world = world("A");
        let events = record_events(&mut world);

        let id = world
            .add(props(json!({ "name": "hello" })), None, None)
            .unwrap()
            .map(|object| object.id().to_string())
            .unwrap();

        assert_eq!(id, "A-2");
        assert_eq!(world.object(&id).unwrap().owner(), world.identifier());
        assert_eq!(
            *events.borrow(),
            vec![vec![ChangeRecord::add(
                "A-2",
                "A-A-1",
                props(json!({ "name": "hello" }))
            )]]
        );
    }

    #[test]
    fn test_add_foreign_object_is_silent() {
        let mut world = world("A");
        let events = record_events(&mut world);

        world
            .add(props(json!({})), Some("x".into()), Some("B".into()))
            .unwrap();

        assert!(world.has_object("x"));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_repeat_add_is_ignored() {
        let mut world = world("A");
        world.add(props(json!({ "v": 1 })), Some("x".into()), None).unwrap();

        let again = world.add(props(json!({ "v": 2 })), Some("x".into()), None).unwrap();
        assert!(again.is_none());
        assert_eq!(world.object("x").unwrap().property("v"), Some(&json!(1)));
        assert_eq!(world.object_count(), 1);
    }

    #[test]
    fn test_add_with_empty_owner_fails() {
        let mut world = world("A");
        let err = world
            .add(props(json!({})), Some("x".into()), Some(String::new()))
            .err()
            .unwrap();
        assert_eq!(err, SyncError::MissingOwner { id: "x".into() });
        assert!(!world.has_object("x"));
    }

    #[test]
    fn test_update_emits_only_changed_properties() {
        let mut world = world("A");
        world
            .add(props(json!({ "a": 1, "b": 2 })), Some("x".into()), None)
            .unwrap();
        let events = record_events(&mut world);

        world
            .object_mut("x")
            .unwrap()
            .update(props(json!({ "b": 3 })), &UpdateHints::default())
            .unwrap();

        assert_eq!(
            world.object("x").unwrap().properties(),
            &props(json!({ "a": 1, "b": 3 }))
        );
        assert_eq!(
            *events.borrow(),
            vec![vec![ChangeRecord::update(
                "x",
                Some("A-A-1".into()),
                props(json!({ "b": 3 }))
            )]]
        );
    }

    #[test]
    fn test_delete_emits_remove() {
        let mut world = world("A");
        world.add(props(json!({})), Some("x".into()), None).unwrap();
        let events = record_events(&mut world);

        world.object_mut("x").unwrap().delete().unwrap();

        assert!(!world.has_object("x"));
        assert!(world.object_ids().is_empty());
        assert_eq!(*events.borrow(), vec![vec![ChangeRecord::remove("x", "A-A-1")]]);
    }

    #[test]
    fn test_default_filter_matches_owner_only() {
        let world = world("A");
        let own = world.identifier().to_string();

        let records = vec![
            ChangeRecord::add("1", own.clone(), Properties::new()),
            ChangeRecord::update("2", Some(own.clone()), Properties::new()),
            ChangeRecord::remove("3", own.clone()),
        ];
        for record in &records {
            assert!(world.change_record_filter(record));
        }

        let foreign = vec![
            ChangeRecord::add("1", "B", Properties::new()),
            ChangeRecord::update("2", Some("B".into()), Properties::new()),
            ChangeRecord::update("2", None, Properties::new()),
            ChangeRecord::remove("3", "B"),
        ];
        for record in &foreign {
            assert!(!world.change_record_filter(record));
        }
    }

    #[test]
    fn test_custom_filter_broadcasts_everything() {
        let mut world = world("hub");
        world.set_change_record_filter(|_| true);
        let events = record_events(&mut world);

        world.add(props(json!({})), Some("x".into()), Some("B".into())).unwrap();
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_batch_create_respects_filter() {
        let mut world = world("A");
        world.add(props(json!({ "v": 1 })), Some("mine".into()), None).unwrap();
        world.add(props(json!({})), Some("theirs".into()), Some("B".into())).unwrap();
        world
            .object_mut("mine")
            .unwrap()
            .update(props(json!({ "w": 2 })), &UpdateHints::default())
            .unwrap();

        assert_eq!(
            world.object_mut("mine").unwrap().batch_create(),
            Some(ChangeRecord::add("mine", "A-A-1", props(json!({ "v": 1, "w": 2 }))))
        );
        assert!(world.batch_create("theirs").is_none());
        assert!(world.batch_create("missing").is_none());
    }

    #[test]
    fn test_flush_queue_emits_single_batch() {
        let mut world = world("A");
        world.set_change_record_filter(|_| true);
        world.add(props(json!({ "v": 0 })), Some("existing".into()), Some("B".into())).unwrap();
        let events = record_events(&mut world);

        world.queue_add(Some("new".into()), props(json!({ "a": 1 })), Some("B".into()));
        world.queue_update("new", props(json!({ "b": 2 })), UpdateHints::default());
        world.queue_update("existing", props(json!({ "v": 1 })), UpdateHints::default());
        world.queue_update("existing", props(json!({ "v": 2 })), UpdateHints::default());
        assert_eq!(world.pending_changes(), 2);

        world.flush_queue().unwrap();

        assert_eq!(world.pending_changes(), 0);
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(
            events.borrow()[0],
            vec![
                ChangeRecord::add("new", "B", props(json!({ "a": 1, "b": 2 }))),
                ChangeRecord::update("existing", Some("B".into()), props(json!({ "v": 2 }))),
            ]
        );
        assert_eq!(world.object("existing").unwrap().property("v"), Some(&json!(2)));
    }

    #[test]
    fn test_flush_queue_owner_set_once() {
        let mut world = world("A");
        world.queue_add(Some("x".into()), props(json!({})), Some("B".into()));
        world.queue_add(Some("x".into()), props(json!({})), Some("C".into()));
        world.flush_queue().unwrap();

        assert_eq!(world.object("x").unwrap().owner(), "B");
    }

    #[test]
    fn test_flush_queue_rejects_update_of_unknown_object() {
        let mut world = world("A");
        world.queue_update("ghost", props(json!({ "v": 1 })), UpdateHints::default());

        let err = world.flush_queue().unwrap_err();
        assert_eq!(err, SyncError::UnknownObject { id: "ghost".into() });
        assert_eq!(world.pending_changes(), 0);
    }

    #[test]
    fn test_empty_flush_emits_nothing() {
        let mut world = world("A");
        let events = record_events(&mut world);
        world.flush_queue().unwrap();
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_send_batched_world_changes_drops_empty_entries() {
        let mut world = world("A");
        let events = record_events(&mut world);

        world.send_batched_world_changes(vec![None, None]);
        assert!(events.borrow().is_empty());

        world.send_batched_world_changes(vec![None, Some(ChangeRecord::remove("x", "A"))]);
        assert_eq!(*events.borrow(), vec![vec![ChangeRecord::remove("x", "A")]]);
    }

    #[test]
    fn test_filter_objects_by_properties() {
        let mut world = world("A");
        world.add(props(json!({ "kind": "ship" })), Some("s".into()), None).unwrap();
        world.add(props(json!({ "kind": "rock" })), Some("r".into()), None).unwrap();

        let ships = world.filter_objects(|p| p.get("kind") == Some(&json!("ship")));
        assert_eq!(ships.len(), 1);
        assert_eq!(ships[0].id(), "s");
    }

    #[test]
    fn test_off_stops_notifications() {
        let mut world = world("A");
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        let id = world.on(WorldEvent::WorldChange, move |_| *sink.borrow_mut() += 1);

        world.add(props(json!({})), None, None).unwrap();
        assert!(world.off(id));
        world.add(props(json!({})), None, None).unwrap();

        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_next_id_skips_taken_ids() {
        let mut world = world("A");
        world.add(props(json!({})), Some("A-2".into()), None).unwrap();
        assert_eq!(world.next_id(), "A-3");
    }
}
