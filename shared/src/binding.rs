//! Adapters that mirror world objects into another representation

use crate::change::Properties;
use crate::error::SyncError;
use crate::game_object::GameObject;
use crate::world::GameWorld;
use log::trace;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;

/// A rendering, physics or logging adapter attached to a [`GameWorld`].
///
/// The world calls these hooks synchronously, in binding registration order,
/// whenever an object is created, updated or removed. Updates only carry the
/// keys that changed.
pub trait Binding {
    /// Key under which this binding stores its linked object
    fn identifier(&self) -> &str;

    /// Called once when the binding is attached
    fn bind_to(&mut self, _world: &GameWorld) {}

    fn add_to_game_object(
        &mut self,
        object: &mut GameObject,
        properties: &Properties,
    ) -> Result<(), SyncError>;

    fn update_game_object(
        &mut self,
        object: &mut GameObject,
        properties: &Properties,
    ) -> Result<(), SyncError>;

    fn remove_game_object(&mut self, object: &mut GameObject);
}

type ObjectFactory<R> = Box<dyn FnMut(&Properties) -> R>;
type Renderer = Box<dyn Fn(&Properties) -> Value>;
type ObjectHook<R> = Box<dyn FnMut(&GameObject, &R)>;

enum PropertyHandler<R> {
    /// Receives the raw property value
    Direct(Box<dyn FnMut(&mut R, &Value)>),
    /// Receives the output of the renderer selected by the value's `type`
    Rendered(Box<dyn FnMut(&mut R, Value)>),
}

/// Registry-driven binding.
///
/// Linked objects of type `R` are produced by object-type factories chosen by
/// the `type` property (`"default"` when absent). Property handlers then
/// apply each non-null property to the linked object. A rendered property
/// holds a nested `{ "type": ..., ... }` description; its `type` picks a
/// renderer registered with [`add_renderer`](Self::add_renderer), and the
/// handler receives the renderer's output.
pub struct BaseBinding<R> {
    identifier: String,
    object_types: HashMap<String, ObjectFactory<R>>,
    property_handlers: Vec<(String, PropertyHandler<R>)>,
    renderers: HashMap<String, HashMap<String, Renderer>>,
    on_add: Option<ObjectHook<R>>,
    on_remove: Option<ObjectHook<R>>,
}

impl<R: Any> BaseBinding<R> {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            object_types: HashMap::new(),
            property_handlers: Vec::new(),
            renderers: HashMap::new(),
            on_add: None,
            on_remove: None,
        }
    }

    /// Registers a factory for objects whose `type` property is `name`.
    /// The factory sees the properties without the `type` key.
    pub fn add_object_type(
        &mut self,
        name: impl Into<String>,
        factory: impl FnMut(&Properties) -> R + 'static,
    ) {
        self.object_types.insert(name.into(), Box::new(factory));
    }

    pub fn add_property_handler(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut R, &Value) + 'static,
    ) {
        self.set_property_handler(name.into(), PropertyHandler::Direct(Box::new(handler)));
    }

    /// Declares `name` as a rendered property. Any renderers previously
    /// registered for it are dropped.
    pub fn add_property_renderer(
        &mut self,
        name: impl Into<String>,
        handler: impl FnMut(&mut R, Value) + 'static,
    ) {
        let name = name.into();
        self.renderers.insert(name.clone(), HashMap::new());
        self.set_property_handler(name, PropertyHandler::Rendered(Box::new(handler)));
    }

    /// Registers a renderer of kind `kind` for the rendered property `property`
    pub fn add_renderer(
        &mut self,
        property: impl Into<String>,
        kind: impl Into<String>,
        renderer: impl Fn(&Properties) -> Value + 'static,
    ) {
        self.renderers
            .entry(property.into())
            .or_default()
            .insert(kind.into(), Box::new(renderer));
    }

    pub fn on_add_object(&mut self, hook: impl FnMut(&GameObject, &R) + 'static) {
        self.on_add = Some(Box::new(hook));
    }

    pub fn on_remove_object(&mut self, hook: impl FnMut(&GameObject, &R) + 'static) {
        self.on_remove = Some(Box::new(hook));
    }

    fn set_property_handler(&mut self, name: String, handler: PropertyHandler<R>) {
        match self.property_handlers.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = handler,
            None => self.property_handlers.push((name, handler)),
        }
    }

    fn apply_properties(&mut self, linked: &mut R, properties: &Properties) -> Result<(), SyncError> {
        for (name, handler) in self.property_handlers.iter_mut() {
            let value = match properties.get(name.as_str()) {
                Some(Value::Null) | None => continue,
                Some(value) => value,
            };

            match handler {
                PropertyHandler::Direct(handler) => handler(linked, value),
                PropertyHandler::Rendered(handler) => {
                    let (kind, description) = split_type(value);
                    let renderer = self
                        .renderers
                        .get(name.as_str())
                        .and_then(|kinds| kinds.get(&kind))
                        .ok_or_else(|| SyncError::UnknownRenderer {
                            property: name.clone(),
                            kind: kind.clone(),
                        })?;
                    handler(linked, renderer(&description));
                }
            }
        }
        Ok(())
    }
}

/// Splits a `{ "type": ..., ... }` description into its type tag and the
/// remaining keys
fn split_type(value: &Value) -> (String, Properties) {
    let mut description = value.as_object().cloned().unwrap_or_default();
    let kind = match description.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => "default".to_string(),
    };
    (kind, description)
}

impl<R: Any> Binding for BaseBinding<R> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn add_to_game_object(
        &mut self,
        object: &mut GameObject,
        properties: &Properties,
    ) -> Result<(), SyncError> {
        let (kind, without_type) = split_type(&Value::Object(properties.clone()));
        let factory = self
            .object_types
            .get_mut(&kind)
            .ok_or(SyncError::UnknownObjectType { kind })?;

        let mut linked = factory(&without_type);
        self.apply_properties(&mut linked, properties)?;

        if let Some(hook) = self.on_add.as_mut() {
            hook(&*object, &linked);
        }
        trace!("{} linked object {}", self.identifier, object.id());
        object.set_linked_object(self.identifier.clone(), linked);
        Ok(())
    }

    fn update_game_object(
        &mut self,
        object: &mut GameObject,
        properties: &Properties,
    ) -> Result<(), SyncError> {
        match object.linked_object_mut::<R>(&self.identifier) {
            Some(linked) => self.apply_properties(linked, properties),
            None => Err(SyncError::UnlinkedObject {
                binding: self.identifier.clone(),
                id: object.id().to_string(),
            }),
        }
    }

    fn remove_game_object(&mut self, object: &mut GameObject) {
        if let Some(hook) = self.on_remove.as_mut() {
            if let Some(linked) = object.linked_object::<R>(&self.identifier) {
                hook(&*object, linked);
            }
        }
        object.remove_linked_object(&self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_object::UpdateHints;
    use crate::id::SequentialIdGenerator;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Mesh {
        base_binding: bool,
        foo: Option<String>,
        bar: Option<String>,
    }

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn mesh_binding(all_objects: Rc<RefCell<HashMap<String, Mesh>>>) -> BaseBinding<Mesh> {
        let mut binding = BaseBinding::new("BaseBinding");
        binding.add_object_type("default", |_| Mesh {
            base_binding: true,
            ..Mesh::default()
        });
        binding.add_property_handler("foo", |mesh: &mut Mesh, foo: &Value| {
            mesh.foo = foo.as_str().map(str::to_string);
        });
        binding.add_property_renderer("bar", |mesh: &mut Mesh, rendered: Value| {
            mesh.bar = rendered.as_str().map(str::to_string);
        });
        binding.add_renderer("bar", "yes", |_| json!("thisYes"));
        binding.add_renderer("bar", "no", |_| json!("thisNo"));

        let added = Rc::clone(&all_objects);
        binding.on_add_object(move |object, mesh| {
            if let Some(name) = object.property("name").and_then(Value::as_str) {
                added.borrow_mut().insert(name.to_string(), mesh.clone());
            }
        });
        binding.on_remove_object(move |object, _| {
            if let Some(name) = object.property("name").and_then(Value::as_str) {
                all_objects.borrow_mut().remove(name);
            }
        });
        binding
    }

    fn world_with_binding() -> (GameWorld, Rc<RefCell<HashMap<String, Mesh>>>) {
        let all_objects = Rc::new(RefCell::new(HashMap::new()));
        let mut world = GameWorld::with_id_generator("", Box::new(SequentialIdGenerator::new("obj")));
        world.add_binding(Box::new(mesh_binding(Rc::clone(&all_objects))));
        (world, all_objects)
    }

    fn linked(world: &GameWorld, id: &str) -> Mesh {
        world
            .object(id)
            .unwrap()
            .linked_object::<Mesh>("BaseBinding")
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_adding_objects() {
        let (mut world, all_objects) = world_with_binding();
        world
            .add(
                props(json!({ "name": "hello", "foo": "test", "bar": { "type": "yes" } })),
                Some("g1".into()),
                None,
            )
            .unwrap();

        let mesh = linked(&world, "g1");
        assert!(mesh.base_binding);
        assert_eq!(mesh.foo.as_deref(), Some("test"));
        assert_eq!(mesh.bar.as_deref(), Some("thisYes"));
        assert_eq!(all_objects.borrow().get("hello"), Some(&mesh));
    }

    #[test]
    fn test_updating_objects() {
        let (mut world, _) = world_with_binding();
        world
            .add(
                props(json!({ "name": "hello", "foo": "test", "bar": { "type": "yes" } })),
                Some("g1".into()),
                None,
            )
            .unwrap();

        world
            .object_mut("g1")
            .unwrap()
            .update(
                props(json!({ "foo": "another", "bar": { "type": "no" } })),
                &UpdateHints::default(),
            )
            .unwrap();

        let mesh = linked(&world, "g1");
        assert!(mesh.base_binding);
        assert_eq!(mesh.foo.as_deref(), Some("another"));
        assert_eq!(mesh.bar.as_deref(), Some("thisNo"));
    }

    #[test]
    fn test_removing_objects() {
        let (mut world, all_objects) = world_with_binding();
        world
            .add(props(json!({ "name": "hello", "foo": "test" })), Some("g1".into()), None)
            .unwrap();
        world
            .add(props(json!({ "name": "another" })), Some("g2".into()), None)
            .unwrap();

        let mut names: Vec<String> = all_objects.borrow().keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["another", "hello"]);

        world.object_mut("g1").unwrap().delete().unwrap();
        assert_eq!(
            all_objects.borrow().keys().cloned().collect::<Vec<_>>(),
            vec!["another"]
        );

        world.object_mut("g2").unwrap().delete().unwrap();
        assert!(all_objects.borrow().is_empty());
    }

    #[test]
    fn test_skipped_binding_sees_no_update() {
        let (mut world, _) = world_with_binding();
        world
            .add(props(json!({ "foo": "test" })), Some("g1".into()), None)
            .unwrap();

        world
            .object_mut("g1")
            .unwrap()
            .update(props(json!({ "foo": "ignored" })), &UpdateHints::skipping("BaseBinding"))
            .unwrap();

        assert_eq!(linked(&world, "g1").foo.as_deref(), Some("test"));
        assert_eq!(world.object("g1").unwrap().property("foo"), Some(&json!("ignored")));
    }

    #[test]
    fn test_unknown_object_type_is_rejected() {
        let (mut world, _) = world_with_binding();
        let err = world
            .add(props(json!({ "type": "dragon" })), Some("g1".into()), None)
            .err()
            .unwrap();

        assert_eq!(err, SyncError::UnknownObjectType { kind: "dragon".into() });
        assert!(!world.has_object("g1"));
    }

    #[test]
    fn test_unknown_renderer_is_rejected() {
        let (mut world, _) = world_with_binding();
        let err = world
            .add(props(json!({ "bar": { "type": "maybe" } })), Some("g1".into()), None)
            .err()
            .unwrap();

        assert_eq!(
            err,
            SyncError::UnknownRenderer {
                property: "bar".into(),
                kind: "maybe".into()
            }
        );
    }

    #[test]
    fn test_null_properties_are_skipped() {
        let (mut world, _) = world_with_binding();
        world
            .add(props(json!({ "foo": "test" })), Some("g1".into()), None)
            .unwrap();
        world
            .object_mut("g1")
            .unwrap()
            .update(props(json!({ "foo": null })), &UpdateHints::default())
            .unwrap();

        assert_eq!(linked(&world, "g1").foo.as_deref(), Some("test"));
    }

    #[test]
    fn test_renderer_sees_description_without_type() {
        let seen = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&seen);

        let mut binding: BaseBinding<Mesh> = BaseBinding::new("shapes");
        binding.add_object_type("default", |_| Mesh::default());
        binding.add_property_renderer("geometry", |_, _| {});
        binding.add_renderer("geometry", "box", move |description| {
            *sink.borrow_mut() = Some(description.clone());
            Value::Null
        });

        let mut object = GameObject::new("a", "W", Properties::new()).unwrap();
        binding
            .add_to_game_object(&mut object, &props(json!({ "geometry": { "type": "box", "size": 2 } })))
            .unwrap();

        assert_eq!(*seen.borrow(), Some(props(json!({ "size": 2 }))));
    }
}
