//! Observer registry shared by worlds and socket cleaners

use std::collections::HashMap;
use std::hash::Hash;

/// Handle returned by [`EventEmitter::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener<A> = Box<dyn FnMut(&A)>;

/// Maps an event name to an ordered list of listeners.
///
/// Listeners for one event run in subscription order. `A` is the payload type
/// handed to every listener, e.g. `[ChangeRecord]` for world changes.
pub struct EventEmitter<E, A: ?Sized> {
    listeners: HashMap<E, Vec<(ListenerId, Listener<A>)>>,
    next_id: u64,
}

impl<E, A> EventEmitter<E, A>
where
    E: Copy + Eq + Hash,
    A: ?Sized,
{
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes `listener` to `event`
    pub fn on(&mut self, event: E, listener: impl FnMut(&A) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(event)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn off(&mut self, id: ListenerId) -> bool {
        for list in self.listeners.values_mut() {
            if let Some(pos) = list.iter().position(|(listener_id, _)| *listener_id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: E, payload: &A) {
        if let Some(list) = self.listeners.get_mut(&event) {
            for (_, listener) in list.iter_mut() {
                listener(payload);
            }
        }
    }

    pub fn listener_count(&self, event: E) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }
}

impl<E, A> Default for EventEmitter<E, A>
where
    E: Copy + Eq + Hash,
    A: ?Sized,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestEvent {
        Ping,
        Pong,
    }

    #[test]
    fn test_listeners_run_in_order() {
        let mut emitter: EventEmitter<TestEvent, str> = EventEmitter::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first = Rc::clone(&log);
        emitter.on(TestEvent::Ping, move |msg: &str| {
            first.borrow_mut().push(format!("first:{}", msg))
        });
        let second = Rc::clone(&log);
        emitter.on(TestEvent::Ping, move |msg: &str| {
            second.borrow_mut().push(format!("second:{}", msg))
        });

        emitter.emit(TestEvent::Ping, "hi");
        emitter.emit(TestEvent::Pong, "ignored");

        assert_eq!(*log.borrow(), vec!["first:hi", "second:hi"]);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let mut emitter: EventEmitter<TestEvent, u32> = EventEmitter::new();
        let total = Rc::new(RefCell::new(0));

        let a = Rc::clone(&total);
        let id_a = emitter.on(TestEvent::Ping, move |n| *a.borrow_mut() += *n);
        let b = Rc::clone(&total);
        emitter.on(TestEvent::Ping, move |n| *b.borrow_mut() += *n * 10);

        assert!(emitter.off(id_a));
        assert!(!emitter.off(id_a));
        assert_eq!(emitter.listener_count(TestEvent::Ping), 1);

        emitter.emit(TestEvent::Ping, &2);
        assert_eq!(*total.borrow(), 20);
    }
}
