//! # Event Bus
//!
//! Synchronous publish/subscribe registry, one per session.
//!
//! ```text
//! Link (poll) ──decode──► EventBus::notify(msg)
//!                              │  snapshot handlers for msg.topic()
//!                              ├──► handler A
//!                              └──► handler B   (fires even if A unsubscribed itself)
//! ```
//!
//! The bus is generic over a closed message union: each message knows its own
//! routing [`Routable::Topic`]. Handlers get a shared reference to the message.
//!
//! Dispatch is reentrant. A handler may subscribe or unsubscribe while it runs;
//! the `notify` call in progress keeps iterating the handler list it captured
//! when it started. No borrow is held while a handler executes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

/// A message that can be routed by topic.
pub trait Routable: 'static {
    /// Routing key.
    type Topic: Clone + Eq + Hash + Debug;

    /// Topic this message is delivered on.
    fn topic(&self) -> Self::Topic;
}

/// Identity of one registration, returned by `subscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Identity of a component that owns registrations.
///
/// Teardown calls [`EventBus::unsubscribe_owner`] with it instead of keeping
/// every [`HandlerId`] around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

type Handler<M> = Rc<dyn Fn(&M)>;

struct Entry<M> {
    id: HandlerId,
    owner: Option<OwnerId>,
    handler: Handler<M>,
}

/// Synchronous, reentrant publish/subscribe registry.
pub struct EventBus<M: Routable> {
    topics: RefCell<HashMap<M::Topic, Vec<Entry<M>>>>,
    next_handler: Cell<u64>,
    next_owner: Cell<u64>,
}

impl<M: Routable> EventBus<M> {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            topics: RefCell::new(HashMap::new()),
            next_handler: Cell::new(0),
            next_owner: Cell::new(0),
        }
    }

    /// Allocates a fresh owner identity for a component.
    pub fn register_owner(&self) -> OwnerId {
        let id = self.next_owner.get();
        self.next_owner.set(id + 1);
        OwnerId(id)
    }

    /// Registers `handler` for `topic`. Duplicate registrations all fire.
    pub fn subscribe(&self, topic: M::Topic, handler: impl Fn(&M) + 'static) -> HandlerId {
        self.insert(topic, None, Rc::new(handler))
    }

    /// Registers `handler` for `topic` on behalf of `owner`.
    pub fn subscribe_owned(
        &self,
        owner: OwnerId,
        topic: M::Topic,
        handler: impl Fn(&M) + 'static,
    ) -> HandlerId {
        self.insert(topic, Some(owner), Rc::new(handler))
    }

    /// Removes one registration. Unknown topics or ids are a no-op.
    ///
    /// Returns true if something was removed.
    pub fn unsubscribe(&self, topic: &M::Topic, id: HandlerId) -> bool {
        let mut topics = self.topics.borrow_mut();
        let Some(entries) = topics.get_mut(topic) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return false;
        };
        entries.remove(pos);
        if entries.is_empty() {
            topics.remove(topic);
        }
        true
    }

    /// Removes every registration made under `owner`, on every topic.
    ///
    /// Returns how many were removed.
    pub fn unsubscribe_owner(&self, owner: OwnerId) -> usize {
        let mut removed = 0;
        self.topics.borrow_mut().retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.owner != Some(owner));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Delivers `message` to every handler registered for its topic, in
    /// subscription order. Unknown topics are a silent no-op.
    ///
    /// Returns how many handlers ran.
    pub fn notify(&self, message: &M) -> usize {
        let snapshot: Vec<Handler<M>> = {
            let topics = self.topics.borrow();
            match topics.get(&message.topic()) {
                Some(entries) => entries.iter().map(|e| Rc::clone(&e.handler)).collect(),
                None => return 0,
            }
        };
        for handler in &snapshot {
            handler(message);
        }
        snapshot.len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.topics.borrow_mut().clear();
    }

    /// Handlers currently registered for `topic`.
    #[must_use]
    pub fn handler_count(&self, topic: &M::Topic) -> usize {
        self.topics.borrow().get(topic).map_or(0, Vec::len)
    }

    fn insert(&self, topic: M::Topic, owner: Option<OwnerId>, handler: Handler<M>) -> HandlerId {
        let id = HandlerId(self.next_handler.get());
        self.next_handler.set(id.0 + 1);
        self.topics
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Entry { id, owner, handler });
        id
    }
}

impl<M: Routable> Default for EventBus<M> {
    fn default() -> Self {
        Self::new()
    }
}
