//! Topic-keyed change notification

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Identifier returned by [`ChangeEmitter::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Listener<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

struct Subscription<T> {
    id: SubscriptionId,
    topic: T,
    listener: Listener<T>,
}

/// Observer registry keyed by topic
///
/// Stores use this to tell views that their state changed. Listeners run in
/// subscription order. Subscribing or unsubscribing from inside a listener is
/// allowed: new listeners are picked up by the next `emit`, removed ones are
/// skipped immediately.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use flux_dispatch_core::ChangeEmitter;
///
/// let emitter = ChangeEmitter::new();
/// let hits = Rc::new(Cell::new(0));
///
/// let h = hits.clone();
/// let id = emitter.subscribe("change", move |_| h.set(h.get() + 1));
///
/// assert_eq!(emitter.emit(&"change"), 1);
/// assert_eq!(emitter.emit(&"other"), 0);
/// emitter.unsubscribe(id);
/// assert_eq!(emitter.emit(&"change"), 0);
/// assert_eq!(hits.get(), 1);
/// ```
pub struct ChangeEmitter<T> {
    next_id: Cell<u64>,
    subscriptions: RefCell<Vec<Subscription<T>>>,
}

impl<T> fmt::Debug for ChangeEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEmitter")
            .field("listeners", &self.subscriptions.borrow().len())
            .finish()
    }
}

impl<T: PartialEq + 'static> Default for ChangeEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq + 'static> ChangeEmitter<T> {
    /// Create an emitter with no listeners
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            subscriptions: RefCell::new(Vec::new()),
        }
    }

    /// Subscribe `listener` to `topic`
    pub fn subscribe<F>(&self, topic: T, listener: F) -> SubscriptionId
    where
        F: FnMut(&T) + 'static,
    {
        let id = SubscriptionId(self.next_id.get() + 1);
        self.next_id.set(id.0);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            topic,
            listener: Rc::new(RefCell::new(Box::new(listener))),
        });
        id
    }

    /// Remove a listener. Unknown ids are ignored; returns whether one was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }

    /// Notify every listener of `topic`; returns how many were called
    ///
    /// A listener that is already running further up the stack (an emit
    /// triggered from its own callback) is skipped rather than re-entered.
    pub fn emit(&self, topic: &T) -> usize {
        let targets: Vec<(SubscriptionId, Listener<T>)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.topic == *topic)
            .map(|sub| (sub.id, sub.listener.clone()))
            .collect();

        let mut notified = 0;
        for (id, listener) in targets {
            if !self.is_subscribed(id) {
                continue;
            }
            let Ok(mut callback) = listener.try_borrow_mut() else {
                tracing::trace!(subscription = %id, "Skipping re-entered listener");
                continue;
            };
            let callback = &mut *callback;
            callback(topic);
            notified += 1;
        }
        notified
    }

    /// Whether `id` is still subscribed
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.borrow().iter().any(|sub| sub.id == id)
    }

    /// Number of listeners on `topic`
    pub fn listener_count(&self, topic: &T) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|sub| sub.topic == *topic)
            .count()
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.subscriptions.borrow_mut().clear();
    }
}
