//! Stores: state containers updated by dispatcher handlers

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::dispatcher::{Dispatcher, RegistrationId};
use crate::emitter::{ChangeEmitter, SubscriptionId};
use crate::error::DispatchError;
use crate::Action;

/// Topic emitted by a [`Store`] after a reduction changed its state
pub const CHANGE: &str = "change";

/// A reducer function that applies an action to state
///
/// Returns `true` if the state changed and listeners should be notified.
pub type Reducer<S, A> = fn(&mut S, &A) -> bool;

/// State container with a reducer and change listeners
///
/// A store owns one piece of application state. It registers its reducer with
/// a [`Dispatcher`] for the action kinds it cares about, and tells its
/// listeners when a reduction changed something. Views read the state
/// through [`state`](Store::state) from inside their listener.
///
/// # Type Parameters
/// * `S` - The state type
/// * `A` - The action type (must implement `Action`)
///
/// # Example
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use flux_dispatch_core::{Action, ActionKind, Dispatcher, Store};
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum CounterKind { Increment }
///
/// impl ActionKind for CounterKind {
///     fn name(&self) -> &'static str { "Increment" }
/// }
///
/// #[derive(Clone, Debug)]
/// struct Increment;
///
/// impl Action for Increment {
///     type Kind = CounterKind;
///     fn kind(&self) -> CounterKind { CounterKind::Increment }
/// }
///
/// fn reducer(count: &mut i32, _action: &Increment) -> bool {
///     *count += 1;
///     true
/// }
///
/// let dispatcher: Dispatcher<Increment> = Dispatcher::new();
/// let store = Store::new(0, reducer);
/// store.register(&dispatcher, CounterKind::Increment);
///
/// let renders = Rc::new(Cell::new(0));
/// let r = renders.clone();
/// store.subscribe(move || r.set(r.get() + 1));
///
/// dispatcher.dispatch(Increment).unwrap();
/// assert_eq!(*store.state(), 1);
/// assert_eq!(renders.get(), 1);
/// ```
pub struct Store<S, A: Action> {
    state: RefCell<S>,
    reducer: Reducer<S, A>,
    emitter: ChangeEmitter<&'static str>,
    tokens: RefCell<HashMap<A::Kind, RegistrationId>>,
}

impl<S: fmt::Debug, A: Action> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*self.state.borrow())
            .field("tokens", &*self.tokens.borrow())
            .finish()
    }
}

impl<S: 'static, A: Action> Store<S, A> {
    /// Create a new shared store with initial state and reducer
    pub fn new(state: S, reducer: Reducer<S, A>) -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(state),
            reducer,
            emitter: ChangeEmitter::new(),
            tokens: RefCell::new(HashMap::new()),
        })
    }

    /// Get a reference to the current state
    ///
    /// Don't hold the returned guard across a dispatch: the reducer needs
    /// mutable access while the dispatch runs.
    pub fn state(&self) -> Ref<'_, S> {
        self.state.borrow()
    }

    /// Register the reducer with `dispatcher` for actions of `kind`
    ///
    /// The returned id is also kept as this store's dispatch token for `kind`,
    /// so other stores can `wait_for` it.
    pub fn register<E>(
        self: &Rc<Self>,
        dispatcher: &Dispatcher<A, E>,
        kind: A::Kind,
    ) -> RegistrationId
    where
        E: From<DispatchError> + 'static,
    {
        self.register_after(dispatcher, kind, Vec::new())
    }

    /// Register the reducer so that it runs after the handlers in `deps`
    ///
    /// Before reducing, the handler calls `wait_for(deps)`; any error from that
    /// call (cycle, stale id, failing dependency) aborts the dispatch.
    pub fn register_after<E>(
        self: &Rc<Self>,
        dispatcher: &Dispatcher<A, E>,
        kind: A::Kind,
        deps: Vec<RegistrationId>,
    ) -> RegistrationId
    where
        E: From<DispatchError> + 'static,
    {
        let store = Rc::clone(self);
        let id = dispatcher.register(kind, move |action, ctx| {
            if !deps.is_empty() {
                ctx.wait_for(&deps)?;
            }
            store.reduce(action);
            Ok(())
        });
        if let Some(previous) = self.tokens.borrow_mut().insert(kind, id) {
            dispatcher.unregister(previous);
        }
        id
    }

    /// Registration id of this store's handler for `kind`
    pub fn dispatch_token(&self, kind: A::Kind) -> Option<RegistrationId> {
        self.tokens.borrow().get(&kind).copied()
    }

    /// Remove every handler this store registered with `dispatcher`
    pub fn unregister_all<E>(&self, dispatcher: &Dispatcher<A, E>) -> usize
    where
        E: From<DispatchError> + 'static,
    {
        let tokens: Vec<_> = self.tokens.borrow_mut().drain().map(|(_, id)| id).collect();
        tokens
            .into_iter()
            .filter(|id| dispatcher.unregister(*id))
            .count()
    }

    /// Apply an action directly, outside any dispatcher
    ///
    /// Returns whether the state changed. Listeners are notified on change.
    pub fn reduce(&self, action: &A) -> bool {
        let reducer = self.reducer;
        self.update(|state| reducer(state, action))
    }

    /// Mutate the state with `f`, notifying listeners if it returns `true`
    ///
    /// For handlers that need more than the action to compute the new state,
    /// such as another store's state after a `wait_for`.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut S) -> bool,
    {
        let changed = {
            let mut state = self.state.borrow_mut();
            f(&mut state)
        };
        if changed {
            self.emitter.emit(&CHANGE);
        }
        changed
    }

    /// Subscribe to state changes
    pub fn subscribe<F>(&self, mut listener: F) -> SubscriptionId
    where
        F: FnMut() + 'static,
    {
        self.emitter.subscribe(CHANGE, move |_| listener())
    }

    /// Subscribe to a custom topic emitted with [`emit`](Store::emit)
    pub fn subscribe_to<F>(&self, topic: &'static str, listener: F) -> SubscriptionId
    where
        F: FnMut(&&'static str) + 'static,
    {
        self.emitter.subscribe(topic, listener)
    }

    /// Remove a listener; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.emitter.unsubscribe(id)
    }

    /// Notify listeners of a custom topic
    pub fn emit(&self, topic: &'static str) -> usize {
        self.emitter.emit(&topic)
    }

    /// Number of change listeners
    pub fn listener_count(&self) -> usize {
        self.emitter.listener_count(&CHANGE)
    }
}
