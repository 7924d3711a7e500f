//! Single-writer action dispatcher
//!
//! The [`Dispatcher`] routes each action to the handlers registered for its
//! kind, one dispatch at a time. Handlers run synchronously in registration
//! order; a handler may pull sibling handlers forward with
//! [`DispatchContext::wait_for`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use flux_dispatch_core::{Action, ActionKind, DispatchError, Dispatcher};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum PlayerKind { Play }
//!
//! impl ActionKind for PlayerKind {
//!     fn name(&self) -> &'static str { "Play" }
//! }
//!
//! #[derive(Clone, Debug)]
//! enum PlayerAction { Play { track: String } }
//!
//! impl Action for PlayerAction {
//!     type Kind = PlayerKind;
//!     fn kind(&self) -> PlayerKind { PlayerKind::Play }
//! }
//!
//! let dispatcher: Dispatcher<PlayerAction> = Dispatcher::new();
//! let queue = Rc::new(RefCell::new(Vec::new()));
//!
//! let q = queue.clone();
//! let append = dispatcher.register(PlayerKind::Play, move |action, _ctx| {
//!     let PlayerAction::Play { track } = action;
//!     q.borrow_mut().push(track.clone());
//!     Ok(())
//! });
//!
//! let q = queue.clone();
//! dispatcher.register(PlayerKind::Play, move |_action, ctx| {
//!     ctx.wait_for(&[append])?;
//!     assert_eq!(q.borrow().len(), 1);
//!     Ok(())
//! });
//!
//! dispatcher.dispatch(PlayerAction::Play { track: "A".into() })?;
//! assert_eq!(*queue.borrow(), vec!["A".to_string()]);
//! # Ok::<(), DispatchError>(())
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::DispatcherConfig;
use crate::error::DispatchError;
use crate::middleware::{DispatchOutcome, Middleware, NoopMiddleware};
use crate::{Action, ActionKind};

/// Identifier handed out by [`Dispatcher::register`]
///
/// Used to unregister a handler and to reference it from
/// [`DispatchContext::wait_for`]. Ids are never reused within a dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub(crate) u64);

impl RegistrationId {
    /// Raw numeric value of the id
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Boxed handler callback
pub type Handler<A, E> = Box<dyn FnMut(&A, &DispatchContext<'_, A, E>) -> Result<(), E>>;

type SharedHandler<A, E> = Rc<RefCell<Handler<A, E>>>;

/// Coarse dispatcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// No dispatch is running; `dispatch` will be admitted
    Idle,
    /// A dispatch session is active; `dispatch` will be rejected
    Dispatching,
}

/// Result of a successful dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Name of the dispatched action
    pub action: &'static str,
    /// Number of handlers that ran
    pub handlers: usize,
}

struct Entry<A: Action, E: 'static> {
    kind: A::Kind,
    handler: SharedHandler<A, E>,
}

struct Registry<A: Action, E: 'static> {
    next_id: u64,
    entries: HashMap<RegistrationId, Entry<A, E>>,
    by_kind: HashMap<A::Kind, Vec<RegistrationId>>,
}

impl<A: Action, E: 'static> Registry<A, E> {
    fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    fn insert(&mut self, kind: A::Kind, handler: Handler<A, E>) -> RegistrationId {
        let id = RegistrationId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                kind,
                handler: Rc::new(RefCell::new(handler)),
            },
        );
        self.by_kind.entry(kind).or_default().push(id);
        id
    }

    fn remove(&mut self, id: RegistrationId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(ids) = self.by_kind.get_mut(&entry.kind) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                self.by_kind.remove(&entry.kind);
            }
        }
        true
    }

    fn snapshot(&self, kind: A::Kind) -> Vec<Slot<A, E>> {
        self.by_kind
            .get(&kind)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| {
                        self.entries.get(id).map(|entry| Slot {
                            id: *id,
                            state: SlotState::Pending,
                            handler: entry.handler.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Running,
    Done,
}

struct Slot<A: Action, E: 'static> {
    id: RegistrationId,
    state: SlotState,
    handler: SharedHandler<A, E>,
}

enum Begin<A: Action, E: 'static> {
    Run(SharedHandler<A, E>),
    Skip,
    Cycle(Vec<RegistrationId>),
    Missing,
}

/// State of one `dispatch` call: the handler snapshot and per-handler progress
struct Session<A: Action, E: 'static> {
    action: &'static str,
    slots: Vec<Slot<A, E>>,
    index: HashMap<RegistrationId, usize>,
    // Handlers currently on the call stack, outermost first
    running: Vec<RegistrationId>,
    invoked: usize,
    // First error raised under wait_for, returned even if the caller swallowed it
    failure: Option<Failure<E>>,
}

struct Failure<E> {
    registration: RegistrationId,
    error: E,
}

impl<A: Action, E: 'static> Session<A, E> {
    fn new(action: &'static str, slots: Vec<Slot<A, E>>) -> Self {
        let index = slots
            .iter()
            .enumerate()
            .map(|(pos, slot)| (slot.id, pos))
            .collect();
        Self {
            action,
            slots,
            index,
            running: Vec::new(),
            invoked: 0,
            failure: None,
        }
    }

    fn ids(&self) -> Vec<RegistrationId> {
        self.slots.iter().map(|slot| slot.id).collect()
    }

    fn contains(&self, id: RegistrationId) -> bool {
        self.index.contains_key(&id)
    }

    fn state_of(&self, id: RegistrationId) -> Option<SlotState> {
        self.index.get(&id).map(|&pos| self.slots[pos].state)
    }

    fn begin(&mut self, id: RegistrationId) -> Begin<A, E> {
        let Some(&pos) = self.index.get(&id) else {
            return Begin::Missing;
        };
        match self.slots[pos].state {
            SlotState::Done => Begin::Skip,
            SlotState::Running => {
                let start = self.running.iter().position(|r| *r == id).unwrap_or(0);
                let mut cycle = self.running[start..].to_vec();
                cycle.push(id);
                Begin::Cycle(cycle)
            }
            SlotState::Pending => {
                self.slots[pos].state = SlotState::Running;
                self.running.push(id);
                self.invoked += 1;
                Begin::Run(self.slots[pos].handler.clone())
            }
        }
    }

    fn finish(&mut self, id: RegistrationId) {
        if let Some(&pos) = self.index.get(&id) {
            self.slots[pos].state = SlotState::Done;
        }
        if let Some(pos) = self.running.iter().rposition(|r| *r == id) {
            self.running.remove(pos);
        }
    }
}

/// Closes the active session on every exit path, unwinding included
struct SessionGuard<'a, A: Action, E: 'static> {
    session: &'a RefCell<Option<Session<A, E>>>,
}

impl<A: Action, E: 'static> Drop for SessionGuard<'_, A, E> {
    fn drop(&mut self) {
        if let Ok(mut session) = self.session.try_borrow_mut() {
            session.take();
        }
    }
}

/// Handle passed to every handler invocation
///
/// Only exists while a dispatch is running, which is what makes `wait_for`
/// impossible to call outside a session.
pub struct DispatchContext<'a, A: Action, E: 'static = DispatchError> {
    dispatcher: &'a Dispatcher<A, E>,
    action: &'a A,
    current: RegistrationId,
}

impl<'a, A, E> DispatchContext<'a, A, E>
where
    A: Action,
    E: From<DispatchError> + 'static,
{
    /// The action being dispatched
    pub fn action(&self) -> &'a A {
        self.action
    }

    /// Registration id of the handler this context was handed to
    pub fn registration(&self) -> RegistrationId {
        self.current
    }

    /// The dispatcher running this session
    ///
    /// Calling [`Dispatcher::dispatch`] through it fails with
    /// [`DispatchError::DispatchInProgress`]; registering and unregistering
    /// are allowed and apply from the next dispatch on.
    pub fn dispatcher(&self) -> &'a Dispatcher<A, E> {
        self.dispatcher
    }

    /// Run the given handlers before continuing
    ///
    /// Each referenced handler that has not yet run in this dispatch is
    /// invoked immediately, in the order given. Handlers that already ran are
    /// skipped, so overlapping requests never run a handler twice.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnknownRegistration`] if an id is not registered
    /// - [`DispatchError::NotInSession`] if an id is registered but does not
    ///   take part in this dispatch
    /// - [`DispatchError::CyclicWaitFor`] if a referenced handler is already
    ///   running further up the call chain (including the caller itself)
    /// - [`DispatchError::Aborted`] if a handler invoked on the caller's behalf
    ///   failed, or the dispatch was already aborted
    ///
    /// Any of these fails the whole dispatch, even if the caller discards the
    /// error: `dispatch` returns the first failure of the session.
    pub fn wait_for(&self, ids: &[RegistrationId]) -> Result<(), E> {
        self.dispatcher.wait_for(self.action, self.current, ids)
    }

    /// Whether the given handler has already finished in this dispatch
    pub fn has_run(&self, id: RegistrationId) -> bool {
        self.dispatcher
            .session
            .borrow()
            .as_ref()
            .and_then(|session| session.state_of(id))
            == Some(SlotState::Done)
    }
}

/// Routes actions to handlers registered by action kind
///
/// # Type Parameters
/// * `A` - The action type (must implement `Action`)
/// * `E` - Error type returned by handlers; dispatcher errors convert into it
///
/// The dispatcher is single-threaded. Share it with `Rc` between the stores
/// and producers that need it; independent instances never interact.
pub struct Dispatcher<A: Action, E: 'static = DispatchError> {
    registry: RefCell<Registry<A, E>>,
    session: RefCell<Option<Session<A, E>>>,
    middleware: RefCell<Box<dyn Middleware<A>>>,
    config: DispatcherConfig,
}

impl<A: Action, E: 'static> fmt::Debug for Dispatcher<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("Dispatcher")
            .field("label", &self.config.label)
            .field("registrations", &registry.entries.len())
            .field(
                "active",
                &self.session.borrow().as_ref().map(|session| session.action),
            )
            .finish()
    }
}

impl<A, E> Default for Dispatcher<A, E>
where
    A: Action,
    E: From<DispatchError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, E> Dispatcher<A, E>
where
    A: Action,
    E: From<DispatchError> + 'static,
{
    /// Create an idle dispatcher with no handlers
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    /// Create a dispatcher with explicit configuration
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            registry: RefCell::new(Registry::new()),
            session: RefCell::new(None),
            middleware: RefCell::new(Box::new(NoopMiddleware)),
            config,
        }
    }

    /// Install middleware, replacing the current one
    ///
    /// Use [`ComposedMiddleware`](crate::ComposedMiddleware) to stack several.
    pub fn with_middleware<M: Middleware<A> + 'static>(mut self, middleware: M) -> Self {
        self.middleware = RefCell::new(Box::new(middleware));
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register a handler for actions of `kind`
    ///
    /// Handlers for the same kind run in registration order. Registering
    /// during a dispatch only affects later dispatches.
    pub fn register<F>(&self, kind: A::Kind, handler: F) -> RegistrationId
    where
        F: FnMut(&A, &DispatchContext<'_, A, E>) -> Result<(), E> + 'static,
    {
        let id = self.registry.borrow_mut().insert(kind, Box::new(handler));
        debug!(
            dispatcher = %self.config.label,
            kind = kind.name(),
            registration = %id,
            "Handler registered"
        );
        id
    }

    /// Remove a handler
    ///
    /// Unknown ids are ignored; returns whether a handler was removed. A
    /// handler removed during a dispatch still runs in that dispatch if it
    /// was part of its snapshot.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let removed = self.registry.borrow_mut().remove(id);
        if removed {
            debug!(dispatcher = %self.config.label, registration = %id, "Handler unregistered");
        }
        removed
    }

    /// Whether `id` is currently registered
    pub fn is_registered(&self, id: RegistrationId) -> bool {
        self.registry.borrow().entries.contains_key(&id)
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: A::Kind) -> usize {
        self.registry
            .borrow()
            .by_kind
            .get(&kind)
            .map_or(0, |ids| ids.len())
    }

    /// Total number of registered handlers
    pub fn len(&self) -> usize {
        self.registry.borrow().entries.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current coarse state
    pub fn state(&self) -> DispatcherState {
        if self.session.borrow().is_some() {
            DispatcherState::Dispatching
        } else {
            DispatcherState::Idle
        }
    }

    /// Whether a dispatch is running
    pub fn is_dispatching(&self) -> bool {
        self.state() == DispatcherState::Dispatching
    }

    /// Dispatch an action to every handler registered for its kind
    ///
    /// Handlers run synchronously in registration order, each at most once.
    /// The first error aborts the remaining handlers and is returned as is.
    /// The dispatcher is idle again when this returns, whatever the result.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DispatchInProgress`] if called while another dispatch
    /// is running on this dispatcher (for example from inside a handler, or
    /// from a store listener notified by one). The call is refused, not
    /// queued.
    pub fn dispatch(&self, action: A) -> Result<DispatchSummary, E> {
        let name = action.name();

        let active = self.session.borrow().as_ref().map(|session| session.action);
        if let Some(active) = active {
            warn!(
                dispatcher = %self.config.label,
                action = name,
                active,
                "Dispatch rejected, another dispatch is in progress"
            );
            self.middleware
                .borrow_mut()
                .after(&action, DispatchOutcome::Rejected);
            return Err(DispatchError::DispatchInProgress {
                action: name,
                active,
            }
            .into());
        }

        let slots = self.registry.borrow().snapshot(action.kind());
        *self.session.borrow_mut() = Some(Session::new(name, slots));
        let guard = SessionGuard {
            session: &self.session,
        };

        debug!(dispatcher = %self.config.label, action = name, "Dispatch started");
        self.middleware.borrow_mut().before(&action);

        let result = self.run_session(&action);
        let invoked = self
            .session
            .borrow()
            .as_ref()
            .map_or(0, |session| session.invoked);
        drop(guard);

        let outcome = match &result {
            Ok(()) => {
                debug!(
                    dispatcher = %self.config.label,
                    action = name,
                    handlers = invoked,
                    "Dispatch finished"
                );
                DispatchOutcome::Completed { handlers: invoked }
            }
            Err(_) => {
                debug!(
                    dispatcher = %self.config.label,
                    action = name,
                    handlers = invoked,
                    "Dispatch aborted by handler error"
                );
                DispatchOutcome::Failed
            }
        };
        self.middleware.borrow_mut().after(&action, outcome);

        result.map(|()| DispatchSummary {
            action: name,
            handlers: invoked,
        })
    }

    fn run_session(&self, action: &A) -> Result<(), E> {
        let ids = self
            .session
            .borrow()
            .as_ref()
            .map(Session::ids)
            .unwrap_or_default();
        for id in ids {
            let result = match self.begin(id) {
                Ok(Some(handler)) => self.invoke(action, id, &handler),
                Ok(None) => Ok(()),
                Err(err) => Err(err.into()),
            };
            // A failure raised under wait_for wins over what the handler returned
            if let Some(failure) = self.take_failure() {
                return Err(failure);
            }
            result?;
        }
        Ok(())
    }

    fn wait_for(
        &self,
        action: &A,
        caller: RegistrationId,
        ids: &[RegistrationId],
    ) -> Result<(), E> {
        for &id in ids {
            if let Some(failed) = self.failed_registration() {
                return Err(DispatchError::Aborted(failed).into());
            }
            if !self.is_registered(id) {
                return Err(self.fail(caller, DispatchError::UnknownRegistration(id)));
            }
            let in_session = self
                .session
                .borrow()
                .as_ref()
                .is_some_and(|session| session.contains(id));
            if !in_session {
                return Err(self.fail(caller, DispatchError::NotInSession(id)));
            }
            if self.config.trace_handlers {
                debug!(
                    dispatcher = %self.config.label,
                    caller = %caller,
                    registration = %id,
                    "Waiting for handler"
                );
            }

            let handler = match self.begin(id) {
                Ok(Some(handler)) => handler,
                Ok(None) => continue,
                Err(err) => return Err(self.fail(caller, err)),
            };
            if let Err(err) = self.invoke(action, id, &handler) {
                self.record_failure(id, err);
                return Err(DispatchError::Aborted(id).into());
            }
        }
        Ok(())
    }

    /// Mark `id` as running; `None` when it already ran in this session
    fn begin(&self, id: RegistrationId) -> Result<Option<SharedHandler<A, E>>, DispatchError> {
        let begin = match self.session.borrow_mut().as_mut() {
            Some(session) => session.begin(id),
            None => Begin::Missing,
        };
        match begin {
            Begin::Run(handler) => Ok(Some(handler)),
            Begin::Skip => Ok(None),
            Begin::Missing => Err(DispatchError::NotInSession(id)),
            Begin::Cycle(cycle) => {
                warn!(
                    dispatcher = %self.config.label,
                    registration = %id,
                    "Cyclic wait_for detected"
                );
                Err(DispatchError::CyclicWaitFor { cycle })
            }
        }
    }

    fn invoke(
        &self,
        action: &A,
        id: RegistrationId,
        handler: &SharedHandler<A, E>,
    ) -> Result<(), E> {
        if self.config.trace_handlers {
            debug!(
                dispatcher = %self.config.label,
                action = action.name(),
                registration = %id,
                "Invoking handler"
            );
        }

        let ctx = DispatchContext {
            dispatcher: self,
            action,
            current: id,
        };
        let result = match handler.try_borrow_mut() {
            Ok(mut callback) => {
                let callback = &mut *callback;
                callback(action, &ctx)
            }
            // A running handler is always caught by `begin`
            Err(_) => Err(DispatchError::CyclicWaitFor {
                cycle: vec![id, id],
            }
            .into()),
        };

        if let Some(session) = self.session.borrow_mut().as_mut() {
            session.finish(id);
        }
        result
    }

    /// Record a dispatcher error against the session and hand a copy to the caller
    fn fail(&self, registration: RegistrationId, err: DispatchError) -> E {
        self.record_failure(registration, err.duplicate().into());
        err.into()
    }

    /// Keep the first failure of the session; later ones are dropped
    fn record_failure(&self, registration: RegistrationId, error: E) {
        if let Some(session) = self.session.borrow_mut().as_mut() {
            if session.failure.is_none() {
                session.failure = Some(Failure {
                    registration,
                    error,
                });
            }
        }
    }

    fn failed_registration(&self) -> Option<RegistrationId> {
        self.session
            .borrow()
            .as_ref()
            .and_then(|session| session.failure.as_ref())
            .map(|failure| failure.registration)
    }

    fn take_failure(&self) -> Option<E> {
        self.session
            .borrow_mut()
            .as_mut()
            .and_then(|session| session.failure.take())
            .map(|failure| failure.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum TestKind {
        Play,
        Stop,
    }

    impl ActionKind for TestKind {
        fn name(&self) -> &'static str {
            match self {
                TestKind::Play => "Play",
                TestKind::Stop => "Stop",
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Play(&'static str),
        Stop,
    }

    impl Action for TestAction {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestAction::Play(_) => TestKind::Play,
                TestAction::Stop => TestKind::Stop,
            }
        }
    }

    type Calls = Rc<RefCell<Vec<&'static str>>>;

    fn recorder(
        dispatcher: &Dispatcher<TestAction>,
        calls: &Calls,
        kind: TestKind,
        label: &'static str,
    ) -> RegistrationId {
        let calls = calls.clone();
        dispatcher.register(kind, move |_, _| {
            calls.borrow_mut().push(label);
            Ok(())
        })
    }

    #[test]
    fn test_registration_order() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        recorder(&dispatcher, &calls, TestKind::Play, "a");
        recorder(&dispatcher, &calls, TestKind::Stop, "stop");
        recorder(&dispatcher, &calls, TestKind::Play, "b");
        recorder(&dispatcher, &calls, TestKind::Play, "c");

        let summary = dispatcher.dispatch(TestAction::Play("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["a", "b", "c"]);
        assert_eq!(
            summary,
            DispatchSummary {
                action: "Play",
                handlers: 3
            }
        );
    }

    #[test]
    fn test_dispatch_without_handlers() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let summary = dispatcher.dispatch(TestAction::Stop).unwrap();
        assert_eq!(summary.handlers, 0);
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        let a = recorder(&dispatcher, &calls, TestKind::Play, "a");
        recorder(&dispatcher, &calls, TestKind::Play, "b");

        assert!(dispatcher.unregister(a));
        assert!(!dispatcher.unregister(a));
        assert!(!dispatcher.unregister(RegistrationId(999)));
        assert_eq!(dispatcher.handler_count(TestKind::Play), 1);

        dispatcher.dispatch(TestAction::Play("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["b"]);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let a = dispatcher.register(TestKind::Play, |_, _| Ok(()));
        dispatcher.unregister(a);
        let b = dispatcher.register(TestKind::Play, |_, _| Ok(()));
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_reentrant_dispatch_rejected() {
        let dispatcher = Rc::new(Dispatcher::<TestAction>::new());
        let calls: Calls = Rc::default();
        let nested = Rc::new(RefCell::new(None));

        let n = nested.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            let err = ctx.dispatcher().dispatch(TestAction::Stop).unwrap_err();
            *n.borrow_mut() = Some(err.to_string());
            Ok(())
        });
        recorder(&dispatcher, &calls, TestKind::Play, "after");
        recorder(&dispatcher, &calls, TestKind::Stop, "stop");

        dispatcher.dispatch(TestAction::Play("x")).unwrap();

        assert_eq!(
            nested.borrow().as_deref(),
            Some("cannot dispatch `Stop` while `Play` is being dispatched")
        );
        // Outer dispatch completed, nested one never ran
        assert_eq!(*calls.borrow(), vec!["after"]);
        assert!(!dispatcher.is_dispatching());
    }

    #[test]
    fn test_handler_error_aborts_and_resets() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        recorder(&dispatcher, &calls, TestKind::Play, "first");
        dispatcher.register(TestKind::Play, |_, _| Err(DispatchError::handler("boom")));
        recorder(&dispatcher, &calls, TestKind::Play, "never");

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert_eq!(*calls.borrow(), vec!["first"]);
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        recorder(&dispatcher, &calls, TestKind::Stop, "stop");
        dispatcher.dispatch(TestAction::Stop).unwrap();
        assert_eq!(*calls.borrow(), vec!["first", "stop"]);
    }

    #[test]
    fn test_handler_panic_resets_state() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        dispatcher.register(TestKind::Play, |_, _| panic!("handler exploded"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = dispatcher.dispatch(TestAction::Play("x"));
        }));
        assert!(result.is_err());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert!(dispatcher.dispatch(TestAction::Stop).is_ok());
    }

    #[test]
    fn test_wait_for_runs_later_handler_once() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        let later = Rc::new(Cell::new(None));

        let c = calls.clone();
        let l = later.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            c.borrow_mut().push("a:start");
            if let Some(id) = l.get() {
                ctx.wait_for(&[id])?;
                assert!(ctx.has_run(id));
            }
            c.borrow_mut().push("a:end");
            Ok(())
        });
        let b = recorder(&dispatcher, &calls, TestKind::Play, "b");
        later.set(Some(b));

        let summary = dispatcher.dispatch(TestAction::Play("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["a:start", "b", "a:end"]);
        assert_eq!(summary.handlers, 2);
    }

    #[test]
    fn test_wait_for_overlapping_sets() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        let ids: Rc<RefCell<Vec<RegistrationId>>> = Rc::default();

        let i = ids.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            let targets = i.borrow().clone();
            ctx.wait_for(&[targets[1], targets[0]])?;
            ctx.wait_for(&targets)?;
            Ok(())
        });
        let x = recorder(&dispatcher, &calls, TestKind::Play, "x");
        let y = recorder(&dispatcher, &calls, TestKind::Play, "y");
        ids.borrow_mut().extend([x, y]);

        dispatcher.dispatch(TestAction::Play("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["y", "x"]);
    }

    #[test]
    fn test_wait_for_cycle() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let ids: Rc<RefCell<Vec<RegistrationId>>> = Rc::default();

        let i = ids.clone();
        let a = dispatcher.register(TestKind::Play, move |_, ctx| {
            let b = i.borrow()[1];
            ctx.wait_for(&[b])
        });
        let i = ids.clone();
        let b = dispatcher.register(TestKind::Play, move |_, ctx| {
            let a = i.borrow()[0];
            ctx.wait_for(&[a])
        });
        ids.borrow_mut().extend([a, b]);

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        match err {
            DispatchError::CyclicWaitFor { cycle } => assert_eq!(cycle, vec![a, b, a]),
            other => panic!("expected cycle, got {other:?}"),
        }

        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        dispatcher.unregister(a);
        dispatcher.unregister(b);
        assert!(dispatcher.dispatch(TestAction::Play("y")).is_ok());
    }

    #[test]
    fn test_wait_for_transitive_cycle() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let ids: Rc<RefCell<Vec<RegistrationId>>> = Rc::default();

        for next in [1, 2, 0] {
            let i = ids.clone();
            let id = dispatcher.register(TestKind::Play, move |_, ctx| {
                let target = i.borrow()[next];
                ctx.wait_for(&[target])
            });
            ids.borrow_mut().push(id);
        }
        let (a, b, c) = (ids.borrow()[0], ids.borrow()[1], ids.borrow()[2]);

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        match err {
            DispatchError::CyclicWaitFor { cycle } => assert_eq!(cycle, vec![a, b, c, a]),
            other => panic!("expected cycle, got {other:?}"),
        }
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert!(dispatcher.dispatch(TestAction::Stop).is_ok());
    }

    #[test]
    fn test_swallowed_wait_for_failure_still_aborts() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        let failing = Rc::new(Cell::new(None));
        let seen = Rc::new(RefCell::new(None));

        let f = failing.clone();
        let s = seen.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            if let Some(id) = f.get() {
                *s.borrow_mut() = ctx.wait_for(&[id]).err().map(|e| e.to_string());
            }
            Ok(())
        });
        let b = dispatcher.register(TestKind::Play, |_, _| Err(DispatchError::handler("boom")));
        failing.set(Some(b));
        recorder(&dispatcher, &calls, TestKind::Play, "c");

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert_eq!(err.to_string(), "handler failed: boom");
        assert_eq!(
            seen.borrow().as_deref(),
            Some(format!("dispatch aborted after registration {b} failed").as_str())
        );
        assert!(calls.borrow().is_empty());
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        dispatcher.unregister(b);
        recorder(&dispatcher, &calls, TestKind::Stop, "stop");
        dispatcher.dispatch(TestAction::Stop).unwrap();
        assert_eq!(*calls.borrow(), vec!["stop"]);
    }

    #[test]
    fn test_swallowed_cycle_still_fails() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let ids: Rc<RefCell<Vec<RegistrationId>>> = Rc::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let i = ids.clone();
        let a = dispatcher.register(TestKind::Play, move |_, ctx| {
            let b = i.borrow()[1];
            let _ = ctx.wait_for(&[b]);
            Ok(())
        });
        let i = ids.clone();
        let s = seen.clone();
        let b = dispatcher.register(TestKind::Play, move |_, ctx| {
            let a = i.borrow()[0];
            if let Err(err) = ctx.wait_for(&[a]) {
                s.borrow_mut().push(err.is_cycle());
            }
            Ok(())
        });
        ids.borrow_mut().extend([a, b]);

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        match err {
            DispatchError::CyclicWaitFor { cycle } => assert_eq!(cycle, vec![a, b, a]),
            other => panic!("expected cycle, got {other:?}"),
        }
        // The handler itself was told about the cycle
        assert_eq!(*seen.borrow(), vec![true]);
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
    }

    #[test]
    fn test_no_wait_for_after_abort() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let calls: Calls = Rc::default();
        let ids: Rc<RefCell<Vec<RegistrationId>>> = Rc::default();
        let errors = Rc::new(RefCell::new(Vec::new()));

        let i = ids.clone();
        let e = errors.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            let (failing, later) = (i.borrow()[0], i.borrow()[1]);
            for id in [failing, later] {
                if let Err(err) = ctx.wait_for(&[id]) {
                    e.borrow_mut().push(err.is_aborted());
                }
            }
            Ok(())
        });
        let failing =
            dispatcher.register(TestKind::Play, |_, _| Err(DispatchError::handler("boom")));
        let later = recorder(&dispatcher, &calls, TestKind::Play, "later");
        ids.borrow_mut().extend([failing, later]);

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert!(matches!(err, DispatchError::Handler(_)));
        assert_eq!(*errors.borrow(), vec![true, true]);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_wait_for_self() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        dispatcher.register(TestKind::Play, |_, ctx| ctx.wait_for(&[ctx.registration()]));

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert!(err.is_cycle());
    }

    #[test]
    fn test_wait_for_unknown_registration() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let gone = dispatcher.register(TestKind::Play, |_, _| Ok(()));
        dispatcher.unregister(gone);

        dispatcher.register(TestKind::Play, move |_, ctx| ctx.wait_for(&[gone]));
        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownRegistration(id) if id == gone));
    }

    #[test]
    fn test_wait_for_other_kind_not_in_session() {
        let dispatcher: Dispatcher<TestAction> = Dispatcher::new();
        let stop = dispatcher.register(TestKind::Stop, |_, _| Ok(()));
        dispatcher.register(TestKind::Play, move |_, ctx| ctx.wait_for(&[stop]));

        let err = dispatcher.dispatch(TestAction::Play("x")).unwrap_err();
        assert!(matches!(err, DispatchError::NotInSession(id) if id == stop));
    }

    #[test]
    fn test_register_during_dispatch_applies_next_time() {
        let dispatcher = Rc::new(Dispatcher::<TestAction>::new());
        let calls: Calls = Rc::default();
        let added = Rc::new(Cell::new(false));

        let c = calls.clone();
        let a = added.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            c.borrow_mut().push("registrar");
            if !a.replace(true) {
                let c = c.clone();
                ctx.dispatcher().register(TestKind::Play, move |_, _| {
                    c.borrow_mut().push("late");
                    Ok(())
                });
            }
            Ok(())
        });

        dispatcher.dispatch(TestAction::Play("1")).unwrap();
        assert_eq!(*calls.borrow(), vec!["registrar"]);

        dispatcher.dispatch(TestAction::Play("2")).unwrap();
        assert_eq!(*calls.borrow(), vec!["registrar", "registrar", "late"]);
    }

    #[test]
    fn test_unregister_during_dispatch_keeps_snapshot() {
        let dispatcher = Rc::new(Dispatcher::<TestAction>::new());
        let calls: Calls = Rc::default();
        let victim = Rc::new(Cell::new(None));

        let v = victim.clone();
        dispatcher.register(TestKind::Play, move |_, ctx| {
            if let Some(id) = v.get() {
                ctx.dispatcher().unregister(id);
            }
            Ok(())
        });
        let id = recorder(&dispatcher, &calls, TestKind::Play, "victim");
        victim.set(Some(id));

        dispatcher.dispatch(TestAction::Play("1")).unwrap();
        assert_eq!(*calls.borrow(), vec!["victim"]);

        dispatcher.dispatch(TestAction::Play("2")).unwrap();
        assert_eq!(*calls.borrow(), vec!["victim"]);
    }

    #[test]
    fn test_independent_dispatchers() {
        let first = Rc::new(Dispatcher::<TestAction>::new());
        let second: Rc<Dispatcher<TestAction>> = Rc::new(Dispatcher::<TestAction>::new());
        let calls: Calls = Rc::default();

        let s = second.clone();
        let c = calls.clone();
        first.register(TestKind::Play, move |_, _| {
            // A different instance is not busy
            s.dispatch(TestAction::Stop)?;
            c.borrow_mut().push("first");
            Ok(())
        });
        recorder(&second, &calls, TestKind::Stop, "second");

        first.dispatch(TestAction::Play("x")).unwrap();
        assert_eq!(*calls.borrow(), vec!["second", "first"]);
    }

    #[derive(Debug)]
    enum AppError {
        Dispatch(DispatchError),
        Invalid(&'static str),
    }

    impl From<DispatchError> for AppError {
        fn from(err: DispatchError) -> Self {
            AppError::Dispatch(err)
        }
    }

    #[test]
    fn test_custom_error_passes_through() {
        let dispatcher: Dispatcher<TestAction, AppError> = Dispatcher::new();
        dispatcher.register(TestKind::Play, |action, _| match action {
            TestAction::Play("") => Err(AppError::Invalid("empty track")),
            _ => Ok(()),
        });

        let err = dispatcher.dispatch(TestAction::Play("")).unwrap_err();
        assert!(matches!(err, AppError::Invalid("empty track")));

        let dispatcher = Rc::new(dispatcher);
        let d = dispatcher.clone();
        let nested = Rc::new(RefCell::new(None));
        let n = nested.clone();
        dispatcher.register(TestKind::Stop, move |_, _| {
            *n.borrow_mut() = d.dispatch(TestAction::Stop).err();
            Ok(())
        });
        dispatcher.dispatch(TestAction::Stop).unwrap();
        assert!(matches!(
            nested.borrow_mut().take(),
            Some(AppError::Dispatch(DispatchError::DispatchInProgress { .. }))
        ));
    }

    #[test]
    fn test_middleware_sees_every_outcome() {
        #[derive(Default)]
        struct Outcomes(Rc<RefCell<Vec<DispatchOutcome>>>);

        impl Middleware<TestAction> for Outcomes {
            fn before(&mut self, _action: &TestAction) {}

            fn after(&mut self, _action: &TestAction, outcome: DispatchOutcome) {
                self.0.borrow_mut().push(outcome);
            }
        }

        let seen: Rc<RefCell<Vec<DispatchOutcome>>> = Rc::default();
        let dispatcher =
            Rc::new(Dispatcher::<TestAction>::new().with_middleware(Outcomes(seen.clone())));
        dispatcher.register(TestKind::Play, |_, ctx| {
            let _ = ctx.dispatcher().dispatch(TestAction::Stop);
            Ok(())
        });
        dispatcher.register(TestKind::Stop, |_, _| Err(DispatchError::handler("nope")));

        dispatcher.dispatch(TestAction::Play("x")).unwrap();
        let _ = dispatcher.dispatch(TestAction::Stop);

        assert_eq!(
            *seen.borrow(),
            vec![
                DispatchOutcome::Rejected,
                DispatchOutcome::Completed { handlers: 1 },
                DispatchOutcome::Failed,
            ]
        );
    }
}
