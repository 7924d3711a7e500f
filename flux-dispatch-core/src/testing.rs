//! Test utilities for dispatcher-driven code
//!
//! [`TestHarness`] pairs a dispatcher with a [`CallLog`] so ordering tests
//! read as a list of labels:
//!
//! ```
//! use flux_dispatch_core::testing::TestHarness;
//! use flux_dispatch_core::{assert_calls, Action, ActionKind};
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! struct PingKind;
//! impl ActionKind for PingKind {
//!     fn name(&self) -> &'static str { "Ping" }
//! }
//!
//! #[derive(Clone, Debug)]
//! struct Ping;
//! impl Action for Ping {
//!     type Kind = PingKind;
//!     fn kind(&self) -> PingKind { PingKind }
//! }
//!
//! let harness: TestHarness<Ping> = TestHarness::new();
//! let first = harness.record(PingKind, "first");
//! harness.record_after(PingKind, "second", vec![first]);
//!
//! harness.dispatch(Ping).unwrap();
//! assert_calls!(harness.calls, ["first", "second"]);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::dispatcher::{DispatchSummary, Dispatcher, RegistrationId};
use crate::error::DispatchError;
use crate::Action;

/// Shared, ordered record of handler invocations
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<String>>>,
}

impl fmt::Debug for CallLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.calls.borrow().iter()).finish()
    }
}

impl CallLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a label
    pub fn push(&self, label: impl Into<String>) {
        self.calls.borrow_mut().push(label.into());
    }

    /// Snapshot of recorded labels, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Take the recorded labels, leaving the log empty
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Number of times `label` was recorded
    pub fn count(&self, label: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == label).count()
    }

    /// Number of recorded labels
    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    /// Forget every recorded label
    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

/// Dispatcher plus call log for ordering tests
///
/// # Type Parameters
///
/// - `A`: The action type (must implement [`Action`])
/// - `E`: The dispatcher's error type
pub struct TestHarness<A: Action, E: 'static = DispatchError> {
    /// Dispatcher under test
    pub dispatcher: Rc<Dispatcher<A, E>>,
    /// Labels pushed by handlers registered through the harness
    pub calls: CallLog,
}

impl<A, E> Default for TestHarness<A, E>
where
    A: Action,
    E: From<DispatchError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, E> TestHarness<A, E>
where
    A: Action,
    E: From<DispatchError> + 'static,
{
    /// Harness around a fresh dispatcher
    pub fn new() -> Self {
        Self::with_dispatcher(Dispatcher::new())
    }

    /// Harness around an already configured dispatcher
    pub fn with_dispatcher(dispatcher: Dispatcher<A, E>) -> Self {
        Self {
            dispatcher: Rc::new(dispatcher),
            calls: CallLog::new(),
        }
    }

    /// Register a handler that records `label` when it runs
    pub fn record(&self, kind: A::Kind, label: &'static str) -> RegistrationId {
        let calls = self.calls.clone();
        self.dispatcher.register(kind, move |_, _| {
            calls.push(label);
            Ok(())
        })
    }

    /// Register a handler that waits for `deps`, then records `label`
    pub fn record_after(
        &self,
        kind: A::Kind,
        label: &'static str,
        deps: Vec<RegistrationId>,
    ) -> RegistrationId {
        let calls = self.calls.clone();
        self.dispatcher.register(kind, move |_, ctx| {
            ctx.wait_for(&deps)?;
            calls.push(label);
            Ok(())
        })
    }

    /// Register a handler that records `label` and then fails with `message`
    pub fn record_failing(
        &self,
        kind: A::Kind,
        label: &'static str,
        message: &'static str,
    ) -> RegistrationId {
        let calls = self.calls.clone();
        self.dispatcher.register(kind, move |_, _| {
            calls.push(label);
            Err(DispatchError::handler(message).into())
        })
    }

    /// Dispatch through the harness' dispatcher
    pub fn dispatch(&self, action: A) -> Result<DispatchSummary, E> {
        self.dispatcher.dispatch(action)
    }

    /// Take recorded labels
    pub fn take_calls(&self) -> Vec<String> {
        self.calls.take()
    }
}

/// Assert that a dispatch failed with an error matching a pattern.
///
/// # Example
///
/// ```ignore
/// let result = harness.dispatch(Action::Play);
/// assert_dispatch_err!(result, DispatchError::CyclicWaitFor { .. });
/// ```
#[macro_export]
macro_rules! assert_dispatch_err {
    ($result:expr, $pattern:pat $(if $guard:expr)?) => {
        match $result {
            Err(err) => assert!(
                matches!(&err, $pattern $(if $guard)?),
                "Expected dispatch error matching `{}`, but got: {:?}",
                stringify!($pattern),
                err
            ),
            Ok(summary) => panic!(
                "Expected dispatch error matching `{}`, but dispatch succeeded: {:?}",
                stringify!($pattern),
                summary
            ),
        }
    };
}

/// Assert the labels recorded in a [`CallLog`](crate::testing::CallLog).
///
/// # Example
///
/// ```ignore
/// harness.dispatch(Action::Play)?;
/// assert_calls!(harness.calls, ["playlist", "now_playing"]);
/// ```
#[macro_export]
macro_rules! assert_calls {
    ($log:expr, [$($label:expr),* $(,)?]) => {{
        let expected: ::std::vec::Vec<::std::string::String> =
            ::std::vec![$(::std::string::String::from($label)),*];
        assert_eq!($log.calls(), expected, "Unexpected handler call order");
    }};
}
