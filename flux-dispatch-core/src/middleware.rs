//! Middleware hooks around each dispatch

use serde::Serialize;

use crate::Action;

/// How a dispatch ended, as reported to [`Middleware::after`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Every handler ran and returned `Ok`
    Completed {
        /// Number of handlers invoked during the session
        handlers: usize,
    },
    /// A handler returned an error (or a `wait_for` failed) and the session was aborted
    Failed,
    /// The dispatch was refused because another one was already running
    Rejected,
}

impl DispatchOutcome {
    /// Whether all handlers ran successfully
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Middleware trait for observing dispatches
///
/// `before` runs once a dispatch has been admitted, right after the session
/// opens. `after` runs on every exit path once the dispatcher is back to idle,
/// including rejected dispatches (which never see `before`).
///
/// Middleware cannot reach the dispatcher, so it cannot dispatch.
pub trait Middleware<A: Action> {
    /// Called before the first handler runs
    fn before(&mut self, action: &A);

    /// Called after the dispatch has finished
    fn after(&mut self, action: &A, outcome: DispatchOutcome);
}

/// A no-op middleware that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMiddleware;

impl<A: Action> Middleware<A> for NoopMiddleware {
    fn before(&mut self, _action: &A) {}
    fn after(&mut self, _action: &A, _outcome: DispatchOutcome) {}
}

/// Middleware that logs every dispatch through `tracing`
#[derive(Debug, Clone, Default)]
pub struct LoggingMiddleware {
    /// Whether to log before dispatch
    pub log_before: bool,
    /// Whether to log after dispatch
    pub log_after: bool,
}

impl LoggingMiddleware {
    /// Create a new logging middleware with default settings (log after only)
    pub fn new() -> Self {
        Self {
            log_before: false,
            log_after: true,
        }
    }

    /// Create a logging middleware that logs both before and after
    pub fn verbose() -> Self {
        Self {
            log_before: true,
            log_after: true,
        }
    }
}

impl<A: Action> Middleware<A> for LoggingMiddleware {
    fn before(&mut self, action: &A) {
        if self.log_before {
            tracing::debug!(action = %action.name(), "Dispatching action");
        }
    }

    fn after(&mut self, action: &A, outcome: DispatchOutcome) {
        if !self.log_after {
            return;
        }
        match outcome {
            DispatchOutcome::Completed { handlers } => {
                tracing::debug!(action = %action.name(), handlers, "Action dispatched");
            }
            DispatchOutcome::Failed => {
                tracing::debug!(action = %action.name(), "Action dispatch failed");
            }
            DispatchOutcome::Rejected => {
                tracing::debug!(action = %action.name(), "Action rejected, dispatch in progress");
            }
        }
    }
}

/// Compose multiple middleware into a single middleware
pub struct ComposedMiddleware<A: Action> {
    middlewares: Vec<Box<dyn Middleware<A>>>,
}

impl<A: Action> std::fmt::Debug for ComposedMiddleware<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposedMiddleware")
            .field("middlewares_count", &self.middlewares.len())
            .finish()
    }
}

impl<A: Action> Default for ComposedMiddleware<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> ComposedMiddleware<A> {
    /// Create a new composed middleware
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the composition
    pub fn add<M: Middleware<A> + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Box::new(middleware));
    }

    /// Builder-style variant of [`add`](Self::add)
    pub fn with<M: Middleware<A> + 'static>(mut self, middleware: M) -> Self {
        self.add(middleware);
        self
    }

    /// Number of composed middleware
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether nothing has been composed yet
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }
}

impl<A: Action> Middleware<A> for ComposedMiddleware<A> {
    fn before(&mut self, action: &A) {
        for middleware in &mut self.middlewares {
            middleware.before(action);
        }
    }

    fn after(&mut self, action: &A, outcome: DispatchOutcome) {
        // Reverse order for proper nesting
        for middleware in self.middlewares.iter_mut().rev() {
            middleware.after(action, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    struct PingKind;

    impl ActionKind for PingKind {
        fn name(&self) -> &'static str {
            "Ping"
        }
    }

    #[derive(Clone, Debug)]
    struct Ping;

    impl Action for Ping {
        type Kind = PingKind;

        fn kind(&self) -> PingKind {
            PingKind
        }
    }

    struct Tagging {
        tag: &'static str,
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Middleware<Ping> for Tagging {
        fn before(&mut self, _action: &Ping) {
            self.calls.borrow_mut().push(format!("before:{}", self.tag));
        }

        fn after(&mut self, _action: &Ping, outcome: DispatchOutcome) {
            self.calls
                .borrow_mut()
                .push(format!("after:{}:{}", self.tag, outcome.is_completed()));
        }
    }

    #[test]
    fn test_composed_nesting_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut composed = ComposedMiddleware::new()
            .with(Tagging {
                tag: "outer",
                calls: calls.clone(),
            })
            .with(Tagging {
                tag: "inner",
                calls: calls.clone(),
            });
        assert_eq!(composed.len(), 2);

        composed.before(&Ping);
        composed.after(&Ping, DispatchOutcome::Completed { handlers: 1 });

        assert_eq!(
            *calls.borrow(),
            vec![
                "before:outer",
                "before:inner",
                "after:inner:true",
                "after:outer:true"
            ]
        );
    }

    #[test]
    fn test_outcome_is_completed() {
        assert!(DispatchOutcome::Completed { handlers: 0 }.is_completed());
        assert!(!DispatchOutcome::Failed.is_completed());
        assert!(!DispatchOutcome::Rejected.is_completed());
    }
}
