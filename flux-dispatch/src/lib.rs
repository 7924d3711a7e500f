//! flux-dispatch: single-writer action dispatch for Rust apps
//!
//! Every state change enters through one [`Dispatcher`], one action at a time.
//! Handlers are registered per action kind and may order themselves with
//! `wait_for`; a dispatch attempted while another is running is refused.
//!
//! # Example
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use flux_dispatch::prelude::*;
//!
//! #[derive(Action, Clone, Debug)]
//! enum PlayerAction {
//!     Play { track: String },
//!     Stop,
//! }
//!
//! let dispatcher: Dispatcher<PlayerAction> = Dispatcher::new();
//! let queue = Rc::new(RefCell::new(Vec::new()));
//!
//! let q = queue.clone();
//! let playlist = dispatcher.register(PlayerActionKind::Play, move |action, _ctx| {
//!     if let PlayerAction::Play { track } = action {
//!         q.borrow_mut().push(track.clone());
//!     }
//!     Ok(())
//! });
//!
//! let q = queue.clone();
//! dispatcher.register(PlayerActionKind::Play, move |_action, ctx| {
//!     ctx.wait_for(&[playlist])?;
//!     assert_eq!(q.borrow().len(), 1);
//!     Ok(())
//! });
//!
//! dispatcher.dispatch(PlayerAction::Play { track: "A".into() })?;
//! assert_eq!(PlayerAction::Stop.name(), "Stop");
//! # Ok::<(), DispatchError>(())
//! ```

// Re-export everything from core
pub use flux_dispatch_core::*;

// Re-export derive macros
pub use flux_dispatch_macros::Action;

/// Prelude for convenient imports
pub mod prelude {
    // Traits
    pub use flux_dispatch_core::{Action, ActionKind, ActionSummary};

    // Dispatcher
    pub use flux_dispatch_core::{
        DispatchContext, DispatchError, DispatchSummary, Dispatcher, DispatcherConfig,
        RegistrationId,
    };

    // Stores
    pub use flux_dispatch_core::{ChangeEmitter, Reducer, Store, SubscriptionId, CHANGE};

    // Middleware and logging
    pub use flux_dispatch_core::{
        ComposedMiddleware, DispatchLog, DispatchLogger, DispatchOutcome, LogFilter,
        LoggingMiddleware, Middleware, NoopMiddleware,
    };

    // Async loop
    #[cfg(feature = "runtime")]
    pub use flux_dispatch_core::{DispatchLoop, TaskKey, TaskManager};

    // Derive macros
    pub use flux_dispatch_macros::Action;
}
