//! Core traits and types for flux-dispatch
//!
//! This crate provides a single-writer action dispatcher in the Flux style:
//! every state change enters the application as an action, and one
//! [`Dispatcher`] delivers it to the handlers registered for its kind.
//!
//! # Core Concepts
//!
//! - **Action**: A value describing something that happened, tagged with a kind
//! - **Dispatcher**: Routes one action at a time to its handlers, refusing
//!   reentrant dispatches
//! - **wait_for**: Lets a handler require that sibling handlers run first
//! - **Store**: State container whose reducer is registered as a handler
//! - **DispatchLoop**: Queue that feeds async results back in, one dispatch
//!   at a time
//!
//! # Basic Example
//!
//! ```ignore
//! use flux_dispatch_core::prelude::*;
//!
//! #[derive(Action, Clone, Debug)]
//! enum PlayerAction {
//!     Play { track: String },
//!     Stop,
//! }
//!
//! fn reducer(state: &mut Option<String>, action: &PlayerAction) -> bool {
//!     match action {
//!         PlayerAction::Play { track } => { *state = Some(track.clone()); true }
//!         PlayerAction::Stop => state.take().is_some(),
//!     }
//! }
//!
//! let dispatcher = Dispatcher::new();
//! let now_playing = Store::new(None, reducer);
//! now_playing.register(&dispatcher, PlayerActionKind::Play);
//! now_playing.register(&dispatcher, PlayerActionKind::Stop);
//!
//! dispatcher.dispatch(PlayerAction::Play { track: "A".into() })?;
//! ```
//!
//! # Async Work
//!
//! Handlers never dispatch. Work that finishes later is spawned through a
//! [`TaskManager`] and comes back as a new action on the [`DispatchLoop`]
//! queue, which dispatches it once the dispatcher is idle.
//!
//! ```ignore
//! let mut dispatch_loop = DispatchLoop::new(dispatcher.clone());
//! let mut tasks = dispatch_loop.task_manager();
//!
//! tasks.spawn("load", async move {
//!     let track = library.load(id).await;
//!     PlayerAction::TrackLoaded(track)
//! });
//!
//! dispatch_loop.run(|a| matches!(a, PlayerAction::Quit), |name, err| {
//!     tracing::error!(action = name, error = %err, "dispatch failed");
//! }).await;
//! ```

pub mod action;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod log;
pub mod middleware;
#[cfg(feature = "runtime")]
pub mod runtime;
pub mod store;
#[cfg(feature = "runtime")]
pub mod tasks;
pub mod testing;

// Core trait exports
pub use action::{Action, ActionKind, ActionSummary};

// Dispatcher exports
pub use config::{DispatcherConfig, LogConfig};
pub use dispatcher::{
    DispatchContext, DispatchSummary, Dispatcher, DispatcherState, Handler, RegistrationId,
};
pub use error::{BoxError, DispatchError};

// Store exports
pub use emitter::{ChangeEmitter, SubscriptionId};
pub use store::{Reducer, Store, CHANGE};

// Observation exports
pub use log::{
    glob_match, DispatchLog, DispatchLogEntry, DispatchLogger, LogFilter, SharedDispatchLog,
};
pub use middleware::{
    ComposedMiddleware, DispatchOutcome, LoggingMiddleware, Middleware, NoopMiddleware,
};

// Runtime exports (requires "runtime" feature)
#[cfg(feature = "runtime")]
pub use runtime::DispatchLoop;
#[cfg(feature = "runtime")]
pub use tasks::{TaskKey, TaskManager};

// Testing exports
pub use testing::{CallLog, TestHarness};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionKind, ActionSummary};
    pub use crate::config::{DispatcherConfig, LogConfig};
    pub use crate::dispatcher::{DispatchContext, DispatchSummary, Dispatcher, RegistrationId};
    pub use crate::emitter::{ChangeEmitter, SubscriptionId};
    pub use crate::error::DispatchError;
    pub use crate::log::{DispatchLog, DispatchLogger, LogFilter};
    pub use crate::middleware::{
        ComposedMiddleware, DispatchOutcome, LoggingMiddleware, Middleware, NoopMiddleware,
    };
    pub use crate::store::{Reducer, Store, CHANGE};

    #[cfg(feature = "runtime")]
    pub use crate::runtime::DispatchLoop;
    #[cfg(feature = "runtime")]
    pub use crate::tasks::{TaskKey, TaskManager};
}
