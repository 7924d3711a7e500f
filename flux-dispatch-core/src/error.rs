//! Dispatcher error taxonomy

use thiserror::Error;

use crate::dispatcher::RegistrationId;

/// Boxed error type for handlers that don't define their own error enum
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the dispatcher itself
///
/// Handler errors of a custom type never pass through this enum: the
/// dispatcher is generic over the handler error type and only requires
/// `E: From<DispatchError>`. The `Handler` variant exists for handlers that
/// use `DispatchError` as their error type directly.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// `dispatch` was called while another dispatch on the same instance was running.
    ///
    /// This is a wiring bug in the caller, not a transient condition. Retrying
    /// synchronously from the same handler fails the same way.
    #[error("cannot dispatch `{action}` while `{active}` is being dispatched")]
    DispatchInProgress {
        /// Name of the rejected action
        action: &'static str,
        /// Name of the action whose dispatch is still running
        active: &'static str,
    },

    /// Resolving a `wait_for` request would require a handler to wait on itself.
    #[error("cyclic wait_for: {}", format_cycle(.cycle))]
    CyclicWaitFor {
        /// Registrations forming the cycle, starting and ending with the same id
        cycle: Vec<RegistrationId>,
    },

    /// `wait_for` referenced an id that is not currently registered.
    #[error("wait_for references unknown registration {0}")]
    UnknownRegistration(RegistrationId),

    /// `wait_for` referenced a registration that does not take part in the
    /// current dispatch (another action kind, or registered mid-dispatch).
    #[error("registration {0} is not part of the current dispatch")]
    NotInSession(RegistrationId),

    /// A handler run through `wait_for` failed, or an earlier failure already
    /// aborted the dispatch. `dispatch` returns the original failure.
    #[error("dispatch aborted after registration {0} failed")]
    Aborted(RegistrationId),

    /// Error returned by a handler using `DispatchError` as its error type.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),
}

impl DispatchError {
    /// Wrap an arbitrary error or message as a handler failure
    pub fn handler(source: impl Into<BoxError>) -> Self {
        Self::Handler(source.into())
    }

    /// Whether this is a rejected reentrant or concurrent dispatch
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::DispatchInProgress { .. })
    }

    /// Whether this is a `wait_for` cycle
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CyclicWaitFor { .. })
    }

    /// Whether this reports a failure raised elsewhere in the same dispatch
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// Copy of this error; a handler source is kept as its message only
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::DispatchInProgress { action, active } => Self::DispatchInProgress {
                action: *action,
                active: *active,
            },
            Self::CyclicWaitFor { cycle } => Self::CyclicWaitFor {
                cycle: cycle.clone(),
            },
            Self::UnknownRegistration(id) => Self::UnknownRegistration(*id),
            Self::NotInSession(id) => Self::NotInSession(*id),
            Self::Aborted(id) => Self::Aborted(*id),
            Self::Handler(source) => Self::handler(source.to_string()),
        }
    }
}

fn format_cycle(cycle: &[RegistrationId]) -> String {
    cycle
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
