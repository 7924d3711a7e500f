//! Action and action-kind traits for type-keyed dispatch

use std::fmt::Debug;
use std::hash::Hash;

/// Discriminator used to route an action to its handlers
///
/// Every action carries a kind tag. Handlers register against a kind and the
/// dispatcher looks them up by the tag of the dispatched action, so the kind
/// type needs to be a cheap, hashable value.
///
/// Use `#[derive(Action)]` from `flux-dispatch-macros` to generate a kind enum
/// alongside your action enum.
pub trait ActionKind: Copy + Eq + Hash + Debug + 'static {
    /// Human readable kind name, used for logging and filtering
    fn name(&self) -> &'static str;
}

/// Marker trait for values that can be dispatched
///
/// Actions describe something that happened. They should be:
/// - Clone: actions may be logged or replayed by middleware
/// - Debug: for logging and summaries
/// - 'static: handlers outlive the call site that built the action
///
/// Actions are never mutated once dispatched; every handler receives a shared
/// reference to the same value.
pub trait Action: Clone + Debug + 'static {
    /// Tag type that identifies which handlers receive this action
    type Kind: ActionKind;

    /// Get the routing tag of this action
    fn kind(&self) -> Self::Kind;

    /// Get the action name for logging and filtering
    fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Summary rendering of an action for dispatch logs
///
/// The default implementation uses the `Debug` output. Override it for
/// actions that carry large payloads.
pub trait ActionSummary: Action {
    /// One-line description of the action
    fn summary(&self) -> String {
        format!("{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum TestKind {
        Load,
        Clear,
    }

    impl ActionKind for TestKind {
        fn name(&self) -> &'static str {
            match self {
                TestKind::Load => "Load",
                TestKind::Clear => "Clear",
            }
        }
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Load { bytes: Vec<u8> },
        Clear,
    }

    impl Action for TestAction {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestAction::Load { .. } => TestKind::Load,
                TestAction::Clear => TestKind::Clear,
            }
        }
    }

    impl ActionSummary for TestAction {
        fn summary(&self) -> String {
            match self {
                TestAction::Load { bytes } => format!("Load({} bytes)", bytes.len()),
                TestAction::Clear => "Clear".to_string(),
            }
        }
    }

    #[test]
    fn test_name_defaults_to_kind_name() {
        let action = TestAction::Load { bytes: vec![1, 2] };
        assert_eq!(action.kind(), TestKind::Load);
        assert_eq!(action.name(), "Load");
        assert_eq!(TestAction::Clear.name(), "Clear");
    }

    #[test]
    fn test_custom_summary() {
        let action = TestAction::Load {
            bytes: vec![0; 1024],
        };
        assert_eq!(action.summary(), "Load(1024 bytes)");
    }
}
