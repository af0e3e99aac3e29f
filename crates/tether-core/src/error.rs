use thiserror::Error;

use crate::lifecycle::{LifecycleState, Operation};

/// A lifecycle operation that did not take effect.
///
/// The state machine is left where it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("plugin must be loaded before {op} (state: {state})")]
    NotLoaded { op: Operation, state: LifecycleState },

    #[error("{op} failed: {message}")]
    Hook { op: Operation, message: String },
}
