//! Controller error types.

use thiserror::Error;
use yarnscale_id::{ContainerId, IdError, RequestId};

use crate::command::CommandError;
use crate::registry::ContainerState;

/// Result type for controller operations.
pub type AllocatorResult<T> = Result<T, AllocatorError>;

/// Errors surfaced by the allocation controller.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The caller asked for a negative container count.
    #[error("invalid target container count: {0}")]
    InvalidTarget(i32),

    /// A transition referenced a request the registry does not hold.
    #[error("unknown container request: {0}")]
    UnknownRequest(RequestId),

    /// A transition referenced a container the registry does not hold.
    #[error("unknown container: {0}")]
    UnknownContainer(ContainerId),

    /// A request id was recorded twice.
    #[error("container request {0} is already registered")]
    DuplicateRequest(RequestId),

    /// A container id was granted twice while still tracked.
    #[error("container {0} is already registered")]
    DuplicateContainer(ContainerId),

    /// A transition is not allowed from the record's current state.
    #[error("container {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: ContainerId,
        from: ContainerState,
        to: ContainerState,
    },

    /// The launch command could not be built from the configuration.
    #[error("configuration error: {0}")]
    Config(#[from] CommandError),

    /// The instance naming collaborator produced an invalid name.
    #[error("instance naming error: {0}")]
    Naming(#[from] IdError),

    /// A submission to the cluster manager failed.
    #[error("failed to {action}: {source}")]
    Client {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The controller has been shut down.
    #[error("controller is shut down")]
    ShutDown,
}

impl AllocatorError {
    /// True for errors that indicate a controller or caller bug.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            AllocatorError::InvalidTarget(_)
                | AllocatorError::UnknownRequest(_)
                | AllocatorError::UnknownContainer(_)
                | AllocatorError::DuplicateRequest(_)
                | AllocatorError::DuplicateContainer(_)
                | AllocatorError::InvalidTransition { .. }
        )
    }

    pub(crate) fn client(action: &'static str, source: anyhow::Error) -> Self {
        AllocatorError::Client { action, source }
    }
}
