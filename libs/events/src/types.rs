//! Event type definitions for container lifecycle events.
//!
//! Each event type has a corresponding payload variant with the event-specific data.

use serde::{Deserialize, Serialize};
use yarnscale_id::{ContainerId, InstanceName};

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    pub const CONTAINER_COUNT_CHANGED: &str = "container.count_changed";
    pub const CONTAINER_LAUNCHED: &str = "container.launched";
    pub const CONTAINER_RELEASED: &str = "container.released";
    pub const CONTAINER_FAILED: &str = "container.failed";
    pub const CONTAINER_SHUTDOWN_REQUESTED: &str = "container.shutdown_requested";
}

// =============================================================================
// Payloads
// =============================================================================

/// Why the controller's believed container count changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountChangeCause {
    /// New container requests were submitted.
    Requested,
    /// Outstanding requests were withdrawn.
    Cancelled,
    /// A self-initiated release completed.
    Released,
    /// A container failed unexpectedly.
    Failed,
    /// A request was dropped because its grant could not be launched.
    Abandoned,
}

/// Container lifecycle event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerEvent {
    /// The believed container count (requested + running) changed.
    CountChanged {
        target: u32,
        current: u32,
        running: u32,
        cause: CountChangeCause,
    },

    /// A granted container was bound to an instance and its launch submitted.
    Launched {
        container_id: ContainerId,
        instance: InstanceName,
        memory_mb: u64,
        vcores: u32,
        heap_mb: u64,
    },

    /// A release initiated by the controller was acknowledged.
    Released {
        container_id: ContainerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        instance: Option<InstanceName>,
    },

    /// A container completed without the controller having released it.
    Failed {
        container_id: ContainerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        instance: Option<InstanceName>,
        exit_status: i32,
        diagnostics: String,
        /// The instance name exceeded its failure budget and was retired.
        retries_exhausted: bool,
    },

    /// The controller is shutting down and releasing all containers.
    ShutdownRequested { containers: Vec<ContainerId> },
}

impl ContainerEvent {
    /// The dotted event type name for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            ContainerEvent::CountChanged { .. } => event_types::CONTAINER_COUNT_CHANGED,
            ContainerEvent::Launched { .. } => event_types::CONTAINER_LAUNCHED,
            ContainerEvent::Released { .. } => event_types::CONTAINER_RELEASED,
            ContainerEvent::Failed { .. } => event_types::CONTAINER_FAILED,
            ContainerEvent::ShutdownRequested { .. } => event_types::CONTAINER_SHUTDOWN_REQUESTED,
        }
    }

    /// The container this event is about, if it concerns a single container.
    pub fn container_id(&self) -> Option<&ContainerId> {
        match self {
            ContainerEvent::Launched { container_id, .. }
            | ContainerEvent::Released { container_id, .. }
            | ContainerEvent::Failed { container_id, .. } => Some(container_id),
            ContainerEvent::CountChanged { .. } | ContainerEvent::ShutdownRequested { .. } => None,
        }
    }
}
