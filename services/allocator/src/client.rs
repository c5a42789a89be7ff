//! Cluster-manager client interface.
//!
//! The controller submits requests, cancellations, releases and launches
//! through [`ClusterManagerClient`]. Submission is acknowledged synchronously;
//! the outcome arrives later as a [`ClusterNotification`] delivered to the
//! controller's notification loop.

use anyhow::Result;
use async_trait::async_trait;
use yarnscale_id::{ContainerId, RequestId};

use crate::command::LaunchCommand;

/// Exit status reported for a container the application released.
pub const EXIT_ABORTED: i32 = -100;

/// Exit status reported when the node could not start the container.
pub const EXIT_LAUNCH_FAILED: i32 = -1000;

/// Resources requested for, or granted to, a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Memory in megabytes.
    pub memory_mb: u64,

    /// Virtual cores.
    pub vcores: u32,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            vcores: 1,
        }
    }
}

/// A request for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Controller-local id, echoed back on the matching grant when supported.
    pub request_id: RequestId,

    /// Requested resources.
    pub resource: ResourceSpec,
}

/// A container granted by the cluster manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Cluster-assigned id.
    pub id: ContainerId,

    /// Request this grant satisfies, if the cluster manager reports it.
    pub request_id: Option<RequestId>,

    /// Granted resources; may exceed what was requested.
    pub resource: ResourceSpec,

    /// Node hosting the container.
    pub node: String,
}

/// Terminal status of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Container that completed.
    pub id: ContainerId,

    /// Process exit status, or one of the `EXIT_*` sentinels.
    pub exit_status: i32,

    /// Free-form reason from the cluster manager.
    pub diagnostics: String,
}

/// Asynchronous callbacks from the cluster manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterNotification {
    /// Containers were granted.
    Allocated(Vec<Container>),

    /// Containers reached a terminal state.
    Completed(Vec<ContainerStatus>),

    /// A granted container could not be started.
    LaunchFailed { id: ContainerId, reason: String },
}

/// Cluster-manager operations used by the controller.
#[async_trait]
pub trait ClusterManagerClient: Send + Sync {
    /// Submit a request for one container.
    async fn request_container(&self, request: &ContainerRequest) -> Result<()>;

    /// Withdraw a request that has not been granted yet.
    async fn cancel_request(&self, request_id: RequestId) -> Result<()>;

    /// Release a granted container.
    async fn release_container(&self, id: &ContainerId) -> Result<()>;

    /// Start the worker process in a granted container.
    async fn launch_container(&self, container: &Container, command: &LaunchCommand) -> Result<()>;
}
