//! Container registry: the controller's record of every container it asked for.
//!
//! A record starts life keyed by its [`RequestId`] while the request is
//! outstanding. On grant it moves to the container map keyed by the
//! cluster-assigned [`ContainerId`]. Records leave the registry once they
//! reach `Released` or `Failed`.
//!
//! A request being withdrawn sits in a separate cancelling map until the
//! cancellation is acknowledged. It no longer counts, but a failed cancel can
//! put it back unless a grant claimed it in the meantime.
//!
//! The registry is a plain data structure; callers provide the locking.

use std::collections::{BTreeMap, HashSet};

use yarnscale_id::{ContainerId, InstanceName, RequestId};

use crate::client::{Container, ResourceSpec};
use crate::error::{AllocatorError, AllocatorResult};

/// Lifecycle state of a container record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// Requested from the cluster manager, not yet granted.
    Requested,
    /// Granted and launched under an instance name.
    Running,
    /// Selected for release; completion expected.
    ReleasePending,
    /// Release acknowledged.
    Released,
    /// Completed without being released.
    Failed,
}

impl ContainerState {
    /// States that count toward the current container count.
    pub fn is_counted(&self) -> bool {
        matches!(self, ContainerState::Requested | ContainerState::Running)
    }

    /// Terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Released | ContainerState::Failed)
    }
}

/// A single container as the controller sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Request that produced this container.
    pub request_id: RequestId,

    /// Cluster-assigned id, set at grant.
    pub container_id: Option<ContainerId>,

    /// Instance bound at grant.
    pub instance_name: Option<InstanceName>,

    /// Lifecycle state.
    pub state: ContainerState,

    /// Resources requested.
    pub requested: ResourceSpec,

    /// Resources granted.
    pub granted: Option<ResourceSpec>,

    /// Node hosting the container.
    pub node: Option<String>,
}

impl ContainerRecord {
    fn requested(request_id: RequestId, resource: ResourceSpec) -> Self {
        Self {
            request_id,
            container_id: None,
            instance_name: None,
            state: ContainerState::Requested,
            requested: resource,
            granted: None,
            node: None,
        }
    }
}

/// Owner of all container records.
#[derive(Debug, Default)]
pub struct Registry {
    /// Outstanding requests, oldest first.
    requested: BTreeMap<RequestId, ContainerRecord>,

    /// Requests whose cancellation is in flight.
    cancelling: BTreeMap<RequestId, ContainerRecord>,

    /// Granted containers ordered by id.
    containers: BTreeMap<ContainerId, ContainerRecord>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly submitted request.
    pub fn record_requested(&mut self, request_id: RequestId, resource: ResourceSpec) -> AllocatorResult<()> {
        if self.requested.contains_key(&request_id) {
            return Err(AllocatorError::DuplicateRequest(request_id));
        }
        self.requested
            .insert(request_id, ContainerRecord::requested(request_id, resource));
        Ok(())
    }

    /// Bind a grant to an outstanding request.
    pub fn mark_running(
        &mut self,
        request_id: RequestId,
        container: &Container,
        instance_name: InstanceName,
    ) -> AllocatorResult<&ContainerRecord> {
        if self.containers.contains_key(&container.id) {
            return Err(AllocatorError::DuplicateContainer(container.id.clone()));
        }
        let mut record = self
            .requested
            .remove(&request_id)
            .ok_or(AllocatorError::UnknownRequest(request_id))?;

        record.container_id = Some(container.id.clone());
        record.instance_name = Some(instance_name);
        record.granted = Some(container.resource);
        record.node = Some(container.node.clone());
        record.state = ContainerState::Running;

        Ok(self.containers.entry(container.id.clone()).or_insert(record))
    }

    /// Select a running container for release.
    pub fn mark_release_pending(&mut self, id: &ContainerId) -> AllocatorResult<()> {
        self.transition(id, ContainerState::Running, ContainerState::ReleasePending)
    }

    /// Undo [`mark_release_pending`](Self::mark_release_pending) after a failed submission.
    pub fn revert_release_pending(&mut self, id: &ContainerId) -> AllocatorResult<()> {
        self.transition(id, ContainerState::ReleasePending, ContainerState::Running)
    }

    fn transition(&mut self, id: &ContainerId, from: ContainerState, to: ContainerState) -> AllocatorResult<()> {
        let record = self
            .containers
            .get_mut(id)
            .ok_or_else(|| AllocatorError::UnknownContainer(id.clone()))?;
        if record.state != from {
            return Err(AllocatorError::InvalidTransition {
                id: id.clone(),
                from: record.state,
                to,
            });
        }
        record.state = to;
        Ok(())
    }

    /// Drop an outstanding request, returning its record.
    pub fn cancel_request(&mut self, request_id: RequestId) -> Option<ContainerRecord> {
        self.requested.remove(&request_id)
    }

    /// Stop counting an outstanding request while its cancellation is submitted.
    pub fn begin_cancel(&mut self, request_id: RequestId) -> bool {
        match self.requested.remove(&request_id) {
            Some(record) => {
                self.cancelling.insert(request_id, record);
                true
            }
            None => false,
        }
    }

    /// The cancellation was acknowledged.
    pub fn finish_cancel(&mut self, request_id: RequestId) {
        self.cancelling.remove(&request_id);
    }

    /// The cancellation failed: make the request outstanding again.
    ///
    /// Returns `false` if a grant already claimed the request, in which case
    /// nothing is restored.
    pub fn abort_cancel(&mut self, request_id: RequestId) -> bool {
        match self.cancelling.remove(&request_id) {
            Some(record) => {
                self.requested.insert(request_id, record);
                true
            }
            None => false,
        }
    }

    /// A grant arrived for a request being cancelled.
    ///
    /// Returns `true` if the request was in flight; it will not be restored.
    pub fn claim_cancelling(&mut self, request_id: RequestId) -> bool {
        self.cancelling.remove(&request_id).is_some()
    }

    /// Move a container to a terminal state and remove it.
    ///
    /// Returns `None` if the container is not tracked, which makes repeated
    /// completions for the same id no-ops.
    pub fn complete(&mut self, id: &ContainerId, terminal: ContainerState) -> Option<ContainerRecord> {
        debug_assert!(terminal.is_terminal());
        let mut record = self.remove(id)?;
        record.state = terminal;
        Some(record)
    }

    /// Remove a container regardless of state.
    pub fn remove(&mut self, id: &ContainerId) -> Option<ContainerRecord> {
        self.containers.remove(id)
    }

    /// Look up a granted container.
    pub fn get(&self, id: &ContainerId) -> Option<&ContainerRecord> {
        self.containers.get(id)
    }

    /// True if `request_id` is outstanding.
    pub fn has_request(&self, request_id: RequestId) -> bool {
        self.requested.contains_key(&request_id)
    }

    /// The oldest outstanding request.
    pub fn oldest_request(&self) -> Option<RequestId> {
        self.requested.keys().next().copied()
    }

    /// Outstanding requests, oldest first.
    pub fn outstanding_requests(&self) -> Vec<RequestId> {
        self.requested.keys().copied().collect()
    }

    /// Number of records in `Requested` or `Running`.
    pub fn current_count(&self) -> u32 {
        let granted = self
            .containers
            .values()
            .filter(|r| r.state.is_counted())
            .count();
        (self.requested.len() + granted) as u32
    }

    /// Number of records in `Requested`.
    pub fn requested_count(&self) -> u32 {
        self.requested.len() as u32
    }

    /// Number of records in `Running`.
    pub fn running_count(&self) -> u32 {
        self.running_count_usize() as u32
    }

    /// Number of records in `ReleasePending`.
    pub fn release_pending_count(&self) -> u32 {
        self.containers
            .values()
            .filter(|r| r.state == ContainerState::ReleasePending)
            .count() as u32
    }

    fn running_count_usize(&self) -> usize {
        self.containers
            .values()
            .filter(|r| r.state == ContainerState::Running)
            .count()
    }

    /// Running containers by instance name.
    pub fn snapshot(&self) -> BTreeMap<InstanceName, ContainerId> {
        self.running()
            .filter_map(|(id, r)| r.instance_name.clone().map(|name| (name, id.clone())))
            .collect()
    }

    /// Running containers not bound to any of `instance_names`, ascending by id.
    pub fn records_excluding(&self, instance_names: &HashSet<InstanceName>) -> Vec<ContainerRecord> {
        self.running()
            .filter(|(_, r)| {
                r.instance_name
                    .as_ref()
                    .map_or(true, |name| !instance_names.contains(name))
            })
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Ids of containers in `Running`, ascending.
    pub fn running_ids(&self) -> Vec<ContainerId> {
        self.running().map(|(id, _)| id.clone()).collect()
    }

    /// Every record: outstanding requests first, then requests being
    /// cancelled, then containers by id.
    pub fn records(&self) -> Vec<ContainerRecord> {
        self.requested
            .values()
            .chain(self.cancelling.values())
            .chain(self.containers.values())
            .cloned()
            .collect()
    }

    fn running(&self) -> impl Iterator<Item = (&ContainerId, &ContainerRecord)> {
        self.containers
            .iter()
            .filter(|(_, r)| r.state == ContainerState::Running)
    }
}
