//! Cluster-manager callbacks: grants, completions and launch failures.
//!
//! Each callback is applied as one transaction on the registry. Follow-up
//! submissions (launches, surplus releases, compensating reconciliation) run
//! after the registry lock is dropped.

use tracing::{debug, error, info, warn};
use yarnscale_events::{ContainerEvent, CountChangeCause};
use yarnscale_id::{ContainerId, InstanceName, RequestId};

use super::{AllocatorState, Controller};
use crate::client::{Container, ContainerStatus, EXIT_LAUNCH_FAILED};
use crate::command::{build_launch_command, LaunchCommand};
use crate::error::{AllocatorError, AllocatorResult};
use crate::registry::ContainerState;

/// What to do with a granted container once the registry has been updated.
enum Grant {
    /// Bound to a request and an instance name.
    Launch {
        instance: InstanceName,
        command: LaunchCommand,
    },
    /// Already tracked under this id; a redelivered grant.
    Duplicate,
    /// Matches no outstanding request.
    Surplus { reason: &'static str },
    /// The request was dropped because no usable command could be built.
    Abandon {
        error: AllocatorError,
        count: Option<ContainerEvent>,
    },
}

/// How a completion was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// Not tracked: already handled or never ours to track.
    Ignored,
    /// Release initiated by the controller.
    Expected,
    /// The container died on its own.
    Unexpected,
}

impl Controller {
    /// Apply a batch of grants.
    ///
    /// Every grant is handled; the first error is returned.
    pub async fn on_containers_allocated(&self, containers: Vec<Container>) -> AllocatorResult<()> {
        let mut first_error = None;
        for container in containers {
            if let Err(e) = self.on_container_allocated(container).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn on_container_allocated(&self, container: Container) -> AllocatorResult<()> {
        match self.bind_grant(&container) {
            Grant::Launch { instance, command } => {
                info!(
                    container_id = %container.id,
                    instance = %instance,
                    node = %container.node,
                    heap_mb = command.heap_mb,
                    "Launching container"
                );
                self.events.publish(ContainerEvent::Launched {
                    container_id: container.id.clone(),
                    instance,
                    memory_mb: container.resource.memory_mb,
                    vcores: container.resource.vcores,
                    heap_mb: command.heap_mb,
                });

                if let Err(e) = self.client.launch_container(&container, &command).await {
                    warn!(container_id = %container.id, error = %e, "Launch submission failed");
                    self.on_launch_failed(container.id, format!("launch submission failed: {e:#}"))
                        .await?;
                }
                Ok(())
            }
            Grant::Duplicate => Ok(()),
            Grant::Surplus { reason } => {
                info!(container_id = %container.id, reason, "Releasing surplus container");
                self.release_unbound(container.id).await
            }
            Grant::Abandon { error: err, count } => {
                error!(container_id = %container.id, error = %err, "Cannot launch granted container");
                if let Some(event) = count {
                    self.events.publish(event);
                }
                // The release failure is already logged and the id kept for retry.
                let _ = self.release_unbound(container.id).await;
                Err(err)
            }
        }
    }

    /// Release a grant that was never bound to a record.
    ///
    /// On failure the id is kept and released again by the next
    /// reconciliation or by shutdown.
    async fn release_unbound(&self, id: ContainerId) -> AllocatorResult<()> {
        let result = self.client.release_container(&id).await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(container_id = %id, error = %e, "Failed to release unbound container; will retry");
                self.lock().unreleased.insert(id);
                Err(AllocatorError::client("release container", e))
            }
        }
    }

    /// Match a grant to a request and bind it under the registry lock.
    fn bind_grant(&self, container: &Container) -> Grant {
        let mut state = self.lock();

        if let Some(existing) = state.registry.get(&container.id) {
            debug!(
                container_id = %container.id,
                state = ?existing.state,
                "Ignoring grant for already tracked container"
            );
            return Grant::Duplicate;
        }

        if state.shutting_down {
            self.release_cache.put(container.id.clone());
            return Grant::Surplus { reason: "shutting down" };
        }

        let request_id = match container.request_id {
            Some(id) if state.registry.has_request(id) => id,
            Some(id) if state.registry.claim_cancelling(id) => {
                self.release_cache.put(container.id.clone());
                return Grant::Surplus { reason: "request was being cancelled" };
            }
            Some(_) => {
                self.release_cache.put(container.id.clone());
                return Grant::Surplus { reason: "request no longer outstanding" };
            }
            None => match state.registry.oldest_request() {
                Some(id) => id,
                None => {
                    self.release_cache.put(container.id.clone());
                    return Grant::Surplus { reason: "no outstanding request" };
                }
            },
        };

        let instance = match state.namer.acquire() {
            Ok(name) => name,
            Err(e) => return self.abandon(&mut state, request_id, container, e.into()),
        };

        let command = match build_launch_command(
            container.resource.memory_mb,
            &self.config.sizing,
            &instance,
            &self.config.launch,
        ) {
            Ok(command) => command,
            Err(e) => {
                state.namer.release(&instance);
                return self.abandon(&mut state, request_id, container, e.into());
            }
        };

        if let Err(e) = state.registry.mark_running(request_id, container, instance.clone()) {
            state.namer.release(&instance);
            self.release_cache.put(container.id.clone());
            return Grant::Abandon { error: e, count: None };
        }

        Grant::Launch { instance, command }
    }

    fn abandon(
        &self,
        state: &mut AllocatorState,
        request_id: RequestId,
        container: &Container,
        error: AllocatorError,
    ) -> Grant {
        state.registry.cancel_request(request_id);
        self.release_cache.put(container.id.clone());
        Grant::Abandon {
            error,
            count: Some(state.count_event(CountChangeCause::Abandoned)),
        }
    }

    /// Apply a batch of completions.
    ///
    /// Completions for containers the controller released are expected.
    /// Any other completion is a failure and, unless the controller is
    /// shutting down, triggers one compensating reconciliation for the batch.
    pub async fn on_containers_completed(&self, statuses: Vec<ContainerStatus>) -> AllocatorResult<()> {
        let mut failures = 0usize;
        for status in &statuses {
            if self.complete_container(status) == Completion::Unexpected {
                failures += 1;
            }
        }

        if failures > 0 && !self.is_shut_down() {
            self.compensate().await;
        }
        Ok(())
    }

    /// A granted container could not be started; handled as an unexpected completion.
    pub async fn on_launch_failed(&self, id: ContainerId, reason: String) -> AllocatorResult<()> {
        self.on_containers_completed(vec![ContainerStatus {
            id,
            exit_status: EXIT_LAUNCH_FAILED,
            diagnostics: reason,
        }])
        .await
    }

    fn complete_container(&self, status: &ContainerStatus) -> Completion {
        let released_by_us = self.release_cache.contains(&status.id);

        let (completion, events) = {
            let mut state = self.lock();

            let Some(existing) = state.registry.get(&status.id) else {
                debug!(container_id = %status.id, released_by_us, "Ignoring completion for untracked container");
                return Completion::Ignored;
            };
            let expected = released_by_us || existing.state == ContainerState::ReleasePending;
            let terminal = if expected {
                ContainerState::Released
            } else {
                ContainerState::Failed
            };

            let Some(record) = state.registry.complete(&status.id, terminal) else {
                return Completion::Ignored;
            };

            if expected {
                if let Some(name) = &record.instance_name {
                    state.namer.release(name);
                }
                info!(
                    container_id = %status.id,
                    instance = ?record.instance_name,
                    exit_status = status.exit_status,
                    "Container released"
                );
                let released = ContainerEvent::Released {
                    container_id: status.id.clone(),
                    instance: record.instance_name,
                };
                (Completion::Expected, vec![released])
            } else {
                state.retries.prune();
                let retries_exhausted = match &record.instance_name {
                    Some(name) if state.retries.record_failure(name) => {
                        state.retries.clear(name);
                        state.namer.retire(name);
                        true
                    }
                    Some(name) => {
                        state.namer.release(name);
                        false
                    }
                    None => false,
                };
                warn!(
                    container_id = %status.id,
                    instance = ?record.instance_name,
                    exit_status = status.exit_status,
                    diagnostics = %status.diagnostics,
                    retries_exhausted,
                    "Container failed unexpectedly"
                );
                let failed = ContainerEvent::Failed {
                    container_id: status.id.clone(),
                    instance: record.instance_name,
                    exit_status: status.exit_status,
                    diagnostics: status.diagnostics.clone(),
                    retries_exhausted,
                };
                (
                    Completion::Unexpected,
                    vec![failed, state.count_event(CountChangeCause::Failed)],
                )
            }
        };

        for event in events {
            self.events.publish(event);
        }
        completion
    }
}
