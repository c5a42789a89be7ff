//! Target-count reconciliation.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};
use yarnscale_events::CountChangeCause;
use yarnscale_id::{ContainerId, InstanceName, RequestId};
use yarnscale_reconcile::plan_scale;

use super::Controller;
use crate::client::ContainerRequest;
use crate::error::{AllocatorError, AllocatorResult};

/// Result of a single reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Target applied.
    pub target: u32,

    /// Containers requested or running after the call.
    pub current: u32,

    /// New requests submitted.
    pub requested: u32,

    /// Outstanding requests withdrawn.
    pub cancelled: u32,

    /// Running containers released, ascending by id.
    pub released: Vec<ContainerId>,

    /// Releases wanted but blocked by the in-use set.
    pub shortfall: u32,
}

/// One action handed to the cluster manager.
///
/// The registry already reflects the action when it is submitted; a failed
/// submission is undone from the variant's payload.
#[derive(Debug)]
enum Submission {
    Cancel(RequestId),
    Release(ContainerId),
    Request(RequestId),
}

impl Controller {
    /// Move the container count toward `target`.
    ///
    /// Containers bound to a name in `in_use` are never selected for release.
    /// Outstanding requests are withdrawn newest first before any running
    /// container is released; running containers are released ascending by
    /// id. If the in-use set leaves too few candidates the pool stays above
    /// target and the gap is reported as [`ReconcileOutcome::shortfall`].
    ///
    /// Concurrent calls are serialized; the last one to run sets the target.
    /// On a submission failure the failed action and every action after it
    /// are removed from the registry before the error is returned.
    #[instrument(skip(self, in_use), fields(in_use = in_use.len()))]
    pub async fn reconcile(
        &self,
        target: i32,
        in_use: &HashSet<InstanceName>,
    ) -> AllocatorResult<ReconcileOutcome> {
        let target = u32::try_from(target).map_err(|_| AllocatorError::InvalidTarget(target))?;

        let _gate = self.reconcile_gate.lock().await;
        self.reconcile_locked(target, in_use.clone()).await
    }

    /// Reconcile toward the stored target and in-use set.
    ///
    /// Called after an unexpected container failure. Errors are logged.
    pub(super) async fn compensate(&self) {
        let _gate = self.reconcile_gate.lock().await;

        let (target, in_use) = {
            let state = self.lock();
            if state.shutting_down {
                return;
            }
            (state.target, state.in_use.clone())
        };

        info!(target, "Reconciling to replace failed containers");
        if let Err(e) = self.reconcile_locked(target, in_use).await {
            warn!(target, error = %e, "Compensating reconciliation failed");
        }
    }

    /// Plan, apply locally, then submit. Caller holds the reconcile gate.
    async fn reconcile_locked(
        &self,
        target: u32,
        in_use: HashSet<InstanceName>,
    ) -> AllocatorResult<ReconcileOutcome> {
        self.release_cache.prune();

        let (submissions, mut outcome, event) = {
            let mut state = self.lock();
            if state.shutting_down {
                return Err(AllocatorError::ShutDown);
            }

            let previous = state.target;
            let current = state.registry.current_count();
            state.target = target;

            let outstanding = state.registry.outstanding_requests();
            let running = state.registry.running_count();
            let eligible: Vec<ContainerId> = state
                .registry
                .records_excluding(&in_use)
                .into_iter()
                .filter_map(|record| record.container_id)
                .collect();
            state.in_use = in_use;

            let plan = plan_scale(target, &outstanding, running, &eligible);
            state.shortfall = plan.shortfall;

            info!(
                previous_target = previous,
                target,
                current,
                to_request = plan.to_request,
                to_cancel = plan.to_cancel.len(),
                to_release = plan.to_release.len(),
                "Reconciling container count"
            );
            if plan.shortfall > 0 {
                info!(
                    shortfall = plan.shortfall,
                    "Cannot shrink below in-use floor; remaining containers are in use"
                );
            }

            let mut submissions = Vec::with_capacity(
                plan.to_cancel.len() + plan.to_release.len() + plan.to_request as usize,
            );

            for request_id in &plan.to_cancel {
                if state.registry.begin_cancel(*request_id) {
                    submissions.push(Submission::Cancel(*request_id));
                }
            }

            for id in &plan.to_release {
                state.registry.mark_release_pending(id)?;
                self.release_cache.put(id.clone());
                submissions.push(Submission::Release(id.clone()));
            }

            for _ in 0..plan.to_request {
                let request_id = state.allocate_request_id();
                state
                    .registry
                    .record_requested(request_id, self.config.container)?;
                submissions.push(Submission::Request(request_id));
            }

            let outcome = ReconcileOutcome {
                target,
                current: state.registry.current_count(),
                requested: plan.to_request,
                cancelled: plan.to_cancel.len() as u32,
                released: plan.to_release.clone(),
                shortfall: plan.shortfall,
            };

            let event = if plan.to_request > 0 {
                Some(state.count_event(CountChangeCause::Requested))
            } else if !plan.to_release.is_empty() {
                Some(state.count_event(CountChangeCause::Released))
            } else if !plan.to_cancel.is_empty() {
                Some(state.count_event(CountChangeCause::Cancelled))
            } else {
                None
            };

            (submissions, outcome, event)
        };

        if let Some(event) = event {
            self.events.publish(event);
        }

        let mut pending = submissions.into_iter();
        while let Some(submission) = pending.next() {
            if let Err(e) = self.submit(&submission).await {
                let unsent: Vec<Submission> = std::iter::once(submission).chain(pending).collect();
                warn!(
                    error = %e,
                    rolled_back = unsent.len(),
                    "Submission failed; rolling back unsubmitted actions"
                );
                self.roll_back(unsent);
                return Err(e);
            }
            if let Submission::Cancel(request_id) = submission {
                self.lock().registry.finish_cancel(request_id);
            }
        }

        // Errors are logged and the ids kept for the next attempt.
        let _ = self.retry_releases().await;

        outcome.current = self.current_count();
        Ok(outcome)
    }

    /// Resubmit releases of unbound grants whose first release failed.
    ///
    /// Caller holds the reconcile gate. Ids that fail again are kept.
    pub(super) async fn retry_releases(&self) -> AllocatorResult<()> {
        let ids = std::mem::take(&mut self.lock().unreleased);

        let mut first_error = None;
        for id in ids {
            info!(container_id = %id, "Retrying container release");
            let result = self.client.release_container(&id).await;
            if let Err(e) = result {
                warn!(container_id = %id, error = %e, "Release retry failed");
                self.lock().unreleased.insert(id);
                first_error.get_or_insert(AllocatorError::client("release container", e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn submit(&self, submission: &Submission) -> AllocatorResult<()> {
        match submission {
            Submission::Cancel(request_id) => {
                info!(request_id = %request_id, "Cancelling container request");
                self.client
                    .cancel_request(*request_id)
                    .await
                    .map_err(|e| AllocatorError::client("cancel container request", e))
            }
            Submission::Release(id) => {
                info!(container_id = %id, "Releasing container");
                self.client
                    .release_container(id)
                    .await
                    .map_err(|e| AllocatorError::client("release container", e))
            }
            Submission::Request(request_id) => {
                info!(
                    request_id = %request_id,
                    memory_mb = self.config.container.memory_mb,
                    vcores = self.config.container.vcores,
                    "Requesting container"
                );
                let request = ContainerRequest {
                    request_id: *request_id,
                    resource: self.config.container,
                };
                self.client
                    .request_container(&request)
                    .await
                    .map_err(|e| AllocatorError::client("request container", e))
            }
        }
    }

    /// Undo the registry side of submissions that never reached the cluster manager.
    fn roll_back(&self, unsent: Vec<Submission>) {
        let event = {
            let mut state = self.lock();
            for submission in unsent {
                match submission {
                    Submission::Cancel(request_id) => {
                        if !state.registry.abort_cancel(request_id) {
                            debug!(request_id = %request_id, "Request was granted while its cancellation was in flight");
                        }
                    }
                    Submission::Release(id) => {
                        self.release_cache.invalidate(&id);
                        // The container may have completed while submissions were in flight.
                        if let Err(e) = state.registry.revert_release_pending(&id) {
                            warn!(container_id = %id, error = %e, "Could not revert pending release");
                        }
                    }
                    Submission::Request(request_id) => {
                        state.registry.cancel_request(request_id);
                    }
                }
            }
            state.count_event(CountChangeCause::Cancelled)
        };
        self.events.publish(event);
    }
}
