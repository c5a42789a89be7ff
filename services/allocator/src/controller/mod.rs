//! Container allocation controller.
//!
//! The controller keeps the number of containers held from the cluster
//! manager equal to a caller-supplied target:
//!
//! - [`Controller::reconcile`] compares the target with the registry and
//!   submits requests, cancellations or releases.
//! - The notification handlers apply grants and completions delivered by the
//!   cluster manager, replacing containers that fail unexpectedly.
//!
//! ## Locking
//!
//! All registry mutations, the target and the in-use set live behind one
//! `std::sync::Mutex` that is never held across an `.await`. Calls to
//! `reconcile` (including compensating ones) are additionally serialized by a
//! `tokio::sync::Mutex` gate, which is held while submissions are in flight so
//! that two reconciliations never decide from the same stale count. The
//! release cache has its own lock.

mod handlers;
mod reconcile;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use yarnscale_events::{ContainerEvent, CountChangeCause, EventSink};
use yarnscale_id::{ContainerId, InstanceName, RequestId};
use yarnscale_reconcile::{ConvergenceStatus, ReleaseCache, RetryTracker};

use crate::client::{ClusterManagerClient, ClusterNotification};
use crate::command::build_launch_command;
use crate::config::Config;
use crate::error::{AllocatorError, AllocatorResult};
use crate::naming::{InstanceNamer, SequentialNamer};
use crate::registry::{ContainerRecord, Registry};

pub use reconcile::ReconcileOutcome;

/// State guarded by the controller's single mutual-exclusion domain.
struct AllocatorState {
    registry: Registry,
    target: u32,
    in_use: HashSet<InstanceName>,
    shortfall: u32,
    next_request: RequestId,
    namer: Box<dyn InstanceNamer>,
    retries: RetryTracker<InstanceName>,
    /// Unbound grants whose release submission failed.
    unreleased: BTreeSet<ContainerId>,
    shutting_down: bool,
}

impl AllocatorState {
    fn allocate_request_id(&mut self) -> RequestId {
        let id = self.next_request;
        self.next_request = id.next();
        id
    }

    fn count_event(&self, cause: CountChangeCause) -> ContainerEvent {
        ContainerEvent::CountChanged {
            target: self.target,
            current: self.registry.current_count(),
            running: self.registry.running_count(),
            cause,
        }
    }
}

/// The allocation controller.
pub struct Controller {
    config: Config,
    state: Mutex<AllocatorState>,
    release_cache: ReleaseCache<ContainerId>,
    reconcile_gate: tokio::sync::Mutex<()>,
    client: Arc<dyn ClusterManagerClient>,
    events: Arc<dyn EventSink>,
}

impl Controller {
    /// Create a controller with sequential instance naming.
    ///
    /// Fails if the configured container size cannot produce a positive heap.
    pub fn new(
        config: Config,
        client: Arc<dyn ClusterManagerClient>,
        events: Arc<dyn EventSink>,
    ) -> AllocatorResult<Self> {
        let namer = Box::new(SequentialNamer::new(config.instance_name_prefix.clone()));
        Self::with_namer(config, client, events, namer)
    }

    /// Create a controller with a custom naming collaborator.
    pub fn with_namer(
        config: Config,
        client: Arc<dyn ClusterManagerClient>,
        events: Arc<dyn EventSink>,
        namer: Box<dyn InstanceNamer>,
    ) -> AllocatorResult<Self> {
        // Fail on misconfiguration before any container is requested.
        let probe = InstanceName::sequential(&config.instance_name_prefix, 0)?;
        build_launch_command(config.container.memory_mb, &config.sizing, &probe, &config.launch)?;

        let state = AllocatorState {
            registry: Registry::new(),
            target: 0,
            in_use: HashSet::new(),
            shortfall: 0,
            next_request: RequestId::new(1),
            namer,
            retries: RetryTracker::new(config.instance_max_retries, config.instance_retry_window),
            unreleased: BTreeSet::new(),
            shutting_down: false,
        };

        Ok(Self {
            release_cache: ReleaseCache::new(config.release_cache_ttl),
            config,
            state: Mutex::new(state),
            reconcile_gate: tokio::sync::Mutex::new(()),
            client,
            events,
        })
    }

    // Critical sections leave the state consistent before returning, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configuration the controller was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The most recently applied target count.
    pub fn target_count(&self) -> u32 {
        self.lock().target
    }

    /// Containers requested or running.
    pub fn current_count(&self) -> u32 {
        self.lock().registry.current_count()
    }

    /// Containers running.
    pub fn running_count(&self) -> u32 {
        self.lock().registry.running_count()
    }

    /// Requests not yet granted.
    pub fn requested_count(&self) -> u32 {
        self.lock().registry.requested_count()
    }

    /// Running containers by instance name.
    pub fn snapshot(&self) -> BTreeMap<InstanceName, ContainerId> {
        self.lock().registry.snapshot()
    }

    /// Every tracked record.
    pub fn records(&self) -> Vec<ContainerRecord> {
        self.lock().registry.records()
    }

    /// The cache of self-released container ids.
    pub fn release_cache(&self) -> &ReleaseCache<ContainerId> {
        &self.release_cache
    }

    /// True once [`shutdown`](Self::shutdown) has started.
    pub fn is_shut_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// How far the pool is from its target.
    pub fn convergence(&self) -> ConvergenceStatus {
        let state = self.lock();
        ConvergenceStatus::evaluate(
            state.target,
            state.registry.running_count(),
            state.registry.requested_count(),
            state.registry.release_pending_count(),
            state.shortfall,
        )
    }

    /// Apply cluster-manager notifications until `shutdown` flips or the channel closes.
    ///
    /// Each notification is handled to completion before the next is read.
    pub async fn run_notifications(
        self: Arc<Self>,
        mut notifications: mpsc::UnboundedReceiver<ClusterNotification>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting notification loop");

        loop {
            tokio::select! {
                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        info!("Notification channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_notification(notification).await {
                        error!(error = %e, "Failed to handle cluster notification");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Notification loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatch one notification to its handler.
    pub async fn handle_notification(&self, notification: ClusterNotification) -> AllocatorResult<()> {
        match notification {
            ClusterNotification::Allocated(containers) => self.on_containers_allocated(containers).await,
            ClusterNotification::Completed(statuses) => self.on_containers_completed(statuses).await,
            ClusterNotification::LaunchFailed { id, reason } => self.on_launch_failed(id, reason).await,
        }
    }

    /// Release every container and stop acting on further notifications.
    ///
    /// Outstanding requests are withdrawn and running containers released,
    /// along with unbound grants whose earlier release failed. Every
    /// submission is attempted; the first failure is returned.
    pub async fn shutdown(&self) -> AllocatorResult<()> {
        let _gate = self.reconcile_gate.lock().await;

        let (cancels, releases) = {
            let mut state = self.lock();
            if state.shutting_down {
                return Ok(());
            }
            state.shutting_down = true;
            state.target = 0;

            let cancels: Vec<RequestId> = state
                .registry
                .outstanding_requests()
                .into_iter()
                .filter(|id| state.registry.begin_cancel(*id))
                .collect();

            let releases = state.registry.running_ids();
            for id in &releases {
                state.registry.mark_release_pending(id)?;
                self.release_cache.put(id.clone());
            }
            (cancels, releases)
        };

        info!(
            cancelled = cancels.len(),
            releasing = releases.len(),
            "Shutting down container controller"
        );
        self.events.publish(ContainerEvent::ShutdownRequested {
            containers: releases.clone(),
        });

        let mut first_error = None;
        for request_id in cancels {
            let result = self.client.cancel_request(request_id).await;
            // Grants for the request are released as surplus either way.
            self.lock().registry.finish_cancel(request_id);
            if let Err(e) = result {
                warn!(request_id = %request_id, error = %e, "Failed to cancel request during shutdown");
                first_error.get_or_insert(AllocatorError::client("cancel container request", e));
            }
        }
        for id in releases {
            if let Err(e) = self.client.release_container(&id).await {
                warn!(container_id = %id, error = %e, "Failed to release container during shutdown");
                first_error.get_or_insert(AllocatorError::client("release container", e));
            }
        }
        if let Err(e) = self.retry_releases().await {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
