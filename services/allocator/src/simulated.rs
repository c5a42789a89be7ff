//! In-process cluster manager.
//!
//! [`SimulatedClusterManager`] implements [`ClusterManagerClient`] without a
//! real resource manager. Requests are granted after a delay, releases are
//! acknowledged with a completion and containers can be killed on demand.
//! Outcomes are delivered on the notification channel returned by
//! [`SimulatedClusterManager::new`], in the order container ids are assigned.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};
use yarnscale_id::{ContainerId, RequestId};

use crate::client::{
    ClusterManagerClient, ClusterNotification, Container, ContainerRequest, ContainerStatus, EXIT_ABORTED,
};
use crate::command::LaunchCommand;

/// Behaviour of the simulated cluster manager.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Delay between a request and its grant.
    pub grant_delay: Duration,

    /// Delay between a release and its completion.
    pub release_delay: Duration,

    /// Whether grants carry the request id they satisfy.
    pub echo_request_ids: bool,

    /// Cluster timestamp embedded in container ids.
    pub cluster_timestamp: u64,

    /// Node reported for every container.
    pub node: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grant_delay: Duration::from_millis(10),
            release_delay: Duration::from_millis(10),
            echo_request_ids: true,
            cluster_timestamp: 1_700_000_000_000,
            node: "sim-node-1:8042".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    /// Sequence of the last assigned container.
    last_container: u64,

    /// Requests submitted and neither granted nor cancelled.
    pending: HashSet<RequestId>,

    /// Granted containers not yet completed.
    live: BTreeSet<ContainerId>,

    /// Launch commands in submission order.
    launched: Vec<(ContainerId, LaunchCommand)>,
}

/// Cluster manager running inside the process.
pub struct SimulatedClusterManager {
    config: SimulationConfig,
    state: Arc<Mutex<SimState>>,
    notifications: mpsc::UnboundedSender<ClusterNotification>,
    fail_submissions: AtomicBool,
    fail_launches: AtomicBool,
    requests: AtomicU64,
    releases: AtomicU64,
}

impl SimulatedClusterManager {
    /// Create a simulated cluster manager and the channel its notifications arrive on.
    pub fn new(config: SimulationConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<ClusterNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            config,
            state: Arc::new(Mutex::new(SimState::default())),
            notifications: tx,
            fail_submissions: AtomicBool::new(false),
            fail_launches: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        });
        (manager, rx)
    }

    /// Make every submission fail until reset.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Make every launch report a launch failure until reset.
    pub fn set_fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    /// Terminate a live container with `exit_status`.
    ///
    /// Returns false if the container is not live.
    pub fn kill(&self, id: &ContainerId, exit_status: i32, diagnostics: impl Into<String>) -> bool {
        let mut state = lock(&self.state);
        if !state.live.remove(id) {
            return false;
        }

        info!(container_id = %id, exit_status, "[SIM] Killing container");
        send(
            &self.notifications,
            ClusterNotification::Completed(vec![ContainerStatus {
                id: id.clone(),
                exit_status,
                diagnostics: diagnostics.into(),
            }]),
        );
        true
    }

    /// Containers granted and not yet completed, ascending.
    pub fn live_containers(&self) -> Vec<ContainerId> {
        lock(&self.state).live.iter().cloned().collect()
    }

    /// Requests neither granted nor cancelled.
    pub fn pending_requests(&self) -> usize {
        lock(&self.state).pending.len()
    }

    /// Launch commands received, in order.
    pub fn launched(&self) -> Vec<(ContainerId, LaunchCommand)> {
        lock(&self.state).launched.clone()
    }

    /// Number of accepted container requests.
    pub fn requests_submitted(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of accepted releases.
    pub fn releases_submitted(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    fn check_submissions(&self) -> Result<()> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            anyhow::bail!("simulated cluster manager is unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterManagerClient for SimulatedClusterManager {
    async fn request_container(&self, request: &ContainerRequest) -> Result<()> {
        self.check_submissions()?;
        lock(&self.state).pending.insert(request.request_id);
        self.requests.fetch_add(1, Ordering::SeqCst);

        debug!(request_id = %request.request_id, "[SIM] Container requested");

        let state = Arc::clone(&self.state);
        let tx = self.notifications.clone();
        let config = self.config.clone();
        let request = request.clone();
        tokio::spawn(async move {
            tokio::time::sleep(config.grant_delay).await;

            let mut state = lock(&state);
            if !state.pending.remove(&request.request_id) {
                debug!(request_id = %request.request_id, "[SIM] Request cancelled before grant");
                return;
            }

            state.last_container += 1;
            let raw = format!(
                "container_{}_0001_01_{:06}",
                config.cluster_timestamp, state.last_container
            );
            let Ok(id) = ContainerId::parse(&raw) else {
                return;
            };
            state.live.insert(id.clone());

            info!(container_id = %id, request_id = %request.request_id, "[SIM] Granting container");
            send(
                &tx,
                ClusterNotification::Allocated(vec![Container {
                    id,
                    request_id: config.echo_request_ids.then_some(request.request_id),
                    resource: request.resource,
                    node: config.node.clone(),
                }]),
            );
        });

        Ok(())
    }

    async fn cancel_request(&self, request_id: RequestId) -> Result<()> {
        self.check_submissions()?;
        if lock(&self.state).pending.remove(&request_id) {
            debug!(request_id = %request_id, "[SIM] Request cancelled");
        }
        Ok(())
    }

    async fn release_container(&self, id: &ContainerId) -> Result<()> {
        self.check_submissions()?;
        self.releases.fetch_add(1, Ordering::SeqCst);

        let state = Arc::clone(&self.state);
        let tx = self.notifications.clone();
        let delay = self.config.release_delay;
        let id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut state = lock(&state);
            if !state.live.remove(&id) {
                return;
            }

            debug!(container_id = %id, "[SIM] Container released");
            send(
                &tx,
                ClusterNotification::Completed(vec![ContainerStatus {
                    id,
                    exit_status: EXIT_ABORTED,
                    diagnostics: "Container released by application".to_string(),
                }]),
            );
        });

        Ok(())
    }

    async fn launch_container(&self, container: &Container, command: &LaunchCommand) -> Result<()> {
        self.check_submissions()?;

        debug!(
            container_id = %container.id,
            command = %command.command_line(),
            "[SIM] Launching container"
        );
        lock(&self.state)
            .launched
            .push((container.id.clone(), command.clone()));

        if self.fail_launches.load(Ordering::SeqCst) {
            let mut state = lock(&self.state);
            if state.live.remove(&container.id) {
                send(
                    &self.notifications,
                    ClusterNotification::LaunchFailed {
                        id: container.id.clone(),
                        reason: "simulated launch failure".to_string(),
                    },
                );
            }
        }

        Ok(())
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn send(tx: &mpsc::UnboundedSender<ClusterNotification>, notification: ClusterNotification) {
    if tx.send(notification).is_err() {
        debug!("[SIM] Notification receiver dropped");
    }
}
