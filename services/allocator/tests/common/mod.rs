//! Shared harness for controller integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use yarnscale_allocator::simulated::{SimulatedClusterManager, SimulationConfig};
use yarnscale_allocator::{Config, Controller};
use yarnscale_events::{ContainerEvent, EventSink};
use yarnscale_id::InstanceName;

/// Sink that keeps every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ContainerEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ContainerEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ContainerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub controller: Arc<Controller>,
    pub cluster: Arc<SimulatedClusterManager>,
    pub events: Arc<RecordingSink>,
    shutdown_tx: watch::Sender<bool>,
    notifications: JoinHandle<()>,
}

impl Harness {
    pub fn start(config: Config) -> Self {
        Self::start_with(config, fast_simulation())
    }

    pub fn start_with(config: Config, simulation: SimulationConfig) -> Self {
        let (cluster, rx) = SimulatedClusterManager::new(simulation);
        let events = Arc::new(RecordingSink::default());
        let controller = Arc::new(
            Controller::new(config, cluster.clone(), events.clone()).unwrap(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let notifications = tokio::spawn(Arc::clone(&controller).run_notifications(rx, shutdown_rx));

        Self {
            controller,
            cluster,
            events,
            shutdown_tx,
            notifications,
        }
    }

    /// Wait until the pool is steady: nothing requested or pending release
    /// and `running` containers live.
    pub async fn wait_for_running(&self, running: u32) {
        let controller = Arc::clone(&self.controller);
        let cluster = Arc::clone(&self.cluster);
        wait_for(&format!("{running} running containers"), move || {
            controller.running_count() == running
                && controller.current_count() == running
                && controller.records().len() == running as usize
                && cluster.live_containers().len() == running as usize
        })
        .await;
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.notifications.await;
    }
}

pub fn test_config() -> Config {
    Config {
        app_name: "testApp".to_string(),
        instance_name_prefix: "TaskRunner".to_string(),
        ..Config::default()
    }
}

pub fn fast_simulation() -> SimulationConfig {
    SimulationConfig {
        grant_delay: Duration::from_millis(5),
        release_delay: Duration::from_millis(5),
        ..SimulationConfig::default()
    }
}

pub fn names(prefix: &str, range: std::ops::RangeInclusive<u64>) -> HashSet<InstanceName> {
    range
        .map(|n| InstanceName::sequential(prefix, n).unwrap())
        .collect()
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(description: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
