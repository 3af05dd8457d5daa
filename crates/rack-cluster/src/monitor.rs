//! Cluster monitor.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use rack_cloud::LifecycleState;
use rack_deploy::{INSTANCES_OUTPUT, Rack, SPOT_INSTANCES_OUTPUT};
use tokio::sync::watch;
use tracing::{error, info, warn};

pub const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// What one tick saw and did. Id lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub count: usize,
    /// Agent connected in the scheduler.
    pub connected: Vec<String>,
    /// In service in an instance group.
    pub healthy: Vec<String>,
    /// Marked unhealthy this tick.
    pub marked: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Seen {
    in_service: bool,
    connected: bool,
}

pub struct ClusterMonitor {
    rack: Arc<Rack>,
    /// Instances already marked and not yet replaced.
    marked: BTreeSet<String>,
}

impl ClusterMonitor {
    pub fn new(rack: Arc<Rack>) -> Self {
        Self {
            rack,
            marked: BTreeSet::new(),
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&mut self) -> anyhow::Result<MonitorReport> {
        let config = self.rack.config();
        let stack = self.rack.describe_stack(&config.rack).await?;
        let cloud = self.rack.cloud();

        let mut seen: BTreeMap<String, Seen> = BTreeMap::new();
        for output in [INSTANCES_OUTPUT, SPOT_INSTANCES_OUTPUT] {
            let Some(name) = stack.outputs.get(output).filter(|n| !n.is_empty()) else {
                continue;
            };
            let group = cloud.autoscaling.describe_group(name).await?;
            for instance in group.instances {
                seen.entry(instance.id).or_default().in_service =
                    instance.lifecycle == LifecycleState::InService;
            }
        }

        for instance in cloud.scheduler.list_container_instances(&config.cluster).await? {
            seen.entry(instance.instance_id).or_default().connected = instance.agent_connected;
        }

        self.marked
            .retain(|id| seen.get(id).is_some_and(|s| s.in_service && !s.connected));

        let mut report = MonitorReport {
            count: seen.len(),
            ..MonitorReport::default()
        };
        for (id, s) in &seen {
            if s.connected {
                report.connected.push(id.clone());
            }
            if s.in_service {
                report.healthy.push(id.clone());
            }
            if s.in_service && !s.connected && !self.marked.contains(id) {
                match cloud.autoscaling.set_instance_health(id, false, true).await {
                    Ok(()) => {
                        warn!(instance = %id, "marked instance unhealthy: scheduler agent disconnected");
                        self.marked.insert(id.clone());
                        report.marked.push(id.clone());
                    }
                    Err(e) => error!(instance = %id, error = %e, "could not mark instance unhealthy"),
                }
            }
        }

        info!(
            count = report.count,
            connected = %report.connected.join(","),
            healthy = %report.healthy.join(","),
            marked = %report.marked.join(","),
            "cluster monitor"
        );
        Ok(report)
    }

    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "cluster monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "cluster monitor tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("cluster monitor shutting down");
                    break;
                }
            }
        }
    }
}
