//! Keeps the spot and on-demand groups adding up to the rack size, with
//! spot absorbing everything above the on-demand floor.

use std::sync::Arc;
use std::time::Duration;

use rack_cloud::{AutoScalingGroup, LifecycleState};
use rack_deploy::{INSTANCES_OUTPUT, Rack, SPOT_INSTANCES_OUTPUT};
use tokio::sync::watch;
use tracing::{debug, error, info};

pub const SPOT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotPlan {
    pub spot_desired: u32,
    pub on_demand_desired: u32,
}

/// Desired group sizes for a rack of `instance_count` instances with
/// `spot_healthy` spot instances currently serving.
pub fn spot_plan(instance_count: u32, on_demand_min: u32, spot_healthy: u32) -> SpotPlan {
    SpotPlan {
        spot_desired: instance_count.saturating_sub(on_demand_min),
        on_demand_desired: instance_count.saturating_sub(spot_healthy),
    }
}

fn healthy_in_service(group: &AutoScalingGroup) -> u32 {
    let n = group
        .instances
        .iter()
        .filter(|i| i.lifecycle == LifecycleState::InService && i.healthy)
        .count();
    u32::try_from(n).unwrap_or(u32::MAX)
}

pub struct SpotReplacer {
    rack: Arc<Rack>,
}

impl SpotReplacer {
    pub fn new(rack: Arc<Rack>) -> Self {
        Self { rack }
    }

    /// One pass. Returns the plan when one was evaluated.
    pub async fn reconcile(&self) -> anyhow::Result<Option<SpotPlan>> {
        let config = self.rack.config();
        if !config.spot_instances {
            return Ok(None);
        }
        let system = self.rack.system_get().await?;
        if !matches!(system.status.as_str(), "running" | "converging") {
            debug!(status = %system.status, "spot replace skipped");
            return Ok(None);
        }

        let group_name = |output: &str| {
            system
                .outputs
                .get(output)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("rack stack has no {output} output"))
        };
        let on_demand_name = group_name(INSTANCES_OUTPUT)?;
        let spot_name = group_name(SPOT_INSTANCES_OUTPUT)?;

        let autoscaling = &self.rack.cloud().autoscaling;
        let on_demand = autoscaling.describe_group(&on_demand_name).await?;
        let spot = autoscaling.describe_group(&spot_name).await?;
        let spot_healthy = healthy_in_service(&spot);

        let plan = spot_plan(system.count, config.on_demand_min_count, spot_healthy);
        debug!(
            instance_count = system.count,
            on_demand_min = config.on_demand_min_count,
            on_demand_count = healthy_in_service(&on_demand),
            spot_count = spot_healthy,
            "spot replace"
        );

        if spot.desired_capacity != plan.spot_desired {
            autoscaling.set_desired_capacity(&spot_name, plan.spot_desired).await?;
            info!(group = %spot_name, desired = plan.spot_desired, "spot capacity set");
        }
        if on_demand.desired_capacity != plan.on_demand_desired {
            autoscaling
                .set_desired_capacity(&on_demand_name, plan.on_demand_desired)
                .await?;
            info!(group = %on_demand_name, desired = plan.on_demand_desired, "on-demand capacity set");
        }
        Ok(Some(plan))
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "spot replacer started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "spot replace failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("spot replacer shutting down");
                    break;
                }
            }
        }
    }
}
