//! Capacity-driven autoscaler.

use std::sync::Arc;
use std::time::Duration;

use rack_deploy::{Capacity, Rack};
use tokio::sync::watch;
use tracing::{debug, error, info};

pub const AUTOSCALE_INTERVAL: Duration = Duration::from_secs(60);

/// Fewest instances a rack runs with.
const MIN_INSTANCES: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// The rack was resized to this many instances.
    ScaleTo(u32),
    NoChange,
    /// Autoscaling is off or the rack is not in a state to be resized.
    Skipped,
}

/// Instances the current workload needs.
pub fn needed_instances(capacity: &Capacity) -> u32 {
    let by_memory = match capacity.instance_memory {
        0 => 1,
        size => capacity.process_memory.div_ceil(size) + 1,
    };
    let needed = by_memory
        .max(MIN_INSTANCES)
        .max(capacity.process_width + 1);
    u32::try_from(needed).unwrap_or(u32::MAX)
}

pub struct Autoscaler {
    rack: Arc<Rack>,
}

impl Autoscaler {
    pub fn new(rack: Arc<Rack>) -> Self {
        Self { rack }
    }

    /// One pass: resize the rack when the workload needs a different count.
    pub async fn reconcile(&self) -> anyhow::Result<ScaleDecision> {
        if !self.rack.config().autoscale {
            return Ok(ScaleDecision::Skipped);
        }
        let system = self.rack.system_get().await?;
        if system.status != "running" {
            debug!(status = %system.status, "autoscale skipped");
            return Ok(ScaleDecision::Skipped);
        }

        let capacity = self.rack.capacity().await?;
        let needed = needed_instances(&capacity);
        debug!(
            process_memory = capacity.process_memory,
            instance_memory = capacity.instance_memory,
            process_width = capacity.process_width,
            current = system.count,
            needed,
            "autoscale"
        );
        if needed == system.count {
            return Ok(ScaleDecision::NoChange);
        }

        self.rack.system_save(needed).await?;
        info!(from = system.count, to = needed, "rack autoscaled");
        Ok(ScaleDecision::ScaleTo(needed))
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "autoscale failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
