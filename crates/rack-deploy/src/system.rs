//! The rack's own stack: status, size and resizing.

use std::collections::BTreeMap;

use rack_cloud::LifecycleState;
use serde::Serialize;
use tracing::info;

use crate::error::{DeployError, DeployResult};
use crate::rack::Rack;

/// Stack output naming the on-demand instance group.
pub const INSTANCES_OUTPUT: &str = "Instances";
/// Stack output naming the spot instance group.
pub const SPOT_INSTANCES_OUTPUT: &str = "SpotInstances";
/// Smallest rack that can still replace an instance under load.
pub const MIN_INSTANCE_COUNT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct System {
    pub name: String,
    pub status: String,
    pub count: u32,
    pub version: String,
    pub instance_type: String,
    pub region: String,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

/// Stack-engine status as shown to users.
pub fn human_status(status: &str) -> &'static str {
    match status {
        "" => "new",
        "CREATE_IN_PROGRESS" => "creating",
        "CREATE_COMPLETE" | "DELETE_FAILED" | "UPDATE_COMPLETE" | "UPDATE_ROLLBACK_COMPLETE" => {
            "running"
        }
        "DELETE_IN_PROGRESS" => "deleting",
        "ROLLBACK_IN_PROGRESS"
        | "UPDATE_ROLLBACK_IN_PROGRESS"
        | "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => "rollback",
        "ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_FAILED" => "failed",
        "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => "updating",
        _ => "unknown",
    }
}

impl Rack {
    /// The rack as its stack describes it. A running rack whose instance
    /// group still has instances outside `InService` reports `converging`.
    pub async fn system_get(&self) -> DeployResult<System> {
        let name = self.config.rack.clone();
        let stack = match self.describe_stack(&name).await {
            Ok(stack) => stack,
            Err(DeployError::Cloud(e)) if e.is_not_found() => {
                return Err(DeployError::NotFound(format!("{name} not found")));
            }
            Err(e) => return Err(e),
        };

        let raw = stack.parameters.get("InstanceCount").map(String::as_str).unwrap_or("");
        let count = raw
            .parse()
            .map_err(|_| DeployError::Validation(format!("invalid InstanceCount: {raw:?}")))?;

        let mut status = human_status(&stack.status);
        if status == "running"
            && let Some(group) = stack.outputs.get(INSTANCES_OUTPUT)
        {
            let group = self.cloud.autoscaling.describe_group(group).await?;
            if group.instances.iter().any(|i| i.lifecycle != LifecycleState::InService) {
                status = "converging";
            }
        }

        Ok(System {
            status: status.to_string(),
            count,
            version: stack.parameters.get("Version").cloned().unwrap_or_default(),
            instance_type: stack.parameters.get("InstanceType").cloned().unwrap_or_default(),
            region: self.config.region.clone(),
            name,
            parameters: stack.parameters,
            outputs: stack.outputs,
        })
    }

    /// Resize the rack. The rack keeps at least two instances and one more
    /// than its widest service.
    pub async fn system_save(&self, count: u32) -> DeployResult<()> {
        if count < MIN_INSTANCE_COUNT {
            return Err(DeployError::Validation(format!(
                "count must be at least {MIN_INSTANCE_COUNT}"
            )));
        }
        let width = self.capacity().await?.process_width;
        if u64::from(count) < width + 1 {
            return Err(DeployError::Validation(format!(
                "count must be greater than the widest service ({width})"
            )));
        }
        let changes = BTreeMap::from([("InstanceCount".to_string(), count.to_string())]);
        self.update_stack(&self.config.rack, None, &changes).await?;
        info!(rack = %self.config.rack, count, "rack resized");
        self.notify("rack:update", BTreeMap::from([("count", count.to_string())]))
            .await;
        Ok(())
    }
}
