//! Cluster capacity as seen by the scheduler.

use rack_cloud::Scheduler;
use serde::Serialize;
use tracing::debug;

use crate::error::DeployResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capacity {
    /// Active (non-draining) container instances.
    pub instances: u64,
    pub cluster_cpu: u64,
    pub cluster_memory: u64,
    /// Smallest registered size across active instances.
    pub instance_cpu: u64,
    pub instance_memory: u64,
    pub process_count: u64,
    pub process_cpu: u64,
    pub process_memory: u64,
    /// Widest service: the largest desired count of any one service.
    pub process_width: u64,
}

pub async fn capacity(scheduler: &dyn Scheduler, cluster: &str) -> DeployResult<Capacity> {
    let mut cap = Capacity::default();

    for instance in scheduler.list_container_instances(cluster).await? {
        if instance.status == "DRAINING" {
            continue;
        }
        cap.instances += 1;
        cap.cluster_cpu += instance.registered_cpu;
        cap.cluster_memory += instance.registered_memory;
        cap.instance_cpu = smallest(cap.instance_cpu, instance.registered_cpu);
        cap.instance_memory = smallest(cap.instance_memory, instance.registered_memory);
    }

    for service in scheduler.list_services(cluster).await? {
        let desired = u64::from(service.desired_count);
        let definition = scheduler.describe_task_definition(&service.task_definition).await?;
        for container in &definition.containers {
            cap.process_count += desired;
            cap.process_memory += desired * u64::from(container.memory);
            cap.process_cpu += desired * u64::from(container.cpu);
        }
        cap.process_width = cap.process_width.max(desired);
    }

    debug!(
        instances = cap.instances,
        instance_memory = cap.instance_memory,
        process_memory = cap.process_memory,
        process_width = cap.process_width,
        "capacity"
    );
    Ok(cap)
}

fn smallest(current: u64, candidate: u64) -> u64 {
    if current == 0 { candidate } else { current.min(candidate) }
}
