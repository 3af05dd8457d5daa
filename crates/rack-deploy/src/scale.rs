//! Per-process scaling.

use std::collections::BTreeMap;

use rack_manifest::{ManifestError, load};
use rack_state::AppStatus;
use rack_template::params;
use tracing::info;

use crate::capacity::Capacity;
use crate::error::{DeployError, DeployResult};
use crate::rack::Rack;

/// Requested changes; `None` leaves a value as it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleOptions {
    pub count: Option<u32>,
    pub cpu: Option<u32>,
    pub memory: Option<u32>,
}

/// Check a request against cluster capacity. Processes behind a balancer
/// bind a fixed host port, and a rolling replacement needs one instance
/// free, so they run at most one copy fewer than there are instances.
pub fn check_scale(
    process: &str,
    balanced: bool,
    opts: &ScaleOptions,
    capacity: &Capacity,
) -> DeployResult<()> {
    if let Some(memory) = opts.memory {
        if memory < 1 {
            return Err(DeployError::Validation(format!(
                "requested memory {memory} must be greater than zero"
            )));
        }
        if u64::from(memory) > capacity.instance_memory {
            return Err(DeployError::Validation(format!(
                "requested memory {memory} greater than instance size {}",
                capacity.instance_memory
            )));
        }
    }
    if let Some(cpu) = opts.cpu
        && u64::from(cpu) > capacity.instance_cpu
    {
        return Err(DeployError::Validation(format!(
            "requested cpu {cpu} greater than instance size {}",
            capacity.instance_cpu
        )));
    }
    if let Some(count) = opts.count
        && balanced
        && u64::from(count) + 1 > capacity.instances
    {
        return Err(DeployError::Validation(format!(
            "requested count {count} for {process} must be less than the {} available instances",
            capacity.instances
        )));
    }
    Ok(())
}

impl Rack {
    /// Change a process's count, cpu or memory with a parameter-only stack
    /// update.
    pub async fn scale(&self, app: &str, process: &str, opts: ScaleOptions) -> DeployResult<()> {
        let a = self.app(app).await?;
        if a.status != AppStatus::Running {
            return Err(DeployError::Conflict(format!(
                "app {app} is already updating ({})",
                a.status.as_str()
            )));
        }
        let release_id = a
            .release
            .clone()
            .ok_or_else(|| DeployError::Validation(format!("app {app} has no release")))?;
        let release = self
            .store
            .get_release(app, &release_id)?
            .ok_or_else(|| DeployError::NotFound(format!("no such release: {release_id}")))?;
        let env = self.env.get(&a, &release_id).await?;
        let manifest = load(&release.manifest, &env)?;
        let service = manifest.service(process).map_err(|e| match e {
            ManifestError::NoSuchService(_) => {
                DeployError::NotFound(format!("no such process: {process}"))
            }
            other => other.into(),
        })?;

        let capacity = self.capacity().await?;
        check_scale(process, !service.external_ports().is_empty(), &opts, &capacity)?;

        let mut changes = BTreeMap::new();
        if let Some(count) = opts.count {
            changes.insert(params::desired_count(&service.name), count.to_string());
        }
        if let Some(cpu) = opts.cpu {
            changes.insert(params::cpu(&service.name), cpu.to_string());
        }
        if let Some(memory) = opts.memory {
            changes.insert(params::memory(&service.name), memory.to_string());
        }
        if changes.is_empty() {
            return Ok(());
        }

        let stack = self.config.app_stack(app);
        match self.update_stack(&stack, None, &changes).await {
            Err(DeployError::Cloud(e)) if e.is_in_progress() || e.code() == "Conflict" => {
                return Err(DeployError::Conflict(format!("app {app} is already updating")));
            }
            other => other?,
        }
        info!(%app, %process, count = ?opts.count, cpu = ?opts.cpu, memory = ?opts.memory, "process scaled");
        self.notify(
            "release:scale",
            BTreeMap::from([("app", app.to_string()), ("id", release_id)]),
        )
        .await;
        Ok(())
    }
}
