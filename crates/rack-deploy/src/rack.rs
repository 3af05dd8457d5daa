//! The `Rack` context every coordinator operation runs against.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rack_cloud::{Cloud, Stack, StackParameter, StackUpdate};
use rack_core::RackConfig;
use rack_state::{App, AppStatus, StateStore};
use rack_vault::EnvStore;
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::StackCache;
use crate::capacity::{Capacity, capacity};
use crate::cleanup::BuildCleanup;
use crate::error::{DeployError, DeployResult};

pub const CAPABILITY_IAM: &str = "CAPABILITY_IAM";

pub struct Rack {
    pub(crate) config: RackConfig,
    pub(crate) cloud: Cloud,
    pub(crate) store: StateStore,
    pub(crate) env: EnvStore,
    pub(crate) stacks: Arc<StackCache>,
    pub(crate) cleanup: Option<BuildCleanup>,
    pub(crate) promotion_poll: Duration,
}

impl Rack {
    pub fn new(config: RackConfig, cloud: Cloud, store: StateStore) -> Self {
        let env = EnvStore::new(cloud.objects.clone(), cloud.kms.clone());
        Self {
            config,
            cloud,
            store,
            env,
            stacks: Arc::new(StackCache::default()),
            cleanup: None,
            promotion_poll: Duration::from_secs(5),
        }
    }

    pub fn with_build_cleanup(mut self, cleanup: BuildCleanup) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    /// Lifetime of cached describe-stack results.
    pub fn with_stack_cache_ttl(mut self, ttl: Duration) -> Self {
        self.stacks = Arc::new(StackCache::new(ttl));
        self
    }

    /// How often a submitted promotion is checked for completion or
    /// cancellation.
    pub fn with_promotion_poll(mut self, poll: Duration) -> Self {
        self.promotion_poll = poll;
        self
    }

    pub fn config(&self) -> &RackConfig {
        &self.config
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn env_store(&self) -> &EnvStore {
        &self.env
    }

    // ── Stacks ─────────────────────────────────────────────────────

    pub async fn describe_stack(&self, name: &str) -> DeployResult<Stack> {
        if let Some(stack) = self.stacks.get(name) {
            return Ok(stack);
        }
        let stack = self.cloud.stacks.describe_stack(name).await?;
        self.stacks.put(stack.clone());
        Ok(stack)
    }

    /// Issue an update. `template` carries the uploaded template URL and
    /// the parameters it declares; without one the current template is
    /// reused and its current parameters are the universe.
    pub async fn update_stack(
        &self,
        name: &str,
        template: Option<(String, BTreeSet<String>)>,
        changes: &BTreeMap<String, String>,
    ) -> DeployResult<()> {
        self.stacks.invalidate(name);
        let current = self.describe_stack(name).await?;
        let update = stack_update(&current, template, changes);
        self.stacks.invalidate(name);

        let result = self.cloud.stacks.update_stack(&update).await;
        self.stacks.invalidate(name);
        result?;
        debug!(stack = %name, params = update.parameters.len(), "stack update submitted");
        Ok(())
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// An app as its stack currently describes it.
    pub async fn app(&self, name: &str) -> DeployResult<App> {
        let stack = match self.describe_stack(&self.config.app_stack(name)).await {
            Ok(stack) => stack,
            Err(DeployError::Cloud(e)) if e.is_not_found() => {
                return Err(DeployError::NotFound(format!("no such app: {name}")));
            }
            Err(e) => return Err(e),
        };
        let mut app = self.store.get_app(name)?.unwrap_or_else(|| App::new(name));
        app.status = AppStatus::from_stack_status(&stack.status);
        app.release = stack
            .parameters
            .get("Release")
            .filter(|r| !r.is_empty())
            .cloned()
            .or(app.release);
        app.parameters = stack.parameters;
        app.outputs = stack.outputs;
        app.tags.extend(stack.tags);
        Ok(app)
    }

    pub async fn capacity(&self) -> DeployResult<Capacity> {
        capacity(self.cloud.scheduler.as_ref(), &self.config.cluster).await
    }

    /// Publish a rack event. Delivery failures are logged, never returned.
    pub(crate) async fn notify(&self, action: &str, data: BTreeMap<&str, String>) {
        if self.config.notification_topic.is_empty() {
            return;
        }
        let message = json!({
            "action": action,
            "status": "success",
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();
        if let Err(e) = self
            .cloud
            .notifications
            .publish(&self.config.notification_topic, action, &message)
            .await
        {
            warn!(%action, error = %e, "notification failed");
        }
    }
}

/// Build an update: declared parameters that change get a value, the rest
/// that the stack already has keep their previous value. Sorted by key.
pub fn stack_update(
    current: &Stack,
    template: Option<(String, BTreeSet<String>)>,
    changes: &BTreeMap<String, String>,
) -> StackUpdate {
    let (template_url, declared) = match template {
        Some((url, declared)) => (Some(url), declared),
        None => (None, current.parameters.keys().cloned().collect()),
    };

    let parameters = declared
        .into_iter()
        .filter_map(|key| match changes.get(&key) {
            Some(value) if current.parameters.get(&key) != Some(value) => {
                Some(StackParameter::Value {
                    key,
                    value: value.clone(),
                })
            }
            _ if current.parameters.contains_key(&key) => Some(StackParameter::UsePrevious { key }),
            _ => None,
        })
        .collect();

    StackUpdate {
        stack: current.name.clone(),
        template_url,
        parameters,
        capabilities: vec![CAPABILITY_IAM.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn update_values_and_previous() {
        let mut stack = Stack::new("convox-app", "UPDATE_COMPLETE");
        stack.parameters = changes(&[("A", "1"), ("B", "2"), ("Old", "x")]);

        let declared: BTreeSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let update = stack_update(
            &stack,
            Some(("https://t".into(), declared)),
            &changes(&[("A", "9"), ("B", "2"), ("C", "3"), ("D", "4")]),
        );
        assert_eq!(update.template_url.as_deref(), Some("https://t"));
        assert_eq!(
            update.parameters,
            vec![
                StackParameter::Value { key: "A".into(), value: "9".into() },
                StackParameter::UsePrevious { key: "B".into() },
                StackParameter::Value { key: "C".into(), value: "3".into() },
            ]
        );
        assert_eq!(update.capabilities, vec![CAPABILITY_IAM]);
    }

    #[test]
    fn parameter_only_update_reuses_template() {
        let mut stack = Stack::new("convox", "UPDATE_COMPLETE");
        stack.parameters = changes(&[("InstanceCount", "3"), ("Version", "1")]);
        let update = stack_update(&stack, None, &changes(&[("InstanceCount", "6")]));
        assert_eq!(update.template_url, None);
        assert_eq!(update.parameters.len(), 2);
        assert_eq!(update.parameters[1].key(), "Version");
    }
}
