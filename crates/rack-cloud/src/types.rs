//! Request and response shapes for the cloud collaborators.
//!
//! These are deliberately narrower than any provider SDK: each carries only
//! the fields the control plane reads or writes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Stack engine ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub status: String,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl Stack {
    pub fn new(name: &str, status: &str) -> Self {
        Self {
            name: name.to_string(),
            status: status.to_string(),
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn is_updating(&self) -> bool {
        self.status.ends_with("_IN_PROGRESS")
    }
}

/// One parameter of an `UpdateStack` call: either a new value or an
/// instruction to keep whatever the stack currently has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackParameter {
    Value { key: String, value: String },
    UsePrevious { key: String },
}

impl StackParameter {
    pub fn key(&self) -> &str {
        match self {
            StackParameter::Value { key, .. } | StackParameter::UsePrevious { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackUpdate {
    pub stack: String,
    /// Object-storage URL of the template, when not reusing the current one.
    pub template_url: Option<String>,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
}

// ── Auto-scaling groups ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    InService,
    Pending,
    Terminating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgInstance {
    pub id: String,
    pub lifecycle: LifecycleState,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    pub name: String,
    pub desired_capacity: u32,
    pub instances: Vec<AsgInstance>,
}

// ── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInstance {
    pub arn: String,
    /// Compute instance id backing this scheduler node.
    pub instance_id: String,
    pub status: String,
    pub agent_connected: bool,
    pub registered_cpu: u64,
    pub registered_memory: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoadBalancerBinding {
    pub load_balancer: String,
    pub container: String,
    pub port: u16,
}

impl LoadBalancerBinding {
    /// `lb:container:port`, the identity the scheduler refuses to mutate.
    pub fn triple(&self) -> String {
        format!("{}:{}:{}", self.load_balancer, self.container, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfiguration {
    pub minimum_percent: u32,
    pub maximum_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsService {
    pub arn: String,
    pub name: String,
    pub cluster: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub running_count: u32,
    pub role: Option<String>,
    pub load_balancers: Vec<LoadBalancerBinding>,
    pub deployment: Option<DeploymentConfiguration>,
    pub events: Vec<ServiceEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateService {
    pub cluster: String,
    pub name: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub role: Option<String>,
    pub load_balancers: Vec<LoadBalancerBinding>,
    pub deployment: Option<DeploymentConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateService {
    pub cluster: String,
    pub service: String,
    pub desired_count: Option<u32>,
    pub task_definition: Option<String>,
    pub deployment: Option<DeploymentConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    pub source_volume: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub hostname: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfiguration {
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub cpu: u32,
    pub memory: u32,
    pub privileged: bool,
    /// Ordered; later entries with the same name win when applied.
    pub environment: Vec<(String, String)>,
    pub links: Vec<String>,
    pub port_mappings: Vec<PortMapping>,
    pub mount_points: Vec<MountPoint>,
    pub extra_hosts: Vec<HostEntry>,
    pub log_configuration: Option<LogConfiguration>,
}

impl ContainerDefinition {
    /// The effective environment after later entries override earlier ones.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.environment.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVolume {
    pub name: String,
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    pub task_role: Option<String>,
    pub containers: Vec<ContainerDefinition>,
    pub volumes: Vec<HostVolume>,
}

// ── Key management ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataKey {
    pub plaintext: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

// ── Queues and logs ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    pub visibility_timeout_secs: u64,
    pub wait_secs: u64,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout_secs: 20,
            wait_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

// ── Misc primitives ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub registry_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionSpec {
    pub name: String,
    pub handler: String,
    pub role: String,
    pub runtime: String,
    pub timeout_secs: u32,
    /// Object-storage location of the code bundle: `(bucket, key)`.
    pub code: (String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTarget {
    pub id: String,
    pub arn: String,
    pub input: Option<String>,
    /// Task definition to launch when the target is a cluster.
    pub task_definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub group_id: String,
    pub protocol: String,
    pub from_port: u16,
    pub to_port: u16,
    pub cidr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_updating_statuses() {
        assert!(Stack::new("a", "UPDATE_IN_PROGRESS").is_updating());
        assert!(Stack::new("a", "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS").is_updating());
        assert!(!Stack::new("a", "UPDATE_COMPLETE").is_updating());
    }

    #[test]
    fn container_env_later_wins() {
        let c = ContainerDefinition {
            environment: vec![
                ("A".into(), "1".into()),
                ("B".into(), "2".into()),
                ("A".into(), "3".into()),
            ],
            ..Default::default()
        };
        let env = c.env_map();
        assert_eq!(env["A"], "3");
        assert_eq!(env["B"], "2");
    }

    #[test]
    fn binding_triple() {
        let b = LoadBalancerBinding {
            load_balancer: "mylb".into(),
            container: "web".into(),
            port: 80,
        };
        assert_eq!(b.triple(), "mylb:web:80");
    }
}
