//! Async traits for each cloud API the control plane talks to.
//!
//! Every trait is object-safe and `Send + Sync` so a [`Cloud`] bundle of
//! `Arc<dyn _>` handles can be cloned into background workers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::types::*;

/// Declarative stack engine (templates in, infrastructure out).
#[async_trait]
pub trait StackEngine: Send + Sync {
    async fn describe_stack(&self, name: &str) -> CloudResult<Stack>;
    async fn update_stack(&self, update: &StackUpdate) -> CloudResult<()>;
    async fn cancel_update_stack(&self, name: &str) -> CloudResult<()>;
}

/// Container scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn create_cluster(&self, name: &str) -> CloudResult<String>;
    async fn delete_cluster(&self, cluster: &str) -> CloudResult<()>;

    async fn create_service(&self, req: &CreateService) -> CloudResult<EcsService>;
    async fn update_service(&self, req: &UpdateService) -> CloudResult<EcsService>;
    async fn describe_service(&self, cluster: &str, service: &str) -> CloudResult<EcsService>;
    async fn list_services(&self, cluster: &str) -> CloudResult<Vec<EcsService>>;
    async fn delete_service(&self, cluster: &str, service: &str) -> CloudResult<()>;

    async fn list_tasks(&self, cluster: &str, service: &str) -> CloudResult<Vec<String>>;
    async fn stop_task(&self, cluster: &str, task: &str) -> CloudResult<()>;

    async fn register_task_definition(&self, def: &TaskDefinition) -> CloudResult<String>;
    async fn describe_task_definition(&self, arn: &str) -> CloudResult<TaskDefinition>;

    /// Container instances registered to the cluster, fully described.
    async fn list_container_instances(&self, cluster: &str) -> CloudResult<Vec<ContainerInstance>>;
}

/// Managed instance pools.
#[async_trait]
pub trait AutoScaling: Send + Sync {
    async fn describe_group(&self, name: &str) -> CloudResult<AutoScalingGroup>;
    async fn set_instance_health(
        &self,
        instance_id: &str,
        healthy: bool,
        respect_grace_period: bool,
    ) -> CloudResult<()>;
    async fn set_desired_capacity(&self, group: &str, capacity: u32) -> CloudResult<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> CloudResult<()>;
    async fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>>;
    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;
    async fn list_objects(&self, bucket: &str, prefix: &str) -> CloudResult<Vec<String>>;
}

#[async_trait]
pub trait KeyManagement: Send + Sync {
    /// A fresh data key under `key_arn`: plaintext plus its wrapped form.
    async fn generate_data_key(&self, key_arn: &str, bytes: usize) -> CloudResult<DataKey>;
    /// Unwrap a data key previously returned by `generate_data_key`.
    async fn decrypt(&self, ciphertext: &[u8]) -> CloudResult<Vec<u8>>;
    async fn generate_random(&self, bytes: usize) -> CloudResult<Vec<u8>>;

    async fn create_key(&self, description: &str) -> CloudResult<String>;
    async fn enable_key_rotation(&self, key_arn: &str) -> CloudResult<()>;
    async fn schedule_key_deletion(&self, key_arn: &str, pending_days: u32) -> CloudResult<()>;
}

/// At-least-once message queue with visibility timeouts.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn receive(&self, queue: &str, opts: ReceiveOptions) -> CloudResult<Vec<QueueMessage>>;
    async fn delete_message(&self, queue: &str, receipt: &str) -> CloudResult<()>;
    async fn send_message(&self, queue: &str, body: &str) -> CloudResult<String>;
}

#[async_trait]
pub trait Logs: Send + Sync {
    async fn create_log_stream(&self, group: &str, stream: &str) -> CloudResult<()>;
    /// Append events; returns the token the next call must present.
    async fn put_log_events(
        &self,
        group: &str,
        stream: &str,
        events: &[LogEvent],
        sequence_token: Option<&str>,
    ) -> CloudResult<Option<String>>;
}

/// Compute networking; only what availability-zone discovery needs.
#[async_trait]
pub trait Compute: Send + Sync {
    async fn create_subnet(&self, vpc: &str, availability_zone: &str, cidr: &str)
    -> CloudResult<String>;
}

/// Container image registry.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn create_repository(&self, name: &str) -> CloudResult<Repository>;
    async fn list_images(&self, repository: &str) -> CloudResult<Vec<String>>;
    async fn delete_images(&self, repository: &str, digests: &[String]) -> CloudResult<()>;
    async fn delete_repository(&self, repository: &str) -> CloudResult<()>;
}

/// Serverless functions.
#[async_trait]
pub trait Functions: Send + Sync {
    async fn create_function(&self, spec: &FunctionSpec) -> CloudResult<String>;
    async fn update_function_code(&self, name: &str, code: &(String, String)) -> CloudResult<()>;
    async fn delete_function(&self, name: &str) -> CloudResult<()>;
}

/// Pub/sub topics.
#[async_trait]
pub trait Notifications: Send + Sync {
    async fn subscribe(&self, topic: &str, protocol: &str, endpoint: &str) -> CloudResult<String>;
    async fn unsubscribe(&self, subscription: &str) -> CloudResult<()>;
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> CloudResult<()>;
}

/// Scheduled event rules.
#[async_trait]
pub trait EventRules: Send + Sync {
    async fn put_rule(&self, name: &str, schedule: &str) -> CloudResult<String>;
    async fn put_targets(&self, rule: &str, targets: &[RuleTarget]) -> CloudResult<()>;
    async fn list_target_ids(&self, rule: &str) -> CloudResult<Vec<String>>;
    async fn remove_targets(&self, rule: &str, ids: &[String]) -> CloudResult<()>;
    async fn delete_rule(&self, name: &str) -> CloudResult<()>;
}

/// Security-group ingress rules.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn authorize_ingress(&self, rule: &IngressRule) -> CloudResult<()>;
    async fn revoke_ingress(&self, rule: &IngressRule) -> CloudResult<()>;
}

/// Handles to every collaborator, cloned into each component.
#[derive(Clone)]
pub struct Cloud {
    pub stacks: Arc<dyn StackEngine>,
    pub scheduler: Arc<dyn Scheduler>,
    pub autoscaling: Arc<dyn AutoScaling>,
    pub objects: Arc<dyn ObjectStore>,
    pub kms: Arc<dyn KeyManagement>,
    pub queue: Arc<dyn Queue>,
    pub logs: Arc<dyn Logs>,
    pub compute: Arc<dyn Compute>,
    pub registry: Arc<dyn Registry>,
    pub functions: Arc<dyn Functions>,
    pub notifications: Arc<dyn Notifications>,
    pub rules: Arc<dyn EventRules>,
    pub firewall: Arc<dyn Firewall>,
}

impl Cloud {
    /// Every collaborator backed by the same in-memory fake. The fake is
    /// returned alongside so callers can seed and inspect it.
    pub fn memory() -> (Self, Arc<crate::memory::MemoryCloud>) {
        let fake = Arc::new(crate::memory::MemoryCloud::new());
        let cloud = Cloud {
            stacks: fake.clone(),
            scheduler: fake.clone(),
            autoscaling: fake.clone(),
            objects: fake.clone(),
            kms: fake.clone(),
            queue: fake.clone(),
            logs: fake.clone(),
            compute: fake.clone(),
            registry: fake.clone(),
            functions: fake.clone(),
            notifications: fake.clone(),
            rules: fake.clone(),
            firewall: fake.clone(),
        };
        (cloud, fake)
    }
}

/// Public URL of an object, in the virtual-hosted form the stack engine
/// and task definitions consume.
pub fn object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

/// Inverse of [`object_url`]: `(bucket, key)`.
pub fn parse_object_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("https://")?;
    let (host, key) = rest.split_once('/')?;
    let (bucket, _) = host.split_once(".s3")?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket.to_string(), key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_round_trip() {
        let url = object_url("settings-x", "us-east-1", "releases/RABC/env");
        assert_eq!(url, "https://settings-x.s3.us-east-1.amazonaws.com/releases/RABC/env");
        assert_eq!(
            parse_object_url(&url),
            Some(("settings-x".to_string(), "releases/RABC/env".to_string()))
        );
    }

    #[test]
    fn parse_object_url_rejects_garbage() {
        assert!(parse_object_url("http://x.s3.a.com/k").is_none());
        assert!(parse_object_url("https://nobucket.example.com/k").is_none());
        assert!(parse_object_url("https://b.s3.region.amazonaws.com/").is_none());
    }
}
