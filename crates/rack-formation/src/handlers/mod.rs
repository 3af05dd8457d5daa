//! One handler per custom resource kind.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rack_cloud::{Cloud, CloudResult};
use rack_vault::Crypt;

use crate::error::FormationResult;
use crate::request::{Outcome, Request};

pub mod bucket;
pub mod certificate;
pub mod cluster;
pub mod function;
pub mod ingress;
pub mod key;
pub mod math;
pub mod repository;
pub mod rule;
pub mod service;
pub mod subscription;
pub mod task_definition;
pub mod zones;

/// Retry schedule for deleting a service whose deployments are still
/// draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 12,
            delay: Duration::from_secs(10),
        }
    }
}

/// Shared collaborators every handler runs against.
#[derive(Clone)]
pub struct HandlerContext {
    pub cloud: Cloud,
    pub crypt: Crypt,
    pub delete_retry: RetryPolicy,
}

impl HandlerContext {
    pub fn new(cloud: Cloud) -> Self {
        let crypt = Crypt::new(cloud.kms.clone());
        Self {
            cloud,
            crypt,
            delete_retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome>;
    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome>;
    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome>;
}

/// Every supported resource kind, keyed by its `ResourceType`.
pub fn registry() -> BTreeMap<String, Arc<dyn ResourceHandler>> {
    let mut handlers: BTreeMap<String, Arc<dyn ResourceHandler>> = BTreeMap::new();
    let mut add = |kind: &str, handler: Arc<dyn ResourceHandler>| {
        handlers.insert(kind.to_string(), handler);
    };
    add("Custom::EC2AvailabilityZones", Arc::new(zones::AvailabilityZones));
    add("Custom::ECRRepository", Arc::new(repository::EcrRepository));
    add("Custom::ECSCluster", Arc::new(cluster::EcsCluster));
    add("Custom::ECSService", Arc::new(service::EcsService));
    add("Custom::ECSTaskDefinition", Arc::new(task_definition::EcsTaskDefinition));
    add("Custom::KMSKey", Arc::new(key::KmsKey));
    add("Custom::LambdaFunction", Arc::new(function::LambdaFunction));
    add("Custom::S3BucketCleanup", Arc::new(bucket::BucketCleanup));
    add("Custom::SNSSubscription", Arc::new(subscription::SnsSubscription));
    add("Custom::CloudWatchEventsRule", Arc::new(rule::EventsRule));
    add("Custom::SGIngress", Arc::new(ingress::SgIngress));
    add("Custom::MathMax", Arc::new(math::Math::Max));
    add("Custom::MathMin", Arc::new(math::Math::Min));
    add("Custom::SelfSignedCertificate", Arc::new(certificate::SelfSignedCertificate));
    handlers
}

/// Treat a missing target as already gone.
pub(crate) fn ignore_not_found(result: CloudResult<()>) -> CloudResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use rack_cloud::{Cloud, MemoryCloud};
    use serde_json::Value;

    use super::*;

    pub fn context() -> (HandlerContext, Arc<MemoryCloud>) {
        let (cloud, memory) = Cloud::memory();
        let mut ctx = HandlerContext::new(cloud);
        ctx.delete_retry.delay = Duration::ZERO;
        (ctx, memory)
    }

    pub fn request(kind: &str, request_type: &str, physical: Option<&str>, props: Value) -> Request {
        Request {
            request_type: request_type.to_string(),
            resource_type: kind.to_string(),
            request_id: "req-1".to_string(),
            stack_id: "arn:aws:cloudformation:us-east-1:123456789012:stack/convox-myapp/uuid".to_string(),
            logical_resource_id: "Thing".to_string(),
            physical_resource_id: physical.map(String::from),
            response_url: "http://127.0.0.1:1/".to_string(),
            resource_properties: props,
            old_resource_properties: None,
        }
    }
}
