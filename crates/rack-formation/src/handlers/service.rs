//! Scheduler services.
//!
//! The scheduler will not change which balancer, container and port a
//! service is bound to. An update that needs a different binding creates a
//! new service and hands its ARN back as the new physical id; the engine
//! then deletes the old one.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rack_cloud::{
    CreateService, DeploymentConfiguration, EcsService as LiveService, LoadBalancerBinding,
    UpdateService,
};
use rack_core::{IdKind, generate_id};
use tracing::{debug, info, warn};

use super::{HandlerContext, ResourceHandler, ignore_not_found};
use crate::error::{FormationError, FormationResult};
use crate::properties::{ServiceProperties, decode};
use crate::request::{Outcome, Request};

pub struct EcsService;

/// Parse `lb||container||port`, falling back to `lb:container:port`.
pub fn parse_binding(spec: &str) -> FormationResult<LoadBalancerBinding> {
    let invalid = || FormationError::Properties(format!("invalid load balancer specification: {spec}"));
    let parts: Vec<&str> = if spec.contains("||") {
        spec.splitn(3, "||").collect()
    } else {
        spec.splitn(3, ':').collect()
    };
    let [lb, container, port] = parts.as_slice() else {
        return Err(invalid());
    };
    Ok(LoadBalancerBinding {
        load_balancer: lb.to_string(),
        container: container.to_string(),
        port: port.parse().map_err(|_| invalid())?,
    })
}

/// Whether moving `live` to the incoming role and bindings needs a new
/// service.
pub fn needs_replacement(
    live: &LiveService,
    role: Option<&str>,
    incoming: &[LoadBalancerBinding],
) -> bool {
    if live.role.as_deref() != role {
        return true;
    }
    let existing: BTreeSet<String> = live.load_balancers.iter().map(|b| b.triple()).collect();
    let incoming: BTreeSet<String> = incoming.iter().map(|b| b.triple()).collect();
    if existing.is_empty() && incoming.is_empty() {
        return false;
    }
    !incoming.iter().any(|t| existing.contains(t))
}

/// Service name from an ARN `arn:...:service/<name>`.
pub fn service_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

struct Desired {
    props: ServiceProperties,
    bindings: Vec<LoadBalancerBinding>,
    role: Option<String>,
    deployment: Option<DeploymentConfiguration>,
}

impl Desired {
    fn from_request(req: &Request) -> FormationResult<Self> {
        let props: ServiceProperties = decode(&req.resource_properties)?;
        // The scheduler accepts a single balancer per service.
        let bindings = props
            .load_balancers
            .iter()
            .take(1)
            .map(|s| parse_binding(s))
            .collect::<FormationResult<Vec<_>>>()?;
        let role = if bindings.is_empty() {
            None
        } else {
            props.role.clone().filter(|r| !r.is_empty())
        };
        let deployment = match (props.deployment_minimum_percent, props.deployment_maximum_percent) {
            (None, None) => None,
            (min, max) => Some(DeploymentConfiguration {
                minimum_percent: min.unwrap_or(50),
                maximum_percent: max.unwrap_or(200),
            }),
        };
        Ok(Self {
            props,
            bindings,
            role,
            deployment,
        })
    }

    async fn create(&self, ctx: &HandlerContext) -> FormationResult<Outcome> {
        let name = format!("{}-{}", self.props.name, generate_id(IdKind::Service));
        let service = ctx
            .cloud
            .scheduler
            .create_service(&CreateService {
                cluster: self.props.cluster.clone(),
                name,
                task_definition: self.props.task_definition.clone(),
                desired_count: self.props.desired_count,
                role: self.role.clone(),
                load_balancers: self.bindings.clone(),
                deployment: self.deployment,
            })
            .await?;
        info!(service = %service.name, balancers = self.bindings.len(), "service created");
        Ok(Outcome::new(service.arn))
    }
}

#[async_trait]
impl ResourceHandler for EcsService {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Desired::from_request(req)?.create(ctx).await
    }

    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let desired = Desired::from_request(req)?;
        let name = service_name(req.physical_id());
        let live = ctx
            .cloud
            .scheduler
            .describe_service(&desired.props.cluster, name)
            .await?;

        if needs_replacement(&live, desired.role.as_deref(), &desired.bindings) {
            info!(service = %name, "balancer binding changed, replacing service");
            return desired.create(ctx).await;
        }

        let service = ctx
            .cloud
            .scheduler
            .update_service(&UpdateService {
                cluster: desired.props.cluster.clone(),
                service: name.to_string(),
                desired_count: Some(desired.props.desired_count),
                task_definition: Some(desired.props.task_definition.clone()),
                deployment: desired.deployment,
            })
            .await?;
        debug!(service = %name, count = desired.props.desired_count, "service updated in place");
        Ok(Outcome::new(service.arn))
    }

    /// Scale to zero, stop what is still running, then delete, retrying
    /// while the scheduler reports deployments in flight.
    async fn delete(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let done = Outcome::new(req.physical_id());
        let cluster = req
            .resource_properties
            .get("Cluster")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        let name = service_name(req.physical_id()).to_string();
        let scheduler = &ctx.cloud.scheduler;

        let drained = scheduler
            .update_service(&UpdateService {
                cluster: cluster.clone(),
                service: name.clone(),
                desired_count: Some(0),
                ..Default::default()
            })
            .await;
        match drained {
            Err(e) if e.is_not_found() => return Ok(done),
            Err(e) => warn!(service = %name, error = %e, "could not scale service to zero"),
            Ok(_) => {}
        }

        match scheduler.list_tasks(&cluster, &name).await {
            Ok(tasks) => {
                for task in tasks {
                    if let Err(e) = ignore_not_found(scheduler.stop_task(&cluster, &task).await) {
                        warn!(%task, error = %e, "could not stop task");
                    }
                }
            }
            Err(e) if e.is_not_found() => return Ok(done),
            Err(e) => warn!(service = %name, error = %e, "could not list tasks"),
        }

        let policy = ctx.delete_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match scheduler.delete_service(&cluster, &name).await {
                Ok(()) => {
                    info!(service = %name, attempt, "service deleted");
                    return Ok(done);
                }
                Err(e) if e.is_not_found() => return Ok(done),
                Err(e) if e.is_in_progress() && attempt < policy.attempts => {
                    debug!(service = %name, attempt, "service still deploying, retrying delete");
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
