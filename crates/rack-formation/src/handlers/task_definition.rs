//! Task definitions.
//!
//! Create and update both register a new revision. Delete leaves the
//! definition registered: deregistering and immediately re-registering the
//! same family fails intermittently, and stale revisions are harmless.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use rack_cloud::{
    ContainerDefinition, HostEntry, HostVolume, LogConfiguration, MountPoint, PortMapping,
    TaskDefinition, parse_object_url,
};
use rack_vault::parse_env;
use regex::Regex;
use tracing::debug;

use super::{HandlerContext, ResourceHandler};
use crate::error::{FormationError, FormationResult};
use crate::properties::{CommandProperty, TaskDefinitionProperties, TaskProperties, decode};
use crate::request::{Outcome, Request};

pub struct EcsTaskDefinition;

static PORT_MAPPING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d+)(?:/(udp|tcp))?$").expect("valid"));

pub fn parse_port_mapping(spec: &str) -> FormationResult<PortMapping> {
    let invalid = || FormationError::Properties(format!("invalid port mapping: {spec}"));
    let caps = PORT_MAPPING_RE.captures(spec).ok_or_else(invalid)?;
    Ok(PortMapping {
        host: caps[1].parse().map_err(|_| invalid())?,
        container: caps[2].parse().map_err(|_| invalid())?,
        protocol: caps.get(3).map_or("tcp", |m| m.as_str()).to_string(),
    })
}

fn command(cmd: &Option<CommandProperty>) -> Vec<String> {
    match cmd {
        None => Vec::new(),
        Some(CommandProperty::Shell(s)) if s.trim().is_empty() => Vec::new(),
        Some(CommandProperty::Shell(s)) => vec!["sh".to_string(), "-c".to_string(), s.clone()],
        Some(CommandProperty::Exec(args)) => args.clone(),
    }
}

/// Environment contributed by the release: either the decrypted env file or,
/// in secure mode, pointers the container uses to fetch it itself.
async fn release_env(
    ctx: &HandlerContext,
    props: &TaskDefinitionProperties,
) -> FormationResult<BTreeMap<String, String>> {
    let Some(url) = props.environment.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(BTreeMap::new());
    };
    let key = props.key.as_deref().filter(|k| !k.is_empty());

    if props.secure_environment {
        let mut env = BTreeMap::new();
        env.insert("SECURE_ENVIRONMENT_URL".to_string(), url.to_string());
        env.insert("SECURE_ENVIRONMENT_TYPE".to_string(), "envfile".to_string());
        env.insert("SECURE_ENVIRONMENT_KEY".to_string(), key.unwrap_or_default().to_string());
        return Ok(env);
    }

    let (bucket, object) = parse_object_url(url)
        .ok_or_else(|| FormationError::Properties(format!("invalid environment url: {url}")))?;
    let body = ctx.cloud.objects.get_object(&bucket, &object).await?;
    let plaintext = match key {
        Some(key) => ctx.crypt.decrypt(key, &body).await?,
        None => body,
    };
    Ok(parse_env(&String::from_utf8_lossy(&plaintext))?)
}

fn container(
    task: &TaskProperties,
    index: usize,
    env: BTreeMap<String, String>,
    volumes: &mut Vec<HostVolume>,
) -> FormationResult<ContainerDefinition> {
    let port_mappings = task
        .port_mappings
        .iter()
        .map(|p| parse_port_mapping(p))
        .collect::<FormationResult<Vec<_>>>()?;

    let mut mount_points = Vec::new();
    for (j, spec) in task.volumes.iter().enumerate() {
        let Some((host, path)) = spec.split_once(':') else {
            return Err(FormationError::Properties(format!("invalid volume: {spec}")));
        };
        let name = format!("{}-{index}-{j}", task.name);
        volumes.push(HostVolume {
            name: name.clone(),
            source_path: host.to_string(),
        });
        mount_points.push(MountPoint {
            source_volume: name,
            container_path: path.to_string(),
            read_only: false,
        });
    }

    Ok(ContainerDefinition {
        name: task.name.clone(),
        image: task.image.clone(),
        command: command(&task.command),
        cpu: task.cpu.unwrap_or(0),
        memory: task.memory,
        privileged: task.privileged,
        environment: env.into_iter().collect(),
        links: task.links.clone(),
        port_mappings,
        mount_points,
        extra_hosts: task
            .extra_hosts
            .iter()
            .map(|h| HostEntry {
                hostname: h.host_name.clone(),
                ip_address: h.ip_address.clone(),
            })
            .collect(),
        log_configuration: task.log_configuration.as_ref().map(|l| LogConfiguration {
            driver: l.log_driver.clone(),
            options: l.options.clone(),
        }),
    })
}

impl EcsTaskDefinition {
    async fn register(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        let props: TaskDefinitionProperties = decode(&req.resource_properties)?;
        let from_release = release_env(ctx, &props).await?;

        let mut volumes = Vec::new();
        let mut containers = Vec::with_capacity(props.tasks.len());
        for (i, task) in props.tasks.iter().enumerate() {
            let mut env = task.environment.clone();
            env.extend(from_release.clone());
            if let Some(release) = props.release.as_deref().filter(|r| !r.is_empty()) {
                env.insert("RELEASE".to_string(), release.to_string());
            }
            containers.push(container(task, i, env, &mut volumes)?);
        }

        let arn = ctx
            .cloud
            .scheduler
            .register_task_definition(&TaskDefinition {
                family: props.name.clone(),
                task_role: props.task_role.clone().filter(|r| !r.is_empty()),
                containers,
                volumes,
            })
            .await?;
        debug!(family = %props.name, %arn, "task definition registered");
        Ok(Outcome::new(arn))
    }
}

#[async_trait]
impl ResourceHandler for EcsTaskDefinition {
    async fn create(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.register(ctx, req).await
    }

    async fn update(&self, ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        self.register(ctx, req).await
    }

    async fn delete(&self, _ctx: &HandlerContext, req: &Request) -> FormationResult<Outcome> {
        Ok(Outcome::new(req.physical_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, request};
    use rack_cloud::{KeyManagement, ObjectStore, object_url};
    use serde_json::json;

    #[test]
    fn port_mappings() {
        let p = parse_port_mapping("10001:3000").unwrap();
        assert_eq!((p.host, p.container, p.protocol.as_str()), (10001, 3000, "tcp"));
        assert_eq!(parse_port_mapping("53:53/udp").unwrap().protocol, "udp");
        assert!(parse_port_mapping("3000").is_err());
        assert!(parse_port_mapping("a:b").is_err());
    }

    fn task(extra: serde_json::Value) -> serde_json::Value {
        let mut t = json!({
            "Name": "web",
            "Image": "registry/app-web:B1",
            "Memory": "256",
            "Command": "bin/web",
            "Environment": {"FOO": "task", "ONLY_TASK": "1"},
            "PortMappings": ["10001:3000"],
            "Volumes": ["/volumes/app/data:/data", "/var/run/docker.sock:/var/run/docker.sock"],
            "Links": ["db:db"],
        });
        if let (Some(t), Some(extra)) = (t.as_object_mut(), extra.as_object()) {
            t.extend(extra.clone());
        }
        t
    }

    #[tokio::test]
    async fn registers_with_decrypted_env() {
        let (ctx, cloud) = context();
        let key = cloud.create_key("app").await.unwrap();
        let sealed = ctx.crypt.encrypt(&key, b"FOO=release\nSECRET=shh").await.unwrap();
        cloud.put_object("settings", "releases/R1/env", sealed).await.unwrap();

        let req = request(
            "Custom::ECSTaskDefinition",
            "Create",
            None,
            json!({
                "Name": "convox-app-web",
                "Environment": object_url("settings", "us-east-1", "releases/R1/env"),
                "Key": key,
                "Release": "R1",
                "Tasks": [task(json!({}))],
            }),
        );
        let arn = EcsTaskDefinition.create(&ctx, &req).await.unwrap().physical_id;

        let def = cloud.state().task_definitions[&arn].clone();
        assert_eq!(def.family, "convox-app-web");
        let c = &def.containers[0];
        assert_eq!(c.command, vec!["sh", "-c", "bin/web"]);
        assert_eq!(c.cpu, 0);
        let env = c.env_map();
        assert_eq!(env["FOO"], "release");
        assert_eq!(env["SECRET"], "shh");
        assert_eq!(env["ONLY_TASK"], "1");
        assert_eq!(env["RELEASE"], "R1");
        assert_eq!(c.port_mappings[0].host, 10001);
        assert_eq!(def.volumes[0].name, "web-0-0");
        assert_eq!(def.volumes[1].name, "web-0-1");
        assert_eq!(c.mount_points[1].container_path, "/var/run/docker.sock");
    }

    #[tokio::test]
    async fn secure_environment_passes_pointers() {
        let (ctx, cloud) = context();
        let url = object_url("settings", "us-east-1", "releases/R2/env");
        let req = request(
            "Custom::ECSTaskDefinition",
            "Update",
            Some("old"),
            json!({
                "Name": "fam",
                "Environment": url,
                "Key": "arn:aws:kms:key/1",
                "SecureEnvironment": "true",
                "Tasks": [task(json!({"Command": ["bin/web", "--port", "3000"]}))],
            }),
        );
        let arn = EcsTaskDefinition.update(&ctx, &req).await.unwrap().physical_id;
        let def = cloud.state().task_definitions[&arn].clone();
        let env = def.containers[0].env_map();
        assert_eq!(env["SECURE_ENVIRONMENT_URL"], url);
        assert_eq!(env["SECURE_ENVIRONMENT_TYPE"], "envfile");
        assert_eq!(env["SECURE_ENVIRONMENT_KEY"], "arn:aws:kms:key/1");
        assert!(!env.contains_key("RELEASE"));
        assert_eq!(def.containers[0].command, vec!["bin/web", "--port", "3000"]);
    }

    #[tokio::test]
    async fn delete_leaves_definition_registered() {
        let (ctx, cloud) = context();
        let req = request(
            "Custom::ECSTaskDefinition",
            "Create",
            None,
            json!({"Name": "fam", "Tasks": [task(json!({}))]}),
        );
        let arn = EcsTaskDefinition.create(&ctx, &req).await.unwrap().physical_id;
        let del = request("Custom::ECSTaskDefinition", "Delete", Some(&arn), json!({}));
        EcsTaskDefinition.delete(&ctx, &del).await.unwrap();
        EcsTaskDefinition.delete(&ctx, &del).await.unwrap();
        assert!(cloud.state().task_definitions.contains_key(&arn));
    }
}
