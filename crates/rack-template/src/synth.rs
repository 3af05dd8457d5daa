//! Template synthesis.
//!
//! The output is a pure function of its inputs: every map is a sorted
//! `serde_json::Map` and nothing reads the clock or a random source, so the
//! same `(manifest, release, app, rack)` renders byte-identical JSON.

use std::collections::BTreeSet;

use rack_core::{RackConfig, upper_name};
use rack_manifest::{Balancer, LoadBalancerName, Manifest, Port, Protocol, Service};
use rack_state::{App, Release};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};
use crate::params;

pub const TEMPLATE_VERSION: &str = "2010-09-09";
const DEFAULT_DEPLOYMENT_MINIMUM: &str = "50";
const DEFAULT_DEPLOYMENT_MAXIMUM: &str = "200";

/// Everything a template is derived from.
#[derive(Debug, Clone, Copy)]
pub struct TemplateInput<'a> {
    pub manifest: &'a Manifest,
    pub release: &'a Release,
    pub app: &'a App,
    pub rack: &'a RackConfig,
}

/// The service attached to the app's main balancer: the one recorded in the
/// app's `PrimaryProcess` output, else `web`, else the first service with
/// external ports.
pub fn primary_service<'m>(manifest: &'m Manifest, app: &App) -> Option<&'m str> {
    let external = |s: &&Service| !s.external_ports().is_empty();

    if let Some(explicit) = app.outputs.get("PrimaryProcess") {
        if let Some(s) = manifest.services().iter().filter(external).find(|s| &s.name == explicit) {
            return Some(&s.name);
        }
    }
    if let Some(web) = manifest.services().iter().filter(external).find(|s| s.name == "web") {
        return Some(&web.name);
    }
    manifest
        .services()
        .iter()
        .find(external)
        .map(|s| s.name.as_str())
}

pub fn synthesise(input: &TemplateInput<'_>) -> TemplateResult<String> {
    let doc = Synth::new(input).document()?;
    let out =
        serde_json::to_string_pretty(&doc).map_err(|e| TemplateError::Invalid(e.to_string()))?;
    debug!(app = %input.app.name, release = %input.release.id, bytes = out.len(), "template synthesised");
    Ok(out)
}

fn r(name: &str) -> Value {
    json!({ "Ref": name })
}

fn join(sep: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [sep, parts] })
}

fn string_param(default: impl Into<String>) -> Value {
    json!({ "Type": "String", "Default": default.into() })
}

fn number_param(default: u32) -> Value {
    json!({ "Type": "Number", "Default": default.to_string() })
}

struct Synth<'a> {
    input: &'a TemplateInput<'a>,
    stack: String,
    bound: bool,
    primary: Option<&'a str>,
    parameters: Map<String, Value>,
    conditions: Map<String, Value>,
    resources: Map<String, Value>,
    outputs: Map<String, Value>,
}

impl<'a> Synth<'a> {
    fn new(input: &'a TemplateInput<'a>) -> Self {
        let bound = input.app.is_bound();
        Self {
            input,
            stack: input.rack.app_stack(&input.app.name),
            bound,
            primary: primary_service(input.manifest, input.app),
            parameters: Map::new(),
            conditions: Map::new(),
            resources: Map::new(),
            outputs: Map::new(),
        }
    }

    fn document(mut self) -> TemplateResult<Value> {
        self.common();
        let manifest = self.input.manifest;
        for service in manifest.services() {
            self.service(service)?;
        }
        for balancer in manifest.balancers() {
            self.balancer(balancer)?;
        }
        for (name, timer) in &manifest.timers {
            self.timer(name, &timer.schedule, &timer.command, &timer.service)?;
        }
        if let Some(primary) = self.primary {
            self.outputs
                .insert("PrimaryProcess".into(), json!({ "Value": primary }));
        }

        Ok(json!({
            "AWSTemplateFormatVersion": TEMPLATE_VERSION,
            "Conditions": self.conditions,
            "Parameters": self.parameters,
            "Resources": self.resources,
            "Outputs": self.outputs,
        }))
    }

    fn service_token(&self) -> Value {
        Value::String(self.input.rack.custom_topic.clone())
    }

    // ── Rack-wide parameters and resources ─────────────────────────

    fn common(&mut self) {
        let rack = self.input.rack;
        let p = &mut self.parameters;
        p.insert("Cluster".into(), string_param(&rack.cluster));
        p.insert("Environment".into(), string_param(""));
        p.insert("Key".into(), string_param(""));
        p.insert("Release".into(), string_param(&self.input.release.id));
        p.insert("Version".into(), string_param(&rack.version));
        p.insert(
            "Subnets".into(),
            json!({ "Type": "CommaDelimitedList", "Default": rack.subnets.join(",") }),
        );
        p.insert("VPC".into(), string_param(&rack.vpc));

        self.conditions
            .insert("BlankKey".into(), json!({ "Fn::Equals": [r("Key"), ""] }));

        self.resources.insert(
            "LogGroup".into(),
            json!({ "Type": "AWS::Logs::LogGroup", "Properties": { "RetentionInDays": 7 } }),
        );
        self.resources.insert(
            "Settings".into(),
            json!({
                "Type": "AWS::S3::Bucket",
                "DeletionPolicy": "Retain",
                "Properties": { "AccessControl": "Private", "Tags": [{ "Key": "system", "Value": "convox" }] },
            }),
        );
        self.resources.insert(
            "SettingsCleanup".into(),
            json!({
                "Type": "Custom::S3BucketCleanup",
                "Properties": { "ServiceToken": self.service_token(), "Bucket": r("Settings") },
            }),
        );

        if !self.input.manifest.balancers().is_empty() {
            self.resources.insert(
                "ServiceRole".into(),
                json!({
                    "Type": "AWS::IAM::Role",
                    "Properties": {
                        "AssumeRolePolicyDocument": {
                            "Statement": [{
                                "Effect": "Allow",
                                "Principal": { "Service": ["ecs.amazonaws.com"] },
                                "Action": ["sts:AssumeRole"],
                            }],
                            "Version": "2012-10-17",
                        },
                        "ManagedPolicyArns": ["arn:aws:iam::aws:policy/service-role/AmazonEC2ContainerServiceRole"],
                        "Path": "/convox/",
                    },
                }),
            );
        }

        self.outputs
            .insert("LogGroup".into(), json!({ "Value": r("LogGroup") }));
        self.outputs
            .insert("Settings".into(), json!({ "Value": r("Settings") }));
    }

    // ── Services ───────────────────────────────────────────────────

    fn image(&self, service: &Service) -> TemplateResult<String> {
        let input = self.input;
        match (&input.release.build, &service.image) {
            (Some(build), _) => Ok(service.registry_image(
                &input.app.name,
                build,
                &input.app.outputs,
                &input.rack.region,
                &input.rack.registry_host,
            )),
            (None, Some(image)) => Ok(image.clone()),
            (None, None) => Err(TemplateError::NoImage(service.name.clone())),
        }
    }

    /// Host-side volume path: the docker socket passes through, anything
    /// else lives under `/volumes/<app>/`.
    fn volume(&self, spec: &str) -> String {
        let (from, to) = spec.split_once(':').unwrap_or((spec, spec));
        let host = if from == "/var/run/docker.sock" {
            from.to_string()
        } else {
            format!("/volumes/{}/{}", self.input.app.name, from.trim_start_matches('/'))
        };
        format!("{host}:{to}")
    }

    fn port_mapping(&self, service: &Service, port: Port) -> Value {
        let suffix = match port.protocol {
            Protocol::Udp => "/udp",
            Protocol::Tcp => "",
        };
        if port.protocol == Protocol::Tcp {
            join(
                "",
                vec![
                    r(&params::port_host(&service.name, port.container)),
                    Value::String(format!(":{}{suffix}", port.container)),
                ],
            )
        } else {
            Value::String(format!("{0}:{0}{suffix}", port.container))
        }
    }

    fn service(&mut self, service: &Service) -> TemplateResult<()> {
        let name = &service.name;
        let upper = upper_name(name);

        self.parameters.insert(
            params::desired_count(name),
            number_param(service.scale.count.min),
        );
        self.parameters
            .insert(params::memory(name), number_param(service.scale.memory));
        self.parameters
            .insert(params::cpu(name), number_param(service.scale.cpu));

        let mut seen = BTreeSet::new();
        for port in service.ports.iter().filter(|p| p.protocol == Protocol::Tcp) {
            if !seen.insert(port.container) {
                return Err(TemplateError::Validation(format!(
                    "service {name} maps container port {} more than once",
                    port.container
                )));
            }
            self.parameters.insert(
                params::port_host(name, port.container),
                string_param(
                    params::default_host_port(&self.input.app.name, name, port.container).to_string(),
                ),
            );
            if port.is_external() {
                let cert = params::port_certificate(name, port.container);
                self.parameters.insert(
                    params::port_balancer(name, port.container),
                    string_param(port.balancer.to_string()),
                );
                self.parameters.insert(cert.clone(), string_param(""));
                self.conditions
                    .insert(format!("Blank{cert}"), json!({ "Fn::Equals": [r(&cert), ""] }));
                self.outputs.insert(
                    params::port_balancer(name, port.container),
                    json!({ "Value": r(&params::port_balancer(name, port.container)) }),
                );
            }
        }

        let command = match &service.command {
            rack_manifest::Command::None => Value::String(String::new()),
            rack_manifest::Command::Shell(s) => Value::String(s.clone()),
            rack_manifest::Command::Exec(args) => json!(args),
        };
        let environment: Map<String, Value> = service
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let port_mappings: Vec<Value> = service
            .ports
            .iter()
            .map(|p| self.port_mapping(service, *p))
            .collect();
        let volumes: Vec<Value> = service
            .volumes
            .iter()
            .map(|v| Value::String(self.volume(v)))
            .collect();

        let task = json!({
            "Name": name,
            "Image": self.image(service)?,
            "Command": command,
            "Cpu": r(&params::cpu(name)),
            "Memory": r(&params::memory(name)),
            "Environment": environment,
            "Links": service.links,
            "PortMappings": port_mappings,
            "Privileged": service.privileged.to_string(),
            "Volumes": volumes,
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": r("LogGroup"),
                    "awslogs-region": self.input.rack.region,
                    "awslogs-stream-prefix": "convox",
                },
            },
        });

        self.resources.insert(
            format!("{upper}ECSTaskDefinition"),
            json!({
                "Type": "Custom::ECSTaskDefinition",
                "Properties": {
                    "ServiceToken": self.service_token(),
                    "Name": format!("{}-{name}", self.stack),
                    "Release": r("Release"),
                    "Environment": r("Environment"),
                    "Key": r("Key"),
                    "Tasks": [task],
                },
            }),
        );

        let mut properties = json!({
            "ServiceToken": self.service_token(),
            "Cluster": r("Cluster"),
            "DesiredCount": r(&params::desired_count(name)),
            "Name": format!("{}-Service{upper}", self.stack),
            "TaskDefinition": r(&format!("{upper}ECSTaskDefinition")),
            "DeploymentMinimumPercent": service
                .label("convox.deployment.minimum")
                .unwrap_or(DEFAULT_DEPLOYMENT_MINIMUM),
            "DeploymentMaximumPercent": service
                .label("convox.deployment.maximum")
                .unwrap_or(DEFAULT_DEPLOYMENT_MAXIMUM),
            "LoadBalancers": [],
        });

        if service.has_balancer() {
            let balancer = Balancer::new(service);
            let primary = self.primary == Some(name.as_str());
            let resource = balancer.resource_name(primary, self.bound);
            let bindings: Vec<Value> = balancer
                .port_mappings()
                .iter()
                .map(|p| {
                    join(
                        "||",
                        vec![r(&resource), Value::String(name.clone()), Value::String(p.container.to_string())],
                    )
                })
                .take(1)
                .collect();
            properties["LoadBalancers"] = json!(bindings);
            properties["Role"] = r("ServiceRole");
        }

        self.resources.insert(
            format!("{upper}ECSService"),
            json!({
                "Type": "Custom::ECSService",
                "DependsOn": [format!("{upper}ECSTaskDefinition")],
                "Properties": properties,
            }),
        );
        Ok(())
    }

    // ── Balancers ──────────────────────────────────────────────────

    fn balancer_name(&self, name: LoadBalancerName) -> Value {
        match name {
            LoadBalancerName::Literal(s) => Value::String(s),
            LoadBalancerName::StackName => r("AWS::StackName"),
            LoadBalancerName::StackJoin { process, internal } => {
                let mut parts = vec![r("AWS::StackName"), Value::String(process)];
                if internal {
                    parts.push(Value::String("i".to_string()));
                }
                join("-", parts)
            }
        }
    }

    fn balancer(&mut self, balancer: Balancer<'_>) -> TemplateResult<()> {
        let service = balancer.service;
        let name = &service.name;
        let primary = self.primary == Some(name.as_str());
        let resource = balancer.resource_name(primary, self.bound);
        let lb_name = self.balancer_name(balancer.load_balancer_name(
            primary,
            self.bound,
            &self.input.rack.rack,
            &self.input.app.name,
        ));

        let mut listeners = Vec::new();
        let mut ingress = Vec::new();
        let mut proxy_ports = Vec::new();
        let cidr = if balancer.public { "0.0.0.0/0" } else { "10.0.0.0/8" };
        for port in balancer.port_mappings() {
            let host = r(&params::port_host(name, port.container));
            if port.is_external() {
                let cert = params::port_certificate(name, port.container);
                let blank = format!("Blank{cert}");
                let label_protocol = balancer.listener_protocol(port);
                let secure_protocol = if label_protocol == "HTTPS" || label_protocol == "HTTP" {
                    "HTTPS"
                } else {
                    "SSL"
                };
                let listen = r(&params::port_balancer(name, port.container));
                listeners.push(json!({
                    "Protocol": { "Fn::If": [blank, label_protocol, secure_protocol] },
                    "LoadBalancerPort": listen,
                    "InstanceProtocol": balancer.instance_protocol(port),
                    "InstancePort": host,
                    "SSLCertificateId": { "Fn::If": [blank, r("AWS::NoValue"), r(&cert)] },
                }));
                ingress.push(json!({
                    "CidrIp": cidr,
                    "IpProtocol": "tcp",
                    "FromPort": r(&params::port_balancer(name, port.container)),
                    "ToPort": r(&params::port_balancer(name, port.container)),
                }));
            } else {
                listeners.push(json!({
                    "Protocol": "TCP",
                    "LoadBalancerPort": port.container.to_string(),
                    "InstanceProtocol": "TCP",
                    "InstancePort": host,
                }));
                ingress.push(json!({
                    "CidrIp": "10.0.0.0/8",
                    "IpProtocol": "tcp",
                    "FromPort": port.container.to_string(),
                    "ToPort": port.container.to_string(),
                }));
            }
            if balancer.proxy_protocol(port) {
                proxy_ports.push(host.clone());
            }
        }

        let health_port = balancer
            .health_port()
            .ok_or_else(|| TemplateError::Validation(format!("service {name} has no tcp port for health checks")))?;
        let target = match balancer.health_path() {
            Some(path) => join(
                "",
                vec![
                    Value::String(format!("{}:", balancer.health_protocol())),
                    r(&params::port_host(name, health_port.container)),
                    Value::String(path.to_string()),
                ],
            ),
            None => join(
                "",
                vec![
                    Value::String(format!("{}:", balancer.health_protocol())),
                    r(&params::port_host(name, health_port.container)),
                ],
            ),
        };

        let mut properties = json!({
            "LoadBalancerName": lb_name,
            "Scheme": balancer.scheme(),
            "Subnets": r("Subnets"),
            "SecurityGroups": [r(&format!("{resource}SecurityGroup"))],
            "CrossZone": true,
            "ConnectionDrainingPolicy": { "Enabled": true, "Timeout": balancer.draining_timeout()? },
            "ConnectionSettings": { "IdleTimeout": balancer.idle_timeout()? },
            "HealthCheck": {
                "Target": target,
                "HealthyThreshold": balancer.healthy_threshold().to_string(),
                "UnhealthyThreshold": balancer.unhealthy_threshold().to_string(),
                "Interval": balancer.health_interval().to_string(),
                "Timeout": balancer.health_timeout().to_string(),
            },
            "Listeners": listeners,
            "LBCookieStickinessPolicy": [{ "PolicyName": "affinity" }],
        });
        if !proxy_ports.is_empty() {
            properties["Policies"] = json!([{
                "PolicyName": "EnableProxyProtocol",
                "PolicyType": "ProxyProtocolPolicyType",
                "Attributes": [{ "Name": "ProxyProtocol", "Value": "true" }],
                "InstancePorts": proxy_ports,
            }]);
        }

        self.resources.insert(
            format!("{resource}SecurityGroup"),
            json!({
                "Type": "AWS::EC2::SecurityGroup",
                "Properties": {
                    "GroupDescription": join(" ", vec![r("AWS::StackName"), Value::String(format!("{name} balancer"))]),
                    "VpcId": r("VPC"),
                    "SecurityGroupIngress": ingress,
                },
            }),
        );
        self.resources.insert(
            resource.clone(),
            json!({
                "Type": "AWS::ElasticLoadBalancing::LoadBalancer",
                "DependsOn": [format!("{resource}SecurityGroup")],
                "Properties": properties,
            }),
        );
        self.outputs.insert(
            format!("{resource}Host"),
            json!({ "Value": { "Fn::GetAtt": [resource, "DNSName"] } }),
        );
        Ok(())
    }

    // ── Timers ─────────────────────────────────────────────────────

    fn timer(&mut self, name: &str, schedule: &str, command: &str, service: &str) -> TemplateResult<()> {
        self.input.manifest.service(service)?;
        let upper = upper_name(service);
        let input = json!({
            "containerOverrides": [{ "name": service, "command": ["sh", "-c", command] }],
        });
        self.resources.insert(
            format!("{}Timer", upper_name(name)),
            json!({
                "Type": "Custom::CloudWatchEventsRule",
                "Properties": {
                    "ServiceToken": self.service_token(),
                    "Name": format!("{}-{name}", self.stack),
                    "ScheduleExpression": format!("cron({schedule})"),
                    "Targets": [{
                        "Id": format!("{name}-{service}"),
                        "Arn": r("Cluster"),
                        "TaskDefinition": r(&format!("{upper}ECSTaskDefinition")),
                        "Input": input.to_string(),
                    }],
                },
            }),
        );
        Ok(())
    }
}
