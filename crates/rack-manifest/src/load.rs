//! Manifest loading: version detection, normalisation, defaults, env
//! resolution, and validation.

use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{ManifestError, ManifestResult};
use crate::port::Port;
use crate::raw::*;
use crate::types::*;

/// Load a manifest, resolving service environments against `env`.
pub fn load(data: &str, env: &BTreeMap<String, String>) -> ManifestResult<Manifest> {
    let doc: Value = serde_yaml::from_str(data).map_err(|e| ManifestError::Yaml(e.to_string()))?;

    let top = match doc {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => return Err(ManifestError::Yaml("manifest must be a mapping".to_string())),
    };

    let mut manifest = match top.get("version") {
        Some(v) => {
            let version = scalar_string(v);
            if version != "2" {
                return Err(ManifestError::Validation(format!(
                    "unsupported manifest version: {version}"
                )));
            }
            load_v2(&top)?
        }
        None => load_v1(&top)?,
    };

    resolve_env(&mut manifest, env)?;
    validate(&manifest)?;

    debug!(
        version = manifest.version.as_str(),
        services = manifest.services.len(),
        "manifest loaded"
    );
    Ok(manifest)
}

fn load_v1(top: &Mapping) -> ManifestResult<Manifest> {
    let mut services = Vec::with_capacity(top.len());
    for (name, body) in top {
        let name = scalar_string(name);
        let raw = raw_service(&name, body)?;
        services.push(normalise_service(name, raw, ManifestVersion::V1)?);
    }

    Ok(Manifest {
        version: ManifestVersion::V1,
        environment: Vec::new(),
        services,
        resources: BTreeMap::new(),
        timers: BTreeMap::new(),
    })
}

fn load_v2(top: &Mapping) -> ManifestResult<Manifest> {
    let environment = match top.get("environment") {
        Some(Value::Null) | None => Vec::new(),
        Some(v) => {
            let raw: RawEnvironment = serde_yaml::from_value(v.clone())
                .map_err(|e| ManifestError::Yaml(format!("environment: {e}")))?;
            env_entries(raw)
        }
    };

    let mut services = Vec::new();
    if let Some(Value::Mapping(m)) = top.get("services") {
        for (name, body) in m {
            let name = scalar_string(name);
            let raw = raw_service(&name, body)?;
            services.push(normalise_service(name, raw, ManifestVersion::V2)?);
        }
    }

    let mut resources = BTreeMap::new();
    if let Some(Value::Mapping(m)) = top.get("resources") {
        for (name, body) in m {
            let name = scalar_string(name);
            let raw: RawResource = serde_yaml::from_value(body.clone())
                .map_err(|e| ManifestError::Yaml(format!("resources.{name}: {e}")))?;
            resources.insert(name, Resource { kind: raw.kind });
        }
    }

    let mut timers = BTreeMap::new();
    if let Some(Value::Mapping(m)) = top.get("timers") {
        for (name, body) in m {
            let name = scalar_string(name);
            let raw: RawTimer = serde_yaml::from_value(body.clone())
                .map_err(|e| ManifestError::Yaml(format!("timers.{name}: {e}")))?;
            timers.insert(
                name,
                Timer {
                    schedule: raw.schedule,
                    command: raw.command,
                    service: raw.service,
                },
            );
        }
    }

    Ok(Manifest {
        version: ManifestVersion::V2,
        environment,
        services,
        resources,
        timers,
    })
}

fn raw_service(name: &str, body: &Value) -> ManifestResult<RawService> {
    if body.is_null() {
        return Ok(RawService::default());
    }
    serde_yaml::from_value(body.clone())
        .map_err(|e| ManifestError::Yaml(format!("services.{name}: {e}")))
}

fn normalise_service(name: String, raw: RawService, version: ManifestVersion) -> ManifestResult<Service> {
    let labels = match raw.labels {
        Some(l) => labels_map(l),
        None => BTreeMap::new(),
    };

    let mut build = match raw.build {
        Some(RawBuild::Context(path)) => Build {
            path,
            ..Default::default()
        },
        Some(RawBuild::Detailed {
            path,
            dockerfile,
            args,
        }) => Build {
            path: path.unwrap_or_default(),
            dockerfile,
            args: args.map(labels_map).unwrap_or_default(),
        },
        None => Build::default(),
    };
    if build.dockerfile.is_none() {
        build.dockerfile = raw.dockerfile;
    }

    let command = match raw.command {
        Some(RawCommand::Shell(s)) => Command::Shell(s),
        Some(RawCommand::Exec(v)) => Command::Exec(v),
        None => Command::None,
    };

    let mut ports = Vec::with_capacity(raw.ports.len());
    for p in raw.ports {
        ports.push(match p {
            RawPort::Number(n) => Port::parse(&n.to_string())?,
            RawPort::Text(s) => Port::parse(&s)?,
        });
    }

    let environment = raw.environment.map(env_entries).unwrap_or_default();

    let (health, scale) = match version {
        ManifestVersion::V2 => {
            if build.path.is_empty() && raw.image.is_none() {
                build.path = ".".to_string();
            }
            if !build.path.is_empty() && build.dockerfile.is_none() {
                build.dockerfile = Some("Dockerfile".to_string());
            }
            (v2_health(raw.health), v2_scale(raw.scale)?)
        }
        ManifestVersion::V1 => (v1_health(&labels)?, v1_scale(raw.mem_limit, raw.cpu_shares)?),
    };

    Ok(Service {
        name,
        image: raw.image,
        build,
        command,
        entrypoint: raw.entrypoint,
        environment,
        env: BTreeMap::new(),
        ports,
        health,
        scale,
        volumes: raw.volumes,
        links: raw.links,
        labels,
        privileged: raw.privileged,
        drain: raw.drain.filter(|d| *d > 0).unwrap_or(30),
    })
}

fn v2_health(raw: Option<RawHealth>) -> Health {
    let (path, interval, timeout, grace, thresholds) = match raw {
        Some(RawHealth::Path(p)) => (Some(p), None, None, None, None),
        Some(RawHealth::Detailed {
            path,
            interval,
            timeout,
            grace,
            thresholds,
        }) => (path, interval, timeout, grace, thresholds),
        None => (None, None, None, None, None),
    };

    let interval = interval.filter(|i| *i > 0).unwrap_or(5);
    Health {
        path: Some(path.filter(|p| !p.is_empty()).unwrap_or_else(|| "/".to_string())),
        interval,
        timeout: timeout
            .filter(|t| *t > 0)
            .unwrap_or_else(|| interval.saturating_sub(1).max(1)),
        grace: grace.filter(|g| *g > 0).unwrap_or(interval),
        healthy_threshold: thresholds.as_ref().and_then(|t| t.healthy).unwrap_or(2),
        unhealthy_threshold: thresholds.as_ref().and_then(|t| t.unhealthy).unwrap_or(2),
    }
}

fn v1_health(labels: &BTreeMap<String, String>) -> ManifestResult<Health> {
    let number = |key: &str, default: u32| -> ManifestResult<u32> {
        match labels.get(key) {
            Some(v) => v
                .parse()
                .map_err(|_| ManifestError::Validation(format!("{key} must be a number: {v}"))),
            None => Ok(default),
        }
    };

    let timeout = number("convox.health.timeout", 3)?;
    let interval = timeout + 2;
    Ok(Health {
        path: labels
            .get("convox.health.path")
            .filter(|p| !p.is_empty())
            .cloned(),
        interval,
        timeout,
        grace: interval,
        healthy_threshold: number("convox.health.threshold.healthy", 2)?,
        unhealthy_threshold: number("convox.health.threshold.unhealthy", 2)?,
    })
}

fn v2_scale(raw: Option<RawScale>) -> ManifestResult<Scale> {
    let (count, cpu, memory) = match raw {
        Some(RawScale::Count(n)) => (ScaleCount::fixed(n), None, None),
        Some(RawScale::Text(s)) => (ScaleCount::parse(&s)?, None, None),
        Some(RawScale::Detailed { count, cpu, memory }) => {
            let count = match count {
                Some(RawCount::Number(n)) => ScaleCount::fixed(n),
                Some(RawCount::Text(s)) => ScaleCount::parse(&s)?,
                Some(RawCount::Range { min, max }) => {
                    let min = min.into_string();
                    match max {
                        Some(max) => ScaleCount::parse(&format!("{min}-{}", max.into_string()))?,
                        None => ScaleCount::parse(&min)?,
                    }
                }
                None => ScaleCount::fixed(1),
            };
            (count, cpu, memory)
        }
        None => (ScaleCount::fixed(1), None, None),
    };

    Ok(Scale {
        count,
        cpu: cpu.filter(|c| *c > 0).unwrap_or(256),
        memory: memory.filter(|m| *m > 0).unwrap_or(512),
    })
}

fn v1_scale(mem_limit: Option<RawScalar>, cpu_shares: Option<u32>) -> ManifestResult<Scale> {
    let memory = match mem_limit {
        Some(raw) => {
            let s = raw.into_string();
            parse_memory_mb(&s)
                .ok_or_else(|| ManifestError::Validation(format!("invalid mem_limit: {s}")))?
        }
        None => Scale::default().memory,
    };

    Ok(Scale {
        count: ScaleCount::fixed(1),
        cpu: cpu_shares.unwrap_or(0),
        memory,
    })
}

/// `512m`, `512MB`, `1g`, `1gb` or a plain byte count, as megabytes.
pub(crate) fn parse_memory_mb(s: &str) -> Option<u32> {
    let lower = s.trim().to_ascii_lowercase();
    let lower = lower.strip_suffix('b').unwrap_or(&lower);
    if let Some(n) = lower.strip_suffix('m') {
        return n.parse().ok();
    }
    if let Some(n) = lower.strip_suffix('g') {
        return n.parse::<u32>().ok().map(|g| g * 1024);
    }
    if let Some(n) = lower.strip_suffix('k') {
        return n.parse::<u64>().ok().map(|k| (k / 1024) as u32);
    }
    lower.parse::<u64>().ok().map(|bytes| (bytes / (1024 * 1024)) as u32)
}

fn env_entries(raw: RawEnvironment) -> Vec<EnvEntry> {
    match raw {
        RawEnvironment::List(items) => items.iter().map(|s| EnvEntry::parse(s)).collect(),
        RawEnvironment::Map(map) => map
            .into_iter()
            .map(|(key, value)| match value {
                Some(v) => EnvEntry::Literal {
                    key,
                    value: v.into_string(),
                },
                None => EnvEntry::Reference { key },
            })
            .collect(),
    }
}

fn labels_map(raw: RawLabels) -> BTreeMap<String, String> {
    match raw {
        RawLabels::Map(map) => map.into_iter().map(|(k, v)| (k, v.into_string())).collect(),
        RawLabels::List(items) => items
            .iter()
            .filter_map(|s| s.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Resolve every service's env: top-level entries first, then the
/// service's own, later entries overriding earlier ones.
fn resolve_env(manifest: &mut Manifest, env: &BTreeMap<String, String>) -> ManifestResult<()> {
    let mut missing = BTreeSet::new();

    for service in &mut manifest.services {
        let mut resolved = BTreeMap::new();
        for entry in manifest.environment.iter().chain(service.environment.iter()) {
            match entry {
                EnvEntry::Wildcard => {
                    resolved.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                EnvEntry::Reference { key } => match env.get(key) {
                    Some(v) => {
                        resolved.insert(key.clone(), v.clone());
                    }
                    None => {
                        missing.insert(key.clone());
                    }
                },
                EnvEntry::Literal { key, value } => {
                    let v = env.get(key).unwrap_or(value);
                    resolved.insert(key.clone(), v.clone());
                }
            }
        }
        service.env = resolved;
    }

    if !missing.is_empty() {
        return Err(ManifestError::MissingEnv {
            keys: missing.into_iter().collect(),
        });
    }
    Ok(())
}

fn validate(manifest: &Manifest) -> ManifestResult<()> {
    let mut names = BTreeSet::new();
    for service in &manifest.services {
        if !names.insert(service.name.as_str()) {
            return Err(ManifestError::Validation(format!(
                "duplicate service: {}",
                service.name
            )));
        }
    }

    for service in &manifest.services {
        for link in &service.links {
            if !names.contains(link.as_str()) {
                return Err(ManifestError::UnknownLink {
                    service: service.name.clone(),
                    link: link.clone(),
                });
            }
        }
    }

    let mut balancer_ports = BTreeSet::new();
    for service in &manifest.services {
        for port in service.external_ports() {
            if !balancer_ports.insert(port.balancer) {
                return Err(ManifestError::Validation(format!(
                    "balancer port {} is declared more than once",
                    port.balancer
                )));
            }
        }
    }

    for resource in manifest.resources.values() {
        if resource.kind.trim().is_empty() {
            return Err(ManifestError::Validation(
                "resource type can not be blank".to_string(),
            ));
        }
    }

    for (name, timer) in &manifest.timers {
        if !names.contains(timer.service.as_str()) {
            return Err(ManifestError::Validation(format!(
                "timer {name} references undeclared service {}",
                timer.service
            )));
        }
    }

    Ok(())
}
