//! Render a manifest back to YAML in its own version's shape.
//!
//! `load(&render(&m)?, env)` yields `m` again for any manifest that was
//! itself produced by `load` with the same `env`.

use serde_yaml::{Mapping, Value};

use crate::error::{ManifestError, ManifestResult};
use crate::types::*;

pub fn render(manifest: &Manifest) -> ManifestResult<String> {
    let doc = match manifest.version {
        ManifestVersion::V1 => {
            let mut top = Mapping::new();
            for service in &manifest.services {
                top.insert(s(&service.name), Value::Mapping(service_v1(service)));
            }
            top
        }
        ManifestVersion::V2 => {
            let mut top = Mapping::new();
            top.insert(s("version"), s("2"));
            if !manifest.environment.is_empty() {
                top.insert(s("environment"), env_list(&manifest.environment));
            }
            if !manifest.resources.is_empty() {
                let mut resources = Mapping::new();
                for (name, r) in &manifest.resources {
                    let mut body = Mapping::new();
                    body.insert(s("type"), s(&r.kind));
                    resources.insert(s(name), Value::Mapping(body));
                }
                top.insert(s("resources"), Value::Mapping(resources));
            }
            let mut services = Mapping::new();
            for service in &manifest.services {
                services.insert(s(&service.name), Value::Mapping(service_v2(service)));
            }
            top.insert(s("services"), Value::Mapping(services));
            if !manifest.timers.is_empty() {
                let mut timers = Mapping::new();
                for (name, t) in &manifest.timers {
                    let mut body = Mapping::new();
                    body.insert(s("schedule"), s(&t.schedule));
                    body.insert(s("command"), s(&t.command));
                    body.insert(s("service"), s(&t.service));
                    timers.insert(s(name), Value::Mapping(body));
                }
                top.insert(s("timers"), Value::Mapping(timers));
            }
            top
        }
    };

    serde_yaml::to_string(&Value::Mapping(doc)).map_err(|e| ManifestError::Yaml(e.to_string()))
}

fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

fn n(v: u32) -> Value {
    Value::Number(v.into())
}

fn list(items: impl IntoIterator<Item = String>) -> Value {
    Value::Sequence(items.into_iter().map(Value::String).collect())
}

fn env_list(entries: &[EnvEntry]) -> Value {
    list(entries.iter().map(EnvEntry::render))
}

fn common(service: &Service, body: &mut Mapping) {
    if let Some(image) = &service.image {
        body.insert(s("image"), s(image));
    }
    match &service.command {
        Command::None => {}
        Command::Shell(cmd) => {
            body.insert(s("command"), s(cmd));
        }
        Command::Exec(args) => {
            body.insert(s("command"), list(args.iter().cloned()));
        }
    }
    if let Some(entrypoint) = &service.entrypoint {
        body.insert(s("entrypoint"), s(entrypoint));
    }
    if !service.environment.is_empty() {
        body.insert(s("environment"), env_list(&service.environment));
    }
    if !service.ports.is_empty() {
        body.insert(s("ports"), list(service.ports.iter().map(|p| p.to_string())));
    }
    if !service.volumes.is_empty() {
        body.insert(s("volumes"), list(service.volumes.iter().cloned()));
    }
    if !service.links.is_empty() {
        body.insert(s("links"), list(service.links.iter().cloned()));
    }
    if !service.labels.is_empty() {
        let mut labels = Mapping::new();
        for (k, v) in &service.labels {
            labels.insert(s(k), s(v));
        }
        body.insert(s("labels"), Value::Mapping(labels));
    }
    if service.privileged {
        body.insert(s("privileged"), Value::Bool(true));
    }
    body.insert(s("drain"), n(service.drain));
}

fn build(service: &Service) -> Option<Value> {
    let b = &service.build;
    if b.path.is_empty() && b.dockerfile.is_none() && b.args.is_empty() {
        return None;
    }
    let mut body = Mapping::new();
    body.insert(s("path"), s(&b.path));
    if let Some(dockerfile) = &b.dockerfile {
        body.insert(s("dockerfile"), s(dockerfile));
    }
    if !b.args.is_empty() {
        let mut args = Mapping::new();
        for (k, v) in &b.args {
            args.insert(s(k), s(v));
        }
        body.insert(s("args"), Value::Mapping(args));
    }
    Some(Value::Mapping(body))
}

fn service_v1(service: &Service) -> Mapping {
    let mut body = Mapping::new();
    if let Some(b) = build(service) {
        body.insert(s("build"), b);
    }
    common(service, &mut body);
    body.insert(s("mem_limit"), s(&format!("{}m", service.scale.memory)));
    if service.scale.cpu > 0 {
        body.insert(s("cpu_shares"), n(service.scale.cpu));
    }
    body
}

fn service_v2(service: &Service) -> Mapping {
    let mut body = Mapping::new();
    if let Some(b) = build(service) {
        body.insert(s("build"), b);
    }
    common(service, &mut body);

    let h = &service.health;
    let mut health = Mapping::new();
    if let Some(path) = &h.path {
        health.insert(s("path"), s(path));
    }
    health.insert(s("interval"), n(h.interval));
    health.insert(s("timeout"), n(h.timeout));
    health.insert(s("grace"), n(h.grace));
    let mut thresholds = Mapping::new();
    thresholds.insert(s("healthy"), n(h.healthy_threshold));
    thresholds.insert(s("unhealthy"), n(h.unhealthy_threshold));
    health.insert(s("thresholds"), Value::Mapping(thresholds));
    body.insert(s("health"), Value::Mapping(health));

    let c = service.scale.count;
    let mut scale = Mapping::new();
    let count = if c.min == c.max {
        n(c.min)
    } else {
        s(&format!("{}-{}", c.min, c.max))
    };
    scale.insert(s("count"), count);
    scale.insert(s("cpu"), n(service.scale.cpu));
    scale.insert(s("memory"), n(service.scale.memory));
    body.insert(s("scale"), Value::Mapping(scale));

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load;
    use std::collections::BTreeMap;

    fn round_trip(src: &str, env: &BTreeMap<String, String>) {
        let m = load(src, env).unwrap();
        let rendered = render(&m).unwrap();
        let again = load(&rendered, env).unwrap();
        assert_eq!(again, m, "rendered:\n{rendered}");
    }

    #[test]
    fn v1_round_trip() {
        round_trip(
            r#"
web:
  build:
    context: .
    dockerfile: Dockerfile.web
  command: bin/web
  environment:
    - FOO=bar
  ports:
    - 80:3000
    - 443:3000/tcp
  links:
    - worker
  labels:
    convox.health.path: /health
  mem_limit: 1g
worker:
  image: convox/worker
  command: ["bin/worker", "-q", "default"]
  volumes:
    - /var/run/docker.sock:/var/run/docker.sock
  privileged: true
"#,
            &BTreeMap::new(),
        );
    }

    #[test]
    fn v2_round_trip() {
        let env: BTreeMap<String, String> =
            [("SECRET".to_string(), "shh".to_string())].into_iter().collect();
        round_trip(
            r#"
version: "2"
environment:
  - SECRET
  - MODE=production
resources:
  database:
    type: postgres
services:
  web:
    build: .
    ports:
      - 80:3000
    health:
      path: /check
      interval: 10
    scale:
      count: 2-6
      memory: 1024
  worker:
    command: bin/worker
    scale: 3
timers:
  nightly:
    schedule: "0 0 * * ?"
    command: bin/nightly
    service: worker
"#,
            &env,
        );
    }

    #[test]
    fn udp_ports_survive() {
        round_trip("dns:\n  image: coredns\n  ports:\n    - 53:53/udp\n", &BTreeMap::new());
    }
}
