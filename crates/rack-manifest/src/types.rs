//! Normalised manifest types shared by both manifest versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::balancer::Balancer;
use crate::error::{ManifestError, ManifestResult};
use crate::port::Port;

/// Ceiling used for open-ended scale counts (`"2+"`).
pub const OPEN_SCALE_MAX: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestVersion {
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2")]
    V2,
}

impl ManifestVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestVersion::V1 => "1",
            ManifestVersion::V2 => "2",
        }
    }
}

/// One entry of an `environment` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvEntry {
    /// `KEY=value`: a default the supplied env may override.
    Literal { key: String, value: String },
    /// `KEY`: must be present in the supplied env.
    Reference { key: String },
    /// `*`: every supplied key.
    Wildcard,
}

impl EnvEntry {
    pub fn parse(s: &str) -> Self {
        match s.split_once('=') {
            Some((key, value)) => EnvEntry::Literal {
                key: key.to_string(),
                value: value.to_string(),
            },
            None if s == "*" => EnvEntry::Wildcard,
            None => EnvEntry::Reference { key: s.to_string() },
        }
    }

    /// Render back to the `KEY=value` / `KEY` / `*` form.
    pub fn render(&self) -> String {
        match self {
            EnvEntry::Literal { key, value } => format!("{key}={value}"),
            EnvEntry::Reference { key } => key.clone(),
            EnvEntry::Wildcard => "*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Build context directory. Empty when the service uses a prebuilt image.
    pub path: String,
    pub dockerfile: Option<String>,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    #[default]
    None,
    /// Scalar form, run through `sh -c`.
    Shell(String),
    /// Array form, passed through as exec arguments.
    Exec(Vec<String>),
}

impl Command {
    /// The argv the scheduler should run, if any.
    pub fn argv(&self) -> Option<Vec<String>> {
        match self {
            Command::None => None,
            Command::Shell(s) => Some(vec!["sh".to_string(), "-c".to_string(), s.clone()]),
            Command::Exec(args) => Some(args.clone()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Command::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// HTTP path to check. `None` means a plain TCP check.
    pub path: Option<String>,
    pub interval: u32,
    pub timeout: u32,
    pub grace: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            path: None,
            interval: 5,
            timeout: 3,
            grace: 5,
            healthy_threshold: 2,
            unhealthy_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleCount {
    pub min: u32,
    pub max: u32,
}

impl ScaleCount {
    pub fn fixed(n: u32) -> Self {
        Self { min: n, max: n }
    }

    /// Parse `"n"`, `"n-m"` or `"n+"`.
    pub fn parse(s: &str) -> ManifestResult<Self> {
        let invalid = || ManifestError::InvalidScale(s.to_string());
        let s = s.trim();
        if let Some(min) = s.strip_suffix('+') {
            let min = min.parse().map_err(|_| invalid())?;
            return Ok(Self {
                min,
                max: OPEN_SCALE_MAX.max(min),
            });
        }
        match s.split_once('-') {
            Some((min, max)) => {
                let min: u32 = min.parse().map_err(|_| invalid())?;
                let max: u32 = max.parse().map_err(|_| invalid())?;
                if max < min {
                    return Err(invalid());
                }
                Ok(Self { min, max })
            }
            None => Ok(Self::fixed(s.parse().map_err(|_| invalid())?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub count: ScaleCount,
    /// CPU units; 0 leaves the scheduler default.
    pub cpu: u32,
    /// Memory in MB.
    pub memory: u32,
}

impl Default for Scale {
    fn default() -> Self {
        Self {
            count: ScaleCount::fixed(1),
            cpu: 0,
            memory: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: Option<String>,
    pub build: Build,
    pub command: Command,
    pub entrypoint: Option<String>,
    /// Declared service-level environment entries, in declaration order.
    pub environment: Vec<EnvEntry>,
    /// Environment resolved at load time.
    pub env: BTreeMap<String, String>,
    pub ports: Vec<Port>,
    pub health: Health,
    pub scale: Scale,
    pub volumes: Vec<String>,
    pub links: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub privileged: bool,
    /// Seconds to drain connections on shutdown.
    pub drain: u32,
}

impl Service {
    pub fn external_ports(&self) -> Vec<Port> {
        self.ports.iter().copied().filter(Port::is_external).collect()
    }

    pub fn internal_ports(&self) -> Vec<Port> {
        self.ports.iter().copied().filter(|p| !p.is_external()).collect()
    }

    pub fn has_balancer(&self) -> bool {
        !self.ports.is_empty()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn labels_by_prefix(&self, prefix: &str) -> BTreeMap<String, String> {
        self.labels
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Image reference for a build of this service.
    ///
    /// Apps with an ECR registry output use
    /// `<id>.dkr.ecr.<region>.amazonaws.com/<repo>:<service>.<build>`,
    /// everything else `<registry-host>/<app>-<service>:<build>`.
    pub fn registry_image(
        &self,
        app: &str,
        build_id: &str,
        outputs: &BTreeMap<String, String>,
        region: &str,
        registry_host: &str,
    ) -> String {
        match outputs.get("RegistryId").filter(|id| !id.is_empty()) {
            Some(registry_id) => format!(
                "{registry_id}.dkr.ecr.{region}.amazonaws.com/{}:{}.{build_id}",
                outputs.get("RegistryRepository").map(String::as_str).unwrap_or_default(),
                self.name
            ),
            None => format!("{registry_host}/{app}-{}:{build_id}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    pub schedule: String,
    pub command: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: ManifestVersion,
    /// Top-level environment (v2); prepended to every service.
    pub environment: Vec<EnvEntry>,
    pub services: Vec<Service>,
    pub resources: BTreeMap<String, Resource>,
    pub timers: BTreeMap<String, Timer>,
}

impl Manifest {
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, name: &str) -> ManifestResult<&Service> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ManifestError::NoSuchService(name.to_string()))
    }

    /// Services that publish at least one port on a balancer.
    pub fn balancers(&self) -> Vec<Balancer<'_>> {
        self.services
            .iter()
            .filter(|s| s.has_balancer())
            .map(Balancer::new)
            .collect()
    }

    /// Services routed by path (carrying a `router.path` label).
    pub fn routes(&self) -> Vec<&Service> {
        self.services
            .iter()
            .filter(|s| s.labels.contains_key("router.path"))
            .collect()
    }

    pub fn has_external_ports(&self) -> bool {
        self.services.iter().any(|s| !s.external_ports().is_empty())
    }

    /// Service names ordered so that every service comes after the
    /// services it links to. Ties keep declaration order; services caught
    /// in a link cycle are appended in declaration order.
    pub fn run_order(&self) -> Vec<String> {
        let mut remaining: Vec<&Service> = self.services.iter().collect();
        let mut ordered: Vec<String> = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|s| {
                s.links
                    .iter()
                    .all(|l| ordered.contains(l) || !self.services.iter().any(|o| &o.name == l))
            });
            match ready {
                Some(i) => ordered.push(remaining.remove(i).name.clone()),
                None => {
                    ordered.extend(remaining.drain(..).map(|s| s.name.clone()));
                }
            }
        }

        ordered
    }

    /// A service fronted by a balancer must leave one instance free for
    /// rolling replacement.
    pub fn validate_capacity(&self, instance_count: u32) -> ManifestResult<()> {
        for service in self.services.iter().filter(|s| !s.external_ports().is_empty()) {
            if service.scale.count.min + 1 > instance_count {
                return Err(ManifestError::Validation(format!(
                    "service {} has a load balancer and count {} but the rack has {} instances",
                    service.name, service.scale.count.min, instance_count
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, links: &[&str]) -> Service {
        Service {
            name: name.to_string(),
            links: links.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    fn manifest(services: Vec<Service>) -> Manifest {
        Manifest {
            version: ManifestVersion::V1,
            environment: Vec::new(),
            services,
            resources: BTreeMap::new(),
            timers: BTreeMap::new(),
        }
    }

    #[test]
    fn env_entry_forms() {
        assert_eq!(
            EnvEntry::parse("FOO=bar=baz"),
            EnvEntry::Literal {
                key: "FOO".to_string(),
                value: "bar=baz".to_string()
            }
        );
        assert_eq!(
            EnvEntry::parse("SECRET"),
            EnvEntry::Reference {
                key: "SECRET".to_string()
            }
        );
        assert_eq!(EnvEntry::parse("*"), EnvEntry::Wildcard);
        assert_eq!(EnvEntry::parse("FOO=").render(), "FOO=");
    }

    #[test]
    fn scale_count_forms() {
        assert_eq!(ScaleCount::parse("3").unwrap(), ScaleCount::fixed(3));
        assert_eq!(ScaleCount::parse("1-4").unwrap(), ScaleCount { min: 1, max: 4 });
        assert_eq!(
            ScaleCount::parse("2+").unwrap(),
            ScaleCount {
                min: 2,
                max: OPEN_SCALE_MAX
            }
        );
        assert!(ScaleCount::parse("4-1").is_err());
        assert!(ScaleCount::parse("x").is_err());
    }

    #[test]
    fn shell_command_runs_through_sh() {
        let cmd = Command::Shell("bin/web --port 3000".to_string());
        assert_eq!(
            cmd.argv().unwrap(),
            vec!["sh", "-c", "bin/web --port 3000"]
        );
        let exec = Command::Exec(vec!["bin/web".to_string(), "-v".to_string()]);
        assert_eq!(exec.argv().unwrap(), vec!["bin/web", "-v"]);
        assert!(Command::None.argv().is_none());
    }

    #[test]
    fn run_order_puts_links_first() {
        let m = manifest(vec![
            service("web", &["database", "redis"]),
            service("worker", &["redis"]),
            service("redis", &[]),
            service("database", &[]),
        ]);
        assert_eq!(m.run_order(), vec!["redis", "worker", "database", "web"]);
    }

    #[test]
    fn run_order_is_stable_without_links() {
        let m = manifest(vec![service("b", &[]), service("a", &[]), service("c", &[])]);
        assert_eq!(m.run_order(), vec!["b", "a", "c"]);
    }

    #[test]
    fn run_order_tolerates_cycles() {
        let m = manifest(vec![service("a", &["b"]), service("b", &["a"]), service("c", &[])]);
        assert_eq!(m.run_order(), vec!["c", "a", "b"]);
    }

    #[test]
    fn registry_image_forms() {
        let s = service("web", &[]);
        let mut outputs = BTreeMap::new();
        assert_eq!(
            s.registry_image("myapp", "BABCDEFGHIJ", &outputs, "us-east-1", "registry.example.com"),
            "registry.example.com/myapp-web:BABCDEFGHIJ"
        );

        outputs.insert("RegistryId".to_string(), "123456789012".to_string());
        outputs.insert("RegistryRepository".to_string(), "myapp-repo".to_string());
        assert_eq!(
            s.registry_image("myapp", "BABCDEFGHIJ", &outputs, "us-east-1", "ignored"),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/myapp-repo:web.BABCDEFGHIJ"
        );
    }

    #[test]
    fn capacity_guard_for_balanced_services() {
        let mut web = service("web", &[]);
        web.ports = vec![Port::external(80, 3000)];
        web.scale.count = ScaleCount::fixed(2);
        let m = manifest(vec![web]);

        assert!(m.validate_capacity(3).is_ok());
        assert!(m.validate_capacity(2).is_err());
    }
}
