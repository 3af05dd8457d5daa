//! Balancer view of a service: naming, listener protocols, and health
//! check settings derived from the service's ports and labels.

use sha2::{Digest, Sha256};

use crate::error::{ManifestError, ManifestResult};
use crate::port::{Port, Protocol};
use crate::types::Service;
use rack_core::upper_name;

/// Maximum length of a load balancer name.
pub const MAX_BALANCER_NAME: usize = 32;

/// How the template should name a balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBalancerName {
    /// A fixed name (bound apps).
    Literal(String),
    /// The stack name itself (primary balancer of an unbound app).
    StackName,
    /// `<stack>-<process>` or `<stack>-<process>-i` for internal balancers.
    StackJoin { process: String, internal: bool },
}

#[derive(Debug, Clone, Copy)]
pub struct Balancer<'a> {
    pub service: &'a Service,
    /// A balancer is public unless its service also declares internal ports.
    pub public: bool,
}

impl<'a> Balancer<'a> {
    pub fn new(service: &'a Service) -> Self {
        Self {
            service,
            public: service.internal_ports().is_empty(),
        }
    }

    pub fn process_name(&self) -> &str {
        &self.service.name
    }

    /// Template resource name: `Balancer` for the primary balancer of an
    /// unbound app, otherwise `Balancer<Service>[Internal]`.
    pub fn resource_name(&self, primary: bool, bound: bool) -> String {
        if primary && !bound {
            return "Balancer".to_string();
        }
        let suffix = if self.public { "" } else { "Internal" };
        format!("Balancer{}{suffix}", upper_name(&self.service.name))
    }

    pub fn load_balancer_name(&self, primary: bool, bound: bool, rack: &str, app: &str) -> LoadBalancerName {
        if bound {
            return LoadBalancerName::Literal(bound_balancer_name(
                rack,
                app,
                &self.service.name,
                self.public,
            ));
        }
        if primary {
            return LoadBalancerName::StackName;
        }
        LoadBalancerName::StackJoin {
            process: self.service.name.clone(),
            internal: !self.public,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.public { "internet-facing" } else { "internal" }
    }

    /// Ports a TCP balancer can carry.
    pub fn port_mappings(&self) -> Vec<Port> {
        self.service
            .ports
            .iter()
            .copied()
            .filter(|p| p.protocol == Protocol::Tcp)
            .collect()
    }

    pub fn external_ports(&self) -> Vec<Port> {
        self.port_mappings()
            .into_iter()
            .filter(Port::is_external)
            .collect()
    }

    fn port_label(&self, port: Port, what: &str) -> Option<&str> {
        self.service
            .label(&format!("convox.port.{}.{what}", port.balancer))
    }

    /// Listener protocol from `convox.port.<N>.protocol`; TCP by default.
    pub fn listener_protocol(&self, port: Port) -> &'static str {
        match self.port_label(port, "protocol") {
            Some("tls") => "SSL",
            Some("https") => "HTTPS",
            Some("http") => "HTTP",
            _ => "TCP",
        }
    }

    /// Protocol the container speaks behind the listener.
    pub fn instance_protocol(&self, port: Port) -> &'static str {
        let secure = self.port_label(port, "secure") == Some("true");
        match self.port_label(port, "protocol") {
            Some("https") | Some("http") => {
                if secure {
                    "HTTPS"
                } else {
                    "HTTP"
                }
            }
            _ => {
                if secure {
                    "SSL"
                } else {
                    "TCP"
                }
            }
        }
    }

    pub fn proxy_protocol(&self, port: Port) -> bool {
        self.port_label(port, "proxy") == Some("true")
    }

    pub fn health_path(&self) -> Option<&str> {
        self.service.health.path.as_deref()
    }

    /// The port health checks target: the one named by
    /// `convox.health.port` (a container port), else the first TCP port.
    pub fn health_port(&self) -> Option<Port> {
        let ports = self.port_mappings();
        match self.service.label("convox.health.port") {
            Some(wanted) => ports
                .into_iter()
                .find(|p| p.container.to_string() == wanted),
            None => ports.first().copied(),
        }
    }

    pub fn health_protocol(&self) -> &'static str {
        let secure = self
            .health_port()
            .and_then(|p| self.port_label(p, "secure"))
            == Some("true");
        match (self.health_path().is_some(), secure) {
            (true, true) => "HTTPS",
            (true, false) => "HTTP",
            (false, true) => "SSL",
            (false, false) => "TCP",
        }
    }

    pub fn health_timeout(&self) -> u32 {
        self.service.health.timeout
    }

    pub fn health_interval(&self) -> u32 {
        self.service.health.interval
    }

    pub fn healthy_threshold(&self) -> u32 {
        self.service.health.healthy_threshold
    }

    pub fn unhealthy_threshold(&self) -> u32 {
        self.service.health.unhealthy_threshold
    }

    pub fn idle_timeout(&self) -> ManifestResult<u32> {
        self.bounded_label("convox.idle.timeout", 3600)
    }

    pub fn draining_timeout(&self) -> ManifestResult<u32> {
        self.bounded_label("convox.draining.timeout", 60)
    }

    fn bounded_label(&self, key: &str, default: u32) -> ManifestResult<u32> {
        let Some(raw) = self.service.label(key) else {
            return Ok(default);
        };
        let value: u32 = raw
            .parse()
            .map_err(|_| ManifestError::Validation(format!("{key} must be a number")))?;
        if !(1..=3600).contains(&value) {
            return Err(ManifestError::Validation(format!(
                "{key} must be between 1 and 3600"
            )));
        }
        Ok(value)
    }
}

/// Name of a balancer for an app bound to a shared rack:
/// `<app>-<service>-<hash>[-i]`, where `<hash>` is the first seven base-32
/// characters of `sha256("<rack>:<app>:<service>")`. The `<app>-<service>`
/// prefix is truncated to keep the whole name within 32 characters.
pub fn bound_balancer_name(rack: &str, app: &str, service: &str, public: bool) -> String {
    let digest = Sha256::digest(format!("{rack}:{app}:{service}").as_bytes());
    let encoded = base32_std(&digest);

    let mut suffix = format!("-{}", &encoded[..7]);
    if !public {
        suffix.push_str("-i");
    }

    let mut prefix = format!("{app}-{service}");
    let room = MAX_BALANCER_NAME - suffix.len();
    if prefix.len() > room {
        let mut cut = room;
        while !prefix.is_char_boundary(cut) {
            cut -= 1;
        }
        prefix.truncate(cut);
    }

    format!("{prefix}{suffix}")
}

/// RFC 4648 base-32 with the standard alphabet and padding.
fn base32_std(data: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);

    for chunk in data.chunks(5) {
        let mut buf = [0u8; 5];
        buf[..chunk.len()].copy_from_slice(chunk);
        let bits = buf.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let symbols = (chunk.len() * 8).div_ceil(5);
        for i in 0..8 {
            if i < symbols {
                let index = ((bits >> (35 - i * 5)) & 0x1f) as usize;
                out.push(ALPHABET[index] as char);
            } else {
                out.push('=');
            }
        }
    }

    out
}
