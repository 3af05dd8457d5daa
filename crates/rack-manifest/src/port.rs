//! Port declarations: `"C"` (internal) or `"B:C"` (external), with an
//! optional `/tcp` or `/udp` suffix.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

static PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d+):)?(\d+)(?:/(tcp|udp))?$").expect("valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// A container port, optionally published on a balancer port.
///
/// `balancer == 0` marks an internal-only port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    pub balancer: u16,
    pub container: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Port {
    pub fn internal(container: u16) -> Self {
        Self {
            balancer: 0,
            container,
            protocol: Protocol::Tcp,
        }
    }

    pub fn external(balancer: u16, container: u16) -> Self {
        Self {
            balancer,
            container,
            protocol: Protocol::Tcp,
        }
    }

    /// Parse a port declaration.
    pub fn parse(s: &str) -> ManifestResult<Self> {
        let invalid = || ManifestError::InvalidPort(s.to_string());
        let caps = PORT_RE.captures(s.trim()).ok_or_else(invalid)?;

        let container: u16 = caps[2].parse().map_err(|_| invalid())?;
        if container == 0 {
            return Err(invalid());
        }

        let balancer = match caps.get(1) {
            Some(b) => {
                let b: u16 = b.as_str().parse().map_err(|_| invalid())?;
                if b == 0 {
                    return Err(invalid());
                }
                b
            }
            None => 0,
        };

        let protocol = match caps.get(3).map(|m| m.as_str()) {
            Some("udp") => Protocol::Udp,
            _ => Protocol::Tcp,
        };

        Ok(Self {
            balancer,
            container,
            protocol,
        })
    }

    pub fn is_external(&self) -> bool {
        self.balancer != 0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_external() {
            write!(f, "{}:{}", self.balancer, self.container)?;
        } else {
            write!(f, "{}", self.container)?;
        }
        if self.protocol == Protocol::Udp {
            write!(f, "/udp")?;
        }
        Ok(())
    }
}
