//! Stack parameter naming and template introspection.

use std::collections::BTreeMap;

use rack_core::upper_name;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{TemplateError, TemplateResult};

/// Lowest port handed out for balancer-facing host ports.
pub const HOST_PORT_MIN: u16 = 10000;
/// One past the highest host port.
pub const HOST_PORT_MAX: u16 = 60000;

pub fn desired_count(service: &str) -> String {
    format!("{}DesiredCount", upper_name(service))
}

pub fn memory(service: &str) -> String {
    format!("{}Memory", upper_name(service))
}

pub fn cpu(service: &str) -> String {
    format!("{}Cpu", upper_name(service))
}

pub fn port_host(service: &str, container: u16) -> String {
    format!("{}Port{container}Host", upper_name(service))
}

pub fn port_balancer(service: &str, container: u16) -> String {
    format!("{}Port{container}Balancer", upper_name(service))
}

pub fn port_certificate(service: &str, container: u16) -> String {
    format!("{}Port{container}Certificate", upper_name(service))
}

/// Template default for a host port: stable for a given app, service and
/// container port so that re-synthesis is byte-identical.
pub fn default_host_port(app: &str, service: &str, container: u16) -> u16 {
    let digest = Sha256::digest(format!("{app}:{service}:{container}").as_bytes());
    let n = u16::from_be_bytes([digest[0], digest[1]]);
    HOST_PORT_MIN + n % (HOST_PORT_MAX - HOST_PORT_MIN)
}

/// Parameters declared by a template, with their defaults.
pub fn template_parameters(template: &str) -> TemplateResult<BTreeMap<String, Option<String>>> {
    let doc: Value =
        serde_json::from_str(template).map_err(|e| TemplateError::Invalid(e.to_string()))?;
    let Some(params) = doc.get("Parameters").and_then(Value::as_object) else {
        return Ok(BTreeMap::new());
    };
    Ok(params
        .iter()
        .map(|(name, body)| {
            let default = body.get("Default").map(|d| match d {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            (name.clone(), default)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(desired_count("web"), "WebDesiredCount");
        assert_eq!(memory("my-worker"), "MyWorkerMemory");
        assert_eq!(port_host("web", 3000), "WebPort3000Host");
        assert_eq!(port_balancer("web", 3000), "WebPort3000Balancer");
        assert_eq!(port_certificate("web", 3000), "WebPort3000Certificate");
    }

    #[test]
    fn host_port_is_stable_and_in_range() {
        let a = default_host_port("app", "web", 3000);
        assert_eq!(a, default_host_port("app", "web", 3000));
        assert!((HOST_PORT_MIN..HOST_PORT_MAX).contains(&a));
    }

    #[test]
    fn parameters_with_defaults() {
        let t = r#"{"Parameters":{"A":{"Type":"String","Default":"x"},"B":{"Type":"Number","Default":2},"C":{"Type":"String"}}}"#;
        let p = template_parameters(t).unwrap();
        assert_eq!(p["A"].as_deref(), Some("x"));
        assert_eq!(p["B"].as_deref(), Some("2"));
        assert_eq!(p["C"], None);
    }

    #[test]
    fn parameters_of_garbage() {
        assert!(template_parameters("not json").is_err());
        assert!(template_parameters("{}").unwrap().is_empty());
    }
}
