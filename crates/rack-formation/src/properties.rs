//! Typed views of `ResourceProperties`.
//!
//! The engine stringifies every scalar it resolves, so numeric and boolean
//! fields accept either a JSON string or a native value.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FormationError, FormationResult};

/// Decode a request's properties into a typed view.
pub fn decode<T: DeserializeOwned>(properties: &Value) -> FormationResult<T> {
    let properties = match properties {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(properties).map_err(|e| FormationError::Properties(e.to_string()))
}

fn scalar_text(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn flexible_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    scalar_text(v)
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| serde::de::Error::custom("expected an integer"))
}

pub(crate) fn flexible_opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        v => scalar_text(v)
            .and_then(|s| s.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected an integer")),
    }
}

pub(crate) fn flexible_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let v = Value::deserialize(d)?;
    scalar_text(v)
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| serde::de::Error::custom("expected an integer"))
}

pub(crate) fn flexible_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(false),
        v => Ok(scalar_text(v).is_some_and(|s| s.trim() == "true")),
    }
}

// ── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterProperties {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceProperties {
    pub cluster: String,
    #[serde(deserialize_with = "flexible_u32")]
    pub desired_count: u32,
    pub name: String,
    pub task_definition: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub load_balancers: Vec<String>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub deployment_minimum_percent: Option<u32>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub deployment_maximum_percent: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskDefinitionProperties {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskProperties>,
    #[serde(default)]
    pub task_role: Option<String>,
    /// Object URL of the release env payload.
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub secure_environment: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandProperty {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskProperties {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Option<CommandProperty>,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub cpu: Option<u32>,
    #[serde(deserialize_with = "flexible_u32")]
    pub memory: u32,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub port_mappings: Vec<String>,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub privileged: bool,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub extra_hosts: Vec<ExtraHostProperties>,
    #[serde(default)]
    pub log_configuration: Option<LogConfigurationProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtraHostProperties {
    pub host_name: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogConfigurationProperties {
    #[serde(default)]
    pub log_driver: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

// ── Everything else ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ZonesProperties {
    pub vpc: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RepositoryProperties {
    #[serde(default)]
    pub repository_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyProperties {
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub enable_key_rotation: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeProperties {
    pub s3_bucket: String,
    pub s3_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionProperties {
    #[serde(default)]
    pub function_name: Option<String>,
    pub code: CodeProperties,
    pub handler: String,
    pub role: String,
    pub runtime: String,
    #[serde(default, deserialize_with = "flexible_opt_u32")]
    pub timeout: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BucketProperties {
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscriptionProperties {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleProperties {
    pub name: String,
    pub schedule_expression: String,
    #[serde(default)]
    pub targets: Vec<TargetProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetProperties {
    pub id: String,
    pub arn: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub task_definition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IngressProperties {
    pub group_id: String,
    #[serde(default = "default_ip_protocol")]
    pub ip_protocol: String,
    #[serde(deserialize_with = "flexible_u32")]
    pub from_port: u32,
    #[serde(deserialize_with = "flexible_u32")]
    pub to_port: u32,
    #[serde(default = "default_cidr")]
    pub cidr_ip: String,
}

fn default_ip_protocol() -> String {
    "tcp".to_string()
}

fn default_cidr() -> String {
    "0.0.0.0/0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MathProperties {
    #[serde(deserialize_with = "flexible_i64")]
    pub x: i64,
    #[serde(deserialize_with = "flexible_i64")]
    pub y: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertificateProperties {
    #[serde(default)]
    pub rack: Option<String>,
    #[serde(default)]
    pub common_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_numbers_as_strings() {
        let p: ServiceProperties = decode(&json!({
            "Cluster": "c",
            "DesiredCount": "3",
            "Name": "app-web",
            "TaskDefinition": "td",
            "LoadBalancers": ["lb||web||80"],
            "DeploymentMinimumPercent": "50",
            "DeploymentMaximumPercent": 200,
        }))
        .unwrap();
        assert_eq!(p.desired_count, 3);
        assert_eq!(p.deployment_minimum_percent, Some(50));
        assert_eq!(p.deployment_maximum_percent, Some(200));
        assert_eq!(p.role, None);
    }

    #[test]
    fn task_command_forms() {
        let t: TaskProperties = decode(&json!({
            "Name": "web", "Image": "nginx", "Memory": "256", "Command": "bin/web", "Privileged": "true"
        }))
        .unwrap();
        assert!(matches!(t.command, Some(CommandProperty::Shell(ref s)) if s == "bin/web"));
        assert!(t.privileged);
        assert_eq!(t.cpu, None);

        let t: TaskProperties = decode(&json!({
            "Name": "web", "Image": "nginx", "Memory": 256, "Cpu": "", "Command": ["a", "b"]
        }))
        .unwrap();
        assert!(matches!(t.command, Some(CommandProperty::Exec(ref v)) if v.len() == 2));
        assert_eq!(t.cpu, None);
        assert!(!t.privileged);
    }

    #[test]
    fn memory_is_required() {
        let err = decode::<TaskProperties>(&json!({"Name": "web", "Image": "nginx"})).unwrap_err();
        assert!(matches!(err, FormationError::Properties(_)));
    }

    #[test]
    fn math_rejects_non_integers() {
        assert!(decode::<MathProperties>(&json!({"X": "one", "Y": "2"})).is_err());
        let m: MathProperties = decode(&json!({"X": "-4", "Y": 9})).unwrap();
        assert_eq!((m.x, m.y), (-4, 9));
    }
}
