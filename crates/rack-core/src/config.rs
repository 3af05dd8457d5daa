//! Rack-level configuration.
//!
//! Values come from the process environment (the way the rack is launched
//! in production) or from a TOML file for local runs. `merge_env` overlays
//! whatever the environment sets on top of a file config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackConfig {
    pub rack: String,
    pub cluster: String,
    pub subnets: Vec<String>,
    pub vpc: String,
    pub region: String,
    pub version: String,
    pub provider: String,
    pub registry_host: String,
    pub notification_topic: String,
    pub notification_host: String,
    pub autoscale: bool,
    pub spot_instances: bool,
    pub on_demand_min_count: u32,
    pub dynamo_builds: String,
    pub dynamo_releases: String,
    pub encryption_key: Option<String>,
    pub settings_bucket: String,
    pub custom_topic: String,
    pub custom_resource_queue: String,
    pub stack_events_queue: String,
    pub task_events_queue: String,
    pub data_dir: PathBuf,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            rack: "convox".to_string(),
            cluster: String::new(),
            subnets: Vec::new(),
            vpc: String::new(),
            region: "us-east-1".to_string(),
            version: "latest".to_string(),
            provider: "local".to_string(),
            registry_host: String::new(),
            notification_topic: String::new(),
            notification_host: String::new(),
            autoscale: false,
            spot_instances: false,
            on_demand_min_count: 3,
            dynamo_builds: String::new(),
            dynamo_releases: String::new(),
            encryption_key: None,
            settings_bucket: String::new(),
            custom_topic: String::new(),
            custom_resource_queue: String::new(),
            stack_events_queue: String::new(),
            task_events_queue: String::new(),
            data_dir: PathBuf::from("/var/lib/rack"),
        }
    }
}

impl RackConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Build a config from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply(lookup)?;
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay environment variables on top of this config.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        self.apply(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Name of the CloudFormation-style stack backing an app.
    pub fn app_stack(&self, app: &str) -> String {
        format!("{}-{}", self.rack, app)
    }

    /// Reverse of `app_stack`: the app name for a stack, if the stack
    /// belongs to this rack and is not the rack stack itself.
    pub fn app_from_stack<'a>(&self, stack: &'a str) -> Option<&'a str> {
        stack
            .strip_prefix(self.rack.as_str())
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|app| !app.is_empty())
    }

    fn apply<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = lookup(key) {
                *target = v;
            }
        };

        set(&mut self.rack, "RACK");
        set(&mut self.cluster, "CLUSTER");
        set(&mut self.vpc, "VPC");
        set(&mut self.region, "AWS_REGION");
        set(&mut self.version, "VERSION");
        set(&mut self.provider, "PROVIDER");
        set(&mut self.registry_host, "REGISTRY_HOST");
        set(&mut self.notification_topic, "NOTIFICATION_TOPIC");
        set(&mut self.notification_host, "NOTIFICATION_HOST");
        set(&mut self.dynamo_builds, "DYNAMO_BUILDS");
        set(&mut self.dynamo_releases, "DYNAMO_RELEASES");
        set(&mut self.settings_bucket, "SETTINGS_BUCKET");
        set(&mut self.custom_topic, "CUSTOM_TOPIC");
        set(&mut self.custom_resource_queue, "CUSTOM_RESOURCE_QUEUE");
        set(&mut self.stack_events_queue, "STACK_EVENTS_QUEUE");
        set(&mut self.task_events_queue, "TASK_EVENTS_QUEUE");

        if let Some(v) = lookup("SUBNETS") {
            self.subnets = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("AUTOSCALE") {
            self.autoscale = parse_bool("AUTOSCALE", &v)?;
        }
        if let Some(v) = lookup("SPOT_INSTANCES") {
            self.spot_instances = parse_bool("SPOT_INSTANCES", &v)?;
        }
        if let Some(v) = lookup("ON_DEMAND_MIN_COUNT") {
            self.on_demand_min_count = v.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "ON_DEMAND_MIN_COUNT".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("ENCRYPTION_KEY") {
            self.encryption_key = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("RACK_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }

        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn reads_rack_environment() {
        let config = RackConfig::from_lookup(lookup(&[
            ("RACK", "production"),
            ("CLUSTER", "production-cluster"),
            ("SUBNETS", "subnet-a, subnet-b,subnet-c"),
            ("AUTOSCALE", "true"),
            ("SPOT_INSTANCES", "false"),
            ("ON_DEMAND_MIN_COUNT", "2"),
            ("PROVIDER", "aws"),
        ]))
        .unwrap();

        assert_eq!(config.rack, "production");
        assert_eq!(config.cluster, "production-cluster");
        assert_eq!(config.subnets, vec!["subnet-a", "subnet-b", "subnet-c"]);
        assert!(config.autoscale);
        assert!(!config.spot_instances);
        assert_eq!(config.on_demand_min_count, 2);
        assert_eq!(config.provider, "aws");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = RackConfig::from_lookup(lookup(&[("ON_DEMAND_MIN_COUNT", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ON_DEMAND_MIN_COUNT"));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        assert!(RackConfig::from_lookup(lookup(&[("AUTOSCALE", "yes")])).is_err());
    }

    #[test]
    fn empty_encryption_key_is_none() {
        let config = RackConfig::from_lookup(lookup(&[("ENCRYPTION_KEY", "")])).unwrap();
        assert_eq!(config.encryption_key, None);
    }

    #[test]
    fn from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rack.toml");
        std::fs::write(&path, "rack = \"staging\"\nautoscale = true\nsubnets = [\"a\", \"b\"]\n")
            .unwrap();

        let config = RackConfig::from_file(&path).unwrap();
        assert_eq!(config.rack, "staging");
        assert!(config.autoscale);
        assert_eq!(config.subnets.len(), 2);
        assert_eq!(config.on_demand_min_count, 3);
    }

    #[test]
    fn app_stack_names() {
        let config = RackConfig {
            rack: "dev".to_string(),
            ..Default::default()
        };
        assert_eq!(config.app_stack("web"), "dev-web");
        assert_eq!(config.app_from_stack("dev-web"), Some("web"));
        assert_eq!(config.app_from_stack("dev-my-app"), Some("my-app"));
        assert_eq!(config.app_from_stack("dev"), None);
        assert_eq!(config.app_from_stack("other-web"), None);
    }
}
