//! Raw serde shapes accepted in manifest YAML, before normalisation.
//!
//! Most fields admit more than one spelling (string or list, map or
//! `KEY=VALUE` list, integer or range string), so they deserialize into
//! untagged enums and `load` folds them into the typed model.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawBuild {
    Context(String),
    Detailed {
        #[serde(default, alias = "context")]
        path: Option<String>,
        #[serde(default, alias = "manifest")]
        dockerfile: Option<String>,
        #[serde(default)]
        args: Option<RawLabels>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawCommand {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawEnvironment {
    List(Vec<String>),
    Map(BTreeMap<String, Option<RawScalar>>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawLabels {
    Map(BTreeMap<String, RawScalar>),
    List(Vec<String>),
}

/// YAML scalars that should be read as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawScalar {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl RawScalar {
    pub(crate) fn into_string(self) -> String {
        match self {
            RawScalar::Str(s) => s,
            RawScalar::Int(i) => i.to_string(),
            RawScalar::Bool(b) => b.to_string(),
            RawScalar::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawPort {
    Number(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawHealth {
    Path(String),
    Detailed {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        interval: Option<u32>,
        #[serde(default)]
        timeout: Option<u32>,
        #[serde(default)]
        grace: Option<u32>,
        #[serde(default)]
        thresholds: Option<RawThresholds>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawThresholds {
    #[serde(default)]
    pub healthy: Option<u32>,
    #[serde(default)]
    pub unhealthy: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawCount {
    Number(u32),
    Text(String),
    Range { min: RawScalar, max: Option<RawScalar> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawScale {
    Count(u32),
    Text(String),
    Detailed {
        #[serde(default)]
        count: Option<RawCount>,
        #[serde(default)]
        cpu: Option<u32>,
        #[serde(default)]
        memory: Option<u32>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawService {
    pub image: Option<String>,
    pub build: Option<RawBuild>,
    pub dockerfile: Option<String>,
    pub command: Option<RawCommand>,
    pub entrypoint: Option<String>,
    pub environment: Option<RawEnvironment>,
    pub ports: Vec<RawPort>,
    pub health: Option<RawHealth>,
    pub scale: Option<RawScale>,
    pub volumes: Vec<String>,
    pub links: Vec<String>,
    pub labels: Option<RawLabels>,
    pub privileged: bool,
    pub drain: Option<u32>,
    pub mem_limit: Option<RawScalar>,
    pub cpu_shares: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawResource {
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTimer {
    pub schedule: String,
    pub command: String,
    pub service: String,
}
