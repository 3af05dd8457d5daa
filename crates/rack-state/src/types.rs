//! Domain types persisted by the release store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rack_core::{IdKind, generate_id};

// ── App ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Creating,
    Running,
    Updating,
    Rollback,
    Failed,
    Deleting,
}

impl AppStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Creating => "creating",
            AppStatus::Running => "running",
            AppStatus::Updating => "updating",
            AppStatus::Rollback => "rollback",
            AppStatus::Failed => "failed",
            AppStatus::Deleting => "deleting",
        }
    }

    /// Map a stack-engine status (`UPDATE_IN_PROGRESS`, ...) onto an app status.
    pub fn from_stack_status(status: &str) -> Self {
        match status {
            "CREATE_IN_PROGRESS" => AppStatus::Creating,
            "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "ROLLBACK_COMPLETE"
            | "UPDATE_ROLLBACK_COMPLETE" => AppStatus::Running,
            "DELETE_IN_PROGRESS" => AppStatus::Deleting,
            "ROLLBACK_IN_PROGRESS" | "UPDATE_ROLLBACK_IN_PROGRESS"
            | "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS" => AppStatus::Rollback,
            s if s.ends_with("_IN_PROGRESS") => AppStatus::Updating,
            _ => AppStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    /// Currently promoted release id.
    pub release: Option<String>,
    pub status: AppStatus,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

impl App {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            release: None,
            status: AppStatus::Creating,
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Bound apps share a rack-wide naming scheme for their balancers.
    pub fn is_bound(&self) -> bool {
        self.tags.contains_key("Rack")
    }

    /// ARN of the app's env data key, if any.
    pub fn key_arn(&self) -> Option<&str> {
        self.outputs
            .get("EncryptionKey")
            .or_else(|| self.parameters.get("Key"))
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Object-storage bucket holding this app's settings (env, templates).
    pub fn settings_bucket(&self) -> Option<&str> {
        self.outputs
            .get("Settings")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

// ── Build ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Created,
    Running,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: String,
    pub app: String,
    pub manifest: String,
    pub logs_url: Option<String>,
    pub release: Option<String>,
    pub status: BuildStatus,
    pub description: String,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
}

impl Build {
    pub fn new(app: &str) -> Self {
        Self {
            id: generate_id(IdKind::Build),
            app: app.to_string(),
            manifest: String::new(),
            logs_url: None,
            release: None,
            status: BuildStatus::Created,
            description: String::new(),
            started: Utc::now(),
            ended: None,
        }
    }

    pub fn table_key(&self) -> String {
        format!("{}:{}", self.app, self.id)
    }
}

// ── Release ────────────────────────────────────────────────────────

/// A build bound to an env snapshot.
///
/// `env` is carried in memory only; the store serialises releases without
/// it and callers read it back through the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: String,
    pub app: String,
    pub build: Option<String>,
    #[serde(skip)]
    pub env: BTreeMap<String, String>,
    pub manifest: String,
    /// Set when the release is first saved.
    pub created: Option<DateTime<Utc>>,
}

impl Release {
    pub fn new(app: &str) -> Self {
        Self {
            id: generate_id(IdKind::Release),
            app: app.to_string(),
            build: None,
            env: BTreeMap::new(),
            manifest: String::new(),
            created: None,
        }
    }

    /// A new release inheriting this one's build, manifest and env, with a
    /// fresh id and no creation time.
    pub fn fork(&self) -> Self {
        Self {
            id: generate_id(IdKind::Release),
            app: self.app.clone(),
            build: self.build.clone(),
            env: self.env.clone(),
            manifest: self.manifest.clone(),
            created: None,
        }
    }

    pub fn table_key(&self) -> String {
        format!("{}:{}", self.app, self.id)
    }
}

/// Index key ordering rows newest first under an `{app}:` prefix.
pub(crate) fn created_index_key(app: &str, created: &DateTime<Utc>, id: &str) -> String {
    let millis = u64::try_from(created.timestamp_millis()).unwrap_or(0);
    format!("{app}:{:020}:{id}", u64::MAX - millis)
}
