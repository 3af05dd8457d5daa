//! Custom-resource wire format.
//!
//! The stack engine publishes each callback to a notification topic; the
//! queue receives the notification envelope and the request itself is a
//! JSON document in its `Message` field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FormationError, FormationResult};

/// Subject the stack engine stamps on custom-resource notifications.
pub const REQUEST_SUBJECT: &str = "AWS CloudFormation custom resource request";

/// Physical id reported when a create never produced a resource.
pub const INVALID_PHYSICAL_ID: &str = "invalid";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

impl Notification {
    pub fn parse(body: &str) -> FormationResult<Self> {
        serde_json::from_str(body).map_err(|e| FormationError::Message(e.to_string()))
    }

    pub fn is_request(&self) -> bool {
        self.subject == REQUEST_SUBJECT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn parse(s: &str) -> FormationResult<Self> {
        match s {
            "Create" => Ok(RequestType::Create),
            "Update" => Ok(RequestType::Update),
            "Delete" => Ok(RequestType::Delete),
            other => Err(FormationError::UnknownRequestType(other.to_string())),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestType::Create => "Create",
            RequestType::Update => "Update",
            RequestType::Delete => "Delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    pub request_type: String,
    pub resource_type: String,
    pub request_id: String,
    pub stack_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    #[serde(default)]
    pub resource_properties: Value,
    #[serde(default)]
    pub old_resource_properties: Option<Value>,
}

impl Request {
    pub fn parse(message: &str) -> FormationResult<Self> {
        serde_json::from_str(message).map_err(|e| FormationError::Message(e.to_string()))
    }

    pub fn kind(&self) -> FormationResult<RequestType> {
        RequestType::parse(&self.request_type)
    }

    /// The physical id the engine already knows, or empty on create.
    pub fn physical_id(&self) -> &str {
        self.physical_resource_id.as_deref().unwrap_or_default()
    }

    /// Stack name from `arn:...:stack/<name>/<uuid>`.
    pub fn stack_name(&self) -> &str {
        self.stack_id
            .split('/')
            .nth(1)
            .unwrap_or(self.stack_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub request_id: String,
    pub stack_id: String,
    pub logical_resource_id: String,
    pub physical_resource_id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub data: BTreeMap<String, String>,
}

impl Response {
    pub fn success(req: &Request, outcome: Outcome) -> Self {
        Self {
            request_id: req.request_id.clone(),
            stack_id: req.stack_id.clone(),
            logical_resource_id: req.logical_resource_id.clone(),
            physical_resource_id: outcome.physical_id,
            status: Status::Success,
            reason: None,
            data: outcome.outputs,
        }
    }

    /// A failure reply. Creates that failed report the `invalid` id so the
    /// engine rolls back; updates and deletes keep the id it already holds.
    pub fn failure(req: &Request, reason: impl Into<String>) -> Self {
        let physical_id = match (req.kind(), req.physical_resource_id.as_deref()) {
            (Ok(RequestType::Create), _) | (_, None) | (_, Some("")) => INVALID_PHYSICAL_ID,
            (_, Some(id)) => id,
        };
        Self {
            request_id: req.request_id.clone(),
            stack_id: req.stack_id.clone(),
            logical_resource_id: req.logical_resource_id.clone(),
            physical_resource_id: physical_id.to_string(),
            status: Status::Failed,
            reason: Some(reason.into()),
            data: BTreeMap::new(),
        }
    }
}

/// What a handler produced for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub physical_id: String,
    pub outputs: BTreeMap<String, String>,
}

impl Outcome {
    pub fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}
