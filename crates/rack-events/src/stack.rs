//! Stack-engine events.
//!
//! The engine publishes each resource transition as a notification whose
//! message is a block of `Key='value'` lines.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::drain::MessageHandler;
use crate::logs::AppLogs;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    #[serde(default)]
    message: String,
}

/// Parse the `Key='value'` lines of a stack event. Lines without `='` are
/// skipped.
pub fn parse_stack_message(message: &str) -> BTreeMap<String, String> {
    message
        .lines()
        .filter_map(|line| line.split_once("='"))
        .map(|(key, value)| {
            let value = value.strip_suffix('\'').unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

pub struct StackEvents {
    logs: Arc<AppLogs>,
}

impl StackEvents {
    pub fn new(logs: Arc<AppLogs>) -> Self {
        Self { logs }
    }
}

#[async_trait]
impl MessageHandler for StackEvents {
    fn name(&self) -> &'static str {
        "stack-events"
    }

    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        let envelope: Envelope = serde_json::from_str(body)?;
        let event = parse_stack_message(&envelope.message);
        let field = |key: &str| event.get(key).map(String::as_str).unwrap_or_default();

        let stack = field("StackName");
        let config = self.logs.rack().config();
        let Some(app) = config.app_from_stack(stack) else {
            debug!(%stack, "ignoring stack event");
            return Ok(());
        };

        let line = format!(
            "AWS/CloudFormation {} {} {}",
            field("ResourceStatus"),
            field("LogicalResourceId"),
            field("ResourceStatusReason"),
        );
        self.logs.append(app, &[line]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let message = "StackId='arn:aws:cloudformation:us-east-1:1:stack/convox-myapp/x'\n\
                       StackName='convox-myapp'\n\
                       LogicalResourceId='ServiceWeb'\n\
                       ResourceStatus='UPDATE_IN_PROGRESS'\n\
                       ResourceStatusReason='Requested update: a='b''\n\
                       garbage line\n";
        let event = parse_stack_message(message);
        assert_eq!(event["StackName"], "convox-myapp");
        assert_eq!(event["ResourceStatus"], "UPDATE_IN_PROGRESS");
        assert_eq!(event["ResourceStatusReason"], "Requested update: a='b'");
        assert_eq!(event.len(), 5);
    }

    #[test]
    fn empty_reason_is_kept() {
        let event = parse_stack_message(" ResourceStatusReason=''");
        assert_eq!(event["ResourceStatusReason"], "");
    }
}
