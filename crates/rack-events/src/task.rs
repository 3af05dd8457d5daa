//! Scheduler task state changes.

use std::sync::Arc;

use async_trait::async_trait;
use rack_cloud::ServiceEvent;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::drain::MessageHandler;
use crate::logs::AppLogs;

const TASK_STATE_CHANGE: &str = "ECS Task State Change";
const SERVICE_GROUP_PREFIX: &str = "service:";
const SERVICE_EVENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskEvent {
    #[serde(rename = "detail-type", default)]
    pub detail_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub detail: TaskDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    #[serde(default)]
    pub cluster_arn: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub last_status: String,
    #[serde(default)]
    pub task_arn: String,
    #[serde(default)]
    pub containers: Vec<TaskContainer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_status: String,
}

/// The `limit` most recent service events, oldest first, as log lines.
pub fn recent_events(events: &[ServiceEvent], limit: usize) -> Vec<String> {
    let mut recent: Vec<&ServiceEvent> = events.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(limit);
    recent.reverse();
    recent
        .into_iter()
        .map(|e| format!("[ECS] event=\"{}\"", e.message.replace(['(', ')'], "")))
        .collect()
}

pub struct TaskEvents {
    logs: Arc<AppLogs>,
}

impl TaskEvents {
    pub fn new(logs: Arc<AppLogs>) -> Self {
        Self { logs }
    }
}

#[async_trait]
impl MessageHandler for TaskEvents {
    fn name(&self) -> &'static str {
        "task-events"
    }

    async fn handle(&self, body: &str) -> anyhow::Result<()> {
        let event: TaskEvent = serde_json::from_str(body)?;
        if event.detail_type != TASK_STATE_CHANGE {
            debug!(source = %event.source, detail_type = %event.detail_type, "ignoring event");
            return Ok(());
        }
        let detail = &event.detail;

        let Some(service) = detail.group.strip_prefix(SERVICE_GROUP_PREFIX) else {
            debug!(group = %detail.group, "ignoring non-service task");
            return Ok(());
        };
        let Some((stack, _)) = service.split_once("-Service") else {
            debug!(%service, "ignoring service outside any app");
            return Ok(());
        };
        let rack = self.logs.rack();
        let Some(app) = rack.config().app_from_stack(stack) else {
            debug!(%stack, "ignoring task outside this rack");
            return Ok(());
        };
        let Some((_, task)) = detail.task_arn.split_once('/') else {
            return Err(anyhow::anyhow!("unknown task: {}", detail.task_arn));
        };

        let prefix = format!(
            "[ECS] service=\"{service}\" task=\"{task}\" status=\"{}\"",
            detail.last_status
        );
        let mut lines: Vec<String> = detail
            .containers
            .iter()
            .map(|c| format!("{prefix} container=\"{}\"", c.name))
            .collect();

        if detail.last_status == "PENDING" {
            let cluster = detail
                .cluster_arn
                .split_once(":cluster/")
                .map_or(rack.config().cluster.as_str(), |(_, name)| name);
            match rack.cloud().scheduler.describe_service(cluster, service).await {
                Ok(svc) => lines.extend(recent_events(&svc.events, SERVICE_EVENT_LIMIT)),
                Err(e) => warn!(%service, error = %e, "could not read service events"),
            }
        }

        self.logs.append(app, &lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(id: &str, secs: i64, message: &str) -> ServiceEvent {
        ServiceEvent {
            id: id.into(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            message: message.into(),
        }
    }

    #[test]
    fn keeps_five_newest_in_ascending_order() {
        let events: Vec<ServiceEvent> = (0..8)
            .rev()
            .map(|i| event(&format!("e{i}"), 1_700_000_000 + i, &format!("step {i} (task x)")))
            .collect();
        let lines = recent_events(&events, 5);
        assert_eq!(
            lines,
            vec![
                "[ECS] event=\"step 3 task x\"",
                "[ECS] event=\"step 4 task x\"",
                "[ECS] event=\"step 5 task x\"",
                "[ECS] event=\"step 6 task x\"",
                "[ECS] event=\"step 7 task x\"",
            ]
        );
    }

    #[test]
    fn parses_task_state_change() {
        let body = r#"{
            "detail-type": "ECS Task State Change",
            "source": "aws.ecs",
            "detail": {
                "clusterArn": "arn:aws:ecs:us-east-1:1:cluster/convox-cluster",
                "group": "service:convox-myapp-ServiceWeb-ABC",
                "lastStatus": "PENDING",
                "taskArn": "arn:aws:ecs:us-east-1:1:task/1234",
                "containers": [{"name": "web", "lastStatus": "PENDING"}]
            }
        }"#;
        let e: TaskEvent = serde_json::from_str(body).unwrap();
        assert_eq!(e.detail.group, "service:convox-myapp-ServiceWeb-ABC");
        assert_eq!(e.detail.containers[0].name, "web");
        assert_eq!(e.detail.last_status, "PENDING");
    }
}
