//! Per-app system log streams.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rack_cloud::{CloudError, LogEvent};
use rack_core::epoch_nanos;
use rack_deploy::Rack;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
struct AppStream {
    group: String,
    stream: String,
    token: Option<String>,
}

/// Appends system lines to each app's log group. The stream is created on
/// first use and its sequence token is cached afterwards.
pub struct AppLogs {
    rack: Arc<Rack>,
    streams: Mutex<HashMap<String, AppStream>>,
}

impl AppLogs {
    pub fn new(rack: Arc<Rack>) -> Self {
        Self {
            rack,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn rack(&self) -> &Rack {
        &self.rack
    }

    /// Write `lines` to `app`'s log group, stamped now.
    pub async fn append(&self, app: &str, lines: &[String]) -> anyhow::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp_millis();
        let events: Vec<LogEvent> = lines
            .iter()
            .map(|line| LogEvent {
                timestamp_ms: now,
                message: line.clone(),
            })
            .collect();

        let mut streams = self.streams.lock().await;
        let stream = match streams.get(app) {
            Some(stream) => stream.clone(),
            None => {
                let stream = self.open(app).await?;
                streams.insert(app.to_string(), stream.clone());
                stream
            }
        };

        let logs = &self.rack.cloud().logs;
        let put = logs
            .put_log_events(&stream.group, &stream.stream, &events, stream.token.as_deref())
            .await;
        let token = match put {
            Err(CloudError::InvalidToken { next }) => {
                debug!(%app, "sequence token refreshed");
                logs.put_log_events(&stream.group, &stream.stream, &events, Some(&next))
                    .await?
            }
            other => other?,
        };

        if let Some(entry) = streams.get_mut(app) {
            entry.token = token;
        }
        Ok(())
    }

    async fn open(&self, app: &str) -> anyhow::Result<AppStream> {
        let a = self.rack.app(app).await?;
        let group = a
            .outputs
            .get("LogGroup")
            .filter(|g| !g.is_empty())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("app {app} has no log group"))?;
        let stream = format!("system/{}", epoch_nanos());
        self.rack.cloud().logs.create_log_stream(&group, &stream).await?;
        debug!(%app, %group, %stream, "system log stream created");
        Ok(AppStream {
            group,
            stream,
            token: None,
        })
    }
}
