//! Shared queue-drain loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rack_cloud::{CloudResult, Queue, QueueMessage, ReceiveOptions};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, body: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub handled: usize,
    pub failed: usize,
}

pub struct QueueDrain<H> {
    queue: Arc<dyn Queue>,
    queue_url: String,
    handler: H,
    receive: ReceiveOptions,
}

impl<H: MessageHandler> QueueDrain<H> {
    pub fn new(queue: Arc<dyn Queue>, queue_url: impl Into<String>, handler: H) -> Self {
        Self {
            queue,
            queue_url: queue_url.into(),
            handler,
            receive: ReceiveOptions::default(),
        }
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    /// Receive one batch. Handler failures are logged and the message is
    /// left to reappear; only receive errors fail the tick.
    pub async fn tick(&self) -> CloudResult<DrainStats> {
        let messages = self.queue.receive(&self.queue_url, self.receive).await?;
        Ok(self.process(messages).await)
    }

    async fn process(&self, messages: Vec<QueueMessage>) -> DrainStats {
        let mut stats = DrainStats::default();
        for message in messages {
            match self.handler.handle(&message.body).await {
                Ok(()) => {
                    if let Err(e) = self.queue.delete_message(&self.queue_url, &message.receipt).await {
                        error!(handler = self.handler.name(), id = %message.id, error = %e, "could not delete message");
                    }
                    stats.handled += 1;
                }
                Err(e) => {
                    warn!(handler = self.handler.name(), id = %message.id, error = %e, "event handler failed");
                    stats.failed += 1;
                }
            }
        }
        if stats != DrainStats::default() {
            debug!(handler = self.handler.name(), handled = stats.handled, failed = stats.failed, "drained");
        }
        stats
    }

    /// Drain until `shutdown` flips. A received batch is always handled to
    /// the end before the loop looks at `shutdown` again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(handler = self.handler.name(), queue = %self.queue_url, "event queue started");
        while !*shutdown.borrow() {
            let received = tokio::select! {
                result = self.queue.receive(&self.queue_url, self.receive) => result,
                _ = shutdown.changed() => break,
            };
            match received {
                Ok(messages) if messages.is_empty() => tokio::task::yield_now().await,
                Ok(messages) => {
                    self.process(messages).await;
                }
                Err(e) => {
                    error!(handler = self.handler.name(), error = %e, "event queue receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!(handler = self.handler.name(), "event queue shutting down");
    }
}
