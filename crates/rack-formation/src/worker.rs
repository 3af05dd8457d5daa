//! Queue worker that drains custom-resource callbacks.

use std::sync::Arc;
use std::time::Duration;

use rack_cloud::{Queue, QueueMessage, ReceiveOptions};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::FormationResult;
use crate::request::{Notification, Request};
use crate::responder::Responder;

/// What happened to one queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Replied to the engine and removed from the queue.
    Answered,
    /// Not a custom-resource request, or unreadable. Removed.
    Dropped,
    /// The reply could not be delivered. Left for redelivery.
    Retained,
}

pub struct FormationWorker {
    queue: Arc<dyn Queue>,
    queue_url: String,
    dispatcher: Dispatcher,
    responder: Arc<dyn Responder>,
    receive: ReceiveOptions,
}

impl FormationWorker {
    pub fn new(
        queue: Arc<dyn Queue>,
        queue_url: impl Into<String>,
        dispatcher: Dispatcher,
        responder: Arc<dyn Responder>,
    ) -> Self {
        Self {
            queue,
            queue_url: queue_url.into(),
            dispatcher,
            responder,
            receive: ReceiveOptions::default(),
        }
    }

    pub fn with_receive_options(mut self, receive: ReceiveOptions) -> Self {
        self.receive = receive;
        self
    }

    /// Receive one batch and handle every message in it.
    pub async fn tick(&self) -> FormationResult<Vec<Disposition>> {
        let messages = self.queue.receive(&self.queue_url, self.receive).await?;
        Ok(self.process(messages).await)
    }

    /// Handle a received batch to the end. A failure on one message never
    /// abandons the messages after it.
    async fn process(&self, messages: Vec<QueueMessage>) -> Vec<Disposition> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            out.push(self.handle(&message).await);
        }
        out
    }

    async fn handle(&self, message: &QueueMessage) -> Disposition {
        let request = match Notification::parse(&message.body) {
            Ok(note) if note.is_request() => Request::parse(&note.message),
            Ok(note) => {
                debug!(id = %message.id, subject = %note.subject, "ignoring notification");
                self.delete(message).await;
                return Disposition::Dropped;
            }
            Err(e) => Err(e),
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(id = %message.id, error = %e, "dropping unreadable message");
                self.delete(message).await;
                return Disposition::Dropped;
            }
        };

        let response = self.dispatcher.dispatch(&request).await;
        match self.responder.respond(&request.response_url, &response).await {
            Ok(()) => {
                self.delete(message).await;
                Disposition::Answered
            }
            Err(e) => {
                error!(request = %request.request_id, error = %e, "could not deliver response");
                Disposition::Retained
            }
        }
    }

    async fn delete(&self, message: &QueueMessage) {
        if let Err(e) = self.queue.delete_message(&self.queue_url, &message.receipt).await {
            error!(id = %message.id, error = %e, "could not delete message");
        }
    }

    /// Drain the queue until `shutdown` flips. Shutdown interrupts the wait
    /// for messages, never a batch already received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue_url, "formation worker started");
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
                    error!(error = %e, "formation receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("formation worker shutting down");
    }
}
