//! Routes a request to its handler and always produces a reply.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{FormationError, FormationResult};
use crate::handlers::{HandlerContext, ResourceHandler, registry};
use crate::request::{Outcome, Request, RequestType, Response};

pub struct Dispatcher {
    ctx: HandlerContext,
    handlers: BTreeMap<String, Arc<dyn ResourceHandler>>,
}

impl Dispatcher {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            handlers: registry(),
        }
    }

    /// Register or replace the handler for one resource kind.
    pub fn with_handler(mut self, kind: &str, handler: Arc<dyn ResourceHandler>) -> Self {
        self.handlers.insert(kind.to_string(), handler);
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the request to completion. Errors and panics inside a handler
    /// become a `FAILED` response so the stack engine never waits forever.
    pub async fn dispatch(&self, req: &Request) -> Response {
        match self.run(req).await {
            Ok(outcome) => {
                info!(
                    kind = %req.resource_type,
                    request = %req.request_type,
                    logical = %req.logical_resource_id,
                    physical = %outcome.physical_id,
                    "custom resource succeeded"
                );
                Response::success(req, outcome)
            }
            Err(e) => {
                warn!(
                    kind = %req.resource_type,
                    request = %req.request_type,
                    logical = %req.logical_resource_id,
                    error = %e,
                    "custom resource failed"
                );
                Response::failure(req, e.to_string())
            }
        }
    }

    async fn run(&self, req: &Request) -> FormationResult<Outcome> {
        let kind = req.kind()?;
        let handler = self
            .handlers
            .get(&req.resource_type)
            .cloned()
            .ok_or_else(|| FormationError::UnknownResourceType(req.resource_type.clone()))?;

        let ctx = self.ctx.clone();
        let req = req.clone();
        let task = tokio::spawn(async move {
            match kind {
                RequestType::Create => handler.create(&ctx, &req).await,
                RequestType::Update => handler.update(&ctx, &req).await,
                RequestType::Delete => handler.delete(&ctx, &req).await,
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(FormationError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(FormationError::Failed(e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
