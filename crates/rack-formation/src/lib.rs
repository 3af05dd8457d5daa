//! rack-formation: custom resources for the stack engine.
//!
//! The engine publishes a callback for every custom resource it creates,
//! updates or deletes. The worker drains those callbacks from a queue,
//! runs the matching handler against the cloud, and PUTs the result back
//! to the engine's pre-signed response URL.
//!
//! # Architecture
//!
//! ```text
//! FormationWorker
//!   ├── Queue::receive ──► Notification ──► Request
//!   ├── Dispatcher
//!   │   ├── ResourceType → ResourceHandler (14 kinds)
//!   │   └── spawned task; errors and panics → FAILED
//!   ├── Responder::respond(ResponseURL, Response)
//!   └── delete message once answered
//! ```
//!
//! A message whose reply cannot be delivered stays on the queue and is
//! retried when its visibility timeout lapses.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod properties;
pub mod request;
pub mod responder;
pub mod worker;

pub use dispatch::Dispatcher;
pub use error::{FormationError, FormationResult};
pub use handlers::{HandlerContext, ResourceHandler, RetryPolicy};
pub use request::{
    INVALID_PHYSICAL_ID, Notification, Outcome, REQUEST_SUBJECT, Request, RequestType, Response,
    Status,
};
pub use responder::{HttpResponder, Responder};
pub use worker::{Disposition, FormationWorker};
