//! rack-events: cloud events into app logs.
//!
//! Two queue consumers feed the per-app log groups so that `convox logs`
//! shows deployment progress next to application output:
//!
//! ```text
//! stack events queue ──► StackEvents ──► "AWS/CloudFormation <status> <resource> <reason>"
//! task events queue  ──► TaskEvents  ──► "[ECS] ..." (pending service tasks, last 5 service events)
//!                              │
//!                              ▼
//!                     AppLogs (lazy system/<nanos> stream per app, sequence token cache)
//! ```
//!
//! Both consumers share `QueueDrain`: a message is deleted once its handler
//! succeeds and left for redelivery when it fails.

pub mod drain;
pub mod logs;
pub mod stack;
pub mod task;

pub use drain::{DrainStats, MessageHandler, QueueDrain};
pub use logs::AppLogs;
pub use stack::{StackEvents, parse_stack_message};
pub use task::{TaskEvent, TaskEvents, recent_events};
