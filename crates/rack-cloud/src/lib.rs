//! rack-cloud: the cloud tenant as seen by the control plane.
//!
//! Every external API the rack drives sits behind an async trait so the
//! components above never touch an SDK directly. The `memory` module
//! implements all of them in-process.
//!
//! # Architecture
//!
//! ```text
//! Cloud (Clone)
//!   ├── stacks         StackEngine     describe / update / cancel-update
//!   ├── scheduler      Scheduler       clusters, services, tasks, task defs
//!   ├── autoscaling    AutoScaling     groups, instance health, capacity
//!   ├── objects        ObjectStore     settings bucket (env, templates)
//!   ├── kms            KeyManagement   data keys, random bytes, keys
//!   ├── queue          Queue           custom-resource + event queues
//!   ├── logs           Logs            app log groups
//!   └── compute, registry, functions, notifications, rules, firewall
//! ```

pub mod api;
pub mod error;
pub mod memory;
pub mod types;

pub use api::*;
pub use error::{CloudError, CloudResult};
pub use memory::MemoryCloud;
pub use types::*;
