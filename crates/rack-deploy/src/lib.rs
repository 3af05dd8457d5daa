//! rack-deploy: the deployment coordinator.
//!
//! Turns releases into stack updates. A promotion loads (or synthesises and
//! stores) the release's template, merges the app's parameters over the
//! template defaults, adds the release wiring and submits one update. The
//! coordinator never waits for convergence; the returned `Promotion` can
//! be awaited or cancelled.
//!
//! # Architecture
//!
//! ```text
//! Rack { config, cloud, store, env vault, stack cache }
//!   ├── release_create / fork / get / list, env_get / env_set
//!   ├── release_promote ──► template ──► params ──► update_stack
//!   │                                     └── watcher (cancel → CancelUpdateStack)
//!   ├── scale ──► capacity guard ──► parameter-only update
//!   ├── system_get / system_save (rack stack, InstanceCount)
//!   └── BuildCleanup (one task, requests coalesced per app)
//! ```
//!
//! Every stack update invalidates the describe-stack cache entry for its
//! stack before and after it is issued.

pub mod cache;
pub mod capacity;
pub mod cleanup;
pub mod error;
pub mod rack;
pub mod release;
pub mod scale;
pub mod system;

pub use cache::{STACK_CACHE_TTL, StackCache};
pub use capacity::{Capacity, capacity};
pub use cleanup::{BuildCleanup, KEEP_BUILDS, prune};
pub use error::{DeployError, DeployResult, ErrorKind};
pub use rack::{CAPABILITY_IAM, Rack, stack_update};
pub use release::{DEFAULT_RELEASE_LIMIT, Promotion, PromotionOutcome, template_key};
pub use scale::{ScaleOptions, check_scale};
pub use system::{INSTANCES_OUTPUT, MIN_INSTANCE_COUNT, SPOT_INSTANCES_OUTPUT, System, human_status};
