//! rack-state: the release store.
//!
//! Backed by [redb](https://docs.rs/redb), holds the rack's apps, builds,
//! and releases. Builds and releases are append-only rows keyed by
//! `{app}:{id}`; a secondary index keyed by `{app}:{inverted created}:{id}`
//! makes "newest first" listings a prefix scan.
//!
//! # Architecture
//!
//! ```text
//! StateStore (Arc<redb::Database>, Clone + Send + Sync)
//!   ├── apps               name            → App
//!   ├── builds             app:id          → Build
//!   ├── builds_by_created  app:inv:id      → id
//!   ├── releases           app:id          → Release   (immutable)
//!   └── releases_by_created app:inv:id     → id
//! ```
//!
//! Release env payloads are never stored here; they live encrypted in
//! object storage (see `rack-vault`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
