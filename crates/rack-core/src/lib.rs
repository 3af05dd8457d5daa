//! rack-core: shared configuration and helpers for the rack control plane.
//!
//! Every other crate in the workspace depends on this one for:
//! - `RackConfig`: rack-level settings read from the environment or TOML
//! - identifier generation (`B…`, `R…`, `S…` ids over an upper-case alphabet)
//! - naming helpers used by templates and parameters (`upper_name`, `dash_name`)

pub mod config;
pub mod id;
pub mod names;

pub use config::{ConfigError, RackConfig};
pub use id::{IdKind, generate_id};
pub use names::{dash_name, upper_name};

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Nanoseconds since the Unix epoch.
pub fn epoch_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
