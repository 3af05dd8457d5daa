//! rack-manifest: the app manifest model.
//!
//! Parses a YAML manifest in either of the two supported shapes and
//! normalises it into one internal service graph:
//!
//! ```text
//! v1:  <service>: { image, build, command, environment, ports, links, labels, ... }
//! v2:  version: "2"
//!      environment: [KEY, KEY=default]
//!      resources:   { <name>: { type } }
//!      services:    { <name>: { build, command, environment, health, port(s), scale, ... } }
//!      timers:      { <name>: { schedule, command, service } }
//! ```
//!
//! Loading resolves every service environment against a caller-supplied
//! env map. A bare `KEY` entry is a required reference and loading fails
//! with [`ManifestError::MissingEnv`] when it is unbound; `KEY=value` is a
//! default the supplied env may override; `*` inherits every supplied key.

pub mod balancer;
pub mod error;
pub mod load;
pub mod port;
pub mod render;
pub mod types;

mod raw;

pub use balancer::{Balancer, LoadBalancerName, bound_balancer_name};
pub use error::{ManifestError, ManifestResult};
pub use load::load;
pub use port::{Port, Protocol};
pub use render::render;
pub use types::*;
