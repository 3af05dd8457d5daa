//! rack-template: stack templates from manifests.
//!
//! A release's manifest is expanded into a CloudFormation-style JSON
//! document describing the app's log group, settings bucket, per-service
//! task definitions and services, balancers, and scheduled timers.
//!
//! ```text
//! Manifest + Release + App + RackConfig
//!        │
//!        ▼
//!   synthesise() ──► { Conditions, Parameters, Resources, Outputs }
//!                         │
//!                         └── template_parameters() ──► promote merge
//! ```
//!
//! Synthesis is deterministic: identical inputs produce byte-identical
//! output. Host ports default to a value hashed from the app, service and
//! container port; the deployment coordinator replaces them with random
//! ports the first time a release is promoted.

pub mod error;
pub mod params;
pub mod synth;

pub use error::{TemplateError, TemplateResult};
pub use params::{
    HOST_PORT_MAX, HOST_PORT_MIN, default_host_port, template_parameters,
};
pub use synth::{TEMPLATE_VERSION, TemplateInput, primary_service, synthesise};
