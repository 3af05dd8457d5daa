//! rack-autoscale: sizing the rack's instance pools.
//!
//! Two reconcilers, each a single task on its own ticker:
//!
//! ```text
//! Autoscaler (60s, AUTOSCALE=true, status running)
//!   needed = max(ceil(processMemory / instanceMemory) + 1, 2, processWidth + 1)
//!   needed ≠ InstanceCount ──► system_save(needed)
//!
//! SpotReplacer (5s, SPOT_INSTANCES=true, status running|converging)
//!   spotDesired     = InstanceCount − ON_DEMAND_MIN_COUNT
//!   onDemandDesired = InstanceCount − healthy spot instances
//! ```
//!
//! The `+1` keeps headroom for rolling updates; the width floor keeps one
//! host beyond the widest balanced service so replacements can schedule.

pub mod scaler;
pub mod spot;

pub use scaler::{AUTOSCALE_INTERVAL, Autoscaler, ScaleDecision, needed_instances};
pub use spot::{SPOT_INTERVAL, SpotPlan, SpotReplacer, spot_plan};
