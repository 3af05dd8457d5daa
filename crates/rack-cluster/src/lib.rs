//! rack-cluster: cluster health reconciliation.
//!
//! Compares the rack's instance groups with the scheduler's view of the
//! cluster. An instance the group considers in service whose scheduler
//! agent is not connected is marked unhealthy so the group replaces it.
//!
//! ```text
//! every 30s:
//!   groups (Instances, SpotInstances) ──► {id → InService?}
//!   scheduler container instances     ──► {id → agent connected?}
//!   InService ∧ ¬connected            ──► set_instance_health(Unhealthy)
//! ```

pub mod monitor;

pub use monitor::{ClusterMonitor, MONITOR_INTERVAL, MonitorReport};
