//! Background worker wiring.

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use rack_autoscale::{AUTOSCALE_INTERVAL, Autoscaler, SPOT_INTERVAL, SpotReplacer};
use rack_cloud::{Cloud, Stack};
use rack_cluster::{ClusterMonitor, MONITOR_INTERVAL};
use rack_core::RackConfig;
use rack_deploy::{BuildCleanup, INSTANCES_OUTPUT, KEEP_BUILDS, Rack};
use rack_events::{AppLogs, QueueDrain, StackEvents, TaskEvents};
use rack_formation::{Dispatcher, FormationWorker, HandlerContext, HttpResponder};
use rack_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// In-process cloud, for development and fixtures.
    Local,
    Aws,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Worker {
    Monitor,
    Autoscale,
    Spot,
    Formation,
    Events,
}

impl Worker {
    pub const ALL: [Worker; 5] = [
        Worker::Formation,
        Worker::Monitor,
        Worker::Autoscale,
        Worker::Spot,
        Worker::Events,
    ];
}

/// Cloud handles for `provider`.
pub fn cloud(config: &RackConfig, provider: Provider) -> anyhow::Result<Cloud> {
    match provider {
        Provider::Local => {
            let (cloud, memory) = Cloud::memory();
            let mut rack = Stack::new(&config.rack, "CREATE_COMPLETE");
            rack.parameters.insert("InstanceCount".into(), "3".into());
            rack.outputs
                .insert(INSTANCES_OUTPUT.into(), format!("{}-Instances", config.rack));
            memory.put_stack(rack);
            Ok(cloud)
        }
        Provider::Aws => anyhow::bail!("provider aws is not available in this build"),
    }
}

/// Start `workers` and run them until Ctrl-C.
pub async fn run(config: RackConfig, provider: Provider, workers: &[Worker]) -> anyhow::Result<()> {
    info!(rack = %config.rack, ?provider, "rack daemon starting");
    let cloud = cloud(&config, provider)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("rack.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (cleanup, cleanup_task) = BuildCleanup::spawn(store.clone(), KEEP_BUILDS);
    let rack = Arc::new(Rack::new(config.clone(), cloud.clone(), store).with_build_cleanup(cleanup));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    for worker in workers {
        let shutdown = shutdown_rx.clone();
        match worker {
            Worker::Formation => {
                if config.custom_resource_queue.is_empty() {
                    warn!("CUSTOM_RESOURCE_QUEUE not set, formation worker disabled");
                    continue;
                }
                let dispatcher = Dispatcher::new(HandlerContext::new(cloud.clone()));
                let responder = Arc::new(HttpResponder::new(RESPONSE_TIMEOUT)?);
                let formation = FormationWorker::new(
                    cloud.queue.clone(),
                    config.custom_resource_queue.clone(),
                    dispatcher,
                    responder,
                );
                handles.push(tokio::spawn(formation.run(shutdown)));
            }
            Worker::Monitor => {
                let monitor = ClusterMonitor::new(rack.clone());
                handles.push(tokio::spawn(monitor.run(MONITOR_INTERVAL, shutdown)));
            }
            Worker::Autoscale => {
                let autoscaler = Autoscaler::new(rack.clone());
                handles.push(tokio::spawn(autoscaler.run(AUTOSCALE_INTERVAL, shutdown)));
            }
            Worker::Spot => {
                let spot = SpotReplacer::new(rack.clone());
                handles.push(tokio::spawn(spot.run(SPOT_INTERVAL, shutdown)));
            }
            Worker::Events => {
                let logs = Arc::new(AppLogs::new(rack.clone()));
                if config.stack_events_queue.is_empty() {
                    warn!("STACK_EVENTS_QUEUE not set, stack events disabled");
                } else {
                    let drain = QueueDrain::new(
                        cloud.queue.clone(),
                        config.stack_events_queue.clone(),
                        StackEvents::new(logs.clone()),
                    );
                    handles.push(tokio::spawn(drain.run(shutdown.clone())));
                }
                if config.task_events_queue.is_empty() {
                    warn!("TASK_EVENTS_QUEUE not set, task events disabled");
                } else {
                    let drain = QueueDrain::new(
                        cloud.queue.clone(),
                        config.task_events_queue.clone(),
                        TaskEvents::new(logs),
                    );
                    handles.push(tokio::spawn(drain.run(shutdown)));
                }
            }
        }
    }

    if handles.is_empty() {
        anyhow::bail!("no workers to run");
    }
    info!(workers = handles.len(), "workers started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        let _ = handle.await;
    }
    cleanup_task.abort();

    info!("rack daemon stopped");
    Ok(())
}
