//! Background pruning of old builds.
//!
//! Requests are serialised through one task; an app that is already queued
//! is not queued again until its prune starts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rack_state::{StateResult, StateStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builds kept per app.
pub const KEEP_BUILDS: usize = 50;

#[derive(Clone)]
pub struct BuildCleanup {
    tx: mpsc::UnboundedSender<String>,
    queued: Arc<Mutex<HashSet<String>>>,
}

impl BuildCleanup {
    /// Start the cleanup task. It exits once every handle has been dropped.
    pub fn spawn(store: StateStore, keep: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let queued: Arc<Mutex<HashSet<String>>> = Arc::default();

        let pending = queued.clone();
        let handle = tokio::spawn(async move {
            while let Some(app) = rx.recv().await {
                pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&app);
                match prune(&store, &app, keep) {
                    Ok(0) => debug!(%app, "no builds to prune"),
                    Ok(n) => info!(%app, deleted = n, "builds pruned"),
                    Err(e) => warn!(%app, error = %e, "build cleanup failed"),
                }
            }
        });

        (Self { tx, queued }, handle)
    }

    /// Queue a prune for `app`. Returns false when one is already queued or
    /// the worker has stopped.
    pub fn request(&self, app: &str) -> bool {
        let mut queued = self.queued.lock().unwrap_or_else(|e| e.into_inner());
        if !queued.insert(app.to_string()) {
            return false;
        }
        if self.tx.send(app.to_string()).is_err() {
            queued.remove(app);
            return false;
        }
        true
    }
}

/// Delete every build beyond the `keep` most recent, sparing the build of
/// the app's current release. Returns how many were deleted.
pub fn prune(store: &StateStore, app: &str, keep: usize) -> StateResult<usize> {
    let mut deleted = 0;
    for build in store.prunable_builds(app, keep)? {
        if store.delete_build(app, &build.id)? {
            deleted += 1;
        }
    }
    Ok(deleted)
}
