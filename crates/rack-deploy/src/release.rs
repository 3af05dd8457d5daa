//! Releases: creation, forking, env changes and promotion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use rack_cloud::{StackEngine, object_url};
use rack_manifest::load;
use rack_state::{App, AppStatus, Release};
use rack_template::{HOST_PORT_MAX, HOST_PORT_MIN, TemplateInput, synthesise, template_parameters};
use rack_vault::env_key;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::StackCache;
use crate::error::{DeployError, DeployResult};
use crate::rack::Rack;

pub const DEFAULT_RELEASE_LIMIT: usize = 20;

/// Object key a release's template is stored under.
pub fn template_key(release_id: &str) -> String {
    format!("templates/{release_id}")
}

/// How a submitted promotion ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The stack left its in-progress state with this status.
    Settled(String),
    /// The update was cancelled and rolled back.
    Cancelled,
    /// The stack could no longer be observed.
    Lost(String),
}

/// A submitted promotion. The stack converges in the background; `wait`
/// blocks until it settles or is cancelled.
pub struct Promotion {
    pub stack: String,
    pub release: String,
    watcher: JoinHandle<PromotionOutcome>,
}

impl Promotion {
    pub async fn wait(self) -> DeployResult<PromotionOutcome> {
        self.watcher
            .await
            .map_err(|e| DeployError::Watcher(e.to_string()))
    }
}

impl Rack {
    /// Create a release from the latest one, optionally swapping in a new
    /// build (and its manifest) or a new env.
    pub async fn release_create(
        &self,
        app: &str,
        build: Option<&str>,
        env: Option<BTreeMap<String, String>>,
    ) -> DeployResult<Release> {
        let a = self.app(app).await?;
        let mut release = self.store.fork_release(app)?;

        release.env = match (env, self.store.latest_release(app)?) {
            (Some(env), _) => env,
            (None, Some(latest)) => self.env.get(&a, &latest.id).await?,
            (None, None) => BTreeMap::new(),
        };

        if let Some(id) = build {
            let b = self
                .store
                .get_build(app, id)?
                .ok_or_else(|| DeployError::NotFound(format!("no such build: {id}")))?;
            release.build = Some(b.id);
            release.manifest = b.manifest;
        }

        if !release.manifest.is_empty() {
            load(&release.manifest, &release.env)?;
        }

        let mut saved = self.store.save_release(&release)?;
        self.env.put(&a, &saved.id, &release.env).await?;
        saved.env = release.env;
        info!(%app, release = %saved.id, build = ?saved.build, "release created");
        Ok(saved)
    }

    pub async fn release_fork(&self, app: &str) -> DeployResult<Release> {
        self.release_create(app, None, None).await
    }

    /// A release with its env decrypted.
    pub async fn release_get(&self, app: &str, id: &str) -> DeployResult<Release> {
        let a = self.app(app).await?;
        let mut release = self
            .store
            .get_release(app, id)?
            .ok_or_else(|| DeployError::NotFound(format!("no such release: {id}")))?;
        release.env = self.env.get(&a, id).await?;
        Ok(release)
    }

    /// Releases newest first; `limit` defaults to 20.
    pub fn release_list(&self, app: &str, limit: Option<usize>) -> DeployResult<Vec<Release>> {
        Ok(self
            .store
            .list_releases(app, limit.unwrap_or(DEFAULT_RELEASE_LIMIT))?)
    }

    /// Env of the latest release.
    pub async fn env_get(&self, app: &str) -> DeployResult<BTreeMap<String, String>> {
        let a = self.app(app).await?;
        match self.store.latest_release(app)? {
            Some(latest) => Ok(self.env.get(&a, &latest.id).await?),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Replace an app's env. Returns the release carrying it; the release
    /// still has to be promoted.
    pub async fn env_set(&self, app: &str, env: BTreeMap<String, String>) -> DeployResult<Release> {
        self.release_create(app, None, Some(env)).await
    }

    /// Submit a release to the app's stack. Returns once the update is
    /// accepted; convergence is observed by the returned `Promotion`.
    /// Cancelling `cancel` before submission aborts; after submission it
    /// cancels the stack update.
    pub async fn release_promote(
        &self,
        app: &str,
        id: &str,
        cancel: CancellationToken,
    ) -> DeployResult<Promotion> {
        let mut a = self.app(app).await?;
        let mut release = self
            .store
            .get_release(app, id)?
            .ok_or_else(|| DeployError::NotFound(format!("no such release: {id}")))?;

        if a.status != AppStatus::Running {
            return Err(DeployError::Conflict(format!(
                "app {app} is already updating ({})",
                a.status.as_str()
            )));
        }

        let bucket = a
            .settings_bucket()
            .ok_or_else(|| DeployError::Validation(format!("app {app} has no settings bucket")))?
            .to_string();
        release.env = self.env.get(&a, id).await?;

        let manifest = load(&release.manifest, &release.env)?;
        let system = self.system_get().await?;
        manifest.validate_capacity(system.count)?;

        let key = template_key(id);
        let template = match self.cloud.objects.get_object(&bucket, &key).await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(e) if e.is_not_found() => {
                let template = synthesise(&TemplateInput {
                    manifest: &manifest,
                    release: &release,
                    app: &a,
                    rack: &self.config,
                })?;
                self.cloud
                    .objects
                    .put_object(&bucket, &key, template.clone().into_bytes())
                    .await?;
                debug!(%app, release = %id, "template stored");
                template
            }
            Err(e) => return Err(e.into()),
        };

        let declared = template_parameters(&template)?;
        let params = self.promotion_parameters(&a, &bucket, id, &declared);
        let declared: BTreeSet<String> = declared.into_keys().collect();

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        let stack = self.config.app_stack(app);
        let url = object_url(&bucket, &self.config.region, &key);
        match self.update_stack(&stack, Some((url, declared)), &params).await {
            Err(DeployError::Cloud(e)) if e.is_in_progress() || e.code() == "Conflict" => {
                return Err(DeployError::Conflict(format!("app {app} is already updating")));
            }
            other => other?,
        }

        a.release = Some(id.to_string());
        self.store.put_app(&a)?;

        self.notify(
            "release:promote",
            BTreeMap::from([("app", app.to_string()), ("id", id.to_string())]),
        )
        .await;
        if let Some(cleanup) = &self.cleanup {
            cleanup.request(app);
        }
        info!(%app, release = %id, %stack, "release promoted");

        let watcher = tokio::spawn(watch_promotion(
            self.cloud.stacks.clone(),
            self.stacks.clone(),
            stack.clone(),
            self.promotion_poll,
            cancel,
        ));
        Ok(Promotion {
            stack,
            release: id.to_string(),
            watcher,
        })
    }

    /// Template defaults, then the app's current values, then fresh host
    /// ports for any the app never had, then the release wiring. Only
    /// declared parameters survive.
    fn promotion_parameters(
        &self,
        app: &App,
        bucket: &str,
        release: &str,
        declared: &BTreeMap<String, Option<String>>,
    ) -> BTreeMap<String, String> {
        let mut params: BTreeMap<String, String> = declared
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.clone()?)))
            .collect();
        let current = &app.parameters;
        params.extend(current.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut rng = rand::thread_rng();
        for key in declared.keys().filter(|k| is_host_port(k)) {
            if !current.contains_key(key) {
                params.insert(key.clone(), rng.gen_range(HOST_PORT_MIN..HOST_PORT_MAX).to_string());
            }
        }

        params.insert(
            "Environment".into(),
            object_url(bucket, &self.config.region, &env_key(release)),
        );
        params.insert("Release".into(), release.to_string());
        params.insert("Version".into(), self.config.version.clone());
        let key = app
            .key_arn()
            .map(str::to_string)
            .or_else(|| self.config.encryption_key.clone());
        if let Some(key) = key {
            params.insert("Key".into(), key);
        }
        params.insert("Cluster".into(), self.config.cluster.clone());
        params.insert("Subnets".into(), self.config.subnets.join(","));
        params.insert("VPC".into(), self.config.vpc.clone());

        params.retain(|k, _| declared.contains_key(k));
        params
    }
}

/// `<Service>Port<N>Host`
fn is_host_port(key: &str) -> bool {
    key.strip_suffix("Host")
        .and_then(|rest| rest.rsplit_once("Port"))
        .is_some_and(|(service, port)| {
            !service.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        })
}

async fn watch_promotion(
    stacks: Arc<dyn StackEngine>,
    cache: Arc<StackCache>,
    name: String,
    poll: Duration,
    cancel: CancellationToken,
) -> PromotionOutcome {
    loop {
        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(poll) => false,
        };

        let stack = match stacks.describe_stack(&name).await {
            Ok(stack) => stack,
            Err(e) => {
                warn!(stack = %name, error = %e, "lost track of promotion");
                return PromotionOutcome::Lost(e.to_string());
            }
        };
        if !stack.is_updating() {
            cache.invalidate(&name);
            return PromotionOutcome::Settled(stack.status);
        }
        if cancelled {
            cache.invalidate(&name);
            return match stacks.cancel_update_stack(&name).await {
                Ok(()) => {
                    info!(stack = %name, "promotion cancelled");
                    PromotionOutcome::Cancelled
                }
                Err(e) => {
                    warn!(stack = %name, error = %e, "cancel update failed");
                    PromotionOutcome::Lost(e.to_string())
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_keys() {
        assert!(is_host_port("WebPort3000Host"));
        assert!(is_host_port("MyWorkerPort53Host"));
        assert!(!is_host_port("WebPort3000Balancer"));
        assert!(!is_host_port("BalancerHost"));
        assert!(!is_host_port("Port80Host"));
        assert!(!is_host_port("WebPortHost"));
    }

    #[test]
    fn template_keys() {
        assert_eq!(template_key("RABCDEFGHIJ"), "templates/RABCDEFGHIJ");
    }
}
