//! Per-release env persistence in the app's settings bucket.

use std::collections::BTreeMap;
use std::sync::Arc;

use rack_cloud::{KeyManagement, ObjectStore};
use rack_state::App;
use tracing::debug;

use crate::env::{parse_env, render_env};
use crate::envelope::Crypt;
use crate::error::{VaultError, VaultResult};

/// Object key of a release's env payload.
pub fn env_key(release_id: &str) -> String {
    format!("releases/{release_id}/env")
}

/// Reads and writes release env under `releases/<id>/env`, sealed with the
/// app's data key when it has one.
#[derive(Clone)]
pub struct EnvStore {
    objects: Arc<dyn ObjectStore>,
    crypt: Crypt,
}

impl EnvStore {
    pub fn new(objects: Arc<dyn ObjectStore>, kms: Arc<dyn KeyManagement>) -> Self {
        Self {
            objects,
            crypt: Crypt::new(kms),
        }
    }

    pub fn crypt(&self) -> &Crypt {
        &self.crypt
    }

    pub async fn put(
        &self,
        app: &App,
        release_id: &str,
        env: &BTreeMap<String, String>,
    ) -> VaultResult<()> {
        let bucket = app
            .settings_bucket()
            .ok_or_else(|| VaultError::NoSettings(app.name.clone()))?;
        let plaintext = render_env(env).into_bytes();
        let body = match app.key_arn() {
            Some(key) => self.crypt.encrypt(key, &plaintext).await?,
            None => plaintext,
        };
        self.objects.put_object(bucket, &env_key(release_id), body).await?;
        debug!(app = %app.name, release = %release_id, keys = env.len(), "release env written");
        Ok(())
    }

    /// A release's env; missing payloads read as empty.
    pub async fn get(&self, app: &App, release_id: &str) -> VaultResult<BTreeMap<String, String>> {
        let bucket = app
            .settings_bucket()
            .ok_or_else(|| VaultError::NoSettings(app.name.clone()))?;
        let body = match self.objects.get_object(bucket, &env_key(release_id)).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let plaintext = match app.key_arn() {
            Some(key) => self.crypt.decrypt(key, &body).await?,
            None => body,
        };
        parse_env(&String::from_utf8_lossy(&plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rack_cloud::MemoryCloud;

    fn app(with_key: bool) -> App {
        let mut app = App::new("web");
        app.outputs.insert("Settings".into(), "web-settings".into());
        if with_key {
            app.outputs.insert("EncryptionKey".into(), "arn:aws:kms:key/web".into());
        }
        app
    }

    fn env() -> BTreeMap<String, String> {
        [("FOO", "bar"), ("SECRET", "shh")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn encrypted_round_trip() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = EnvStore::new(cloud.clone(), cloud.clone());
        let app = app(true);

        store.put(&app, "RAAAAAAAAAA", &env()).await.unwrap();
        let raw = cloud.state().objects[&("web-settings".to_string(), env_key("RAAAAAAAAAA"))].clone();
        assert!(!String::from_utf8_lossy(&raw).contains("shh"));

        assert_eq!(store.get(&app, "RAAAAAAAAAA").await.unwrap(), env());
    }

    #[tokio::test]
    async fn plaintext_without_key() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = EnvStore::new(cloud.clone(), cloud.clone());
        let app = app(false);

        store.put(&app, "RBBBBBBBBBB", &env()).await.unwrap();
        let raw = cloud.state().objects[&("web-settings".to_string(), env_key("RBBBBBBBBBB"))].clone();
        assert_eq!(raw, b"FOO=bar\nSECRET=shh");
        assert_eq!(store.get(&app, "RBBBBBBBBBB").await.unwrap(), env());
    }

    #[tokio::test]
    async fn missing_env_is_empty() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = EnvStore::new(cloud.clone(), cloud.clone());
        assert!(store.get(&app(true), "RNOPE").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_settings_bucket() {
        let cloud = Arc::new(MemoryCloud::new());
        let store = EnvStore::new(cloud.clone(), cloud.clone());
        let err = store.put(&App::new("bare"), "R1", &env()).await.unwrap_err();
        assert!(matches!(err, VaultError::NoSettings(_)));
    }
}
