//! StateStore: redb-backed persistence for apps, builds, and releases.
//!
//! Rows are JSON-serialized into redb's `&[u8]` value columns. Builds and
//! releases are indexed by creation time so listings come back newest
//! first without sorting. The store supports both on-disk and in-memory
//! backends (the latter for testing and the local provider).

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe release store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "release store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory release store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(BUILDS).map_err(map_err!(Table))?;
        txn.open_table(BUILDS_BY_CREATED).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(RELEASES_BY_CREATED).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// Insert or update an app.
    pub fn put_app(&self, app: &App) -> StateResult<()> {
        self.put_row(APPS, &app.name, app)?;
        debug!(app = %app.name, status = app.status.as_str(), "app stored");
        Ok(())
    }

    pub fn get_app(&self, name: &str) -> StateResult<Option<App>> {
        self.get_row(APPS, name)
    }

    /// Get an app, failing with `NotFound` when absent.
    pub fn app(&self, name: &str) -> StateResult<App> {
        self.get_app(name)?
            .ok_or_else(|| StateError::NotFound(format!("no such app: {name}")))
    }

    pub fn list_apps(&self) -> StateResult<Vec<App>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APPS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let app: App = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(app);
        }
        Ok(results)
    }

    /// Delete an app. Returns true if it existed.
    pub fn delete_app(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APPS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %name, existed, "app deleted");
        Ok(existed)
    }

    // ── Builds ─────────────────────────────────────────────────────

    /// Insert or update a build. The creation index is keyed by `started`.
    pub fn put_build(&self, build: &Build) -> StateResult<()> {
        let key = build.table_key();
        let value = serde_json::to_vec(build).map_err(map_err!(Serialize))?;
        let index_key = created_index_key(&build.app, &build.started, &build.id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut rows = txn.open_table(BUILDS).map_err(map_err!(Table))?;
            rows.insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(BUILDS_BY_CREATED).map_err(map_err!(Table))?;
            index
                .insert(index_key.as_str(), build.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "build stored");
        Ok(())
    }

    pub fn get_build(&self, app: &str, id: &str) -> StateResult<Option<Build>> {
        self.get_row(BUILDS, &format!("{app}:{id}"))
    }

    /// Builds for an app, newest first.
    pub fn list_builds(&self, app: &str, limit: usize) -> StateResult<Vec<Build>> {
        let ids = self.scan_index(BUILDS_BY_CREATED, app, limit)?;
        let mut builds = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(build) = self.get_build(app, &id)? {
                builds.push(build);
            }
        }
        Ok(builds)
    }

    /// Delete a build and its index entry. Returns true if it existed.
    pub fn delete_build(&self, app: &str, id: &str) -> StateResult<bool> {
        let Some(build) = self.get_build(app, id)? else {
            return Ok(false);
        };
        let index_key = created_index_key(app, &build.started, id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut rows = txn.open_table(BUILDS).map_err(map_err!(Table))?;
            rows.remove(build.table_key().as_str())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(BUILDS_BY_CREATED).map_err(map_err!(Table))?;
            index.remove(index_key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%app, build = %id, "build deleted");
        Ok(true)
    }

    /// Builds beyond the `keep` most recent, excluding the build of the
    /// app's current release.
    pub fn prunable_builds(&self, app: &str, keep: usize) -> StateResult<Vec<Build>> {
        let protected = match self.get_app(app)?.and_then(|a| a.release) {
            Some(release) => self.get_release(app, &release)?.and_then(|r| r.build),
            None => None,
        };

        let all = self.list_builds(app, usize::MAX)?;
        Ok(all
            .into_iter()
            .skip(keep)
            .filter(|b| protected.as_deref() != Some(b.id.as_str()))
            .collect())
    }

    // ── Releases ───────────────────────────────────────────────────

    /// Persist a new release. Releases are immutable: saving an id that
    /// already exists fails with `AlreadyExists`. Returns the release as
    /// stored, with `created` filled in.
    pub fn save_release(&self, release: &Release) -> StateResult<Release> {
        let mut stored = release.clone();
        let created = *stored.created.get_or_insert_with(Utc::now);

        let key = stored.table_key();
        let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
        let index_key = created_index_key(&stored.app, &created, &stored.id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut rows = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            if rows.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("release {}", stored.id)));
            }
            rows.insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(RELEASES_BY_CREATED).map_err(map_err!(Table))?;
            index
                .insert(index_key.as_str(), stored.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "release saved");
        Ok(stored)
    }

    /// Get a release row. The returned `env` is empty; read it via the vault.
    pub fn get_release(&self, app: &str, id: &str) -> StateResult<Option<Release>> {
        self.get_row(RELEASES, &format!("{app}:{id}"))
    }

    /// Releases for an app, newest first.
    pub fn list_releases(&self, app: &str, limit: usize) -> StateResult<Vec<Release>> {
        let ids = self.scan_index(RELEASES_BY_CREATED, app, limit)?;
        let mut releases = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(release) = self.get_release(app, &id)? {
                releases.push(release);
            }
        }
        Ok(releases)
    }

    pub fn latest_release(&self, app: &str) -> StateResult<Option<Release>> {
        Ok(self.list_releases(app, 1)?.into_iter().next())
    }

    /// A new unsaved release inheriting the latest release's build and
    /// manifest, or an empty release when the app has none.
    pub fn fork_release(&self, app: &str) -> StateResult<Release> {
        Ok(match self.latest_release(app)? {
            Some(latest) => latest.fork(),
            None => Release::new(app),
        })
    }

    /// Delete a release. The current release of an app is never deleted.
    pub fn delete_release(&self, app: &str, id: &str) -> StateResult<bool> {
        if self.get_app(app)?.and_then(|a| a.release).as_deref() == Some(id) {
            return Err(StateError::InUse(format!("release {id} is current for {app}")));
        }
        let Some(release) = self.get_release(app, id)? else {
            return Ok(false);
        };
        let created = release.created.unwrap_or_default();
        let index_key = created_index_key(app, &created, id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut rows = txn.open_table(RELEASES).map_err(map_err!(Table))?;
            rows.remove(release.table_key().as_str())
                .map_err(map_err!(Write))?;
            let mut index = txn.open_table(RELEASES_BY_CREATED).map_err(map_err!(Table))?;
            index.remove(index_key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn put_row<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Ids under an `{app}:` prefix of an index table, in key order.
    fn scan_index(
        &self,
        table: TableDefinition<&str, &str>,
        app: &str,
        limit: usize,
    ) -> StateResult<Vec<String>> {
        let prefix = format!("{app}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table
            .range(prefix.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) || ids.len() >= limit {
                break;
            }
            ids.push(value.value().to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_release(app: &str, minute: u32) -> Release {
        let mut r = Release::new(app);
        r.build = Some(format!("B{minute:0>10}"));
        r.manifest = "web:\n  image: nginx\n".to_string();
        r.created = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap());
        r
    }

    fn test_build(app: &str, minute: i64) -> Build {
        let mut b = Build::new(app);
        b.started = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        b.status = BuildStatus::Complete;
        b
    }

    // ── App CRUD ───────────────────────────────────────────────────

    #[test]
    fn app_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let mut app = App::new("web");
        app.parameters.insert("WebDesiredCount".to_string(), "2".to_string());

        store.put_app(&app).unwrap();
        assert_eq!(store.get_app("web").unwrap(), Some(app));
        assert!(store.get_app("nope").unwrap().is_none());
        assert!(matches!(store.app("nope"), Err(StateError::NotFound(_))));
    }

    #[test]
    fn app_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_app(&App::new("a")).unwrap();
        store.put_app(&App::new("b")).unwrap();
        assert_eq!(store.list_apps().unwrap().len(), 2);

        assert!(store.delete_app("a").unwrap());
        assert!(!store.delete_app("a").unwrap());
        assert_eq!(store.list_apps().unwrap().len(), 1);
    }

    // ── Releases ───────────────────────────────────────────────────

    #[test]
    fn release_save_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let r = test_release("web", 0);

        let saved = store.save_release(&r).unwrap();
        assert_eq!(saved.created, r.created);
        let fetched = store.get_release("web", &r.id).unwrap().unwrap();
        assert_eq!(fetched.manifest, r.manifest);
        assert_eq!(fetched.build, r.build);
    }

    #[test]
    fn release_save_fills_created() {
        let store = StateStore::open_in_memory().unwrap();
        let r = Release::new("web");
        let saved = store.save_release(&r).unwrap();
        assert!(saved.created.is_some());
    }

    #[test]
    fn release_is_immutable() {
        let store = StateStore::open_in_memory().unwrap();
        let mut r = test_release("web", 0);
        store.save_release(&r).unwrap();

        r.manifest = "mutated".to_string();
        r.build = Some("BMUTATEDXXX".to_string());
        assert!(matches!(store.save_release(&r), Err(StateError::AlreadyExists(_))));

        let fetched = store.get_release("web", &r.id).unwrap().unwrap();
        assert_eq!(fetched.manifest, "web:\n  image: nginx\n");
        assert_ne!(fetched.build, r.build);
    }

    #[test]
    fn release_env_is_not_persisted() {
        let store = StateStore::open_in_memory().unwrap();
        let mut r = test_release("web", 0);
        r.env.insert("SECRET".to_string(), "shh".to_string());
        store.save_release(&r).unwrap();

        let fetched = store.get_release("web", &r.id).unwrap().unwrap();
        assert!(fetched.env.is_empty());
    }

    #[test]
    fn releases_listed_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        let ids: Vec<String> = [5, 1, 30, 12]
            .into_iter()
            .map(|m| store.save_release(&test_release("web", m)).unwrap().id)
            .collect();
        store.save_release(&test_release("worker", 59)).unwrap();

        let listed: Vec<String> = store
            .list_releases("web", 20)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(listed, vec![ids[2].clone(), ids[3].clone(), ids[0].clone(), ids[1].clone()]);

        assert_eq!(store.list_releases("web", 2).unwrap().len(), 2);
        assert_eq!(store.latest_release("web").unwrap().unwrap().id, ids[2]);
    }

    #[test]
    fn app_prefix_does_not_leak() {
        let store = StateStore::open_in_memory().unwrap();
        store.save_release(&test_release("web", 1)).unwrap();
        store.save_release(&test_release("web-admin", 2)).unwrap();
        assert_eq!(store.list_releases("web", 20).unwrap().len(), 1);
    }

    #[test]
    fn fork_release_inherits_latest() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.fork_release("web").unwrap().build.is_none());

        let latest = store.save_release(&test_release("web", 10)).unwrap();
        let fork = store.fork_release("web").unwrap();
        assert_ne!(fork.id, latest.id);
        assert_eq!(fork.build, latest.build);
        assert_eq!(fork.manifest, latest.manifest);
        assert!(fork.created.is_none());
    }

    #[test]
    fn current_release_cannot_be_deleted() {
        let store = StateStore::open_in_memory().unwrap();
        let current = store.save_release(&test_release("web", 1)).unwrap();
        let old = store.save_release(&test_release("web", 0)).unwrap();
        let mut app = App::new("web");
        app.release = Some(current.id.clone());
        store.put_app(&app).unwrap();

        assert!(matches!(
            store.delete_release("web", &current.id),
            Err(StateError::InUse(_))
        ));
        assert!(store.delete_release("web", &old.id).unwrap());
        assert!(!store.delete_release("web", &old.id).unwrap());
        assert_eq!(store.list_releases("web", 20).unwrap().len(), 1);
    }

    // ── Builds ─────────────────────────────────────────────────────

    #[test]
    fn builds_listed_newest_first_and_deleted() {
        let store = StateStore::open_in_memory().unwrap();
        let a = test_build("web", 1);
        let b = test_build("web", 2);
        store.put_build(&a).unwrap();
        store.put_build(&b).unwrap();

        let listed = store.list_builds("web", 10).unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);

        assert!(store.delete_build("web", &a.id).unwrap());
        assert!(!store.delete_build("web", &a.id).unwrap());
        assert_eq!(store.list_builds("web", 10).unwrap().len(), 1);
    }

    #[test]
    fn prunable_builds_protect_current_release() {
        let store = StateStore::open_in_memory().unwrap();
        let builds: Vec<Build> = (0..6).map(|m| test_build("web", m)).collect();
        for b in &builds {
            store.put_build(b).unwrap();
        }

        // Current release points at the oldest build.
        let mut r = Release::new("web");
        r.build = Some(builds[0].id.clone());
        let r = store.save_release(&r).unwrap();
        let mut app = App::new("web");
        app.release = Some(r.id);
        store.put_app(&app).unwrap();

        let prunable: Vec<String> = store
            .prunable_builds("web", 3)
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(prunable, vec![builds[2].id.clone(), builds[1].id.clone()]);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rack.redb");
        let release = test_release("web", 3);

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_app(&App::new("web")).unwrap();
            store.save_release(&release).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_app("web").unwrap().is_some());
        assert_eq!(store.latest_release("web").unwrap().unwrap().id, release.id);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_apps().unwrap().is_empty());
        assert!(store.list_releases("any", 20).unwrap().is_empty());
        assert!(store.list_builds("any", 20).unwrap().is_empty());
        assert!(store.latest_release("any").unwrap().is_none());
        assert!(store.prunable_builds("any", 50).unwrap().is_empty());
    }
}
