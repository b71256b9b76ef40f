//! Purpose: In-process implementation of the engine contract, with optional JSON snapshots.
//! Exports: `LocalEngine`, `LocalEngineOptions`, `Fault`, `RequestKind`.
//! Role: Default engine for embedding and tests; stands in for a host-provided engine.
//! Invariants: Writes are staged per transaction and become visible only on commit.
//! Invariants: A rejected upgrade leaves the stored version and catalog untouched.
//! Invariants: Injected faults fire once, on the first matching request.
mod snapshot;
mod state;
mod txn;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use self::state::{DatabaseState, StagedWrite, StoreState};
use self::txn::LocalDatabase;
use crate::core::engine::{
    Database, Engine, EngineError, EngineErrorKind, UpgradeHook, VersionChange,
};
use crate::core::request::Request;

#[derive(Clone, Debug, Default)]
pub struct LocalEngineOptions {
    pub snapshot_dir: Option<PathBuf>,
    pub latency: Option<Duration>,
}

impl LocalEngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist every database as `<dir>/<name>.json`.
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    /// Complete each request from a background task after `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestKind {
    Open,
    Add,
    Get,
    Put,
    Delete,
    GetAll,
    Commit,
}

impl RequestKind {
    fn is_write(self) -> bool {
        matches!(self, RequestKind::Add | RequestKind::Put | RequestKind::Delete)
    }
}

/// One-shot failure for the next request of `kind`, optionally limited to one
/// target (a store name; the database name for `Open` and `Commit`).
#[derive(Clone, Debug)]
pub struct Fault {
    kind: RequestKind,
    target: Option<String>,
    error: EngineErrorKind,
    message: String,
}

impl Fault {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            target: None,
            error: EngineErrorKind::Unavailable,
            message: "injected fault".to_string(),
        }
    }

    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_error_kind(mut self, error: EngineErrorKind) -> Self {
        self.error = error;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    fn matches(&self, kind: RequestKind, target: &str) -> bool {
        self.kind == kind && self.target.as_deref().is_none_or(|t| t == target)
    }
}

#[derive(Default)]
pub(crate) struct EngineState {
    databases: HashMap<String, DatabaseState>,
    loaded: HashSet<String>,
    faults: Vec<Fault>,
}

impl EngineState {
    fn store(&self, database: &str, store: &str) -> Result<&StoreState, EngineError> {
        self.databases
            .get(database)
            .ok_or_else(|| missing_database(database))?
            .store(store)
    }

    fn store_mut(&mut self, database: &str, store: &str) -> Result<&mut StoreState, EngineError> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| missing_database(database))?
            .store_mut(store)
    }
}

/// Lock order is `snapshots` then `state`; the state lock is never held across file I/O.
pub(crate) struct Shared {
    options: LocalEngineOptions,
    state: Mutex<EngineState>,
    snapshots: Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes snapshot writers (commits and upgrades) when snapshots are enabled.
    fn snapshot_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.options
            .snapshot_dir
            .as_ref()
            .map(|_| self.snapshots.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn take_fault(&self, kind: RequestKind, target: &str) -> Option<EngineError> {
        let mut state = self.lock();
        let idx = state.faults.iter().position(|f| f.matches(kind, target))?;
        let fault = state.faults.remove(idx);
        debug!(?kind, target, "injected fault fired");
        Some(
            EngineError::new(fault.error)
                .with_message(fault.message)
                .with_store(target),
        )
    }

    fn complete<T: Send + 'static>(&self, result: Result<T, EngineError>) -> Request<T> {
        let Some(latency) = self.options.latency else {
            return Request::ready(result);
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Request::ready(result);
        };
        let (request, responder) = Request::pending();
        runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            responder.complete(result);
        });
        request
    }

    /// Loads a snapshot the first time `name` is seen.
    fn ensure_loaded(&self, state: &mut EngineState, name: &str) -> Result<(), EngineError> {
        let Some(dir) = &self.options.snapshot_dir else {
            return Ok(());
        };
        if state.loaded.contains(name) {
            return Ok(());
        }
        if let Some(db) = snapshot::load(dir, name)? {
            debug!(database = name, version = db.version, "loaded snapshot");
            state.databases.insert(name.to_string(), db);
        }
        state.loaded.insert(name.to_string());
        Ok(())
    }

    fn persist(&self, name: &str, db: &DatabaseState) -> Result<(), EngineError> {
        match &self.options.snapshot_dir {
            Some(dir) => snapshot::persist(dir, name, db),
            None => Ok(()),
        }
    }

    fn commit_writes(&self, database: &str, writes: Vec<StagedWrite>) -> Result<(), EngineError> {
        let _snapshots = self.snapshot_guard();
        let next = {
            let mut state = self.lock();
            let db = state
                .databases
                .get_mut(database)
                .ok_or_else(|| missing_database(database))?;
            if self.options.snapshot_dir.is_none() {
                db.apply(writes);
                return Ok(());
            }
            let mut next = db.clone();
            next.apply(writes.clone());
            next
        };
        self.persist(database, &next)?;

        // Keys assigned by adds since `next` was taken stay in the live generator.
        let mut state = self.lock();
        let db = state
            .databases
            .get_mut(database)
            .ok_or_else(|| missing_database(database))?;
        db.apply(writes);
        Ok(())
    }

    fn open(&self, name: &str, version: u32, on_upgrade: UpgradeHook) -> Result<u32, EngineError> {
        if version == 0 {
            return Err(EngineError::new(EngineErrorKind::Version)
                .with_message("version must be at least 1"));
        }
        if self.options.snapshot_dir.is_some() {
            snapshot::validate_name(name)?;
        }
        if let Some(err) = self.take_fault(RequestKind::Open, name) {
            return Err(err);
        }

        let staged = {
            let mut state = self.lock();
            self.ensure_loaded(&mut state, name)?;
            let current = state.databases.get(name).map_or(0, |db| db.version);
            if current > version {
                return Err(EngineError::new(EngineErrorKind::Version).with_message(format!(
                    "requested version {version} is lower than stored version {current}"
                )));
            }
            if current == version {
                return Ok(version);
            }
            state.databases.get(name).cloned().unwrap_or_default()
        };

        let change = VersionChange {
            old_version: staged.version,
            new_version: version,
        };
        debug!(database = name, old = change.old_version, new = version, "upgrade needed");
        let mut staged = staged;
        if let Err(err) = on_upgrade(&mut staged, change) {
            warn!(database = name, error = %err, "upgrade aborted");
            return Err(err);
        }
        staged.version = version;

        let _snapshots = self.snapshot_guard();
        ensure_unchanged(&self.lock(), name, change)?;
        self.persist(name, &staged)?;
        let mut state = self.lock();
        ensure_unchanged(&state, name, change)?;
        state.databases.insert(name.to_string(), staged);
        Ok(version)
    }
}

/// Fails with `Blocked` when another open changed the version while an upgrade ran.
fn ensure_unchanged(
    state: &EngineState,
    name: &str,
    change: VersionChange,
) -> Result<(), EngineError> {
    let current = state.databases.get(name).map_or(0, |db| db.version);
    if current != change.old_version {
        return Err(EngineError::new(EngineErrorKind::Blocked).with_message(format!(
            "database changed from version {} to {current} during upgrade",
            change.old_version
        )));
    }
    Ok(())
}

/// In-process engine. Cloning yields another handle to the same databases.
#[derive(Clone)]
pub struct LocalEngine {
    shared: Arc<Shared>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::with_options(LocalEngineOptions::default())
    }

    pub fn with_options(options: LocalEngineOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                state: Mutex::new(EngineState::default()),
                snapshots: Mutex::new(()),
            }),
        }
    }

    pub fn options(&self) -> &LocalEngineOptions {
        &self.shared.options
    }

    pub fn inject_fault(&self, fault: Fault) {
        self.shared.lock().faults.push(fault);
    }

    /// Stored version of `name`, or `None` when it has never been created.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.shared.lock().databases.get(name).map(|db| db.version)
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LocalEngine {
    fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeHook,
    ) -> Request<Arc<dyn Database>> {
        let result = self.shared.open(name, version, on_upgrade).map(|version| {
            let db: Arc<dyn Database> = Arc::new(LocalDatabase {
                shared: Arc::clone(&self.shared),
                name: name.to_string(),
                version,
            });
            db
        });
        self.shared.complete(result)
    }
}

fn missing_database(name: &str) -> EngineError {
    EngineError::new(EngineErrorKind::NotFound)
        .with_message(format!("database `{name}` does not exist"))
}

#[cfg(test)]
mod tests {
    use super::{Fault, LocalEngine, LocalEngineOptions, RequestKind};
    use crate::core::engine::{
        Catalog, Engine, EngineError, EngineErrorKind, Key, StoreOptions, TxMode, UpgradeHook,
    };
    use crate::core::record::IntoRecord;
    use serde_json::json;
    use std::time::Duration;

    fn create_store(name: &'static str, options: StoreOptions) -> UpgradeHook {
        Box::new(move |catalog: &mut dyn Catalog, _| catalog.create_store(name, options))
    }

    #[tokio::test]
    async fn upgrade_runs_only_when_version_grows() {
        let engine = LocalEngine::new();
        engine
            .open("app", 1, create_store("t", StoreOptions::key_path("id")))
            .await
            .expect("open v1");
        let db = engine
            .open(
                "app",
                1,
                Box::new(|_: &mut dyn Catalog, _| {
                    Err(EngineError::new(EngineErrorKind::UpgradeRejected))
                }),
            )
            .await
            .expect("reopen without upgrade");
        assert_eq!(db.store_names(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let engine = LocalEngine::new();
        engine
            .open("app", 2, create_store("t", StoreOptions::new()))
            .await
            .expect("open v2");
        let err = engine
            .open("app", 1, Box::new(|_: &mut dyn Catalog, _| Ok(())))
            .await
            .err()
            .expect("err");
        assert_eq!(err.kind(), EngineErrorKind::Version);
    }

    #[tokio::test]
    async fn rejected_upgrade_leaves_database_absent() {
        let engine = LocalEngine::new();
        let err = engine
            .open(
                "app",
                1,
                Box::new(|catalog: &mut dyn Catalog, _| {
                    catalog.create_store("t", StoreOptions::new())?;
                    Err(EngineError::new(EngineErrorKind::UpgradeRejected).with_message("nope"))
                }),
            )
            .await
            .err()
            .expect("err");
        assert_eq!(err.kind(), EngineErrorKind::UpgradeRejected);
        assert_eq!(engine.database_version("app"), None);
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let engine = LocalEngine::new();
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::key_path("id")))
            .await
            .expect("open");

        let tx = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        {
            let store = tx.store("t").expect("store");
            let record = json!({"id": 1}).into_record().expect("record");
            store.add(record, None).await.expect("add");
            assert!(store.get(&Key::Int(1)).await.expect("get").is_some());
        }

        let reader = db.transaction(&["t"], TxMode::ReadOnly).expect("reader");
        let store = reader.store("t").expect("store");
        assert!(store.get_all().await.expect("scan").is_empty());
        drop(store);

        tx.commit().await.expect("commit");
        let reader = db.transaction(&["t"], TxMode::ReadOnly).expect("reader");
        let store = reader.store("t").expect("store");
        assert_eq!(store.get_all().await.expect("scan").len(), 1);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let engine = LocalEngine::new();
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::key_path("id")))
            .await
            .expect("open");
        {
            let tx = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
            let store = tx.store("t").expect("store");
            let record = json!({"id": 1}).into_record().expect("record");
            store.put(record, None).await.expect("put");
        }
        let tx = db.transaction(&["t"], TxMode::ReadOnly).expect("tx");
        let store = tx.store("t").expect("store");
        assert!(store.get_all().await.expect("scan").is_empty());
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let engine = LocalEngine::new();
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::key_path("id")))
            .await
            .expect("open");
        let tx = db.transaction(&["t"], TxMode::ReadOnly).expect("tx");
        let store = tx.store("t").expect("store");
        let err = store.delete(&Key::Int(1)).await.expect_err("err");
        assert_eq!(err.kind(), EngineErrorKind::ReadOnly);
    }

    #[tokio::test]
    async fn unknown_store_fails_transaction() {
        let engine = LocalEngine::new();
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::new()))
            .await
            .expect("open");
        let err = db
            .transaction(&["missing"], TxMode::ReadOnly)
            .err()
            .expect("err");
        assert_eq!(err.kind(), EngineErrorKind::NotFound);
        assert_eq!(err.store(), Some("missing"));
    }

    #[tokio::test]
    async fn fault_fires_once_for_matching_store() {
        let engine = LocalEngine::new();
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::new()))
            .await
            .expect("open");
        engine.inject_fault(
            Fault::new(RequestKind::GetAll)
                .on("t")
                .with_message("disk gone"),
        );
        let tx = db.transaction(&["t"], TxMode::ReadOnly).expect("tx");
        let store = tx.store("t").expect("store");
        let err = store.get_all().await.expect_err("first scan fails");
        assert_eq!(err.message(), Some("disk gone"));
        store.get_all().await.expect("second scan succeeds");
    }

    #[tokio::test]
    async fn interleaved_snapshot_commits_keep_every_write() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = LocalEngineOptions::new().with_snapshot_dir(temp.path());
        let engine = LocalEngine::with_options(options.clone());
        assert_eq!(engine.options().snapshot_dir.as_deref(), Some(temp.path()));
        let counter = || StoreOptions::new().with_auto_increment(true);
        let db = engine
            .open("app", 1, create_store("t", counter()))
            .await
            .expect("open");

        let first = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        let second = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        for tx in [&first, &second] {
            let store = tx.store("t").expect("store");
            let record = json!({"v": 1}).into_record().expect("record");
            store.add(record, None).await.expect("add");
        }
        first.commit().await.expect("commit first");
        second.commit().await.expect("commit second");

        let reopened = LocalEngine::with_options(options);
        let db = reopened
            .open("app", 1, create_store("t", counter()))
            .await
            .expect("reopen");
        let tx = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        let key = {
            let store = tx.store("t").expect("store");
            assert_eq!(store.get_all().await.expect("scan").len(), 2);
            let record = json!({"v": 2}).into_record().expect("record");
            store.add(record, None).await.expect("add")
        };
        assert_eq!(key, Key::Int(3));
    }

    #[tokio::test]
    async fn failed_snapshot_write_rejects_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = LocalEngine::with_options(
            LocalEngineOptions::new().with_snapshot_dir(temp.path()),
        );
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::key_path("id")))
            .await
            .expect("open");
        let lock = temp.path().join("app.lock");
        std::fs::remove_file(&lock).expect("remove lock file");
        std::fs::create_dir(&lock).expect("block lock path");

        let tx = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        {
            let store = tx.store("t").expect("store");
            let record = json!({"id": 1}).into_record().expect("record");
            store.add(record, None).await.expect("add");
        }
        let err = tx.commit().await.expect_err("err");
        assert_eq!(err.kind(), EngineErrorKind::Unavailable);

        let tx = db.transaction(&["t"], TxMode::ReadOnly).expect("tx");
        let store = tx.store("t").expect("store");
        assert!(store.get_all().await.expect("scan").is_empty());
    }

    #[tokio::test]
    async fn latency_completes_requests_from_background_task() {
        let engine = LocalEngine::with_options(
            LocalEngineOptions::new().with_latency(Duration::from_millis(2)),
        );
        let db = engine
            .open("app", 1, create_store("t", StoreOptions::new().with_auto_increment(true)))
            .await
            .expect("open");
        let tx = db.transaction(&["t"], TxMode::ReadWrite).expect("tx");
        let key = {
            let store = tx.store("t").expect("store");
            let record = json!({"v": 1}).into_record().expect("record");
            store.add(record, None).await.expect("add")
        };
        tx.commit().await.expect("commit");
        assert_eq!(key, Key::Int(1));
    }
}
