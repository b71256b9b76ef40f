//! Purpose: Open a versioned database and hand back the connection every operation runs on.
//! Exports: `connect`, `Connection`.
//! Role: Connection Manager; drives open -> upgrade -> ready and maps its failures.
//! Invariants: A schema callback error fails `connect` with `Schema`; any other open failure
//! is `Connection`.
//! Invariants: The connection is read-only shared state; each operation opens its own transaction.
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::engine::{
    Catalog, Database, Engine, EngineError, EngineErrorKind, Transaction, TxMode, UpgradeHook,
    VersionChange,
};
use crate::core::error::{CallbackError, Error, ErrorKind};
use crate::core::record::Record;

/// Handle to one open database. Cheap to clone; clones share the same engine handle.
#[derive(Clone)]
pub struct Connection {
    db: Arc<dyn Database>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.db.name())
            .field("version", &self.db.version())
            .finish()
    }
}

/// Opens `name` at `version` on `engine`.
///
/// When the engine reports that an upgrade is needed (new database or higher version),
/// `schema` runs with the store catalog before the connection is handed out. An error
/// returned by `schema` aborts the upgrade and the database stays at its previous version.
///
/// ```no_run
/// # async fn demo() -> Result<(), tablekit::api::Error> {
/// use tablekit::api::{connect, Catalog, LocalEngine, StoreOptions};
///
/// let engine = LocalEngine::new();
/// let conn = connect(&engine, "app", 1, |catalog: &mut dyn Catalog, _| {
///     catalog.create_store("users", StoreOptions::key_path("id"))?;
///     Ok(())
/// })
/// .await?;
/// # let _ = conn;
/// # Ok(())
/// # }
/// ```
pub async fn connect<E, F>(
    engine: &E,
    name: &str,
    version: u32,
    schema: F,
) -> Result<Connection, Error>
where
    E: Engine + ?Sized,
    F: FnOnce(&mut dyn Catalog, VersionChange) -> Result<(), CallbackError> + Send + 'static,
{
    let hook: UpgradeHook = Box::new(move |catalog: &mut dyn Catalog, change: VersionChange| {
        schema(catalog, change).map_err(|err| {
            EngineError::new(EngineErrorKind::UpgradeRejected)
                .with_message(err.to_string())
                .with_source(err)
        })
    });

    match engine.open(name, version, hook).await {
        Ok(db) => {
            debug!(database = name, version = db.version(), "connected");
            Ok(Connection { db })
        }
        Err(err) if err.kind() == EngineErrorKind::UpgradeRejected => {
            warn!(database = name, version, error = %err, "schema callback failed");
            Err(Error::new(ErrorKind::Schema)
                .with_message(err.describe())
                .with_source(err))
        }
        Err(err) => {
            warn!(database = name, version, error = %err, "open failed");
            Err(Error::new(ErrorKind::Connection)
                .with_message(format!(
                    "failed to open `{name}` at version {version}: {}",
                    err.describe()
                ))
                .with_source(err))
        }
    }
}

impl Connection {
    /// Wraps an already-open engine database.
    pub fn from_database(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub fn name(&self) -> &str {
        self.db.name()
    }

    pub fn version(&self) -> u32 {
        self.db.version()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.db.store_names()
    }

    pub(crate) fn begin(
        &self,
        table: &str,
        mode: TxMode,
    ) -> Result<Box<dyn Transaction>, EngineError> {
        self.db.transaction(&[table], mode)
    }

    /// Full scan of `table` in a read-only transaction, in the engine's enumeration order.
    pub(crate) async fn scan(&self, table: &str) -> Result<Vec<Record>, EngineError> {
        let tx = self.begin(table, TxMode::ReadOnly)?;
        let store = tx.store(table)?;
        store.get_all().await
    }
}

/// Folds an engine failure into the operation's error kind.
pub(crate) fn engine_failure(kind: ErrorKind, table: &str, err: EngineError) -> Error {
    warn!(table, error = %err, "{} failed", kind);
    Error::new(kind)
        .with_message(err.describe())
        .with_table(table)
        .with_source(err)
}

/// Folds a caller callback failure into the operation's error kind.
pub(crate) fn callback_failure(kind: ErrorKind, table: &str, err: CallbackError) -> Error {
    Error::new(kind)
        .with_message(format!("callback failed: {err}"))
        .with_table(table)
        .with_boxed_source(err)
}
