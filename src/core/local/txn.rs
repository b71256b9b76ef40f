// Database, transaction, and store handles for the local engine.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::state::{StagedWrite, WriteOp};
use super::{RequestKind, Shared};
use crate::core::engine::{
    Database, EngineError, EngineErrorKind, Key, Store, StoreOptions, Transaction, TxMode,
};
use crate::core::record::Record;
use crate::core::request::Request;

pub(super) struct LocalDatabase {
    pub shared: Arc<Shared>,
    pub name: String,
    pub version: u32,
}

impl Database for LocalDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> Vec<String> {
        let state = self.shared.lock();
        state
            .databases
            .get(&self.name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TxMode,
    ) -> Result<Box<dyn Transaction>, EngineError> {
        if stores.is_empty() {
            return Err(EngineError::new(EngineErrorKind::Data)
                .with_message("a transaction needs at least one store"));
        }
        let state = self.shared.lock();
        let db = state.databases.get(&self.name).ok_or_else(|| {
            EngineError::new(EngineErrorKind::NotFound)
                .with_message(format!("database `{}` no longer exists", self.name))
        })?;
        for store in stores {
            db.store(store)?;
        }

        Ok(Box::new(LocalTransaction {
            shared: Arc::clone(&self.shared),
            database: self.name.clone(),
            scope: stores.iter().map(|s| s.to_string()).collect(),
            mode,
            staged: Mutex::new(Vec::new()),
        }))
    }
}

pub(super) struct LocalTransaction {
    shared: Arc<Shared>,
    database: String,
    scope: Vec<String>,
    mode: TxMode,
    staged: Mutex<Vec<StagedWrite>>,
}

impl LocalTransaction {
    fn staged(&self) -> MutexGuard<'_, Vec<StagedWrite>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest staged write for `key`: `Some(Some(_))` for a put, `Some(None)` for a delete.
    fn staged_lookup(&self, store: &str, key: &Key) -> Option<Option<Record>> {
        self.staged()
            .iter()
            .rev()
            .find(|write| write.store == store && &write.key == key)
            .map(|write| match &write.op {
                WriteOp::Put(record) => Some(record.clone()),
                WriteOp::Delete => None,
            })
    }

    fn stage(&self, store: &str, key: Key, op: WriteOp) {
        self.staged().push(StagedWrite {
            store: store.to_string(),
            key,
            op,
        });
    }
}

impl Transaction for LocalTransaction {
    fn mode(&self) -> TxMode {
        self.mode
    }

    fn store(&self, name: &str) -> Result<Box<dyn Store + '_>, EngineError> {
        if !self.scope.iter().any(|s| s == name) {
            return Err(EngineError::new(EngineErrorKind::NotFound)
                .with_message("store is outside the transaction scope")
                .with_store(name));
        }
        let options = {
            let state = self.shared.lock();
            let db = state
                .databases
                .get(&self.database)
                .ok_or_else(|| EngineError::new(EngineErrorKind::NotFound))?;
            db.store(name)?.options.clone()
        };
        Ok(Box::new(LocalStore {
            tx: self,
            name: name.to_string(),
            options,
        }))
    }

    fn commit(self: Box<Self>) -> Request<()> {
        if let Some(err) = self.shared.take_fault(RequestKind::Commit, &self.database) {
            return self.shared.complete(Err(err));
        }
        let writes = std::mem::take(&mut *self.staged());
        if writes.is_empty() {
            return self.shared.complete(Ok(()));
        }
        let result = self.shared.commit_writes(&self.database, writes);
        self.shared.complete(result)
    }
}

struct LocalStore<'a> {
    tx: &'a LocalTransaction,
    name: String,
    options: StoreOptions,
}

impl LocalStore<'_> {
    fn check(&self, kind: RequestKind) -> Result<(), EngineError> {
        if let Some(err) = self.tx.shared.take_fault(kind, &self.name) {
            return Err(err);
        }
        if kind.is_write() && self.tx.mode == TxMode::ReadOnly {
            return Err(EngineError::new(EngineErrorKind::ReadOnly)
                .with_message("write issued in a read-only transaction")
                .with_store(self.name.as_str()));
        }
        Ok(())
    }

    fn write(
        &self,
        kind: RequestKind,
        mut record: Record,
        explicit: Option<Key>,
    ) -> Result<Key, EngineError> {
        self.check(kind)?;
        let mut state = self.tx.shared.lock();
        let store = state.store_mut(&self.tx.database, &self.name)?;
        let key = store.assign_key(&self.name, &mut record, explicit)?;
        if kind == RequestKind::Add {
            let committed = store.records.contains_key(&key);
            let exists = match self.tx.staged_lookup(&self.name, &key) {
                Some(staged) => staged.is_some(),
                None => committed,
            };
            if exists {
                return Err(EngineError::new(EngineErrorKind::Constraint)
                    .with_message(format!("key {key} already exists"))
                    .with_store(self.name.as_str()));
            }
        }
        self.tx.stage(&self.name, key.clone(), WriteOp::Put(record));
        Ok(key)
    }

    fn read_one(&self, key: &Key) -> Result<Option<Record>, EngineError> {
        self.check(RequestKind::Get)?;
        let state = self.tx.shared.lock();
        let store = state.store(&self.tx.database, &self.name)?;
        Ok(match self.tx.staged_lookup(&self.name, key) {
            Some(staged) => staged,
            None => store.records.get(key).cloned(),
        })
    }

    fn read_all(&self) -> Result<Vec<Record>, EngineError> {
        self.check(RequestKind::GetAll)?;
        let state = self.tx.shared.lock();
        let mut records = state.store(&self.tx.database, &self.name)?.records.clone();
        for write in self.tx.staged().iter().filter(|w| w.store == self.name) {
            match &write.op {
                WriteOp::Put(record) => {
                    records.insert(write.key.clone(), record.clone());
                }
                WriteOp::Delete => {
                    records.remove(&write.key);
                }
            }
        }
        Ok(records.into_values().collect())
    }

    fn remove(&self, key: &Key) -> Result<(), EngineError> {
        self.check(RequestKind::Delete)?;
        let state = self.tx.shared.lock();
        state.store(&self.tx.database, &self.name)?;
        self.tx.stage(&self.name, key.clone(), WriteOp::Delete);
        Ok(())
    }
}

impl Store for LocalStore<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn add(&self, record: Record, key: Option<Key>) -> Request<Key> {
        self.tx
            .shared
            .complete(self.write(RequestKind::Add, record, key))
    }

    fn get(&self, key: &Key) -> Request<Option<Record>> {
        self.tx.shared.complete(self.read_one(key))
    }

    fn put(&self, record: Record, key: Option<Key>) -> Request<Key> {
        self.tx
            .shared
            .complete(self.write(RequestKind::Put, record, key))
    }

    fn delete(&self, key: &Key) -> Request<()> {
        self.tx.shared.complete(self.remove(key))
    }

    fn get_all(&self) -> Request<Vec<Record>> {
        self.tx.shared.complete(self.read_all())
    }
}
