//! Purpose: Single-record and filtered-scan operations: insert, get, select, update, delete.
//! Exports: inherent `Connection` methods.
//! Role: Record Operations; one engine transaction per call.
//! Invariants: `update` merges shallowly and fails with `NotFound` without writing when the
//! key is absent.
//! Invariants: `delete` of an absent key succeeds.
use tracing::debug;

use super::callback::{Predicate, filter_records};
use super::connection::{Connection, callback_failure, engine_failure};
use crate::core::engine::{EngineError, Key, TxMode};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{IntoRecord, Record, merge_fields};

impl Connection {
    /// Adds `record` to `table` and returns the key the engine assigned.
    pub async fn insert(&self, table: &str, record: impl IntoRecord) -> Result<Key, Error> {
        let record = record.into_record().map_err(|err| err.with_table(table))?;
        let fail = |err: EngineError| engine_failure(ErrorKind::Insert, table, err);

        let tx = self.begin(table, TxMode::ReadWrite).map_err(fail)?;
        let key = {
            let store = tx.store(table).map_err(fail)?;
            store.add(record, None).await.map_err(fail)?
        };
        tx.commit().await.map_err(fail)?;
        debug!(table, %key, "inserted record");
        Ok(key)
    }

    pub async fn get(&self, table: &str, key: impl Into<Key>) -> Result<Option<Record>, Error> {
        let key = key.into();
        let fail = |err: EngineError| engine_failure(ErrorKind::Select, table, err);

        let tx = self.begin(table, TxMode::ReadOnly).map_err(fail)?;
        let store = tx.store(table).map_err(fail)?;
        store.get(&key).await.map_err(fail)
    }

    /// Records of `table` matching `predicate`, in the engine's enumeration order.
    pub async fn select(
        &self,
        table: &str,
        predicate: impl Predicate,
    ) -> Result<Vec<Record>, Error> {
        let records = self
            .scan(table)
            .await
            .map_err(|err| engine_failure(ErrorKind::Select, table, err))?;
        let scanned = records.len();
        let selected = filter_records(records, &predicate)
            .map_err(|err| callback_failure(ErrorKind::Select, table, err))?;
        debug!(table, scanned, selected = selected.len(), "select");
        Ok(selected)
    }

    /// Merges the fields of `partial` into the record stored under `key`.
    pub async fn update(
        &self,
        table: &str,
        key: impl Into<Key>,
        partial: impl IntoRecord,
    ) -> Result<(), Error> {
        let key = key.into();
        let partial = partial.into_record().map_err(|err| err.with_table(table))?;
        let fail = |err: EngineError| engine_failure(ErrorKind::Update, table, err);

        let tx = self.begin(table, TxMode::ReadWrite).map_err(fail)?;
        {
            let store = tx.store(table).map_err(fail)?;
            let Some(mut record) = store.get(&key).await.map_err(fail)? else {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("no record to update")
                    .with_table(table)
                    .with_key(key));
            };
            merge_fields(&mut record, partial);
            // The record keeps its key even if `partial` touched the key field.
            let explicit = match &store.options().key_path {
                Some(path) => {
                    record.insert(path.clone(), key.to_value());
                    None
                }
                None => Some(key.clone()),
            };
            store.put(record, explicit).await.map_err(fail)?;
        }
        tx.commit().await.map_err(fail)?;
        debug!(table, %key, "updated record");
        Ok(())
    }

    pub async fn delete(&self, table: &str, key: impl Into<Key>) -> Result<(), Error> {
        let key = key.into();
        let fail = |err: EngineError| engine_failure(ErrorKind::Delete, table, err);

        let tx = self.begin(table, TxMode::ReadWrite).map_err(fail)?;
        {
            let store = tx.store(table).map_err(fail)?;
            store.delete(&key).await.map_err(fail)?;
        }
        tx.commit().await.map_err(fail)?;
        debug!(table, %key, "deleted record");
        Ok(())
    }
}
