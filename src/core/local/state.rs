// In-memory database/store state, key assignment, and staged write application.
use std::collections::BTreeMap;

use crate::core::engine::{Catalog, EngineError, EngineErrorKind, Key, StoreOptions};
use crate::core::record::Record;

#[derive(Clone, Debug, Default)]
pub(super) struct DatabaseState {
    pub version: u32,
    pub stores: BTreeMap<String, StoreState>,
}

#[derive(Clone, Debug)]
pub(super) struct StoreState {
    pub options: StoreOptions,
    pub next_key: i64,
    pub records: BTreeMap<Key, Record>,
}

#[derive(Clone, Debug)]
pub(super) enum WriteOp {
    Put(Record),
    Delete,
}

#[derive(Clone, Debug)]
pub(super) struct StagedWrite {
    pub store: String,
    pub key: Key,
    pub op: WriteOp,
}

impl DatabaseState {
    pub fn store(&self, name: &str) -> Result<&StoreState, EngineError> {
        self.stores.get(name).ok_or_else(|| missing_store(name))
    }

    pub fn store_mut(&mut self, name: &str) -> Result<&mut StoreState, EngineError> {
        self.stores.get_mut(name).ok_or_else(|| missing_store(name))
    }

    /// Applies writes in order. Writes to stores deleted since staging are dropped.
    pub fn apply(&mut self, writes: Vec<StagedWrite>) {
        for write in writes {
            let Some(store) = self.stores.get_mut(&write.store) else {
                continue;
            };
            match write.op {
                WriteOp::Put(record) => {
                    store.records.insert(write.key, record);
                }
                WriteOp::Delete => {
                    store.records.remove(&write.key);
                }
            }
        }
    }
}

impl Catalog for DatabaseState {
    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn contains_store(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, options: StoreOptions) -> Result<(), EngineError> {
        if name.is_empty() {
            return Err(EngineError::new(EngineErrorKind::Data).with_message("store name is empty"));
        }
        if matches!(options.key_path.as_deref(), Some("")) {
            return Err(EngineError::new(EngineErrorKind::Data)
                .with_message("key path must name a field")
                .with_store(name));
        }
        if self.stores.contains_key(name) {
            return Err(EngineError::new(EngineErrorKind::Constraint)
                .with_message("store already exists")
                .with_store(name));
        }
        self.stores.insert(name.to_string(), StoreState::new(options));
        Ok(())
    }

    fn delete_store(&mut self, name: &str) -> Result<(), EngineError> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing_store(name))
    }
}

impl StoreState {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            next_key: 1,
            records: BTreeMap::new(),
        }
    }

    /// Resolves the key for a write, drawing from the generator when the store has one.
    /// In-line generated keys are written back into `record`.
    pub fn assign_key(
        &mut self,
        store: &str,
        record: &mut Record,
        explicit: Option<Key>,
    ) -> Result<Key, EngineError> {
        let data_error = |message: String| {
            EngineError::new(EngineErrorKind::Data)
                .with_message(message)
                .with_store(store)
        };

        let key = match (self.options.key_path.clone(), explicit) {
            (Some(_), Some(_)) => {
                return Err(data_error(
                    "store uses in-line keys; an explicit key is not allowed".to_string(),
                ));
            }
            (Some(path), None) => match record.get(&path) {
                Some(value) => Key::from_value(value).ok_or_else(|| {
                    data_error(format!("field `{path}` does not hold a valid key"))
                })?,
                None if self.options.auto_increment => {
                    let key = self.generate();
                    record.insert(path, key.to_value());
                    return Ok(key);
                }
                None => return Err(data_error(format!("record has no `{path}` field"))),
            },
            (None, Some(key)) => key,
            (None, None) if self.options.auto_increment => return Ok(self.generate()),
            (None, None) => {
                return Err(data_error(
                    "store has no key path or generator; an explicit key is required".to_string(),
                ));
            }
        };
        self.observe(&key);
        Ok(key)
    }

    fn generate(&mut self) -> Key {
        let key = Key::Int(self.next_key);
        self.next_key = self.next_key.saturating_add(1);
        key
    }

    fn observe(&mut self, key: &Key) {
        if !self.options.auto_increment {
            return;
        }
        if let Key::Int(n) = key {
            if *n >= self.next_key {
                self.next_key = n.saturating_add(1);
            }
        }
    }
}

fn missing_store(name: &str) -> EngineError {
    EngineError::new(EngineErrorKind::NotFound)
        .with_message("no such store")
        .with_store(name)
}

#[cfg(test)]
mod tests {
    use super::{DatabaseState, StagedWrite, StoreState, WriteOp};
    use crate::core::engine::{Catalog, EngineErrorKind, Key, StoreOptions};
    use crate::core::record::{IntoRecord, Record};
    use serde_json::json;

    fn rec(value: serde_json::Value) -> Record {
        value.into_record().expect("record")
    }

    #[test]
    fn inline_auto_increment_injects_key() {
        let mut store = StoreState::new(StoreOptions::key_path("id").with_auto_increment(true));
        let mut record = rec(json!({"name": "a"}));
        let key = store.assign_key("t", &mut record, None).expect("key");
        assert_eq!(key, Key::Int(1));
        assert_eq!(record.get("id"), Some(&json!(1)));
    }

    #[test]
    fn explicit_integer_keys_advance_generator() {
        let mut store = StoreState::new(StoreOptions::key_path("id").with_auto_increment(true));
        let mut first = rec(json!({"id": 10}));
        store.assign_key("t", &mut first, None).expect("key");
        let mut second = rec(json!({}));
        let key = store.assign_key("t", &mut second, None).expect("key");
        assert_eq!(key, Key::Int(11));
    }

    #[test]
    fn inline_store_rejects_missing_or_invalid_key() {
        let mut store = StoreState::new(StoreOptions::key_path("id"));
        let err = store
            .assign_key("t", &mut rec(json!({"x": 1})), None)
            .expect_err("missing");
        assert_eq!(err.kind(), EngineErrorKind::Data);
        let err = store
            .assign_key("t", &mut rec(json!({"id": 1.5})), None)
            .expect_err("fractional");
        assert_eq!(err.kind(), EngineErrorKind::Data);
        let err = store
            .assign_key("t", &mut rec(json!({"id": 1})), Some(Key::Int(1)))
            .expect_err("explicit");
        assert_eq!(err.kind(), EngineErrorKind::Data);
    }

    #[test]
    fn out_of_line_store_needs_key_or_generator() {
        let mut store = StoreState::new(StoreOptions::new());
        let err = store
            .assign_key("t", &mut rec(json!({})), None)
            .expect_err("no key");
        assert_eq!(err.kind(), EngineErrorKind::Data);
        let key = store
            .assign_key("t", &mut rec(json!({})), Some(Key::from("k")))
            .expect("key");
        assert_eq!(key, Key::from("k"));
    }

    #[test]
    fn catalog_rejects_duplicate_and_unknown_stores() {
        let mut db = DatabaseState::default();
        db.create_store("users", StoreOptions::key_path("id")).expect("create");
        let err = db
            .create_store("users", StoreOptions::new())
            .expect_err("duplicate");
        assert_eq!(err.kind(), EngineErrorKind::Constraint);
        let err = db.delete_store("ghosts").expect_err("unknown");
        assert_eq!(err.kind(), EngineErrorKind::NotFound);
        assert_eq!(db.store_names(), vec!["users".to_string()]);
    }

    #[test]
    fn apply_replays_writes_in_order() {
        let mut db = DatabaseState::default();
        db.create_store("t", StoreOptions::new()).expect("create");
        db.apply(vec![
            StagedWrite {
                store: "t".into(),
                key: Key::Int(1),
                op: WriteOp::Put(rec(json!({"v": 1}))),
            },
            StagedWrite {
                store: "t".into(),
                key: Key::Int(1),
                op: WriteOp::Delete,
            },
            StagedWrite {
                store: "t".into(),
                key: Key::Int(2),
                op: WriteOp::Put(rec(json!({"v": 2}))),
            },
        ]);
        let store = db.store("t").expect("store");
        assert_eq!(store.records.len(), 1);
        assert!(store.records.contains_key(&Key::Int(2)));
    }
}
