// Durable JSON snapshots of local databases: `<dir>/<name>.json`, written under an fs2 lock.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::state::{DatabaseState, StoreState};
use crate::core::engine::{EngineError, EngineErrorKind, Key, StoreOptions};
use crate::core::record::Record;

const FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    version: u32,
    stores: BTreeMap<String, StoreSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct StoreSnapshot {
    options: StoreOptions,
    next_key: i64,
    records: Vec<(Key, Record)>,
}

/// Database names become file names, so separators are rejected.
pub(super) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::new(EngineErrorKind::Data).with_message("database name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(EngineError::new(EngineErrorKind::Data)
            .with_message(format!("database name `{name}` must not contain path separators")));
    }
    Ok(())
}

pub(super) fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

fn lock_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.lock"))
}

pub(super) fn load(dir: &Path, name: &str) -> Result<Option<DatabaseState>, EngineError> {
    let path = snapshot_path(dir, name);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error("failed to read snapshot", &path, err)),
    };
    let file: SnapshotFile = serde_json::from_slice(&bytes).map_err(|err| {
        EngineError::new(EngineErrorKind::Unavailable)
            .with_message(format!("corrupt snapshot {}", path.display()))
            .with_source(Box::new(err))
    })?;
    if file.format != FORMAT {
        return Err(EngineError::new(EngineErrorKind::Unavailable).with_message(format!(
            "unsupported snapshot format {} in {}",
            file.format,
            path.display()
        )));
    }

    let stores = file
        .stores
        .into_iter()
        .map(|(name, store)| {
            let state = StoreState {
                options: store.options,
                next_key: store.next_key,
                records: store.records.into_iter().collect(),
            };
            (name, state)
        })
        .collect();
    Ok(Some(DatabaseState {
        version: file.version,
        stores,
    }))
}

pub(super) fn persist(dir: &Path, name: &str, state: &DatabaseState) -> Result<(), EngineError> {
    fs::create_dir_all(dir).map_err(|err| io_error("failed to create snapshot dir", dir, err))?;

    let lock_path = lock_path(dir, name);
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|err| io_error("failed to open lock file", &lock_path, err))?;
    lock.lock_exclusive()
        .map_err(|err| io_error("failed to lock snapshot", &lock_path, err))?;

    let result = write_snapshot(dir, name, state);
    let _ = FileExt::unlock(&lock);
    result
}

fn write_snapshot(dir: &Path, name: &str, state: &DatabaseState) -> Result<(), EngineError> {
    let file = SnapshotFile {
        format: FORMAT,
        version: state.version,
        stores: state
            .stores
            .iter()
            .map(|(name, store)| {
                let snapshot = StoreSnapshot {
                    options: store.options.clone(),
                    next_key: store.next_key,
                    records: store
                        .records
                        .iter()
                        .map(|(key, record)| (key.clone(), record.clone()))
                        .collect(),
                };
                (name.clone(), snapshot)
            })
            .collect(),
    };
    let bytes = serde_json::to_vec(&file).map_err(|err| {
        EngineError::new(EngineErrorKind::Unavailable)
            .with_message("failed to encode snapshot")
            .with_source(Box::new(err))
    })?;

    let final_path = snapshot_path(dir, name);
    let tmp_path = dir.join(format!("{name}.json.tmp"));
    let mut tmp = File::create(&tmp_path)
        .map_err(|err| io_error("failed to create snapshot", &tmp_path, err))?;
    tmp.write_all(&bytes)
        .and_then(|()| tmp.sync_all())
        .map_err(|err| io_error("failed to write snapshot", &tmp_path, err))?;
    drop(tmp);
    fs::rename(&tmp_path, &final_path)
        .map_err(|err| io_error("failed to install snapshot", &final_path, err))
}

fn io_error(action: &str, path: &Path, err: io::Error) -> EngineError {
    EngineError::new(EngineErrorKind::Unavailable)
        .with_message(format!("{action} {}", path.display()))
        .with_source(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::{load, persist, snapshot_path, validate_name};
    use crate::core::engine::{Catalog, EngineErrorKind, Key, StoreOptions};
    use crate::core::local::state::{DatabaseState, StagedWrite, WriteOp};
    use crate::core::record::IntoRecord;
    use serde_json::json;

    #[test]
    fn missing_snapshot_loads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load(temp.path(), "absent").expect("load").is_none());
    }

    #[test]
    fn persisted_state_reloads_with_keys_and_generator() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut db = DatabaseState {
            version: 3,
            ..DatabaseState::default()
        };
        db.create_store("notes", StoreOptions::key_path("id").with_auto_increment(true))
            .expect("create");
        db.stores.get_mut("notes").expect("store").next_key = 8;
        db.apply(vec![StagedWrite {
            store: "notes".into(),
            key: Key::Int(7),
            op: WriteOp::Put(json!({"id": 7, "body": "hi"}).into_record().expect("record")),
        }]);

        persist(temp.path(), "app", &db).expect("persist");
        assert!(snapshot_path(temp.path(), "app").exists());

        let loaded = load(temp.path(), "app").expect("load").expect("some");
        assert_eq!(loaded.version, 3);
        let store = loaded.store("notes").expect("store");
        assert_eq!(store.next_key, 8);
        assert_eq!(store.options, StoreOptions::key_path("id").with_auto_increment(true));
        assert_eq!(
            store.records.get(&Key::Int(7)).and_then(|r| r.get("body")),
            Some(&json!("hi"))
        );
    }

    #[test]
    fn corrupt_snapshot_is_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(snapshot_path(temp.path(), "bad"), b"{not json").expect("write");
        let err = load(temp.path(), "bad").expect_err("err");
        assert_eq!(err.kind(), EngineErrorKind::Unavailable);
    }

    #[test]
    fn names_with_separators_are_rejected() {
        assert!(validate_name("app").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(r"a\b").is_err());
        assert!(validate_name("").is_err());
    }
}
