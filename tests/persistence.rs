// Snapshot persistence across engine instances sharing one directory.
use serde_json::json;
use tablekit::api::{
    Catalog, Connection, ErrorKind, Key, LocalEngine, LocalEngineOptions, StoreOptions, always,
    connect,
};

fn engine_at(dir: &std::path::Path) -> LocalEngine {
    LocalEngine::with_options(LocalEngineOptions::new().with_snapshot_dir(dir))
}

async fn open(engine: &LocalEngine) -> Connection {
    connect(engine, "notes", 1, |catalog: &mut dyn Catalog, _| {
        catalog.create_store("notes", StoreOptions::key_path("id").with_auto_increment(true))?;
        Ok(())
    })
    .await
    .expect("connect")
}

#[tokio::test]
async fn committed_records_survive_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    {
        let engine = engine_at(temp.path());
        let conn = open(&engine).await;
        let first = conn.insert("notes", json!({"body": "one"})).await.expect("insert");
        let second = conn.insert("notes", json!({"body": "two"})).await.expect("insert");
        conn.update("notes", first, json!({"pinned": true}))
            .await
            .expect("update");
        conn.delete("notes", second).await.expect("delete");
    }
    assert!(temp.path().join("notes.json").exists());

    let engine = engine_at(temp.path());
    assert_eq!(engine.database_version("notes"), None);
    let conn = connect(&engine, "notes", 1, |_: &mut dyn Catalog, _| {
        Err("schema already exists".into())
    })
    .await
    .expect("reopen without upgrade");

    let notes = conn.select("notes", always()).await.expect("select");
    assert_eq!(notes.len(), 1);
    assert_eq!(
        serde_json::Value::Object(notes[0].clone()),
        json!({"id": 1, "body": "one", "pinned": true})
    );

    // The key generator resumes after the last issued key.
    let third = conn.insert("notes", json!({"body": "three"})).await.expect("insert");
    assert_eq!(third, Key::Int(3));
}

#[tokio::test]
async fn rejected_upgrade_does_not_touch_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = engine_at(temp.path());
    let _conn = open(&engine).await;

    let err = connect(&engine, "notes", 2, |catalog: &mut dyn Catalog, _| {
        catalog.delete_store("notes")?;
        Err("abort".into())
    })
    .await
    .expect_err("err");
    assert_eq!(err.kind(), ErrorKind::Schema);

    let reopened = engine_at(temp.path());
    let conn = open(&reopened).await;
    assert_eq!(conn.version(), 1);
    assert_eq!(conn.table_names(), vec!["notes".to_string()]);
}

#[tokio::test]
async fn unsafe_database_names_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = engine_at(temp.path());
    let err = connect(&engine, "../escape", 1, |_: &mut dyn Catalog, _| Ok(()))
        .await
        .expect_err("err");
    assert_eq!(err.kind(), ErrorKind::Connection);
}
