//! Purpose: Describe the external transactional key-value engine as a narrow trait contract.
//! Exports: `Engine`, `Database`, `Transaction`, `Store`, `Catalog`, `Key`, `TxMode`,
//! `StoreOptions`, `VersionChange`, `UpgradeHook`, `EngineError`, `EngineErrorKind`.
//! Role: Engine Adapter seam; operations only talk to storage through these traits.
//! Invariants: Every store request is a `Request` that completes exactly once.
//! Invariants: An upgrade hook error aborts the version change and fails the open request
//! with that same error.
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::CallbackError;
use crate::core::record::Record;
use crate::core::request::Request;

/// Record key. Integer keys order before text keys.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Interprets a field value as a key. Only integral numbers and strings qualify.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(i64::from(value))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Object-store parameters fixed at creation time.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub key_path: Option<String>,
    pub auto_increment: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-line keys read from `field`.
    pub fn key_path(field: impl Into<String>) -> Self {
        Self::new().with_key_path(field)
    }

    pub fn with_key_path(mut self, field: impl Into<String>) -> Self {
        self.key_path = Some(field.into());
        self
    }

    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// Versions involved in an upgrade. `old_version` is 0 when the database is new.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineErrorKind {
    NotFound,
    Constraint,
    Data,
    ReadOnly,
    Version,
    Blocked,
    Unavailable,
    Aborted,
    UpgradeRejected,
}

#[derive(Debug)]
pub struct EngineError {
    kind: EngineErrorKind,
    message: Option<String>,
    store: Option<String>,
    source: Option<CallbackError>,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind) -> Self {
        Self {
            kind,
            message: None,
            store: None,
            source: None,
        }
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn store(&self) -> Option<&str> {
        self.store.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_store(mut self, store: impl Into<String>) -> Self {
        self.store = Some(store.into());
        self
    }

    pub fn with_source(mut self, source: CallbackError) -> Self {
        self.source = Some(source);
        self
    }

    /// Human-readable description used when the error is folded into an operation error.
    pub fn describe(&self) -> String {
        match (&self.message, &self.source) {
            (Some(message), _) => message.clone(),
            (None, Some(source)) => source.to_string(),
            (None, None) => format!("{:?}", self.kind),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(store) = &self.store {
            write!(f, " (store: {store})")?;
        }
        Ok(())
    }
}

impl StdError for EngineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

/// Mutable view of a database's store catalog, only reachable during an upgrade.
pub trait Catalog {
    fn store_names(&self) -> Vec<String>;

    fn contains_store(&self, name: &str) -> bool;

    fn create_store(&mut self, name: &str, options: StoreOptions) -> Result<(), EngineError>;

    fn delete_store(&mut self, name: &str) -> Result<(), EngineError>;
}

pub type UpgradeHook =
    Box<dyn FnOnce(&mut dyn Catalog, VersionChange) -> Result<(), EngineError> + Send>;

pub trait Engine: Send + Sync {
    /// Opens `name` at `version`, running `on_upgrade` first when the stored version is older.
    fn open(&self, name: &str, version: u32, on_upgrade: UpgradeHook) -> Request<Arc<dyn Database>>;
}

/// An open, versioned database.
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    fn store_names(&self) -> Vec<String>;

    fn transaction(
        &self,
        stores: &[&str],
        mode: TxMode,
    ) -> Result<Box<dyn Transaction>, EngineError>;
}

pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;

    fn store(&self, name: &str) -> Result<Box<dyn Store + '_>, EngineError>;

    /// Applies staged writes. Dropping a transaction without committing discards them.
    fn commit(self: Box<Self>) -> Request<()>;
}

pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    fn options(&self) -> &StoreOptions;

    /// Inserts a new record; fails with `Constraint` when the key is taken.
    fn add(&self, record: Record, key: Option<Key>) -> Request<Key>;

    fn get(&self, key: &Key) -> Request<Option<Record>>;

    /// Inserts or replaces.
    fn put(&self, record: Record, key: Option<Key>) -> Request<Key>;

    /// Succeeds whether or not the key exists.
    fn delete(&self, key: &Key) -> Request<()>;

    /// Every record, in key order.
    fn get_all(&self) -> Request<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::Key;
    use serde_json::json;

    #[test]
    fn integer_keys_sort_before_text_keys() {
        let mut keys = vec![
            Key::from("b"),
            Key::from(10),
            Key::from("a"),
            Key::from(-3),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from(-3), Key::from(10), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn key_from_value_accepts_integers_and_strings_only() {
        assert_eq!(Key::from_value(&json!(4)), Some(Key::Int(4)));
        assert_eq!(Key::from_value(&json!("x")), Some(Key::Text("x".into())));
        assert_eq!(Key::from_value(&json!(1.5)), None);
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!([1])), None);
    }

    #[test]
    fn key_round_trips_through_json_untagged() {
        let encoded = serde_json::to_string(&vec![Key::Int(1), Key::from("k")]).expect("encode");
        assert_eq!(encoded, r#"[1,"k"]"#);
        let decoded: Vec<Key> = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, vec![Key::Int(1), Key::from("k")]);
    }
}
