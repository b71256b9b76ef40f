//! Purpose: Define the crate-wide error taxonomy surfaced by every public operation.
//! Exports: `Error`, `ErrorKind`, `CallbackError`.
//! Role: Single rejection type; engine and callback failures are wrapped, never leaked raw.
//! Invariants: Each failed operation yields exactly one `Error` with one `ErrorKind`.
//! Invariants: The underlying engine or callback error stays reachable via `source()`.
use std::error::Error as StdError;
use std::fmt;

use crate::core::engine::Key;

/// Failure raised by a caller-supplied predicate, projector, or schema callback.
pub type CallbackError = Box<dyn StdError + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Connection,
    Schema,
    Insert,
    Select,
    NotFound,
    Update,
    Delete,
    Query,
    Join,
    InvalidOperation,
    Aggregate,
    Usage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Schema => "SchemaError",
            ErrorKind::Insert => "InsertError",
            ErrorKind::Select => "SelectError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Update => "UpdateError",
            ErrorKind::Delete => "DeleteError",
            ErrorKind::Query => "QueryError",
            ErrorKind::Join => "JoinError",
            ErrorKind::InvalidOperation => "InvalidOperationError",
            ErrorKind::Aggregate => "AggregateError",
            ErrorKind::Usage => "UsageError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    table: Option<String>,
    key: Option<Key>,
    hint: Option<String>,
    source: Option<CallbackError>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            table: None,
            key: None,
            hint: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn with_boxed_source(mut self, source: CallbackError) -> Self {
        self.source = Some(source);
        self
    }

    /// Re-tags an error raised by a nested operation, keeping it as the cause.
    pub(crate) fn rewrap(self, kind: ErrorKind) -> Self {
        let message = self.message.clone();
        let table = self.table.clone();
        let mut outer = Error::new(kind);
        outer.message = message;
        outer.table = table;
        outer.with_source(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(table) = &self.table {
            write!(f, " (table: {table})")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};
    use crate::core::engine::{EngineError, EngineErrorKind, Key};
    use std::error::Error as _;

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("no record to update")
            .with_table("users")
            .with_key(Key::Int(7));
        assert_eq!(
            err.to_string(),
            "NotFoundError: no record to update (table: users) (key: 7)"
        );
    }

    #[test]
    fn kind_names_are_stable() {
        let cases = [
            (ErrorKind::Connection, "ConnectionError"),
            (ErrorKind::Schema, "SchemaError"),
            (ErrorKind::Insert, "InsertError"),
            (ErrorKind::Select, "SelectError"),
            (ErrorKind::NotFound, "NotFoundError"),
            (ErrorKind::Update, "UpdateError"),
            (ErrorKind::Delete, "DeleteError"),
            (ErrorKind::Query, "QueryError"),
            (ErrorKind::Join, "JoinError"),
            (ErrorKind::InvalidOperation, "InvalidOperationError"),
            (ErrorKind::Aggregate, "AggregateError"),
        ];

        for (kind, name) in cases {
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn source_chain_reaches_engine_error() {
        let engine = EngineError::new(EngineErrorKind::Constraint).with_message("key exists");
        let err = Error::new(ErrorKind::Insert)
            .with_message("key exists")
            .with_source(engine);
        let source = err.source().expect("source");
        assert!(source.to_string().contains("key exists"));
    }

    #[test]
    fn rewrap_keeps_inner_error_as_source() {
        let inner = Error::new(ErrorKind::Select)
            .with_message("scan failed")
            .with_table("orders");
        let outer = inner.rewrap(ErrorKind::Join);
        assert_eq!(outer.kind(), ErrorKind::Join);
        assert_eq!(outer.message(), Some("scan failed"));
        assert_eq!(outer.table(), Some("orders"));
        let source = outer.source().expect("source");
        assert!(source.to_string().starts_with("SelectError"));
    }
}
