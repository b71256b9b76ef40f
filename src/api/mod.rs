//! Purpose: Define the public Rust API boundary for tablekit.
//! Exports: `connect`, `Connection`, the engine contract, callback interfaces, query and
//! aggregate options, and errors.
//! Role: Public, additive-only surface; the only supported path into the crate.
//! Invariants: Every operation returns exactly one `Error` kind on failure.
//! Invariants: Callers never need `core` paths for everyday use.

mod aggregate;
mod callback;
mod connection;
mod join;
mod query;
mod records;

pub use crate::core::engine::{
    Catalog, Database, Engine, EngineError, EngineErrorKind, Key, Store, StoreOptions,
    Transaction, TxMode, UpgradeHook, VersionChange,
};
pub use crate::core::error::{CallbackError, Error, ErrorKind};
pub use crate::core::local::{Fault, LocalEngine, LocalEngineOptions, RequestKind};
pub use crate::core::record::{IntoRecord, Record};
pub use crate::core::request::{Request, Responder};
pub use crate::where_expr::WhereExpr;
pub use aggregate::{AggregateOp, IntoAggregateOp};
pub use callback::{
    Always, JoinPredicate, Predicate, Projector, TryJoinOn, TryPredicate, TryProjector, always,
    try_join_on, try_predicate, try_project,
};
pub use connection::{Connection, connect};
pub use query::{QueryOptions, SortDirection, SortSpec};
