//! Purpose: Typed async table operations over a transactional key-value engine.
//! Exports: `api` (public surface), `core` (engine contract, local engine, errors),
//! `telemetry`, `where_expr`.
//! Role: Library crate; applications connect once and pass the `Connection` around.
//! Invariants: Each operation runs in its own engine transaction.
//! Invariants: Filtering, sorting, joining and aggregation happen in memory after a full scan.
pub mod api;
pub mod core;
pub mod telemetry;
pub mod where_expr;
