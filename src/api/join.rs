//! Purpose: Nested-loop join of two tables into caller-projected results.
//! Exports: inherent `Connection::join`.
//! Role: Join Engine; composes two full `select` scans.
//! Invariants: Output is outer-major, inner-minor in the scans' enumeration order.
//! Invariants: Any scan or callback failure surfaces as one `Join` error; no partial output.
//! Invariants: The two scans run in separate transactions, so the result is not a snapshot.
use tracing::debug;

use super::callback::{JoinPredicate, Projector, always};
use super::connection::{Connection, callback_failure};
use crate::core::error::{CallbackError, Error, ErrorKind};
use crate::core::record::Record;

impl Connection {
    /// Pairs every record of `tables[0]` with every record of `tables[1]` and projects the
    /// pairs for which `on` holds.
    pub async fn join<R>(
        &self,
        tables: [&str; 2],
        on: impl JoinPredicate,
        project: impl Projector<R>,
    ) -> Result<Vec<R>, Error> {
        let [left_table, right_table] = tables;
        let left = self
            .select(left_table, always())
            .await
            .map_err(|err| err.rewrap(ErrorKind::Join))?;
        let right = self
            .select(right_table, always())
            .await
            .map_err(|err| err.rewrap(ErrorKind::Join))?;

        let rows = nested_loop(&left, &right, &on, &project).map_err(|err| {
            callback_failure(ErrorKind::Join, &format!("{left_table}, {right_table}"), err)
        })?;
        debug!(
            left = left_table,
            right = right_table,
            pairs = left.len() * right.len(),
            matched = rows.len(),
            "join"
        );
        Ok(rows)
    }
}

fn nested_loop<R>(
    left: &[Record],
    right: &[Record],
    on: &dyn JoinPredicate,
    project: &dyn Projector<R>,
) -> Result<Vec<R>, CallbackError> {
    let mut rows = Vec::new();
    for a in left {
        for b in right {
            if on.evaluate(a, b)? {
                rows.push(project.project(a, b)?);
            }
        }
    }
    Ok(rows)
}
