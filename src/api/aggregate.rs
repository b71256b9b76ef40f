//! Purpose: Reduce one numeric field of a table to a single number.
//! Exports: `AggregateOp`, `IntoAggregateOp`, inherent `Connection::aggregate`.
//! Role: Aggregate Engine; one full scan per call.
//! Invariants: The operation is validated before the table is touched.
//! Invariants: Missing or non-numeric field values count as 0 for SUM/AVG and are skipped
//! by MAX/MIN; an empty table yields NaN for AVG and -inf/+inf for MAX/MIN.
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use super::connection::{Connection, engine_failure};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{Record, numeric_field};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Max,
    Min,
}

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
            AggregateOp::Count => "COUNT",
            AggregateOp::Max => "MAX",
            AggregateOp::Min => "MIN",
        }
    }

    pub fn apply(self, records: &[Record], field: &str) -> f64 {
        let values = || records.iter().map(|r| numeric_field(r, field));
        match self {
            AggregateOp::Sum => values().map(|v| v.unwrap_or(0.0)).sum(),
            AggregateOp::Avg => {
                let sum: f64 = values().map(|v| v.unwrap_or(0.0)).sum();
                sum / records.len() as f64
            }
            AggregateOp::Count => records.len() as f64,
            AggregateOp::Max => values().flatten().fold(f64::NEG_INFINITY, f64::max),
            AggregateOp::Min => values().flatten().fold(f64::INFINITY, f64::min),
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUM" => Ok(AggregateOp::Sum),
            "AVG" => Ok(AggregateOp::Avg),
            "COUNT" => Ok(AggregateOp::Count),
            "MAX" => Ok(AggregateOp::Max),
            "MIN" => Ok(AggregateOp::Min),
            other => Err(Error::new(ErrorKind::InvalidOperation)
                .with_message(format!("unknown aggregate operation `{other}`"))
                .with_hint("expected one of SUM, AVG, COUNT, MAX, MIN")),
        }
    }
}

/// Anything that names an aggregate operation.
pub trait IntoAggregateOp {
    fn into_aggregate_op(self) -> Result<AggregateOp, Error>;
}

impl IntoAggregateOp for AggregateOp {
    fn into_aggregate_op(self) -> Result<AggregateOp, Error> {
        Ok(self)
    }
}

impl IntoAggregateOp for &str {
    fn into_aggregate_op(self) -> Result<AggregateOp, Error> {
        self.parse()
    }
}

impl IntoAggregateOp for String {
    fn into_aggregate_op(self) -> Result<AggregateOp, Error> {
        self.parse()
    }
}

impl Connection {
    pub async fn aggregate(
        &self,
        table: &str,
        op: impl IntoAggregateOp,
        field: &str,
    ) -> Result<f64, Error> {
        let op = op.into_aggregate_op().map_err(|err| err.with_table(table))?;
        let records = self
            .scan(table)
            .await
            .map_err(|err| engine_failure(ErrorKind::Aggregate, table, err))?;
        let value = op.apply(&records, field);
        debug!(table, %op, field, scanned = records.len(), value, "aggregate");
        Ok(value)
    }
}
