//! Purpose: Scan, filter, sort and truncate one table with a fixed pipeline.
//! Exports: `QueryOptions`, `SortSpec`, `SortDirection`.
//! Role: Query Engine; everything after the scan runs in memory.
//! Invariants: Stages always run in the order scan -> where -> order by -> limit.
//! Invariants: Sorting is stable; numbers compare numerically; records whose sort field is
//! missing or non-numeric go after all numbers in ascending order and before them in
//! descending order, keeping their relative order.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use super::callback::{Predicate, filter_records};
use super::connection::{Connection, callback_failure, engine_failure};
use crate::core::error::{CallbackError, Error, ErrorKind};
use crate::core::record::{Record, numeric_field};
use crate::where_expr::WhereExpr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Parses `"field"`, `"field ASC"` or `"field DESC"` (direction is case-insensitive).
impl FromStr for SortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid order by clause `{s}`"))
                .with_hint("use `field`, `field ASC` or `field DESC`")
        };
        let mut parts = s.split_whitespace();
        let field = parts.next().ok_or_else(invalid)?;
        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

/// Optional clauses for [`Connection::query`]; an absent clause skips its stage.
#[derive(Default)]
pub struct QueryOptions {
    pub predicate: Option<Box<dyn Predicate>>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("predicate", &self.predicate.as_ref().map(|_| "<predicate>"))
            .field("sort", &self.sort)
            .field("limit", &self.limit)
            .finish()
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, predicate: impl Predicate + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    /// Compiles `expr` as a [`WhereExpr`] and uses it as the predicate.
    pub fn with_where(self, expr: &str) -> Result<Self, Error> {
        Ok(self.with_predicate(WhereExpr::compile(expr)?))
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn order_by(self, clause: &str) -> Result<Self, Error> {
        Ok(self.with_sort(clause.parse()?))
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Connection {
    pub async fn query(&self, table: &str, options: QueryOptions) -> Result<Vec<Record>, Error> {
        let records = self
            .scan(table)
            .await
            .map_err(|err| engine_failure(ErrorKind::Query, table, err))?;
        let scanned = records.len();
        let rows = run_pipeline(records, &options)
            .map_err(|err| callback_failure(ErrorKind::Query, table, err))?;
        debug!(table, scanned, returned = rows.len(), ?options, "query");
        Ok(rows)
    }
}

fn run_pipeline(
    mut records: Vec<Record>,
    options: &QueryOptions,
) -> Result<Vec<Record>, CallbackError> {
    if let Some(predicate) = &options.predicate {
        records = filter_records(records, predicate.as_ref())?;
    }
    if let Some(sort) = &options.sort {
        sort_records(&mut records, sort);
    }
    if let Some(limit) = options.limit {
        records.truncate(limit);
    }
    Ok(records)
}

fn sort_records(records: &mut [Record], sort: &SortSpec) {
    records.sort_by(|a, b| {
        let a = numeric_field(a, &sort.field);
        let b = numeric_field(b, &sort.field);
        let ordering = compare_numeric(a, b);
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare_numeric(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
