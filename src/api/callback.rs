//! Purpose: Caller-supplied predicate and projector interfaces used by select/query/join.
//! Exports: `Predicate`, `JoinPredicate`, `Projector`, `Always`, `always`, `TryPredicate`,
//! `try_predicate`, `TryJoinOn`, `try_join_on`, `TryProjector`, `try_project`.
//! Role: Plain closures work directly; `try_*` adapters accept fallible closures.
//! Invariants: Callbacks never see engine types; their failures are `CallbackError`s that
//! the calling operation wraps into its own error kind.
use crate::core::error::CallbackError;
use crate::core::record::Record;

pub trait Predicate: Send + Sync {
    fn evaluate(&self, record: &Record) -> Result<bool, CallbackError>;
}

impl<F> Predicate for F
where
    F: Fn(&Record) -> bool + Send + Sync,
{
    fn evaluate(&self, record: &Record) -> Result<bool, CallbackError> {
        Ok(self(record))
    }
}

pub trait JoinPredicate: Send + Sync {
    fn evaluate(&self, left: &Record, right: &Record) -> Result<bool, CallbackError>;
}

impl<F> JoinPredicate for F
where
    F: Fn(&Record, &Record) -> bool + Send + Sync,
{
    fn evaluate(&self, left: &Record, right: &Record) -> Result<bool, CallbackError> {
        Ok(self(left, right))
    }
}

pub trait Projector<R>: Send + Sync {
    fn project(&self, left: &Record, right: &Record) -> Result<R, CallbackError>;
}

impl<F, R> Projector<R> for F
where
    F: Fn(&Record, &Record) -> R + Send + Sync,
{
    fn project(&self, left: &Record, right: &Record) -> Result<R, CallbackError> {
        Ok(self(left, right))
    }
}

/// Matches every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct Always;

pub fn always() -> Always {
    Always
}

impl Predicate for Always {
    fn evaluate(&self, _record: &Record) -> Result<bool, CallbackError> {
        Ok(true)
    }
}

pub struct TryPredicate<F>(F);

pub fn try_predicate<F>(f: F) -> TryPredicate<F>
where
    F: Fn(&Record) -> Result<bool, CallbackError> + Send + Sync,
{
    TryPredicate(f)
}

impl<F> Predicate for TryPredicate<F>
where
    F: Fn(&Record) -> Result<bool, CallbackError> + Send + Sync,
{
    fn evaluate(&self, record: &Record) -> Result<bool, CallbackError> {
        (self.0)(record)
    }
}

pub struct TryJoinOn<F>(F);

pub fn try_join_on<F>(f: F) -> TryJoinOn<F>
where
    F: Fn(&Record, &Record) -> Result<bool, CallbackError> + Send + Sync,
{
    TryJoinOn(f)
}

impl<F> JoinPredicate for TryJoinOn<F>
where
    F: Fn(&Record, &Record) -> Result<bool, CallbackError> + Send + Sync,
{
    fn evaluate(&self, left: &Record, right: &Record) -> Result<bool, CallbackError> {
        (self.0)(left, right)
    }
}

pub struct TryProjector<F>(F);

pub fn try_project<F, R>(f: F) -> TryProjector<F>
where
    F: Fn(&Record, &Record) -> Result<R, CallbackError> + Send + Sync,
{
    TryProjector(f)
}

impl<F, R> Projector<R> for TryProjector<F>
where
    F: Fn(&Record, &Record) -> Result<R, CallbackError> + Send + Sync,
{
    fn project(&self, left: &Record, right: &Record) -> Result<R, CallbackError> {
        (self.0)(left, right)
    }
}

/// Keeps records matching `predicate`, in input order. Stops at the first callback failure.
pub(crate) fn filter_records(
    records: Vec<Record>,
    predicate: &dyn Predicate,
) -> Result<Vec<Record>, CallbackError> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if predicate.evaluate(&record)? {
            kept.push(record);
        }
    }
    Ok(kept)
}
