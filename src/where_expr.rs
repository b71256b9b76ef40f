//! Purpose: Compile and evaluate jq-style boolean expressions against records.
//! Exports: `WhereExpr`.
//! Role: Textual `Predicate` for `select`/`query`, built on `jaq-core` with the `jaq-std`
//! definitions and natives.
//! Invariants: Compile failures are usage errors carrying a hint.
//! Invariants: A record matches when any output is `true`; runtime eval errors mean "no match".
//! Invariants: Non-boolean output is a usage error; missing fields read as `null`, as in jq.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use jaq_core::box_iter::box_once;
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Error as JaqError, Exn, Native, RcIter, RunPtr, ValX};
use jaq_std::v;
use serde_json::Value;

use crate::api::Predicate;
use crate::core::error::{CallbackError, Error, ErrorKind};
use crate::core::record::Record;

#[derive(Clone)]
pub struct WhereExpr {
    expr: String,
    filter: jaq_core::Filter<Native<ExprValue>>,
}

impl fmt::Debug for WhereExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhereExpr").field("expr", &self.expr).finish()
    }
}

impl WhereExpr {
    pub fn compile(expr: &str) -> Result<Self, Error> {
        let arena = Arena::default();
        let loader = Loader::new(jaq_std::defs());
        let program = File {
            code: expr,
            path: (),
        };
        let modules = loader
            .load(&arena, program)
            .map_err(|errs| compile_error(expr, errs))?;
        let filter = Compiler::default()
            .with_funs(jaq_std::funs::<ExprValue>().chain(value_funs()))
            .compile(modules)
            .map_err(|errs| compile_error(expr, errs))?;

        Ok(Self {
            expr: expr.to_string(),
            filter,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, record: &Record) -> Result<bool, Error> {
        let input = ExprValue::from_record(record);
        let inputs = RcIter::new(core::iter::empty::<Result<ExprValue, String>>());
        let out = self.filter.run((Ctx::new([], &inputs), input));

        let mut any_true = false;
        for item in out {
            match item {
                Ok(ExprValue::Bool(true)) => any_true = true,
                Ok(ExprValue::Bool(false)) => {}
                Ok(other) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("where expression must yield booleans")
                        .with_hint(format!(
                            "`{}` yielded non-boolean value: {other}",
                            self.expr
                        )));
                }
                Err(_) => return Ok(false),
            }
        }
        Ok(any_true)
    }
}

impl Predicate for WhereExpr {
    fn evaluate(&self, record: &Record) -> Result<bool, CallbackError> {
        self.matches(record).map_err(|err| Box::new(err) as CallbackError)
    }
}

fn compile_error<E: fmt::Debug>(expr: &str, err: E) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("invalid where expression")
        .with_hint(format!(
            "Failed to parse/compile `{expr}`.\nDetails: {err:?}\nExample: '.age >= 18 and .active'"
        ))
}

/// Shape filters (`length`, `keys`, `has`, `contains`) that `jaq-std` leaves to the value type.
fn value_funs() -> impl Iterator<Item = jaq_std::Filter<Native<ExprValue>>> {
    let funs: Box<[jaq_std::Filter<RunPtr<ExprValue>>]> = Box::new([
        ("length", v(0), |_, cv| box_once(cv.1.length().map_err(Exn::from))),
        ("keys", v(0), |_, cv| box_once(cv.1.keys().map_err(Exn::from))),
        ("has", v(1), |_, mut cv| {
            let key = cv.0.pop_var();
            box_once(cv.1.has(&key).map_err(Exn::from))
        }),
        ("contains", v(1), |_, mut cv| {
            let needle = cv.0.pop_var();
            box_once(cv.1.contains(&needle).map_err(Exn::from))
        }),
    ]);
    funs.into_vec().into_iter().map(jaq_std::run)
}

#[derive(Clone, Debug)]
pub enum ExprValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Arr(Vec<ExprValue>),
    Obj(BTreeMap<String, ExprValue>),
}

type ExprResult = Result<ExprValue, JaqError<ExprValue>>;

impl ExprValue {
    fn from_record(record: &Record) -> Self {
        Self::Obj(
            record
                .iter()
                .map(|(k, v)| (k.clone(), Self::from_json(v)))
                .collect(),
        )
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Num(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::Arr(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::Obj(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Num(_) => 2,
            Self::Str(_) => 3,
            Self::Arr(_) => 4,
            Self::Obj(_) => 5,
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn integer(&self) -> Result<isize, JaqError<Self>> {
        match self {
            Self::Num(n) if n.is_finite() && n.fract() == 0.0 => Ok(*n as isize),
            other => Err(JaqError::typ(other.clone(), "integer")),
        }
    }

    fn length(self) -> ExprResult {
        match self {
            Self::Null => Ok(Self::Num(0.0)),
            Self::Num(n) => Ok(Self::Num(n.abs())),
            Self::Str(s) => Ok(Self::Num(s.chars().count() as f64)),
            Self::Arr(items) => Ok(Self::Num(items.len() as f64)),
            Self::Obj(map) => Ok(Self::Num(map.len() as f64)),
            other @ Self::Bool(_) => Err(JaqError::typ(other, "value with a length")),
        }
    }

    fn keys(self) -> ExprResult {
        match self {
            Self::Obj(map) => Ok(Self::Arr(map.into_keys().map(Self::Str).collect())),
            Self::Arr(items) => Ok((0..items.len()).map(|idx| Self::Num(idx as f64)).collect()),
            other => Err(JaqError::typ(other, "object or array")),
        }
    }

    fn has(&self, key: &Self) -> ExprResult {
        match (self, key) {
            (Self::Obj(map), Self::Str(key)) => Ok(Self::Bool(map.contains_key(key))),
            (Self::Arr(items), Self::Num(_)) => {
                let idx = key.integer()?;
                Ok(Self::Bool(idx >= 0 && (idx as usize) < items.len()))
            }
            (value, key) => Err(JaqError::index(value.clone(), key.clone())),
        }
    }

    /// jq `contains`: the outer values must share a type; nested mismatches compare equal-or-not.
    fn contains(&self, needle: &Self) -> ExprResult {
        if self.rank() != needle.rank() {
            return Err(JaqError::str(format_args!(
                "{self} and {needle} cannot have their containment checked"
            )));
        }
        Ok(Self::Bool(self.includes(needle)))
    }

    fn includes(&self, needle: &Self) -> bool {
        match (self, needle) {
            (Self::Str(hay), Self::Str(needle)) => hay.contains(needle.as_str()),
            (Self::Arr(hay), Self::Arr(needles)) => needles
                .iter()
                .all(|needle| hay.iter().any(|item| item.includes(needle))),
            (Self::Obj(hay), Self::Obj(needles)) => needles.iter().all(|(key, needle)| {
                hay.get(key).is_some_and(|item| item.includes(needle))
            }),
            (hay, needle) => hay == needle,
        }
    }

    fn numeric(self, rhs: Self, op: jaq_core::ops::Math, f: fn(f64, f64) -> f64) -> ExprResult {
        match (self, rhs) {
            (Self::Num(a), Self::Num(b)) => Ok(Self::Num(f(a, b))),
            (l, r) => Err(JaqError::math(l, op, r)),
        }
    }
}

/// First output of a path update, `null` when the update yields nothing.
fn first_or_null<'a, I>(mut outputs: I) -> ValX<'a, ExprValue>
where
    I: Iterator<Item = ValX<'a, ExprValue>>,
{
    outputs.next().unwrap_or(Ok(ExprValue::Null))
}

fn resolve_index(len: usize, idx: isize) -> Option<usize> {
    let idx = if idx < 0 { len as isize + idx } else { idx };
    usize::try_from(idx).ok().filter(|idx| *idx < len)
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Arr(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Obj(map) => {
                f.write_str("{")?;
                for (idx, (k, v)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{k:?}:{v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for ExprValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<isize> for ExprValue {
    fn from(value: isize) -> Self {
        Self::Num(value as f64)
    }
}

impl From<f64> for ExprValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<String> for ExprValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl FromIterator<Self> for ExprValue {
    fn from_iter<T: IntoIterator<Item = Self>>(iter: T) -> Self {
        Self::Arr(iter.into_iter().collect())
    }
}

impl PartialEq for ExprValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ExprValue {}

impl PartialOrd for ExprValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExprValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Num(a), Self::Num(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => a.cmp(b),
            (Self::Obj(a), Self::Obj(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl std::ops::Add for ExprValue {
    type Output = ExprResult;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Null, other) | (other, Self::Null) => Ok(other),
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a + &b)),
            (Self::Arr(mut a), Self::Arr(b)) => {
                a.extend(b);
                Ok(Self::Arr(a))
            }
            (l, r) => l.numeric(r, jaq_core::ops::Math::Add, |a, b| a + b),
        }
    }
}

impl std::ops::Sub for ExprValue {
    type Output = ExprResult;

    fn sub(self, rhs: Self) -> Self::Output {
        self.numeric(rhs, jaq_core::ops::Math::Sub, |a, b| a - b)
    }
}

impl std::ops::Mul for ExprValue {
    type Output = ExprResult;

    fn mul(self, rhs: Self) -> Self::Output {
        self.numeric(rhs, jaq_core::ops::Math::Mul, |a, b| a * b)
    }
}

impl std::ops::Div for ExprValue {
    type Output = ExprResult;

    fn div(self, rhs: Self) -> Self::Output {
        self.numeric(rhs, jaq_core::ops::Math::Div, |a, b| a / b)
    }
}

impl std::ops::Rem for ExprValue {
    type Output = ExprResult;

    fn rem(self, rhs: Self) -> Self::Output {
        self.numeric(rhs, jaq_core::ops::Math::Rem, |a, b| a % b)
    }
}

impl std::ops::Neg for ExprValue {
    type Output = ExprResult;

    fn neg(self) -> Self::Output {
        match self {
            Self::Num(n) => Ok(Self::Num(-n)),
            other => Err(JaqError::typ(other, "number")),
        }
    }
}

impl jaq_core::ValT for ExprValue {
    fn from_num(n: &str) -> ExprResult {
        n.parse::<f64>().map(Self::Num).map_err(JaqError::str)
    }

    fn from_map<I: IntoIterator<Item = (Self, Self)>>(iter: I) -> ExprResult {
        let mut map = BTreeMap::new();
        for (k, v) in iter {
            match k {
                Self::Str(key) => {
                    map.insert(key, v);
                }
                other => return Err(JaqError::typ(other, "string")),
            }
        }
        Ok(Self::Obj(map))
    }

    fn values(self) -> Box<dyn Iterator<Item = ExprResult>> {
        match self {
            Self::Arr(items) => Box::new(items.into_iter().map(Ok)),
            Self::Obj(map) => Box::new(map.into_values().map(Ok)),
            other => Box::new(std::iter::once(Err(JaqError::typ(other, "iterable")))),
        }
    }

    fn index(self, index: &Self) -> ExprResult {
        match (self, index) {
            (Self::Null, Self::Str(_) | Self::Num(_)) => Ok(Self::Null),
            (Self::Obj(mut map), Self::Str(key)) => Ok(map.remove(key).unwrap_or(Self::Null)),
            (Self::Arr(mut items), Self::Num(_)) => {
                let idx = index.integer()?;
                Ok(match resolve_index(items.len(), idx) {
                    Some(idx) => items.swap_remove(idx),
                    None => Self::Null,
                })
            }
            (value, index) => Err(JaqError::index(value, index.clone())),
        }
    }

    fn range(self, range: jaq_core::val::Range<&Self>) -> ExprResult {
        let items = match self {
            Self::Arr(items) => items,
            other => return Err(JaqError::typ(other, "array")),
        };
        let len = items.len() as isize;
        let clamp = |idx: isize| {
            let idx = if idx < 0 { len + idx } else { idx };
            idx.clamp(0, len) as usize
        };
        let start = clamp(range.start.map(Self::integer).transpose()?.unwrap_or(0));
        let end = clamp(range.end.map(Self::integer).transpose()?.unwrap_or(len));
        if end <= start {
            return Ok(Self::Arr(Vec::new()));
        }
        Ok(Self::Arr(items[start..end].to_vec()))
    }

    fn map_values<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => items
                .into_iter()
                .map(|item| first_or_null(f(item)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Arr),
            Self::Obj(map) => map
                .into_iter()
                .map(|(k, v)| first_or_null(f(v)).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Obj),
            other => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::typ(other, "iterable").into()),
            },
        }
    }

    fn map_index<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        index: &Self,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match (self, index) {
            (Self::Obj(mut map), Self::Str(key)) => {
                let current = map.remove(key).unwrap_or(Self::Null);
                map.insert(key.clone(), first_or_null(f(current))?);
                Ok(Self::Obj(map))
            }
            (Self::Arr(mut items), Self::Num(_)) => {
                let idx = index.integer()?;
                match resolve_index(items.len(), idx) {
                    Some(idx) => {
                        let current = std::mem::replace(&mut items[idx], Self::Null);
                        items[idx] = first_or_null(f(current))?;
                        Ok(Self::Arr(items))
                    }
                    None => Err(JaqError::index(Self::Arr(items), index.clone()).into()),
                }
            }
            (other, index) => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::index(other, index.clone()).into()),
            },
        }
    }

    fn map_range<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        range: jaq_core::val::Range<&Self>,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => first_or_null(f(Self::Arr(items).range(range)?)),
            other => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::typ(other, "array").into()),
            },
        }
    }

    fn as_bool(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    fn as_str(&self) -> Option<&str> {
        self.text()
    }
}

impl jaq_std::ValT for ExprValue {
    fn into_seq<S: FromIterator<Self>>(self) -> Result<S, Self> {
        match self {
            Self::Arr(items) => Ok(items.into_iter().collect()),
            other => Err(other),
        }
    }

    fn as_isize(&self) -> Option<isize> {
        let n = self.number()?;
        let cast = n as isize;
        (n.is_finite() && n.fract() == 0.0 && cast as f64 == n).then_some(cast)
    }

    fn as_f64(&self) -> Result<f64, JaqError<Self>> {
        self.number()
            .ok_or_else(|| JaqError::typ(self.clone(), "number"))
    }
}
