//! Parameter normalization.
//!
//! [`normalize`] classifies a [`Params`] value and turns it into a [`Statement`]: the final
//! query text plus either nothing, one positional tuple, or a batch of tuples.

use serde::Serialize;

use crate::error::{PgKitError, PgKitResult};
use crate::insert;
use crate::query::Query;
use crate::value::{Record, Value};

/// Records explicitly destined for one multi-row `INSERT`.
///
/// Unlike a plain list of records, the records in a value set may have different fields;
/// missing fields are filled with the column's `DEFAULT`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSet {
    records: Vec<Record>,
}

impl ValueSet {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn single(record: Record) -> Self {
        Self {
            records: vec![record],
        }
    }

    /// Build a value set from serializable structs.
    pub fn from_serialize<T: Serialize>(items: &[T]) -> PgKitResult<Self> {
        let records = items
            .iter()
            .map(Record::from_serialize)
            .collect::<PgKitResult<Vec<_>>>()?;
        Ok(Self { records })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Record> for ValueSet {
    fn from(record: Record) -> Self {
        Self::single(record)
    }
}

impl From<Vec<Record>> for ValueSet {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

/// Every parameter shape a query accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    Empty,
    /// One positional tuple.
    Tuple(Vec<Value>),
    /// Many positional tuples, executed as a batch.
    TupleList(Vec<Vec<Value>>),
    /// One record, flattened in its own field order.
    Record(Record),
    /// Many records sharing one field set, executed as a batch.
    RecordList(Vec<Record>),
    /// A multi-row insert payload.
    Values(ValueSet),
}

impl Params {
    /// Whether the parameters bind nothing at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Empty => true,
            Params::Tuple(t) => t.is_empty(),
            Params::TupleList(l) => l.is_empty(),
            Params::Record(_) | Params::Values(_) => false,
            Params::RecordList(l) => l.is_empty(),
        }
    }

    /// Build record parameters from one serializable struct.
    pub fn record<T: Serialize>(item: &T) -> PgKitResult<Self> {
        Ok(Params::Record(Record::from_serialize(item)?))
    }

    /// Build batch record parameters from serializable structs.
    pub fn records<T: Serialize>(items: &[T]) -> PgKitResult<Self> {
        let records = items
            .iter()
            .map(Record::from_serialize)
            .collect::<PgKitResult<Vec<_>>>()?;
        Ok(Params::RecordList(records))
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::Empty
    }
}

impl From<Vec<Value>> for Params {
    fn from(tuple: Vec<Value>) -> Self {
        Params::Tuple(tuple)
    }
}

impl From<Vec<Vec<Value>>> for Params {
    fn from(tuples: Vec<Vec<Value>>) -> Self {
        Params::TupleList(tuples)
    }
}

impl From<Record> for Params {
    fn from(record: Record) -> Self {
        Params::Record(record)
    }
}

impl From<Vec<Record>> for Params {
    fn from(records: Vec<Record>) -> Self {
        Params::RecordList(records)
    }
}

impl From<ValueSet> for Params {
    fn from(values: ValueSet) -> Self {
        Params::Values(values)
    }
}

/// Build a positional tuple from heterogeneous values.
///
/// ```
/// use pgkit::{params, Params};
///
/// let p = params![1, "a", None::<i64>];
/// assert!(matches!(p, Params::Tuple(ref t) if t.len() == 3));
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::Empty
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Tuple(vec![$($crate::Value::from($value)),+])
    };
}

/// How the executor should issue a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Single,
    Batch,
}

/// Values bound to a normalized statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    None,
    Single(Vec<Value>),
    Batch(Vec<Vec<Value>>),
}

/// A query ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub query: Query,
    pub binding: Binding,
}

impl Statement {
    pub fn mode(&self) -> ExecMode {
        match self.binding {
            Binding::Batch(_) => ExecMode::Batch,
            Binding::None | Binding::Single(_) => ExecMode::Single,
        }
    }
}

/// Classify `params` and convert them into the shape the driver executes.
pub fn normalize(query: &Query, params: &Params) -> PgKitResult<Statement> {
    if params.is_empty() {
        return Ok(Statement {
            query: query.clone(),
            binding: Binding::None,
        });
    }

    let (query, binding) = match params {
        Params::Values(values) => {
            let (composed, flat) = insert::expand(query, values)?;
            (Query::Composed(composed), Binding::Single(flat))
        }
        Params::Record(record) => (query.clone(), Binding::Single(record.values().cloned().collect())),
        Params::RecordList(records) => (query.clone(), Binding::Batch(flatten_uniform(records)?)),
        Params::Tuple(tuple) => (query.clone(), Binding::Single(tuple.clone())),
        Params::TupleList(tuples) => (query.clone(), Binding::Batch(tuples.clone())),
        Params::Empty => unreachable!("empty params return early"),
    };

    Ok(Statement { query, binding })
}

/// Flatten records that share one field set, in the first record's field order.
fn flatten_uniform(records: &[Record]) -> PgKitResult<Vec<Vec<Value>>> {
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let order: Vec<&str> = first.field_names().collect();

    records
        .iter()
        .enumerate()
        .map(|(row, record)| {
            let matches = record.len() == order.len()
                && order.iter().all(|name| record.contains(name));
            if !matches {
                return Err(PgKitError::HeterogeneousParameters {
                    row,
                    expected: order.iter().map(|n| n.to_string()).collect(),
                    found: record.field_names().map(str::to_string).collect(),
                });
            }
            Ok(order
                .iter()
                .filter_map(|name| record.get(name).cloned())
                .collect())
        })
        .collect()
}
