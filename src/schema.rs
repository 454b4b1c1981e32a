//! Result materialization.
//!
//! After a statement runs, [`materialize`] either reports the affected-row count or turns
//! the fetched rows into [`Record`]s. Without a caller schema, each column's type is inferred
//! from the type name the driver reports:
//!
//! | type name                                   | [`ColumnType`]          |
//! |---------------------------------------------|-------------------------|
//! | ends in `[]` or starts with `_` (arrays)    | `Json`                  |
//! | contains `timestamp`, `datetime`            | `DateTime`              |
//! | contains `date`                             | `Date`                  |
//! | contains `json`                             | `Json`                  |
//! | contains `bool`                             | `Boolean`               |
//! | contains `int`, except `interval`, `point`  | `Integer`               |
//! | contains `float`, `double`, `numeric`       | `Float`                 |
//! | anything else                               | `String`                |

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use std::collections::HashSet;

use crate::driver::Connection;
use crate::error::{PgKitError, PgKitResult};
use crate::value::{Record, Value};

/// Column metadata reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Field type of a record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Json,
}

impl ColumnType {
    /// Infer a field type from a driver type name. Matching is case-insensitive and the
    /// first matching rule wins.
    pub fn infer(type_name: &str) -> Self {
        let name = type_name.to_ascii_lowercase();
        let has = |needle: &str| name.contains(needle);

        if name.ends_with("[]") || name.starts_with('_') {
            ColumnType::Json
        } else if has("timestamp") || has("datetime") {
            ColumnType::DateTime
        } else if has("date") {
            ColumnType::Date
        } else if has("json") {
            ColumnType::Json
        } else if has("bool") {
            ColumnType::Boolean
        } else if has("int") && !has("interval") && !has("point") {
            ColumnType::Integer
        } else if has("float") || has("double") || has("numeric") {
            ColumnType::Float
        } else {
            ColumnType::String
        }
    }

    /// Convert a raw driver value into this type.
    ///
    /// NULL passes through untouched; nullability is checked by the schema.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        let mismatch = |v: &Value| format!("cannot read {} as {}", v.kind(), self.name());

        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),

            (ColumnType::String, Value::Text(s)) => Ok(Value::Text(s)),
            (ColumnType::String, other) => Ok(Value::Text(other.to_string())),

            (ColumnType::Integer, Value::Int(i)) => Ok(Value::Int(i)),
            (ColumnType::Integer, Value::Text(s)) => s
                .trim()
                .parse()
                .map(Value::Int)
                .map_err(|_| format!("'{}' is not an integer", s)),

            (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (ColumnType::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ColumnType::Float, Value::Decimal(d)) => d
                .to_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("{} does not fit in a float", d)),
            (ColumnType::Float, Value::Text(s)) => s
                .trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a number", s)),

            (ColumnType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ColumnType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" => Ok(Value::Bool(true)),
                "f" | "false" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },

            (ColumnType::Date, Value::Date(d)) => Ok(Value::Date(d)),
            (ColumnType::Date, Value::Text(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format!("'{}' is not a date", s)),

            (ColumnType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
            (ColumnType::DateTime, Value::Date(d)) => Ok(Value::DateTime(d.and_time(NaiveTime::MIN))),
            (ColumnType::DateTime, Value::Text(s)) => parse_datetime(&s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("'{}' is not a timestamp", s)),

            (ColumnType::Json, Value::Json(j)) => Ok(Value::Json(j)),
            (ColumnType::Json, Value::Text(s)) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| format!("invalid JSON: {}", e)),
            (ColumnType::Json, other @ (Value::Bool(_) | Value::Int(_) | Value::Float(_))) => {
                Ok(Value::Json(other.to_json()))
            }

            (_, other) => Err(mismatch(&other)),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Json => "json",
        }
    }
}

pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc()))
}

/// Infer one type per column. A pure function of the type names.
pub fn infer_types(columns: &[ColumnDescriptor]) -> Vec<ColumnType> {
    columns.iter().map(|c| ColumnType::infer(&c.type_name)).collect()
}

/// One field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

/// An ordered record layout, either supplied by the caller or inferred from columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSchema {
    fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field that must not be NULL.
    pub fn field(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            nullable: false,
        });
        self
    }

    /// Append a field that may be NULL.
    pub fn nullable(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            ty,
            nullable: true,
        });
        self
    }

    /// Build a schema with one nullable field per column.
    ///
    /// A repeated column name gets the smallest free `_1`, `_2`, ... suffix, so
    /// `SELECT a.id, b.id` yields fields `id` and `id_1`.
    pub fn infer(columns: &[ColumnDescriptor]) -> Self {
        let reported: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let mut taken: HashSet<String> = HashSet::new();

        let fields = columns
            .iter()
            .map(|c| {
                let mut name = c.name.clone();
                if taken.contains(&name) {
                    name = (1..)
                        .map(|n| format!("{}_{}", c.name, n))
                        .find(|candidate| {
                            !taken.contains(candidate) && !reported.contains(candidate.as_str())
                        })
                        .unwrap_or_default();
                }
                taken.insert(name.clone());
                FieldSpec {
                    name,
                    ty: ColumnType::infer(&c.type_name),
                    nullable: true,
                }
            })
            .collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Zip a raw row with the schema's fields by position. Every value is kept, even under a
    /// repeated field name.
    pub fn record_from_row(&self, row: Vec<Value>) -> PgKitResult<Record> {
        if row.len() != self.fields.len() {
            return Err(PgKitError::mismatch(
                row.len().min(self.fields.len()),
                format!(
                    "row has {} values, schema has {} fields",
                    row.len(),
                    self.fields.len()
                ),
            ));
        }

        let mut record = Record::new();
        for (i, (field, raw)) in self.fields.iter().zip(row).enumerate() {
            if raw.is_null() && !field.nullable {
                return Err(PgKitError::mismatch(
                    i,
                    format!("field '{}' is not nullable", field.name),
                ));
            }
            let value = field
                .ty
                .coerce(raw)
                .map_err(|msg| PgKitError::mismatch(i, format!("field '{}': {}", field.name, msg)))?;
            record.push(field.name.clone(), value);
        }
        Ok(record)
    }
}

/// What a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Rows affected, for statements that returned no rows.
    RowCount(u64),
    /// Returned rows, in database order.
    Rows(Vec<Record>),
}

impl Outcome {
    /// The row count, or the number of returned rows.
    pub fn len(&self) -> u64 {
        match self {
            Outcome::RowCount(n) => *n,
            Outcome::Rows(rows) => rows.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rows(&self) -> Option<&[Record]> {
        match self {
            Outcome::Rows(rows) => Some(rows),
            Outcome::RowCount(_) => None,
        }
    }

    pub fn row_count(&self) -> Option<u64> {
        match self {
            Outcome::RowCount(n) => Some(*n),
            Outcome::Rows(_) => None,
        }
    }

    /// Returned rows, or an empty list when the statement returned none.
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Outcome::Rows(rows) => rows,
            Outcome::RowCount(_) => Vec::new(),
        }
    }

    /// Deserialize every row into `T`, matching fields by name.
    pub fn into_typed<T: DeserializeOwned>(self) -> PgKitResult<TypedOutcome<T>> {
        match self {
            Outcome::RowCount(n) => Ok(TypedOutcome::RowCount(n)),
            Outcome::Rows(rows) => rows
                .iter()
                .map(|row| row.deserialize::<T>())
                .collect::<PgKitResult<Vec<T>>>()
                .map(TypedOutcome::Rows),
        }
    }
}

/// [`Outcome`] with rows deserialized into a caller type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedOutcome<T> {
    RowCount(u64),
    Rows(Vec<T>),
}

impl<T> TypedOutcome<T> {
    pub fn into_rows(self) -> Vec<T> {
        match self {
            TypedOutcome::Rows(rows) => rows,
            TypedOutcome::RowCount(_) => Vec::new(),
        }
    }
}

/// Convert the result of the statement `conn` last ran.
///
/// Statements without columns, or with zero affected rows, report [`Outcome::RowCount`].
pub async fn materialize<C>(conn: &mut C, schema: Option<&RecordSchema>) -> PgKitResult<Outcome>
where
    C: Connection + ?Sized,
{
    let columns = conn.columns();
    let affected = conn.affected_rows();
    if columns.is_empty() || affected == 0 {
        return Ok(Outcome::RowCount(affected));
    }

    let inferred;
    let schema = match schema {
        Some(schema) => {
            if schema.len() != columns.len() {
                return Err(PgKitError::mismatch(
                    schema.len().min(columns.len()),
                    format!(
                        "query returned {} columns, schema has {} fields",
                        columns.len(),
                        schema.len()
                    ),
                ));
            }
            schema
        }
        None => {
            inferred = RecordSchema::infer(&columns);
            &inferred
        }
    };

    let rows = conn.fetch_all().await?;
    tracing::debug!("Materializing {} row(s) over {} column(s)", rows.len(), columns.len());

    rows.into_iter()
        .map(|row| schema.record_from_row(row))
        .collect::<PgKitResult<Vec<_>>>()
        .map(Outcome::Rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_infer_table() {
        let cases = [
            ("TIMESTAMPTZ", ColumnType::DateTime),
            ("timestamp", ColumnType::DateTime),
            ("datetime", ColumnType::DateTime),
            ("DATE", ColumnType::Date),
            ("JSONB", ColumnType::Json),
            ("BOOL", ColumnType::Boolean),
            ("INT8", ColumnType::Integer),
            ("bigint", ColumnType::Integer),
            ("FLOAT8", ColumnType::Float),
            ("double precision", ColumnType::Float),
            ("NUMERIC", ColumnType::Float),
            ("TEXT", ColumnType::String),
            ("UUID", ColumnType::String),
            ("INT4[]", ColumnType::Json),
            ("_text", ColumnType::Json),
            ("INTERVAL", ColumnType::String),
            ("POINT", ColumnType::String),
        ];
        for (name, expected) in cases {
            assert_eq!(ColumnType::infer(name), expected, "type name {name}");
        }
    }

    #[test]
    fn test_inference_is_idempotent() {
        let columns = vec![
            ColumnDescriptor::new("id", "INT4"),
            ColumnDescriptor::new("created", "TIMESTAMP"),
            ColumnDescriptor::new("meta", "JSONB"),
        ];
        assert_eq!(infer_types(&columns), infer_types(&columns));
    }

    #[test]
    fn test_inferred_schema_is_nullable() {
        let schema = RecordSchema::infer(&[ColumnDescriptor::new("email", "TEXT")]);
        let record = schema.record_from_row(vec![Value::Null]).unwrap();
        assert_eq!(record.get("email"), Some(&Value::Null));
    }

    #[test]
    fn test_coercions() {
        assert_eq!(ColumnType::Float.coerce(Value::Int(2)), Ok(Value::Float(2.0)));
        assert_eq!(
            ColumnType::Float.coerce(Value::Decimal(rust_decimal::Decimal::new(25, 1))),
            Ok(Value::Float(2.5))
        );
        assert_eq!(
            ColumnType::String.coerce(Value::Uuid(uuid::Uuid::nil())),
            Ok(Value::Text("00000000-0000-0000-0000-000000000000".into()))
        );
        assert_eq!(
            ColumnType::Date.coerce(Value::Text("2024-02-29".into())),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))
        );
        assert_eq!(
            ColumnType::Json.coerce(Value::Text("{\"a\":1}".into())),
            Ok(Value::Json(serde_json::json!({"a": 1})))
        );
        assert_eq!(
            ColumnType::String.coerce(Value::Int(7)),
            Ok(Value::Text("7".into()))
        );
        assert!(ColumnType::Integer.coerce(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        for text in [
            "2024-01-02 03:04:05",
            "2024-01-02T03:04:05",
            "2024-01-02T03:04:05Z",
        ] {
            assert_eq!(
                ColumnType::DateTime.coerce(Value::Text(text.into())),
                Ok(Value::DateTime(expected))
            );
        }
    }

    #[test]
    fn test_inferred_schema_renames_repeated_columns() {
        let columns = [
            ColumnDescriptor::new("id", "INT4"),
            ColumnDescriptor::new("id", "INT4"),
            ColumnDescriptor::new("id_1", "TEXT"),
            ColumnDescriptor::new("id", "INT8"),
        ];
        let schema = RecordSchema::infer(&columns);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["id", "id_2", "id_1", "id_3"]);

        let record = schema
            .record_from_row(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Text("x".into()),
                Value::Int(3),
            ])
            .unwrap();
        assert_eq!(record.len(), 4);
        assert_eq!(record.get("id"), Some(&Value::Int(1)));
        assert_eq!(record.get("id_2"), Some(&Value::Int(2)));
        assert_eq!(record.get("id_3"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_caller_schema_keeps_repeated_names() {
        let schema = RecordSchema::new()
            .field("n", ColumnType::Integer)
            .field("n", ColumnType::Integer);
        let record = schema
            .record_from_row(vec![Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(
            record.values().collect::<Vec<_>>(),
            [&Value::Int(1), &Value::Int(2)]
        );
    }

    #[test]
    fn test_caller_schema_rejects_null_in_required_field() {
        let schema = RecordSchema::new()
            .field("id", ColumnType::Integer)
            .nullable("name", ColumnType::String);
        let err = schema
            .record_from_row(vec![Value::Null, Value::Text("a".into())])
            .unwrap_err();
        assert!(matches!(err, PgKitError::SchemaMismatch { column: 0, .. }));
    }

    #[test]
    fn test_caller_schema_maps_by_position() {
        let schema = RecordSchema::new()
            .field("user_id", ColumnType::Integer)
            .field("label", ColumnType::String);
        let record = schema
            .record_from_row(vec![Value::Int(1), Value::Text("a".into())])
            .unwrap();
        assert_eq!(record, Record::new().with("user_id", 1).with("label", "a"));
    }

    #[test]
    fn test_outcome_into_typed() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Row {
            id: i64,
        }
        let outcome = Outcome::Rows(vec![Record::new().with("id", 1), Record::new().with("id", 2)]);
        let typed = outcome.into_typed::<Row>().unwrap();
        assert_eq!(typed.into_rows(), vec![Row { id: 1 }, Row { id: 2 }]);

        let typed = Outcome::RowCount(3).into_typed::<Row>().unwrap();
        assert_eq!(typed, TypedOutcome::RowCount(3));
    }
}
