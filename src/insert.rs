//! Multi-row `INSERT` synthesis for records with differing field sets.
//!
//! ```text
//! INSERT INTO t ("id", "name") VALUES ($1, $2), ($3, DEFAULT)
//! ─────┬─────── ──────┬─────          ───┬────  ──────┬──────
//!      │              │                  │            └── row 2 has no `name`
//!      │              │                  └── row 1 binds both fields
//!      │              └── union of field names, first-seen order
//!      └── caller prefix
//! ```

use std::collections::HashSet;

use crate::error::{PgKitError, PgKitResult};
use crate::params::ValueSet;
use crate::query::{Composed, Fragment, Query};
use crate::value::Value;

/// Expand `prefix` into a single `INSERT ... VALUES` covering every record in `values`.
///
/// Returns the composed statement and the flat parameter list, which holds exactly one value
/// per placeholder in emission order. Fields that are absent from a record, or null in it,
/// use the column `DEFAULT`.
pub fn expand(prefix: &Query, values: &ValueSet) -> PgKitResult<(Composed, Vec<Value>)> {
    if values.is_empty() {
        return Err(PgKitError::InvalidParameters(
            "value set contains no records".to_string(),
        ));
    }

    let columns = column_universe(values);
    if columns.is_empty() {
        return Err(PgKitError::InvalidParameters(
            "value set records have no fields".to_string(),
        ));
    }

    let mut flat = Vec::new();
    let mut rows = Vec::with_capacity(values.len());
    for record in values.records() {
        let mut row = Composed::new().sql("(");
        let mut cells = Vec::with_capacity(columns.len());
        for column in &columns {
            match record.get(column) {
                Some(value) if !value.is_null() => {
                    cells.push(Fragment::Placeholder);
                    flat.push(value.clone());
                }
                _ => cells.push(Fragment::Default),
            }
        }
        row = row.join(", ", cells).sql(")");
        rows.push(row);
    }

    let mut statement = prefix.clone().into_composed();
    if !ends_with_whitespace(prefix) {
        statement = statement.sql(" ");
    }
    statement = statement
        .sql("(")
        .join(
            ", ",
            columns.iter().map(|c| Fragment::Identifier(vec![c.clone()])),
        )
        .sql(") VALUES ");

    for (i, row) in rows.into_iter().enumerate() {
        if i > 0 {
            statement = statement.sql(", ");
        }
        statement = statement + row;
    }

    Ok((statement, flat))
}

/// `INSERT INTO <table>`, ready to be expanded with a [`ValueSet`].
///
/// `table` may be schema-qualified (`schema.table`); each part is escaped.
pub fn table_prefix(table: &str) -> Query {
    Query::Composed(Composed::new().sql("INSERT INTO ").qualified(table))
}

/// Union of field names across all records, in first-seen order.
fn column_universe(values: &ValueSet) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in values.records() {
        for name in record.field_names() {
            if seen.insert(name) {
                columns.push(name.to_string());
            }
        }
    }
    columns
}

fn ends_with_whitespace(prefix: &Query) -> bool {
    match prefix {
        Query::Raw(text) => text.ends_with(char::is_whitespace),
        Query::Composed(composed) => match composed.fragments().last() {
            Some(Fragment::Sql(text)) => text.ends_with(char::is_whitespace),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ToSql;
    use crate::value::Record;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heterogeneous_rows_use_default() {
        let values = ValueSet::new(vec![
            Record::new().with("id", 1).with("name", "a"),
            Record::new().with("id", 2),
        ]);
        let (stmt, flat) = expand(&Query::from("INSERT INTO t"), &values).unwrap();
        assert_eq!(
            stmt.to_sql(),
            "INSERT INTO t (\"id\", \"name\") VALUES ($1, $2), ($3, DEFAULT)"
        );
        assert_eq!(
            flat,
            vec![Value::Int(1), Value::Text("a".into()), Value::Int(2)]
        );
    }

    #[test]
    fn test_columns_in_first_seen_order() {
        let values = ValueSet::new(vec![
            Record::new().with("b", 1),
            Record::new().with("c", 2).with("a", 3),
            Record::new().with("a", 4).with("b", 5),
        ]);
        let (stmt, flat) = expand(&Query::from("INSERT INTO t "), &values).unwrap();
        assert_eq!(
            stmt.to_sql(),
            "INSERT INTO t (\"b\", \"c\", \"a\") VALUES \
             ($1, DEFAULT, DEFAULT), (DEFAULT, $2, $3), ($4, DEFAULT, $5)"
        );
        assert_eq!(flat.len(), stmt.placeholder_count());
        assert_eq!(
            flat,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(5), Value::Int(4)]
        );
    }

    #[test]
    fn test_null_fields_become_default() {
        let values = ValueSet::single(
            Record::new()
                .with("id", 1)
                .with("email", None::<String>),
        );
        let (stmt, flat) = expand(&table_prefix("users"), &values).unwrap();
        assert_eq!(
            stmt.to_sql(),
            "INSERT INTO \"users\" (\"id\", \"email\") VALUES ($1, DEFAULT)"
        );
        assert_eq!(flat, vec![Value::Int(1)]);
    }

    #[test]
    fn test_row_width_matches_column_count() {
        let values = ValueSet::new(vec![
            Record::new().with("x", 1),
            Record::new().with("y", 2),
            Record::new().with("z", 3).with("x", 4),
        ]);
        let (stmt, _) = expand(&Query::from("INSERT INTO t"), &values).unwrap();
        let sql = stmt.to_sql();
        let (_, rows) = sql.split_once(" VALUES ").unwrap();
        for row in rows.split("), (") {
            assert_eq!(row.split(", ").count(), 3);
        }
    }

    #[test]
    fn test_qualified_table_is_escaped() {
        let values = ValueSet::single(Record::new().with("id", 1));
        let (stmt, _) = expand(&table_prefix("audit.\"events\""), &values).unwrap();
        assert_eq!(
            stmt.to_sql(),
            "INSERT INTO \"audit\".\"\"\"events\"\"\" (\"id\") VALUES ($1)"
        );
    }

    #[test]
    fn test_empty_value_set_is_rejected() {
        let err = expand(&Query::from("INSERT INTO t"), &ValueSet::default()).unwrap_err();
        assert!(matches!(err, PgKitError::InvalidParameters(_)));

        let err = expand(&Query::from("INSERT INTO t"), &ValueSet::single(Record::new()))
            .unwrap_err();
        assert!(matches!(err, PgKitError::InvalidParameters(_)));
    }
}
