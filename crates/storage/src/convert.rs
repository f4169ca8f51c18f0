//! Conversion between SQLite rows and materialized results

use dbmirror_core::{ResultSet, SqlValue};
use rusqlite::types::ValueRef;

/// Convert a borrowed SQLite value into an owned cell
pub(crate) fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}

/// Run a prepared statement and collect every row
pub(crate) fn materialize<P: rusqlite::Params>(
    stmt: &mut rusqlite::Statement<'_>,
    params: P,
) -> rusqlite::Result<ResultSet> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut result = ResultSet::new(columns);
    let mut rows = stmt.query(params)?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_sql_value(row.get_ref(i)?));
        }
        result.push_row(values);
    }
    Ok(result)
}
