//! [`Executor`] over a `rusqlite` connection.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::error::{TranslateError, TranslateResult};
use crate::types::Value;

use super::Executor;

/// Executes statements on a SQLite connection.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// A fresh in-memory database.
    pub fn open_in_memory() -> TranslateResult<Self> {
        Ok(Self::new(Connection::open_in_memory().map_err(sqlite_error)?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a batch of `;`-separated statements, such as table definitions.
    pub fn execute_batch(&self, sql: &str) -> TranslateResult<()> {
        self.conn.execute_batch(sql).map_err(sqlite_error)
    }
}

fn sqlite_error(err: rusqlite::Error) -> TranslateError {
    TranslateError::Execution(format!("SQLite error: {}", err))
}

fn to_sql(value: &Value) -> TranslateResult<SqlValue> {
    Ok(match value {
        Value::None => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Decimal(digits) => SqlValue::Text(digits.clone()),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Date(d) => SqlValue::Text(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        other => {
            return Err(TranslateError::Execution(format!(
                "Value of type {} cannot be bound to a statement",
                other.type_name()
            )))
        }
    })
}

fn from_sql(value: ValueRef<'_>) -> TranslateResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::None,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(
            std::str::from_utf8(t)
                .map_err(|e| TranslateError::Execution(e.to_string()))?
                .to_string(),
        ),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}

impl Executor for SqliteExecutor {
    fn query(&mut self, sql: &str, args: &[Value], width: usize) -> TranslateResult<Vec<Vec<Value>>> {
        let params = args.iter().map(to_sql).collect::<TranslateResult<Vec<_>>>()?;
        let mut stmt = self.conn.prepare(sql).map_err(sqlite_error)?;
        let mut rows = stmt.query(params_from_iter(params)).map_err(sqlite_error)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sqlite_error)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i).map_err(sqlite_error)?)?);
            }
            out.push(values);
        }
        tracing::trace!(target: "gensql::sqlite", sql, rows = out.len(), "query");
        Ok(out)
    }

    fn execute(&mut self, sql: &str, args: &[Value]) -> TranslateResult<u64> {
        let params = args.iter().map(to_sql).collect::<TranslateResult<Vec<_>>>()?;
        let affected = self
            .conn
            .execute(sql, params_from_iter(params))
            .map_err(sqlite_error)?;
        tracing::trace!(target: "gensql::sqlite", sql, affected, "execute");
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trips_scalar_values() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        let rows = exec
            .query(
                "SELECT ?, ?, ?, ?",
                &[Value::Int(1), Value::Float(2.5), Value::from("x"), Value::None],
                4,
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::Int(1), Value::Float(2.5), Value::from("x"), Value::None]]
        );
    }

    #[test]
    fn test_bool_binds_as_integer() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        let rows = exec.query("SELECT ? + 1", &[Value::Bool(true)], 1).unwrap();
        assert_eq!(rows, vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn test_tuples_cannot_be_bound() {
        let mut exec = SqliteExecutor::open_in_memory().unwrap();
        assert!(exec
            .query("SELECT ?", &[Value::tuple([Value::Int(1)])], 1)
            .is_err());
    }
}
