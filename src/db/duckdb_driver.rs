//! Embedded DuckDB driver: the one live, connected [`Database`]
//! implementation this crate ships. Registered for the `duckdb://` and
//! `memory://` URI schemes in [`crate::uri::DriverRegistry`].

use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use duckdb::types::ValueRef;
use duckdb::Connection;

use crate::dialect::{Dialect, DuckDbDialect};
use crate::error::DiffError;
use crate::runtime::DbWorkerPool;
use crate::schema::{ColumnSchema, TableSchema};
use crate::uri::ConnectionSpec;
use crate::value::{Row, Value};

use super::Database;

/// `duckdb`'s connections are not `Send` across an arbitrary number of
/// independent OS threads the way a pooled TCP connection is; rather than
/// fake per-worker parallelism this driver serializes access through one
/// shared connection guarded by a mutex. `threads` still governs how many
/// worker threads *submit* queries concurrently — only execution against
/// the embedded engine itself is serialized.
pub struct DuckDbDatabase {
    conn: Arc<Mutex<Connection>>,
    pool: DbWorkerPool,
    dialect: Arc<dyn Dialect>,
    identity: String,
}

pub fn connect(spec: &ConnectionSpec, threads: usize) -> Result<Box<dyn Database>, DiffError> {
    let path = &spec.database;
    let conn = if path == ":memory:" || path.is_empty() {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    }
    .map_err(|e| DiffError::query(path.clone(), e))?;

    let conn = Arc::new(Mutex::new(conn));
    let pool_conn = Arc::clone(&conn);
    let pool = DbWorkerPool::new(threads, move || Arc::clone(&pool_conn));

    // `:memory:` (and the empty path) opens a fresh, unshared database on
    // every call, so the path alone can't identify a connection: two
    // `connect()` calls against `:memory:` must compare unequal or
    // JoinDiff would wrongly believe two distinct in-memory databases are
    // the same connection. Disambiguate with the `Arc`'s own address.
    let identity = format!("duckdb://{path}#{:p}", Arc::as_ptr(&conn));

    Ok(Box::new(DuckDbDatabase {
        conn,
        pool,
        dialect: Arc::new(DuckDbDialect),
        identity,
    }))
}

fn value_ref_to_value(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(n) => Value::Int(n as i64),
        ValueRef::SmallInt(n) => Value::Int(n as i64),
        ValueRef::Int(n) => Value::Int(n as i64),
        ValueRef::BigInt(n) => Value::BigInt(n),
        ValueRef::HugeInt(n) => Value::Numeric(n.to_string()),
        ValueRef::UTinyInt(n) => Value::Int(n as i64),
        ValueRef::USmallInt(n) => Value::Int(n as i64),
        ValueRef::UInt(n) => Value::Int(n as i64),
        ValueRef::UBigInt(n) => Value::Numeric(n.to_string()),
        ValueRef::Float(f) => Value::Float(f as f64),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Decimal(d) => Value::Numeric(d.to_string()),
        ValueRef::Timestamp(_, micros) => {
            let secs = micros.div_euclid(1_000_000);
            let subsec_micros = micros.rem_euclid(1_000_000);
            Value::Timestamp(
                NaiveDateTime::from_timestamp_opt(secs, (subsec_micros * 1_000) as u32)
                    .unwrap_or_default(),
            )
        }
        other => Value::Text(format!("{other:?}")),
    }
}

fn read_row(row: &duckdb::Row<'_>, column_count: usize) -> Result<Row, DiffError> {
    (0..column_count)
        .map(|i| {
            row.get_ref(i)
                .map(value_ref_to_value)
                .map_err(|e| DiffError::query("duckdb", e))
        })
        .collect()
}

impl Database for DuckDbDatabase {
    fn query(&self, sql: &str) -> crate::runtime::RowStream {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        self.pool.submit_stream(move |sink, cancel| {
            let conn = conn.lock().map_err(|_| {
                DiffError::query("duckdb", "connection mutex poisoned")
            })?;
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DiffError::query("duckdb", e))?;
            let column_count = stmt.column_count();
            let mut rows = stmt.query([]).map_err(|e| DiffError::query("duckdb", e))?;
            while let Some(row) = rows.next().map_err(|e| DiffError::query("duckdb", e))? {
                if cancel.is_cancelled() {
                    break;
                }
                let row = read_row(row, column_count)?;
                if !sink(row) {
                    break;
                }
            }
            Ok(())
        })
    }

    fn query_scalar_row(&self, sql: &str) -> Result<Row, DiffError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        self.pool.submit_scalar(move || {
            let conn = conn
                .lock()
                .map_err(|_| DiffError::query("duckdb", "connection mutex poisoned"))?;
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DiffError::query("duckdb", e))?;
            let column_count = stmt.column_count();
            stmt.query_row([], |row| {
                Ok((0..column_count)
                    .map(|i| row.get_ref(i).map(value_ref_to_value))
                    .collect::<Result<Vec<_>, _>>()?)
            })
            .map_err(|e| DiffError::query("duckdb", e))
        })
    }

    fn execute(&self, sql: &str) -> Result<(), DiffError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        self.pool.submit_scalar(move || {
            let conn = conn
                .lock()
                .map_err(|_| DiffError::query("duckdb", "connection mutex poisoned"))?;
            conn.execute(&sql, [])
                .map_err(|e| DiffError::query("duckdb", e))?;
            Ok(())
        })
    }

    fn select_table_schema(&self, path: &str) -> Result<TableSchema, DiffError> {
        let conn = Arc::clone(&self.conn);
        let path = path.to_string();
        self.pool.submit_scalar(move || {
            let conn = conn
                .lock()
                .map_err(|_| DiffError::query("duckdb", "connection mutex poisoned"))?;
            let sql = format!("PRAGMA table_info('{}')", path.replace('\'', "''"));
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| DiffError::query("duckdb", e))?;
            let mut rows = stmt.query([]).map_err(|e| DiffError::query("duckdb", e))?;

            let mut columns = Vec::new();
            while let Some(row) = rows.next().map_err(|e| DiffError::query("duckdb", e))? {
                let name: String = row.get(1).map_err(|e| DiffError::query("duckdb", e))?;
                let declared_type: String =
                    row.get(2).map_err(|e| DiffError::query("duckdb", e))?;
                let (precision, scale) = parse_decimal_precision_scale(&declared_type);
                columns.push(
                    ColumnSchema::new(name, declared_type).with_precision_scale(precision, scale),
                );
            }

            if columns.is_empty() {
                return Err(DiffError::schema(format!(
                    "table {path:?} has no columns or does not exist"
                )));
            }

            Ok(TableSchema::new(columns))
        })
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    fn connection_id(&self) -> &str {
        &self.identity
    }

    fn close(&self) {
        self.pool.cancel_all();
    }
}

/// `DECIMAL(p,s)` → `(Some(p), Some(s))`, anything else → `(None, None)`.
fn parse_decimal_precision_scale(declared_type: &str) -> (Option<u32>, Option<u32>) {
    let upper = declared_type.to_ascii_uppercase();
    let Some(open) = upper.find('(') else {
        return (None, None);
    };
    let Some(close) = upper.find(')') else {
        return (None, None);
    };
    let inner = &upper[open + 1..close];
    let mut parts = inner.split(',').map(|p| p.trim().parse::<u32>());
    match (parts.next(), parts.next()) {
        (Some(Ok(p)), Some(Ok(s))) => (Some(p), Some(s)),
        (Some(Ok(p)), None) => (Some(p), None),
        _ => (None, None),
    }
}
