//! Abstract database interface consumed by the diff algorithms, plus the
//! one concrete driver this crate ships (embedded DuckDB).

pub mod duckdb_driver;

use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::DiffError;
use crate::runtime::RowStream;
use crate::schema::TableSchema;
use crate::uri::{ConnectionSpec, DriverRegistry};

/// A connected database, queried exclusively through its worker pool.
/// Implementations never execute SQL synchronously on the caller's
/// thread; `query`/`query_scalar` submit work to the pool they own.
pub trait Database: Send + Sync {
    /// Execute `sql`, streaming result rows lazily. Honours cancellation:
    /// dropping the returned [`RowStream`] stops the query at the next
    /// cooperative checkpoint.
    fn query(&self, sql: &str) -> RowStream;

    /// Execute `sql` expecting exactly one row of scalar columns, blocking
    /// until the worker pool produces it.
    fn query_scalar_row(&self, sql: &str) -> Result<Vec<crate::value::Value>, DiffError>;

    /// Execute `sql` for side effects only (DDL, `CREATE TABLE AS`, `DROP
    /// TABLE IF EXISTS`), blocking until it completes.
    fn execute(&self, sql: &str) -> Result<(), DiffError>;

    /// `{column_name: ColumnSchema}` for `path`, queried once and cached by
    /// callers (the façade binds schema once per diff run).
    fn select_table_schema(&self, path: &str) -> Result<TableSchema, DiffError>;

    /// The dialect adapter rendering SQL for this connection.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// A stable identity used to decide whether two `TableSegment`s live on
    /// the same connection (JoinDiff eligibility) and to key worker pools.
    fn connection_id(&self) -> &str;

    /// Release the worker pool's threads and any driver-level handles.
    fn close(&self);
}

/// `connect(uri, thread_count)` from the external interface: parse `uri`,
/// look its scheme up in the [`DriverRegistry`], and hand back a connected
/// [`Database`].
pub fn connect(uri: &str, threads: usize) -> Result<Box<dyn Database>, DiffError> {
    let spec = ConnectionSpec::parse(uri)?;
    DriverRegistry::global().connect(&spec, threads)
}
