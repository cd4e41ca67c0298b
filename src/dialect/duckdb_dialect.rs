use crate::error::DiffError;
use crate::schema::{ColumnSchema, ColumnType};

use super::{Dialect, DialectCapabilities, CHECKSUM_PRIME};

/// Renders SQL for the embedded DuckDB reference driver. This is the only
/// dialect in the crate with a live, connected [`crate::db::Database`]
/// implementation behind it (`db::duckdb_driver`), since real network
/// drivers are out of scope.
#[derive(Debug, Default)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities::TABLESAMPLE
            | DialectCapabilities::MATERIALIZED_CTAS
            | DialectCapabilities::WINDOW_FUNCTIONS
    }

    fn render_quoted(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn render_limit(&self, n: u64) -> String {
        format!("LIMIT {n}")
    }

    fn render_offset_limit(&self, offset: u64, limit: u64) -> String {
        format!("LIMIT {limit} OFFSET {offset}")
    }

    fn render_type(
        &self,
        column_type: ColumnType,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Result<String, DiffError> {
        Ok(match column_type {
            ColumnType::Int => "INTEGER".into(),
            ColumnType::BigInt => "BIGINT".into(),
            ColumnType::Float => "DOUBLE".into(),
            ColumnType::Numeric => match (precision, scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p},{s})"),
                _ => "DECIMAL".into(),
            },
            ColumnType::Text => "VARCHAR".into(),
            ColumnType::Uuid => "UUID".into(),
            ColumnType::Timestamp => "TIMESTAMP".into(),
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Other => {
                return Err(DiffError::schema(
                    "duckdb dialect has no canonical cast target for this column type",
                ))
            }
        })
    }

    fn render_canonicalize(
        &self,
        column: &ColumnSchema,
        min_precision: Option<u32>,
        min_scale: Option<u32>,
        case_sensitive: bool,
    ) -> Result<String, DiffError> {
        let _ = min_precision;
        let quoted = self.render_quoted(&column.name);
        Ok(match column.column_type {
            ColumnType::Int | ColumnType::BigInt => format!("CAST({quoted} AS VARCHAR)"),
            ColumnType::Float | ColumnType::Numeric => {
                let scale = min_scale.unwrap_or(column.scale.unwrap_or(0));
                format!(
                    "RTRIM(RTRIM(CAST(ROUND({quoted}, {scale}) AS VARCHAR), '0'), '.')"
                )
            }
            ColumnType::Timestamp => {
                let scale = min_scale.unwrap_or(0).min(9);
                format!("STRFTIME({quoted}, '%Y-%m-%d %H:%M:%S.{}')", "%f".repeat(if scale > 0 { 1 } else { 0 }))
            }
            ColumnType::Bool => format!("CASE WHEN {quoted} THEN '1' ELSE '0' END"),
            ColumnType::Uuid => format!("LOWER(CAST({quoted} AS VARCHAR))"),
            ColumnType::Text => {
                if case_sensitive {
                    format!("CAST({quoted} AS VARCHAR)")
                } else {
                    format!("LOWER(CAST({quoted} AS VARCHAR))")
                }
            }
            ColumnType::Other => {
                return Err(DiffError::schema(format!(
                    "column {:?} has no canonicalisation rule for declared type {:?}",
                    column.name, column.declared_type
                )))
            }
        })
    }

    fn render_checksum(&self, expr: &str) -> String {
        // DuckDB's `MD5_NUMBER` hashes straight to a HUGEINT instead of a hex
        // string, so there's no Postgres-style `'x' || hex` bit-string cast
        // to parse here — just reduce the HUGEINT mod the prime and narrow.
        format!("CAST(MD5_NUMBER({expr}) % {CHECKSUM_PRIME} AS BIGINT)")
    }

    fn render_checksum_aggregate(&self, per_row_checksum_expr: &str) -> String {
        format!("BIT_XOR({per_row_checksum_expr})")
    }
}
