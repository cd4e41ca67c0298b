use crate::error::DiffError;
use crate::schema::{ColumnSchema, ColumnType};

use super::{Dialect, DialectCapabilities, CHECKSUM_PRIME};

/// Renders SQL in MySQL's dialect. Like [`super::PostgresDialect`], this
/// crate does not ship a live MySQL driver (out of scope per spec §1), but
/// rendering is fully implemented: `mysql://` URIs resolve to this dialect
/// for SQL generation and are exercised by the dialect's own tests even
/// without a reachable server.
#[derive(Debug, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities::WINDOW_FUNCTIONS
    }

    fn render_quoted(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
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
            ColumnType::Int => "SIGNED INTEGER".into(),
            ColumnType::BigInt => "SIGNED".into(),
            ColumnType::Float => "DOUBLE".into(),
            ColumnType::Numeric => match (precision, scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p},{s})"),
                _ => "DECIMAL".into(),
            },
            ColumnType::Text => "CHAR".into(),
            ColumnType::Uuid => "CHAR(36)".into(),
            ColumnType::Timestamp => "DATETIME".into(),
            ColumnType::Bool => "SIGNED".into(),
            ColumnType::Other => {
                return Err(DiffError::schema(
                    "mysql dialect has no canonical cast target for this column type",
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
            ColumnType::Int | ColumnType::BigInt => format!("CAST({quoted} AS CHAR)"),
            ColumnType::Float | ColumnType::Numeric => {
                let scale = min_scale.unwrap_or(column.scale.unwrap_or(0));
                format!("TRIM(TRAILING '.' FROM TRIM(TRAILING '0' FROM CAST(ROUND({quoted}, {scale}) AS CHAR)))")
            }
            ColumnType::Timestamp => {
                let scale = min_scale.unwrap_or(0).min(6);
                if scale > 0 {
                    format!("DATE_FORMAT({quoted}, '%Y-%m-%d %H:%i:%s.%f')")
                } else {
                    format!("DATE_FORMAT({quoted}, '%Y-%m-%d %H:%i:%s')")
                }
            }
            ColumnType::Bool => format!("CASE WHEN {quoted} THEN '1' ELSE '0' END"),
            ColumnType::Uuid => format!("LOWER(CAST({quoted} AS CHAR))"),
            ColumnType::Text => {
                if case_sensitive {
                    format!("CAST({quoted} AS CHAR) COLLATE utf8mb4_bin")
                } else {
                    format!("LOWER(CAST({quoted} AS CHAR))")
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
        format!(
            "CAST(CONV(RIGHT(MD5({expr}), 15), 16, 10) AS SIGNED) % {CHECKSUM_PRIME}"
        )
    }

    fn render_checksum_aggregate(&self, per_row_checksum_expr: &str) -> String {
        format!("BIT_XOR({per_row_checksum_expr})")
    }
}
