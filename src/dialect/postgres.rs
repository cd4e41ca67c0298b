use crate::error::DiffError;
use crate::schema::{ColumnSchema, ColumnType};

use super::{Dialect, DialectCapabilities};

/// Renders SQL in PostgreSQL's dialect. No live connection ships with this
/// crate (network drivers are an external collaborator per scope), but
/// rendering is fully implemented so generated SQL and tests do not depend
/// on a Postgres server being reachable.
#[derive(Debug, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities::APPROX_MEDIAN
            | DialectCapabilities::TABLESAMPLE
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
        format!("OFFSET {offset} LIMIT {limit}")
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
            ColumnType::Float => "DOUBLE PRECISION".into(),
            ColumnType::Numeric => match (precision, scale) {
                (Some(p), Some(s)) => format!("NUMERIC({p},{s})"),
                (Some(p), None) => format!("NUMERIC({p})"),
                _ => "NUMERIC".into(),
            },
            ColumnType::Text => "TEXT".into(),
            ColumnType::Uuid => "UUID".into(),
            ColumnType::Timestamp => "TIMESTAMP".into(),
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Other => {
                return Err(DiffError::schema(
                    "postgres dialect has no canonical cast target for this column type",
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
        let quoted = self.render_quoted(&column.name);
        Ok(match column.column_type {
            ColumnType::Int | ColumnType::BigInt => format!("{quoted}::TEXT"),
            ColumnType::Float | ColumnType::Numeric => {
                let scale = min_scale.unwrap_or(column.scale.unwrap_or(0));
                format!(
                    "RTRIM(RTRIM(ROUND({quoted}::NUMERIC, {scale})::TEXT, '0'), '.')"
                )
            }
            ColumnType::Timestamp => {
                let scale = min_scale.unwrap_or(0).min(9);
                format!("TO_CHAR({quoted}, 'YYYY-MM-DD HH24:MI:SS.{}')", "F".repeat(scale.max(1) as usize))
            }
            ColumnType::Bool => format!("CASE WHEN {quoted} THEN '1' ELSE '0' END"),
            ColumnType::Uuid => format!("LOWER({quoted}::TEXT)"),
            ColumnType::Text => {
                if case_sensitive {
                    format!("{quoted}::TEXT")
                } else {
                    format!("LOWER({quoted}::TEXT)")
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
        // Low 15 hex chars of MD5 parsed as a hex BIGINT, modulo the shared
        // prime, matching `checksum_from_hex_digest`'s Rust-side reduction.
        format!(
            "(('x' || RIGHT(MD5({expr}), 15))::BIT(60)::BIGINT % {})",
            super::CHECKSUM_PRIME
        )
    }

    fn render_checksum_aggregate(&self, per_row_checksum_expr: &str) -> String {
        format!("BIT_XOR({per_row_checksum_expr})")
    }
}
