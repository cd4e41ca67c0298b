//! Dialect adapters: per-database rendering of the SQL fragments the diff
//! core needs (checksums, canonicalisation, quoting, paging) behind one
//! trait object, per the capability-set redesign over per-database enum
//! dispatch.

mod duckdb_dialect;
mod mysql;
mod postgres;

pub use duckdb_dialect::DuckDbDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;

use crate::schema::{ColumnSchema, ColumnType};

bitflags::bitflags! {
    /// What a dialect's backing database product can do. The diff core
    /// consults these instead of matching on a database-name tag so a new
    /// dialect only needs to report its capabilities honestly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DialectCapabilities: u32 {
        /// `PERCENTILE_CONT`/`APPROX_QUANTILE`-style approximate median, used
        /// by checkpoint selection to avoid a full sort on huge segments.
        const APPROX_MEDIAN       = 1 << 0;
        /// `TABLESAMPLE`, used for `--sample-exclusive-rows`.
        const TABLESAMPLE         = 1 << 1;
        /// `CREATE TABLE ... AS SELECT`, used by JoinDiff materialisation.
        const MATERIALIZED_CTAS   = 1 << 2;
        /// `NTILE`/`ROW_NUMBER` window functions for checkpoint sampling.
        const WINDOW_FUNCTIONS    = 1 << 3;
    }
}

/// Separator spliced between canonicalised column values before hashing.
/// Chosen to be vanishingly unlikely inside normal row data; every dialect
/// must use the same byte sequence or cross-database checksums diverge.
pub const CHECKSUM_SEPARATOR: &str = "|~|";

/// Per-database rendering of the SQL fragments the diff engine composes
/// into full queries. Implementations never execute SQL themselves — that
/// is the [`crate::db::Database`] trait's job — they only produce text.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> DialectCapabilities;

    /// Quote an identifier (table/column name) for this dialect.
    fn render_quoted(&self, identifier: &str) -> String;

    /// `LIMIT n`.
    fn render_limit(&self, n: u64) -> String;

    /// `OFFSET o LIMIT n`, in the order this dialect expects the clauses.
    fn render_offset_limit(&self, offset: u64, limit: u64) -> String;

    /// Map a canonical [`ColumnType`] (plus optional precision/scale) to a
    /// concrete cast-target type name for this dialect, e.g. `BIGINT`,
    /// `NUMERIC(10,2)`, `TIMESTAMP`.
    fn render_type(
        &self,
        column_type: ColumnType,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Result<String, crate::error::DiffError>;

    /// A SQL expression that coerces `column` to its canonical string form
    /// for checksumming and equality comparison, rounding to the supplied
    /// precision/scale (already reduced to the minimum of both sides by
    /// the caller) per spec's "lossy agreement on the coarser side" rule.
    fn render_canonicalize(
        &self,
        column: &ColumnSchema,
        min_precision: Option<u32>,
        min_scale: Option<u32>,
        case_sensitive: bool,
    ) -> Result<String, crate::error::DiffError>;

    /// A SQL expression computing a signed 64-bit XOR-aggregable checksum
    /// from an MD5 digest of `expr`, reduced modulo [`CHECKSUM_PRIME`].
    /// `expr` is expected to already be the concatenation of canonicalised
    /// columns, joined with [`CHECKSUM_SEPARATOR`].
    fn render_checksum(&self, expr: &str) -> String;

    /// Aggregate a per-row checksum expression with bitwise XOR over a
    /// group, e.g. Postgres's `BIT_XOR`.
    fn render_checksum_aggregate(&self, per_row_checksum_expr: &str) -> String;
}

/// Largest prime below 2^63 fitting every dialect's signed 64-bit
/// `BIGINT`. Every `render_checksum` implementation must reduce modulo
/// this exact value so cross-database checksums agree bit-for-bit.
pub const CHECKSUM_PRIME: i64 = 9_223_372_036_854_775_783;

/// Reduce an MD5 hex digest to the checksum domain. Shared by every
/// dialect's Rust-side verification/testing path; the SQL rendered by
/// `render_checksum` must compute the identical value in-database.
pub fn checksum_from_hex_digest(hex: &str) -> i64 {
    // Lowercase first: spec note "canonicalise hex digests to lowercase
    // before parsing" — guards against a dialect emitting upper-hex.
    let hex = hex.to_ascii_lowercase();
    // Only the low 15 hex chars (60 bits) are taken before reducing, matching
    // what `CAST(... AS BIGINT)` over a parsed hex substring can represent
    // without intermediate overflow in any of the three backing dialects.
    let tail = &hex[hex.len().saturating_sub(15)..];
    let value = i64::from_str_radix(tail, 16).unwrap_or(0);
    value.rem_euclid(CHECKSUM_PRIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_reduction_is_nonnegative_and_stable() {
        let a = checksum_from_hex_digest("d41d8cd98f00b204e9800998ecf8427e");
        let b = checksum_from_hex_digest("D41D8CD98F00B204E9800998ECF8427E");
        assert_eq!(a, b);
        assert!(a >= 0);
        assert!(a < CHECKSUM_PRIME);
    }
}
