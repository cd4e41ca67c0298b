//! `TableSegment`: an immutable description of a table plus a half-open
//! key range, column projection, and optional predicates. All SQL this
//! crate runs against a table is generated from one of these.

use std::sync::Arc;

use crate::db::Database;
use crate::dialect::CHECKSUM_SEPARATOR;
use crate::error::DiffError;
use crate::runtime::RowStream;
use crate::schema::{ColumnSchema, TableSchema};
use crate::value::{CompositeKey, KeyValue, Row};

/// `{db, path, key_columns, update_column?, extra_columns, min_key?,
/// max_key?, min_update?, max_update?, where?, case_sensitive, schema?}`
/// from the data model. Cloning is cheap (the database handle is an
/// `Arc`); every transformation (`new`, `with_schema`,
/// `segment_by_checkpoints`) returns a new value rather than mutating.
#[derive(Clone)]
pub struct TableSegment {
    pub db: Arc<dyn Database>,
    pub path: String,
    pub key_columns: Vec<String>,
    pub update_column: Option<String>,
    pub extra_columns: Vec<String>,
    pub min_key: Option<CompositeKey>,
    pub max_key: Option<CompositeKey>,
    pub min_update: Option<chrono::NaiveDateTime>,
    pub max_update: Option<chrono::NaiveDateTime>,
    pub where_clause: Option<String>,
    pub case_sensitive: bool,
    pub schema: Option<Arc<TableSchema>>,
}

/// Fields a caller may override through [`TableSegment::new`]. `None`
/// means "leave unchanged"; to clear an optional field pass `Some(None)`
/// via the dedicated `clear_*` helpers instead of this struct.
#[derive(Default)]
pub struct SegmentOverrides {
    pub min_key: Option<Option<CompositeKey>>,
    pub max_key: Option<Option<CompositeKey>>,
    pub where_clause: Option<Option<String>>,
}

impl TableSegment {
    pub fn new_root(
        db: Arc<dyn Database>,
        path: impl Into<String>,
        key_columns: Vec<String>,
    ) -> Self {
        TableSegment {
            db,
            path: path.into(),
            key_columns,
            update_column: None,
            extra_columns: Vec::new(),
            min_key: None,
            max_key: None,
            min_update: None,
            max_update: None,
            where_clause: None,
            case_sensitive: true,
            schema: None,
        }
    }

    /// Immutable update: returns a new segment with the given fields
    /// replaced.
    pub fn new(&self, overrides: SegmentOverrides) -> Self {
        let mut next = self.clone();
        if let Some(min_key) = overrides.min_key {
            next.min_key = min_key;
        }
        if let Some(max_key) = overrides.max_key {
            next.max_key = max_key;
        }
        if let Some(where_clause) = overrides.where_clause {
            next.where_clause = where_clause;
        }
        next
    }

    pub fn is_bounded(&self) -> bool {
        self.min_key.is_some() && self.max_key.is_some()
    }

    /// Bind declared column types by querying `select_table_schema` once.
    pub fn with_schema(&self) -> Result<Self, DiffError> {
        let schema = self.db.select_table_schema(&self.path)?;
        for key_col in &self.key_columns {
            if !schema.contains(key_col) {
                return Err(DiffError::schema(format!(
                    "key column {key_col:?} not found in {}",
                    self.path
                )));
            }
        }
        let mut next = self.clone();
        next.schema = Some(Arc::new(schema));
        Ok(next)
    }

    fn schema(&self) -> Result<&TableSchema, DiffError> {
        self.schema
            .as_deref()
            .ok_or_else(|| DiffError::configuration("segment schema not bound; call with_schema() first"))
    }

    fn column_schema(&self, name: &str) -> Result<&ColumnSchema, DiffError> {
        self.schema()?
            .get(name)
            .ok_or_else(|| DiffError::schema(format!("column {name:?} not found in {}", self.path)))
    }

    fn quoted_path(&self) -> String {
        let dialect = self.db.dialect();
        self.path
            .split('.')
            .map(|part| dialect.render_quoted(part))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// All projected column names in order: keys, optional update column,
    /// extras.
    pub fn projection(&self) -> Vec<String> {
        let mut cols = self.key_columns.clone();
        if let Some(update) = &self.update_column {
            cols.push(update.clone());
        }
        cols.extend(self.extra_columns.iter().cloned());
        cols
    }

    fn where_clauses(&self) -> Vec<String> {
        let dialect = self.db.dialect();
        let mut clauses = Vec::new();

        if let (Some(min_key), Some(first_col)) = (&self.min_key, self.key_columns.first()) {
            if let Some(min) = min_key.first() {
                clauses.push(format!(
                    "{} >= {}",
                    dialect.render_quoted(first_col),
                    min.to_sql_literal()
                ));
            }
        }
        if let (Some(max_key), Some(first_col)) = (&self.max_key, self.key_columns.first()) {
            if let Some(max) = max_key.first() {
                clauses.push(format!(
                    "{} < {}",
                    dialect.render_quoted(first_col),
                    max.to_sql_literal()
                ));
            }
        }
        if let (Some(min_update), Some(update_col)) = (&self.min_update, &self.update_column) {
            clauses.push(format!(
                "{} >= '{}'",
                dialect.render_quoted(update_col),
                min_update.format("%Y-%m-%d %H:%M:%S%.f")
            ));
        }
        if let (Some(max_update), Some(update_col)) = (&self.max_update, &self.update_column) {
            clauses.push(format!(
                "{} < '{}'",
                dialect.render_quoted(update_col),
                max_update.format("%Y-%m-%d %H:%M:%S%.f")
            ));
        }
        if let Some(extra) = &self.where_clause {
            clauses.push(format!("({extra})"));
        }
        clauses
    }

    fn where_sql(&self) -> String {
        let clauses = self.where_clauses();
        if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        }
    }

    fn order_by_sql(&self) -> String {
        let dialect = self.db.dialect();
        let cols = self
            .key_columns
            .iter()
            .map(|c| dialect.render_quoted(c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {cols}")
    }

    pub fn count(&self) -> Result<u64, DiffError> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.quoted_path(), self.where_sql());
        let row = self.db.query_scalar_row(&sql)?;
        row_to_u64(&row)
    }

    /// Canonicalised-and-concatenated expression used both for the
    /// checksum and for the downloaded-segment equality comparison, so
    /// the two mechanisms agree by construction.
    fn canonical_concat_expr(&self, other_schema: Option<&TableSchema>) -> Result<String, DiffError> {
        let dialect = self.db.dialect();
        let schema = self.schema()?;
        let mut parts = Vec::new();
        for name in self.projection() {
            let column = schema
                .get(&name)
                .ok_or_else(|| DiffError::schema(format!("column {name:?} not found")))?;
            let (min_precision, min_scale) = match other_schema.and_then(|s| s.get(&name)) {
                Some(other) => TableSchema::min_precision_scale(column, other),
                None => (column.precision, column.scale),
            };
            parts.push(dialect.render_canonicalize(
                column,
                min_precision,
                min_scale,
                self.case_sensitive,
            )?);
        }
        Ok(parts.join(&format!(" || '{CHECKSUM_SEPARATOR}' || ")))
    }

    /// `(count, checksum)` in a single query, per the data model's
    /// composable-XOR checksum contract.
    pub fn count_and_checksum(&self, other_schema: Option<&TableSchema>) -> Result<(u64, i64), DiffError> {
        let dialect = self.db.dialect();
        let concat_expr = self.canonical_concat_expr(other_schema)?;
        let per_row = dialect.render_checksum(&concat_expr);
        let agg = dialect.render_checksum_aggregate(&per_row);
        let sql = format!(
            "SELECT COUNT(*), {agg} FROM {}{}",
            self.quoted_path(),
            self.where_sql()
        );
        let row = self.db.query_scalar_row(&sql)?;
        let count = row_to_u64(&row[..1])?;
        let checksum = match row.get(1) {
            Some(crate::value::Value::Int(v)) | Some(crate::value::Value::BigInt(v)) => *v,
            Some(crate::value::Value::Null) | None => 0,
            other => {
                return Err(DiffError::schema(format!(
                    "unexpected checksum aggregate result: {other:?}"
                )))
            }
        };
        Ok((count, checksum))
    }

    /// `choose_checkpoints(n)`: `n-1` interior key values splitting this
    /// segment into `n` roughly equal children. Numeric bounded keys are
    /// computed arithmetically; otherwise an `ORDER BY ... OFFSET o LIMIT
    /// 1` query per checkpoint (the resolved "always include ORDER BY"
    /// design note).
    pub fn choose_checkpoints(&self, n: u32) -> Result<Vec<CompositeKey>, DiffError> {
        if n < 2 {
            return Err(DiffError::configuration("choose_checkpoints requires n >= 2"));
        }
        if let (Some(min_key), Some(max_key)) = (&self.min_key, &self.max_key) {
            if let (Some(KeyValue::Int(min)), Some(KeyValue::Int(max))) =
                (min_key.first(), max_key.first())
            {
                let span = max - min;
                let mut checkpoints = Vec::new();
                let mut prev = None;
                for i in 1..n as i64 {
                    let point = min + span * i / n as i64;
                    if Some(point) == prev || point <= *min || point >= *max {
                        continue;
                    }
                    prev = Some(point);
                    checkpoints.push(smallvec::smallvec![KeyValue::Int(point)]);
                }
                return Ok(checkpoints);
            }
        }

        let count = self.count()?;
        let dialect = self.db.dialect();
        let key_cols_sql = self
            .key_columns
            .iter()
            .map(|c| dialect.render_quoted(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut checkpoints = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for i in 1..n as u64 {
            let offset = count * i / n as u64;
            let sql = format!(
                "SELECT {key_cols_sql} FROM {}{}{} {}",
                self.quoted_path(),
                self.where_sql(),
                self.order_by_sql(),
                dialect.render_offset_limit(offset, 1),
            );
            let row = self.db.query_scalar_row(&sql)?;
            let key = row_to_composite_key(&row)?;
            let literal = key.iter().map(|k| k.to_sql_literal()).collect::<Vec<_>>().join(",");
            if seen.insert(literal) {
                checkpoints.push(key);
            }
        }
        Ok(checkpoints)
    }

    /// `segment_by_checkpoints`: adjacent, non-overlapping half-open
    /// children that union-cover this segment's range exactly.
    pub fn segment_by_checkpoints(&self, checkpoints: &[CompositeKey]) -> Vec<TableSegment> {
        let mut bounds = Vec::with_capacity(checkpoints.len() + 2);
        bounds.push(self.min_key.clone());
        for cp in checkpoints {
            bounds.push(Some(cp.clone()));
        }
        bounds.push(self.max_key.clone());

        bounds
            .windows(2)
            .filter_map(|w| {
                let (lo, hi) = (&w[0], &w[1]);
                if let (Some(lo), Some(hi)) = (lo, hi) {
                    if lo >= hi {
                        return None; // empty child from duplicate checkpoints, skipped
                    }
                }
                Some(self.new(SegmentOverrides {
                    min_key: Some(lo.clone()),
                    max_key: Some(hi.clone()),
                    ..Default::default()
                }))
            })
            .collect()
    }

    /// Stream every row in key order.
    pub fn get_values(&self) -> RowStream {
        let sql = format!(
            "SELECT {} FROM {}{}{}",
            self.projection()
                .iter()
                .map(|c| self.db.dialect().render_quoted(c))
                .collect::<Vec<_>>()
                .join(", "),
            self.quoted_path(),
            self.where_sql(),
            self.order_by_sql(),
        );
        self.db.query(&sql)
    }

    /// `MIN(key), MAX(key)` for the leading key column, used by
    /// `HashDiffer`'s bounding step when a segment is unbounded.
    pub fn key_bounds(&self) -> Result<(Option<KeyValue>, Option<KeyValue>), DiffError> {
        let dialect = self.db.dialect();
        let Some(first_col) = self.key_columns.first() else {
            return Ok((None, None));
        };
        let quoted = dialect.render_quoted(first_col);
        let sql = format!(
            "SELECT MIN({quoted}), MAX({quoted}) FROM {}{}",
            self.quoted_path(),
            self.where_sql()
        );
        let row = self.db.query_scalar_row(&sql)?;
        let min = row.first().and_then(value_to_key_value);
        let max = row.get(1).and_then(value_to_key_value);
        Ok((min, max))
    }

    /// `COUNT(*) = COUNT(DISTINCT key_cols)` uniqueness check.
    pub fn verify_unique_keys(&self) -> Result<(), DiffError> {
        let dialect = self.db.dialect();
        let key_cols_sql = self
            .key_columns
            .iter()
            .map(|c| dialect.render_quoted(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*), COUNT(DISTINCT ({key_cols_sql})) FROM {}{}",
            self.quoted_path(),
            self.where_sql()
        );
        let row = self.db.query_scalar_row(&sql)?;
        let total = row_to_u64(&row[..1])?;
        let distinct = row_to_u64(&row[1..2])?;
        if total != distinct {
            return Err(DiffError::UniquenessViolation {
                table: self.path.clone(),
                detail: format!("{total} rows but only {distinct} distinct keys"),
            });
        }
        Ok(())
    }
}

fn row_to_u64(row: &[crate::value::Value]) -> Result<u64, DiffError> {
    match row.first() {
        Some(crate::value::Value::Int(v)) | Some(crate::value::Value::BigInt(v)) if *v >= 0 => {
            Ok(*v as u64)
        }
        other => Err(DiffError::schema(format!("expected non-negative count, got {other:?}"))),
    }
}

pub(crate) fn value_to_key_value(v: &crate::value::Value) -> Option<KeyValue> {
    match v {
        crate::value::Value::Int(i) | crate::value::Value::BigInt(i) => Some(KeyValue::Int(*i)),
        crate::value::Value::Numeric(s) => Some(KeyValue::Numeric(s.clone())),
        crate::value::Value::Text(s) => Some(KeyValue::Text(s.clone())),
        crate::value::Value::Null => None,
        _ => None,
    }
}

fn row_to_composite_key(row: &Row) -> Result<CompositeKey, DiffError> {
    row.iter()
        .map(|v| {
            value_to_key_value(v)
                .ok_or_else(|| DiffError::schema("checkpoint query returned a non-key-typed value"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_by_checkpoints_partitions_without_gaps_or_overlap() {
        let cps = vec![vec![KeyValue::Int(10)], vec![KeyValue::Int(20)]];
        // Build bounds manually mirroring segment_by_checkpoints' logic to
        // check the invariant without a live Database.
        let mut bounds = vec![Some(vec![KeyValue::Int(0)])];
        bounds.extend(cps.into_iter().map(Some));
        bounds.push(Some(vec![KeyValue::Int(30)]));
        for w in bounds.windows(2) {
            assert!(w[0] < w[1]);
        }
    }
}
