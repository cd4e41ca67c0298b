//! JoinDiff: a single same-database outer-join query expressing the diff,
//! with optional materialisation into a new table.

use std::sync::mpsc;

use crate::error::DiffError;
use crate::schema::TableSchema;
use crate::segment::TableSegment;
use crate::value::{DiffRecord, Row, Sign, Value};

use super::{DiffOptions, DiffStats};

pub struct JoinDiffer<'a> {
    opts: &'a DiffOptions,
}

impl<'a> JoinDiffer<'a> {
    pub fn new(opts: &'a DiffOptions) -> Self {
        JoinDiffer { opts }
    }

    /// Applicable only when `left` and `right` share a connection — the
    /// façade is responsible for having already checked that.
    pub fn diff(
        &self,
        left: &TableSegment,
        right: &TableSegment,
        tx: &mpsc::Sender<Result<DiffRecord, DiffError>>,
        stats: &DiffStats,
        cancel: &crate::runtime::CancelToken,
    ) -> Result<(), DiffError> {
        if left.key_columns != right.key_columns {
            return Err(DiffError::configuration(
                "JoinDiff requires identical key columns on both sides",
            ));
        }
        if !self.opts.assume_unique_key {
            left.verify_unique_keys()?;
            right.verify_unique_keys()?;
        }

        let sql = self.render_diff_query(left, right, false)?;
        let stream = left.db.query(&sql);

        let projection_len = left.projection().len();
        for row in stream {
            if cancel.is_cancelled() || stats.limit_reached(self.opts.limit) {
                break;
            }
            let row = row?;
            let (left_row, right_row) = split_sides(&row, projection_len)?;

            let left_present = !matches!(left_row[0], Value::Null);
            let right_present = !matches!(right_row[0], Value::Null);

            match (left_present, right_present) {
                (true, false) => emit(tx, stats, Sign::Minus, left_row)?,
                (false, true) => emit(tx, stats, Sign::Plus, right_row)?,
                (true, true) => {
                    emit(tx, stats, Sign::Minus, left_row)?;
                    emit(tx, stats, Sign::Plus, right_row)?;
                }
                (false, false) => {}
            }
        }
        Ok(())
    }

    /// `-m NAME`: wrap the diff query as `CREATE TABLE name AS ...`,
    /// substituting `%t` with the current UTC timestamp and dropping any
    /// pre-existing table of the same name first.
    pub fn materialize(
        &self,
        left: &TableSegment,
        right: &TableSegment,
        name_template: &str,
        now: chrono::DateTime<chrono::Utc>,
        all_rows: bool,
        write_limit: Option<u64>,
    ) -> Result<String, DiffError> {
        let table_name = name_template.replace("%t", &now.format("%Y%m%dT%H%M%SZ").to_string());
        let dialect = left.db.dialect();
        let quoted_name = dialect.render_quoted(&table_name);

        left.db.execute(&format!("DROP TABLE IF EXISTS {quoted_name}"))?;

        let diff_sql = self.render_diff_query(left, right, all_rows)?;
        let select_list = self.render_materialized_select_list(left)?;
        let limit_sql = match write_limit {
            Some(n) => format!(" LIMIT {n}"),
            None => String::new(),
        };
        let ctas = format!(
            "CREATE TABLE {quoted_name} AS SELECT {select_list} FROM ({diff_sql}) AS diffed{limit_sql}"
        );
        left.db.execute(&ctas)?;
        Ok(table_name)
    }

    /// `(diff_sign CHAR(1), key_cols..., extra_cols_left..., extra_cols_right...)`.
    fn render_materialized_select_list(&self, left: &TableSegment) -> Result<String, DiffError> {
        let dialect = left.db.dialect();
        let first_key = dialect.render_quoted(&left.key_columns[0]);
        let mut parts = vec![format!(
            "CASE WHEN {first_key}_l IS NULL THEN '+' ELSE '-' END AS diff_sign"
        )];
        for col in left.projection() {
            let quoted = dialect.render_quoted(&col);
            parts.push(format!("COALESCE({quoted}_l, {quoted}_r) AS {quoted}"));
        }
        Ok(parts.join(", "))
    }

    /// Sample up to `sample_size` keys exclusive to each side.
    pub fn sample_exclusive_rows(
        &self,
        left: &TableSegment,
        right: &TableSegment,
        sample_size: u64,
    ) -> Result<(Vec<Row>, Vec<Row>), DiffError> {
        let dialect = left.db.dialect();
        let key_cols = left
            .key_columns
            .iter()
            .map(|c| dialect.render_quoted(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sample = |side: &TableSegment, other: &TableSegment, alias_self: &str, alias_other: &str| {
            let join_cond = self.join_condition(left, alias_self, alias_other);
            let sql = format!(
                "SELECT {key_cols} FROM {} {alias_self} LEFT JOIN {} {alias_other} ON {join_cond} \
                 WHERE {alias_other}.{} IS NULL ORDER BY RANDOM() LIMIT {sample_size}",
                self.quoted(side),
                self.quoted(other),
                dialect.render_quoted(&left.key_columns[0]),
            );
            side.db.query(&sql).collect::<Result<Vec<_>, _>>()
        };
        let left_only = sample(left, right, "l", "r")?;
        let right_only = sample(right, left, "r", "l")?;
        Ok((left_only, right_only))
    }

    fn quoted(&self, seg: &TableSegment) -> String {
        let dialect = seg.db.dialect();
        seg.path
            .split('.')
            .map(|p| dialect.render_quoted(p))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn join_condition(&self, seg: &TableSegment, l: &str, r: &str) -> String {
        let dialect = seg.db.dialect();
        seg.key_columns
            .iter()
            .map(|c| {
                let q = dialect.render_quoted(c);
                format!("{l}.{q} = {r}.{q}")
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Builds the core `FULL OUTER JOIN` diff query. Columns are selected
    /// twice per projected name (`<col>_l`, `<col>_r`) so the Rust side
    /// can tell which side(s) a row came from without re-querying.
    fn render_diff_query(
        &self,
        left: &TableSegment,
        right: &TableSegment,
        widen_to_all_rows: bool,
    ) -> Result<String, DiffError> {
        let dialect = left.db.dialect();
        let left_schema = left
            .schema
            .as_deref()
            .ok_or_else(|| DiffError::configuration("left segment schema not bound"))?;
        let right_schema = right
            .schema
            .as_deref()
            .ok_or_else(|| DiffError::configuration("right segment schema not bound"))?;

        let projection = left.projection();
        let mut select_list = Vec::new();
        let mut mismatch_clauses = Vec::new();

        for col in &projection {
            let lq = dialect.render_quoted(col);
            select_list.push(format!("l.{lq} AS {lq}_l"));
            select_list.push(format!("r.{lq} AS {lq}_r"));

            if !left.key_columns.contains(col) {
                let canon = canonical_pair(left, right, left_schema, right_schema, col)?;
                mismatch_clauses.push(format!(
                    "({} IS DISTINCT FROM {})",
                    canon.0, canon.1
                ));
            }
        }

        let join_cond = self.join_condition(left, "l", "r");
        let first_key_l = dialect.render_quoted(&left.key_columns[0]);

        let where_sql = if widen_to_all_rows {
            String::new()
        } else {
            let mut clauses = vec![
                format!("l.{first_key_l} IS NULL"),
                format!("r.{first_key_l} IS NULL"),
            ];
            clauses.extend(mismatch_clauses);
            format!(" WHERE {}", clauses.join(" OR "))
        };

        Ok(format!(
            "SELECT {} FROM {} l FULL OUTER JOIN {} r ON {join_cond}{where_sql}",
            select_list.join(", "),
            self.quoted(left),
            self.quoted(right),
        ))
    }
}

fn canonical_pair(
    left: &TableSegment,
    right: &TableSegment,
    left_schema: &TableSchema,
    right_schema: &TableSchema,
    col: &str,
) -> Result<(String, String), DiffError> {
    let dialect = left.db.dialect();
    let lc = left_schema
        .get(col)
        .ok_or_else(|| DiffError::schema(format!("column {col:?} missing on left")))?;
    let rc = right_schema
        .get(col)
        .ok_or_else(|| DiffError::schema(format!("column {col:?} missing on right")))?;
    let (min_precision, min_scale) = TableSchema::min_precision_scale(lc, rc);
    let left_expr = dialect.render_canonicalize(lc, min_precision, min_scale, left.case_sensitive)?;
    let right_expr = dialect.render_canonicalize(rc, min_precision, min_scale, right.case_sensitive)?;
    Ok((
        left_expr.replace(&dialect.render_quoted(col), &format!("l.{}", dialect.render_quoted(col))),
        right_expr.replace(&dialect.render_quoted(col), &format!("r.{}", dialect.render_quoted(col))),
    ))
}

fn split_sides(row: &Row, projection_len: usize) -> Result<(Row, Row), DiffError> {
    if row.len() != projection_len * 2 {
        return Err(DiffError::schema(
            "join diff query returned an unexpected column count",
        ));
    }
    let left = (0..projection_len).map(|i| row[i * 2].clone()).collect();
    let right = (0..projection_len).map(|i| row[i * 2 + 1].clone()).collect();
    Ok((left, right))
}

fn emit(
    tx: &mpsc::Sender<Result<DiffRecord, DiffError>>,
    stats: &DiffStats,
    sign: Sign,
    row: Row,
) -> Result<(), DiffError> {
    stats.record(sign);
    tx.send(Ok(DiffRecord { sign, row })).map_err(|_| DiffError::Cancelled)
}
