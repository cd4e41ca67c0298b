//! HashDiff: cross-database, divide-and-conquer checksum bisection.

use std::sync::mpsc;

use smallvec::smallvec;

use crate::error::DiffError;
use crate::segment::{value_to_key_value, SegmentOverrides, TableSegment};
use crate::value::{DiffRecord, KeyValue, Row, Sign};

use super::{DiffOptions, DiffStats};

pub struct HashDiffer<'a> {
    opts: &'a DiffOptions,
}

impl<'a> HashDiffer<'a> {
    pub fn new(opts: &'a DiffOptions) -> Self {
        HashDiffer { opts }
    }

    /// Emit every `(sign, row)` pair for `(left, right)` onto `tx`. Runs on
    /// the calling thread, fanning out query work onto the segments' own
    /// worker pools and recursing; callers typically drive this from a
    /// background thread and consume `rx` as a lazy iterator (the
    /// façade does this in [`super::DiffResult`]).
    pub fn diff(
        &self,
        left: TableSegment,
        right: TableSegment,
        tx: &mpsc::Sender<Result<DiffRecord, DiffError>>,
        stats: &DiffStats,
        cancel: &crate::runtime::CancelToken,
    ) -> Result<(), DiffError> {
        let (left, right) = self.bound(left, right)?;

        if !self.opts.assume_unique_key {
            left.verify_unique_keys()?;
            right.verify_unique_keys()?;
        }

        self.bisect(left, right, tx, stats, cancel)
    }

    /// Step 1: if either side is unbounded, fetch `MIN(key), MAX(key)` on
    /// both and take the union, exclusive on the upper bound.
    fn bound(
        &self,
        left: TableSegment,
        right: TableSegment,
    ) -> Result<(TableSegment, TableSegment), DiffError> {
        if left.is_bounded() && right.is_bounded() {
            return Ok((left, right));
        }

        let (left_min, left_max) = left.key_bounds()?;
        let (right_min, right_max) = right.key_bounds()?;

        let min = [left_min, right_min]
            .into_iter()
            .flatten()
            .min()
            .map(|k| smallvec![k]);
        let max = [left_max, right_max]
            .into_iter()
            .flatten()
            .max()
            .map(|k| smallvec![bump_exclusive(k)]);

        let overrides = || SegmentOverrides {
            min_key: Some(min.clone()),
            max_key: Some(max.clone()),
            ..Default::default()
        };
        Ok((left.new(overrides()), right.new(overrides())))
    }

    fn bisect(
        &self,
        left: TableSegment,
        right: TableSegment,
        tx: &mpsc::Sender<Result<DiffRecord, DiffError>>,
        stats: &DiffStats,
        cancel: &crate::runtime::CancelToken,
    ) -> Result<(), DiffError> {
        if cancel.is_cancelled() || stats.limit_reached(self.opts.limit) {
            return Ok(());
        }

        let left_count = left.count()?;
        if left_count <= self.opts.bisection_threshold {
            return self.download_and_align(left, right, tx, stats, cancel);
        }

        let (left_count, left_checksum) = left.count_and_checksum(right.schema.as_deref())?;
        let (right_count, right_checksum) = right.count_and_checksum(left.schema.as_deref())?;

        if left_count == right_count && left_checksum == right_checksum {
            return Ok(()); // clean subtree
        }
        if left_count == 0 && right_count == 0 {
            return Ok(());
        }

        let factor = self.opts.bisection_factor.max(2);
        let wider = if left_count >= right_count { &left } else { &right };
        let checkpoints = wider.choose_checkpoints(factor)?;

        let left_children = left.segment_by_checkpoints(&checkpoints);
        let right_children = right.segment_by_checkpoints(&checkpoints);

        for (l, r) in left_children.into_iter().zip(right_children) {
            if cancel.is_cancelled() || stats.limit_reached(self.opts.limit) {
                break;
            }
            self.bisect(l, r, tx, stats, cancel)?;
        }
        Ok(())
    }

    /// Below `bisection_threshold`: download both sides in full, merge-join
    /// by key, and emit row-level diffs per the alignment rules.
    fn download_and_align(
        &self,
        left: TableSegment,
        right: TableSegment,
        tx: &mpsc::Sender<Result<DiffRecord, DiffError>>,
        stats: &DiffStats,
        cancel: &crate::runtime::CancelToken,
    ) -> Result<(), DiffError> {
        let key_len = left.key_columns.len();

        let mut left_rows = left.get_values().collect::<Result<Vec<Row>, _>>()?;
        let mut right_rows = right.get_values().collect::<Result<Vec<Row>, _>>()?;
        left_rows.sort_by(|a, b| row_key(a, key_len).cmp(&row_key(b, key_len)));
        right_rows.sort_by(|a, b| row_key(a, key_len).cmp(&row_key(b, key_len)));

        let mut i = 0;
        let mut j = 0;
        while i < left_rows.len() || j < right_rows.len() {
            if cancel.is_cancelled() || stats.limit_reached(self.opts.limit) {
                break;
            }
            let li = if i < left_rows.len() { Some(row_key(&left_rows[i], key_len)) } else { None };
            let rj = if j < right_rows.len() { Some(row_key(&right_rows[j], key_len)) } else { None };

            match (li, rj) {
                (Some(lk), Some(rk)) if lk == rk => {
                    if left_rows[i][key_len..] != right_rows[j][key_len..] {
                        emit(tx, stats, Sign::Minus, left_rows[i].clone())?;
                        emit(tx, stats, Sign::Plus, right_rows[j].clone())?;
                    }
                    i += 1;
                    j += 1;
                }
                (Some(lk), Some(rk)) if lk < rk => {
                    emit(tx, stats, Sign::Minus, left_rows[i].clone())?;
                    i += 1;
                }
                (Some(_), Some(_)) => {
                    emit(tx, stats, Sign::Plus, right_rows[j].clone())?;
                    j += 1;
                }
                (Some(_), None) => {
                    emit(tx, stats, Sign::Minus, left_rows[i].clone())?;
                    i += 1;
                }
                (None, Some(_)) => {
                    emit(tx, stats, Sign::Plus, right_rows[j].clone())?;
                    j += 1;
                }
                (None, None) => break,
            }
        }
        Ok(())
    }
}

/// The row's leading key columns as the totally-ordered `KeyValue` domain,
/// not `Value::to_string()` — integer keys must sort numerically (`9 <
/// 10`), which string comparison gets wrong for differing digit counts.
fn row_key(row: &Row, key_len: usize) -> Vec<KeyValue> {
    row[..key_len]
        .iter()
        .map(|v| value_to_key_value(v).unwrap_or_else(|| KeyValue::Text(v.to_string())))
        .collect()
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

fn bump_exclusive(key: KeyValue) -> KeyValue {
    match key {
        KeyValue::Int(i) => KeyValue::Int(i + 1),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_exclusive_increments_integer_keys() {
        assert_eq!(bump_exclusive(KeyValue::Int(9)), KeyValue::Int(10));
    }

    #[test]
    fn row_key_takes_leading_columns() {
        let row: Row = vec![
            crate::value::Value::Int(1),
            crate::value::Value::Text("a".into()),
        ];
        assert_eq!(row_key(&row, 1), vec![KeyValue::Int(1)]);
    }

    #[test]
    fn row_key_orders_integers_numerically_not_lexicographically() {
        let row9: Row = vec![crate::value::Value::Int(9)];
        let row10: Row = vec![crate::value::Value::Int(10)];
        assert!(row_key(&row9, 1) < row_key(&row10, 1));
    }
}
