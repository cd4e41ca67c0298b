//! The differ façade: validates inputs, picks an algorithm, and exposes a
//! streaming result over whichever of [`hash_diff::HashDiffer`] or
//! [`join_diff::JoinDiffer`] ran.

pub mod hash_diff;
pub mod join_diff;
pub mod output;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;

use crate::db::Database;
use crate::error::DiffError;
use crate::segment::TableSegment;
use crate::value::{DiffRecord, Sign};

use hash_diff::HashDiffer;
use join_diff::JoinDiffer;

/// `connect(uri, thread_count)` from the external interface.
pub fn connect(uri: &str, threads: usize) -> Result<Arc<dyn Database>, DiffError> {
    Ok(Arc::from(crate::db::connect(uri, threads)?))
}

/// `connect_to_table(uri, table_name_or_path, key_columns)`.
pub fn connect_to_table(
    db: Arc<dyn Database>,
    table: impl Into<String>,
    key_columns: Vec<String>,
) -> Result<TableSegment, DiffError> {
    TableSegment::new_root(db, table, key_columns).with_schema()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Auto,
    HashDiff,
    JoinDiff,
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::Auto
    }
}

/// All tunables from `diff_tables`'s external interface plus the CLI
/// options that narrow to them.
#[derive(Clone)]
pub struct DiffOptions {
    pub bisection_factor: u32,
    pub bisection_threshold: u64,
    pub threads: usize,
    pub algorithm: Algorithm,
    pub assume_unique_key: bool,
    pub limit: Option<u64>,
    pub where_clause: Option<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            bisection_factor: 32,
            bisection_threshold: 16_384,
            threads: 1,
            algorithm: Algorithm::Auto,
            assume_unique_key: false,
            limit: None,
            where_clause: None,
        }
    }
}

/// Live counters surfaced through [`DiffResult::stats`]. Cheap to clone —
/// every counter is an `Arc<AtomicU64>`.
#[derive(Clone, Default)]
pub struct DiffStats {
    minus: Arc<AtomicU64>,
    plus: Arc<AtomicU64>,
}

impl DiffStats {
    fn record(&self, sign: Sign) {
        match sign {
            Sign::Minus => self.minus.fetch_add(1, Ordering::Relaxed),
            Sign::Plus => self.plus.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn limit_reached(&self, limit: Option<u64>) -> bool {
        match limit {
            Some(limit) => self.minus.load(Ordering::Relaxed) + self.plus.load(Ordering::Relaxed) >= limit,
            None => false,
        }
    }

    pub fn minus_count(&self) -> u64 {
        self.minus.load(Ordering::Relaxed)
    }

    pub fn plus_count(&self) -> u64 {
        self.plus.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.minus_count() + self.plus_count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows differ ({} only-left/changed-left, {} only-right/changed-right)",
            self.total(),
            self.minus_count(),
            self.plus_count(),
        )
    }
}

/// Validate that two segments' declared column sets are compatible for a
/// diff: same key columns, same extra-column names present on both sides.
fn validate_schema_compatibility(
    left: &TableSegment,
    right: &TableSegment,
) -> Result<(), DiffError> {
    if left.key_columns.len() != right.key_columns.len() {
        return Err(DiffError::schema(
            "left and right key column counts differ",
        ));
    }
    let left_schema = left
        .schema
        .as_deref()
        .ok_or_else(|| DiffError::configuration("left segment schema not bound"))?;
    let right_schema = right
        .schema
        .as_deref()
        .ok_or_else(|| DiffError::configuration("right segment schema not bound"))?;

    for col in left.projection() {
        let lc = left_schema
            .get(&col)
            .ok_or_else(|| DiffError::schema(format!("column {col:?} missing on left")))?;
        let rc = right_schema.get(&col).ok_or_else(|| {
            DiffError::schema(format!("column {col:?} present on left but missing on right"))
        })?;
        if lc.column_type != rc.column_type {
            return Err(DiffError::schema(format!(
                "column {col:?} has incompatible types: left={:?} right={:?}",
                lc.declared_type, rc.declared_type
            )));
        }
    }
    Ok(())
}

fn derive_update_bounds(
    min_age: Option<std::time::Duration>,
    max_age: Option<std::time::Duration>,
    update_column: &Option<String>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(Option<chrono::NaiveDateTime>, Option<chrono::NaiveDateTime>), DiffError> {
    if (min_age.is_some() || max_age.is_some()) && update_column.is_none() {
        return Err(DiffError::configuration(
            "--min-age/--max-age require an update column (-t/--update-column)",
        ));
    }
    // min_age=5min means "exclude rows updated within the last 5 minutes",
    // i.e. max_update = now - min_age. max_age bounds the other side:
    // min_update = now - max_age.
    let max_update = min_age.map(|d| (now - chrono::Duration::from_std(d).unwrap_or_default()).naive_utc());
    let min_update = max_age.map(|d| (now - chrono::Duration::from_std(d).unwrap_or_default()).naive_utc());
    Ok((min_update, max_update))
}

/// Result of `diff_tables`: a lazy iterator over diff records plus
/// aggregate stats. Errors are cached on first occurrence and replayed on
/// every subsequent poll (idempotent failure, spec §7).
pub struct DiffResult {
    rx: mpsc::Receiver<Result<DiffRecord, DiffError>>,
    cancel: crate::runtime::CancelToken,
    stats: DiffStats,
    cached_error: Mutex<Option<DiffError>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl DiffResult {
    pub fn stats(&self) -> &DiffStats {
        &self.stats
    }

    pub fn summary(&self) -> String {
        self.stats.summary()
    }

    /// Cancel all outstanding work. After this returns no database cursor
    /// from this diff remains open.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Iterator for DiffResult {
    type Item = Result<DiffRecord, DiffError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.cached_error.lock().unwrap().clone() {
            return Some(Err(err));
        }
        match self.rx.recv() {
            Ok(Ok(record)) => Some(Ok(record)),
            Ok(Err(e)) => {
                *self.cached_error.lock().unwrap() = Some(e.clone());
                Some(Err(e))
            }
            Err(_) => None,
        }
    }
}

impl Drop for DiffResult {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
pub struct DiffRequest {
    pub extra_columns: Vec<String>,
    pub update_column: Option<String>,
    pub min_age: Option<std::time::Duration>,
    pub max_age: Option<std::time::Duration>,
}

/// Applies a [`DiffRequest`]/[`DiffOptions`] pair to a segment pair and
/// resolves the effective algorithm, without starting any query work.
/// Shared by [`diff_tables`] and by callers that need prepared segments
/// without the streaming wrapper (e.g. `-m`/materialize, which runs
/// [`join_diff::JoinDiffer::materialize`] directly).
pub fn prepare(
    mut left: TableSegment,
    mut right: TableSegment,
    request: DiffRequest,
    opts: &DiffOptions,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(TableSegment, TableSegment, Algorithm), DiffError> {
    left.update_column = request.update_column.clone();
    right.update_column = request.update_column.clone();
    left.extra_columns = request.extra_columns.clone();
    right.extra_columns = request.extra_columns;
    left.where_clause = opts.where_clause.clone();
    right.where_clause = opts.where_clause.clone();

    let (min_update, max_update) =
        derive_update_bounds(request.min_age, request.max_age, &request.update_column, now)?;
    left.min_update = min_update;
    left.max_update = max_update;
    right.min_update = min_update;
    right.max_update = max_update;

    validate_schema_compatibility(&left, &right)?;

    let same_connection = left.db.connection_id() == right.db.connection_id();
    let algorithm = match opts.algorithm {
        Algorithm::Auto if same_connection => Algorithm::JoinDiff,
        Algorithm::Auto => Algorithm::HashDiff,
        explicit => explicit,
    };
    if algorithm == Algorithm::JoinDiff && !same_connection {
        return Err(DiffError::configuration(
            "joindiff requires both tables on the same connection",
        ));
    }

    Ok((left, right, algorithm))
}

/// `diff_tables(left, right, *, ...)`. `left`/`right` must already be
/// bound (`with_schema()`-ed); callers build them through
/// [`connect_to_table`].
pub fn diff_tables(
    left: TableSegment,
    right: TableSegment,
    request: DiffRequest,
    opts: DiffOptions,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<DiffResult, DiffError> {
    let (left, right, algorithm) = prepare(left, right, request, &opts, now)?;

    let (tx, rx) = mpsc::channel();
    let cancel = crate::runtime::CancelToken::new();
    let stats = DiffStats::default();

    let worker_cancel = cancel.clone();
    let worker_stats = stats.clone();
    let worker = std::thread::spawn(move || {
        let result = match algorithm {
            Algorithm::HashDiff | Algorithm::Auto => {
                HashDiffer::new(&opts).diff(left, right, &tx, &worker_stats, &worker_cancel)
            }
            Algorithm::JoinDiff => {
                JoinDiffer::new(&opts).diff(&left, &right, &tx, &worker_stats, &worker_cancel)
            }
        };
        if let Err(e) = result {
            if !matches!(e, DiffError::Cancelled) {
                let _ = tx.send(Err(e));
            }
        }
    });

    Ok(DiffResult {
        rx,
        cancel,
        stats,
        cached_error: Mutex::new(None),
        worker: Some(worker),
    })
}
