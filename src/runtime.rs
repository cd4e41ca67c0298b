//! Query dispatch runtime: one bounded worker pool per database, lazy
//! pull-based row streaming, and cooperative cancellation.
//!
//! Every query against a [`crate::db::Database`] passes through its
//! `DbWorkerPool`. Submission never runs SQL on the calling thread — it
//! hands a closure to a pool worker and gets back either a scalar result
//! or a [`RowStream`] the caller pulls from at its own pace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::DiffError;
use crate::value::Row;

/// Bound on the row-stream channel: how many materialised rows a worker is
/// allowed to buffer ahead of a slow consumer before blocking. This is the
/// runtime's backpressure point (spec §5 suspension point 2).
const ROW_BUFFER: usize = 256;

/// Shared cancellation flag. Cloning is cheap; every in-flight query and
/// its worker thread hold a clone and poll it between rows.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A lazily-produced sequence of rows. Dropping the receiver side before
/// the stream is exhausted cancels the producing query — the runtime's
/// cooperative-cancellation contract (spec §4.3, §5).
pub struct RowStream {
    rx: Receiver<Result<Row, DiffError>>,
    cancel: CancelToken,
}

impl RowStream {
    fn new(rx: Receiver<Result<Row, DiffError>>, cancel: CancelToken) -> Self {
        RowStream { rx, cancel }
    }

    /// Close the stream early, signalling the producing worker to stop
    /// issuing further rows. The worker's in-flight query still runs to
    /// completion if the driver cannot interrupt it (spec §5).
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Iterator for RowStream {
    type Item = Result<Row, DiffError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.rx.recv().ok()
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Task = Box<dyn FnOnce(&CancelToken) + Send>;

/// A bounded worker pool dedicated to one database connection identity.
/// `threads` workers pull submitted closures off a bounded channel, so a
/// burst of submissions blocks the caller rather than growing unbounded
/// (spec §5 suspension point 1).
pub struct DbWorkerPool {
    job_tx: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
    cancel: CancelToken,
}

impl DbWorkerPool {
    /// Spawn `threads` workers (minimum 1). `make_worker_state` is called
    /// once per worker thread to build that worker's local state — for
    /// drivers with per-connection parallelism this should be a fresh
    /// connection per thread; a driver whose backing engine only tolerates
    /// one live connection may share one behind a mutex instead, as the
    /// embedded DuckDB driver does.
    pub fn new<S, F>(threads: usize, make_worker_state: F) -> Self
    where
        S: 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let threads = threads.max(1);
        let (job_tx, job_rx) = bounded::<Task>(threads);
        let cancel = CancelToken::new();
        let make_worker_state = Arc::new(make_worker_state);

        let handles = (0..threads)
            .map(|_| {
                let job_rx: Receiver<Task> = job_rx.clone();
                let cancel = cancel.clone();
                let make_worker_state = Arc::clone(&make_worker_state);
                std::thread::spawn(move || {
                    let _state = make_worker_state();
                    while let Ok(job) = job_rx.recv() {
                        if cancel.is_cancelled() {
                            continue;
                        }
                        job(&cancel);
                    }
                })
            })
            .collect();

        DbWorkerPool {
            job_tx,
            handles,
            cancel,
        }
    }

    /// Run `f` on a worker and block the caller until it returns. Used for
    /// scalar results (`count`, `count_and_checksum`, `MIN/MAX` bounding).
    pub fn submit_scalar<T, F>(&self, f: F) -> Result<T, DiffError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DiffError> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job: Task = Box::new(move |_cancel| {
            let _ = tx.send(f());
        });
        self.job_tx
            .send(job)
            .map_err(|_| DiffError::Cancelled)?;
        rx.recv().map_err(|_| DiffError::Cancelled)?
    }

    /// Run `produce` on a worker, streaming each row it yields back to the
    /// caller over a bounded channel. `produce` is handed a sink closure
    /// and the pool's cancellation token so it can stop early.
    pub fn submit_stream<F>(&self, produce: F) -> RowStream
    where
        F: FnOnce(&mut dyn FnMut(Row) -> bool, &CancelToken) -> Result<(), DiffError>
            + Send
            + 'static,
    {
        let (tx, rx) = bounded::<Result<Row, DiffError>>(ROW_BUFFER);
        let stream_cancel = CancelToken::new();
        let worker_cancel = stream_cancel.clone();

        let job: Task = Box::new(move |pool_cancel| {
            let tx2 = tx.clone();
            let mut sink = move |row: Row| -> bool {
                if worker_cancel.is_cancelled() || pool_cancel.is_cancelled() {
                    return false;
                }
                tx2.send(Ok(row)).is_ok()
            };
            if let Err(e) = produce(&mut sink, pool_cancel) {
                let _ = tx.send(Err(e));
            }
        });

        if self.job_tx.send(job).is_err() {
            stream_cancel.cancel();
        }

        RowStream::new(rx, stream_cancel)
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DbWorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
        drop(std::mem::replace(&mut self.job_tx, {
            let (tx, _rx) = bounded(0);
            tx
        }));
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips_through_pool() {
        let pool = DbWorkerPool::new(2, || ());
        let result = pool.submit_scalar(|| Ok::<_, DiffError>(42)).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn stream_yields_rows_in_order() {
        let pool = DbWorkerPool::new(1, || ());
        let stream = pool.submit_stream(|sink, _cancel| {
            for i in 0..5 {
                if !sink(vec![crate::value::Value::Int(i)]) {
                    break;
                }
            }
            Ok(())
        });
        let rows: Vec<_> = stream.filter_map(Result::ok).collect();
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn dropping_stream_cancels_producer() {
        let pool = DbWorkerPool::new(1, || ());
        let stream = pool.submit_stream(|sink, _cancel| {
            for i in 0..1_000_000 {
                if !sink(vec![crate::value::Value::Int(i)]) {
                    return Ok(());
                }
            }
            Ok(())
        });
        drop(stream);
        // No assertion beyond "this returns promptly" — the worker thread
        // observes cancellation on its next send and stops pushing rows.
    }
}
