//! Fan-out / fan-in
//!
//! Runs one task per shard on scoped worker threads and joins them through a
//! channel that must deliver exactly one result per task.
//!
//! The join is a barrier: it returns only after every task has finished,
//! even when an early one fails, and reports the first error by completion
//! order. Nothing is cancelled.

use std::thread;

use crossbeam::channel;

use crate::error::Result;

/// Run `f(shard, task)` for every task concurrently and join them all
pub(crate) fn join_all<T, F>(tasks: Vec<(String, T)>, f: F) -> Result<()>
where
    T: Send,
    F: Fn(&str, T) -> Result<()> + Sync,
{
    // A single shard needs no worker thread
    if tasks.len() <= 1 {
        return match tasks.into_iter().next() {
            Some((shard, task)) => f(&shard, task),
            None => Ok(()),
        };
    }

    let expected = tasks.len();
    let (tx, rx) = channel::bounded(expected);

    thread::scope(|scope| {
        for (shard, task) in tasks {
            let tx = tx.clone();
            let f = &f;
            scope.spawn(move || {
                let result = f(&shard, task);
                // The receiver outlives every worker in this scope
                let _ = tx.send((shard, result));
            });
        }
        drop(tx);

        let mut first_error = None;
        let mut completed = 0;

        for (shard, result) in rx.iter() {
            completed += 1;
            if let Err(e) = result {
                tracing::warn!(shard = %shard, error = %e, "shard operation failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        debug_assert_eq!(completed, expected);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    })
}
