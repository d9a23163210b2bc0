//! Fixed-size worker pool with a result channel
//!
//! Tasks are pulled from a shared queue by at most `size` threads. Results flow
//! back over a channel and are handed to the caller's callback on the calling
//! thread, one at a time, in completion order. A pool of one runs its tasks
//! inline on the calling thread.

use crate::error::{NormalizeError, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        WorkerPool { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over `tasks` and feed each outcome to `on_result`
    ///
    /// A task that panics is reported as [`NormalizeError::WorkerFailed`]; the
    /// remaining tasks still run.
    pub fn run<T, R, F, C>(&self, tasks: Vec<T>, work: F, mut on_result: C)
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R> + Sync,
        C: FnMut(usize, Result<R>),
    {
        if tasks.is_empty() {
            return;
        }
        let threads = self.size.min(tasks.len());
        if threads == 1 {
            for (idx, task) in tasks.into_iter().enumerate() {
                on_result(idx, run_task(&work, idx, task));
            }
            return;
        }
        let queue = Mutex::new(tasks.into_iter().enumerate());
        let (tx, rx) = mpsc::channel::<(usize, Result<R>)>();

        thread::scope(|scope| {
            for worker in 0..threads {
                let tx = tx.clone();
                let queue = &queue;
                let work = &work;
                scope.spawn(move || loop {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).next();
                    let Some((idx, task)) = next else {
                        debug!(worker, "worker idle, exiting");
                        break;
                    };
                    if tx.send((idx, run_task(work, idx, task))).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for (idx, outcome) in rx {
                on_result(idx, outcome);
            }
        });
    }
}

fn run_task<T, R, F>(work: &F, idx: usize, task: T) -> Result<R>
where
    F: Fn(usize, T) -> Result<R>,
{
    catch_unwind(AssertUnwindSafe(|| work(idx, task)))
        .unwrap_or_else(|panic| Err(NormalizeError::WorkerFailed(panic_message(panic))))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
