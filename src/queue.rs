//! Cross-thread task bridge.
//!
//! Handler threads cannot touch host state. They package the work as a closure,
//! push it onto a [`TaskQueue`], and block on a per-task channel until the host
//! thread has drained the queue and run the closure against its own state.
//!
//! The host calls [`TaskQueue::drain`] from its periodic tick. Nothing else ever
//! executes a job, so every job sees the host exclusively and jobs run in the
//! order they were enqueued.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::WaitError;

/// A unit of host work. `Err` marks a failed job for drain accounting.
pub type Job<H> = Box<dyn FnOnce(&mut H) -> Result<(), String> + Send + 'static>;

pub struct TaskQueue<H> {
    pending: Mutex<VecDeque<Job<H>>>,
    open: AtomicBool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub executed: usize,
    pub failed: usize,
}

/// Receiving side of one submitted task.
pub struct Pending<T> {
    rx: Receiver<Result<T, WaitError>>,
}

impl<T> Pending<T> {
    /// Blocks until the host thread publishes the result or `timeout` elapses.
    /// A timed-out task stays queued and its late result is dropped.
    pub fn wait(self, timeout: Duration) -> Result<T, WaitError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(WaitError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(WaitError::Disconnected),
        }
    }
}

impl<H: 'static> TaskQueue<H> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
        }
    }

    /// Appends a job without blocking on the host. Returns false (and drops the
    /// job) when the queue has been closed.
    pub fn enqueue(&self, job: Job<H>) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.push_back(job);
        true
    }

    /// Queues `task` and hands back the channel its result will arrive on.
    pub fn submit<T, F>(&self, task: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut H) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let job: Job<H> = Box::new(move |host: &mut H| {
            let outcome = catch_unwind(AssertUnwindSafe(|| task(host)));
            let (result, status) = match outcome {
                Ok(value) => (Ok(value), Ok(())),
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    (Err(WaitError::TaskFailed(msg.clone())), Err(msg))
                }
            };
            if tx.send(result).is_err() {
                debug!("task finished after its waiter gave up; result discarded");
            }
            status
        });
        // A closed queue drops the job, and with it `tx`, so the waiter sees
        // Disconnected straight away.
        self.enqueue(job);
        Pending { rx }
    }

    pub fn submit_and_wait<T, F>(&self, task: F, timeout: Duration) -> Result<T, WaitError>
    where
        T: Send + 'static,
        F: FnOnce(&mut H) -> T + Send + 'static,
    {
        self.submit(task).wait(timeout)
    }

    /// Runs every job queued at the moment of the call, in order. Jobs queued
    /// while draining wait for the next tick. A failing job is logged and
    /// counted; it never stops the drain.
    pub fn drain(&self, host: &mut H) -> DrainReport {
        let batch = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        let mut report = DrainReport::default();
        for job in batch {
            match catch_unwind(AssertUnwindSafe(|| job(host))) {
                Ok(Ok(())) => report.executed += 1,
                Ok(Err(msg)) => {
                    warn!("host task failed: {msg}");
                    report.failed += 1;
                }
                Err(payload) => {
                    warn!("host task panicked: {}", panic_message(payload.as_ref()));
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Refuses new jobs and drops the ones still waiting. Returns how many were dropped.
    pub fn close(&self) -> usize {
        self.open.store(false, Ordering::Release);
        let dropped = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pending)
        };
        dropped.len()
    }

    pub fn reopen(&self) {
        self.open.store(true, Ordering::Release);
    }
}

impl<H: 'static> Default for TaskQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
