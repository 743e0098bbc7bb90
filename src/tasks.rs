//! Background task execution: one worker at a time, polled by the owner.
//!
//! Everything that walks a whole file or document (index building, disk
//! search, formatting, disk-mode save) runs on a worker thread so the
//! thread that owns the visible page buffer stays responsive. The queue is
//! single-slot by construction: submitting while a task runs fails with
//! `WorkerBusy` rather than queuing, which is what lets the owner simply
//! disable navigation and new searches while the slot is taken instead of
//! taking locks.
//!
//! Workers never touch the visible buffer or canonical text. They compute
//! a result, report progress over a channel, and the owning thread polls
//! `try_events` at its own cadence and applies the result itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};

/// Cooperative cancellation flag handed to every long-running call.
///
/// Workers observe it only at designed checkpoints (after each read chunk,
/// after each page) by calling [`CancelToken::checkpoint`].
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the worker's next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: returns `Err(Cancelled)` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Progress reporting handle.
///
/// Fractions are in `[0, 1]`; `-1.0` means "inactive/hidden" and is what
/// [`ProgressSink::hide`] sends when an operation finishes or is cancelled.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressSink {
    pub fn new(report: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// A sink that discards all reports.
    pub fn disabled() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, fraction: f64) {
        (self.report)(fraction.clamp(0.0, 1.0));
    }

    /// Signal that no operation is in flight.
    pub fn hide(&self) {
        (self.report)(-1.0);
    }
}

/// Events delivered from a worker to the owning thread.
#[derive(Debug)]
pub enum TaskEvent<T> {
    /// Progress fraction in `[0, 1]`, or `-1.0` for inactive.
    Progress(f64),
    /// Terminal event; exactly one per task. `Err(Cancelled)` is the
    /// normal outcome of a cancelled task, not a failure.
    Done(Result<T>),
}

/// Handle to a running (or finished) background task.
pub struct TaskHandle<T> {
    token: CancelToken,
    events: mpsc::Receiver<TaskEvent<T>>,
    thread: Option<JoinHandle<()>>,
}

impl<T> TaskHandle<T> {
    /// Request cancellation; the worker stops at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Drain all pending events without blocking.
    ///
    /// Called from the owner's supervisory loop at a fixed short interval.
    pub fn try_events(&self) -> Vec<TaskEvent<T>> {
        let mut events = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            events.push(ev);
        }
        events
    }

    /// Block until the task finishes and return its result.
    pub fn join(mut self) -> Result<T> {
        let mut outcome = None;
        while let Ok(ev) = self.events.recv() {
            if let TaskEvent::Done(result) = ev {
                outcome = Some(result);
                break;
            }
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome.unwrap_or(Err(Error::Cancelled))
    }
}

/// Single-slot executor for whole-file operations.
///
/// Owning this as an explicit object (rather than a global) keeps the
/// "at most one worker per process" rule visible at the call sites that
/// depend on it.
pub struct TaskQueue {
    active: Arc<AtomicBool>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while a submitted task has not yet finished.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `job` on a worker thread.
    ///
    /// Fails with `WorkerBusy` if the slot is taken; callers disable the
    /// triggering action rather than retrying in a loop.
    pub fn submit<T, F>(&self, name: &str, job: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken, &ProgressSink) -> Result<T> + Send + 'static,
    {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::WorkerBusy);
        }

        let token = CancelToken::new();
        let (sender, events) = mpsc::channel();
        let worker_token = token.clone();
        let active = Arc::clone(&self.active);
        let progress_sender = sender.clone();
        let task_name = name.to_string();

        let thread = std::thread::Builder::new()
            .name(format!("xmlpager-{task_name}"))
            .spawn(move || {
                let progress = ProgressSink::new(move |fraction| {
                    let _ = progress_sender.send(TaskEvent::Progress(fraction));
                });
                tracing::debug!(task = %task_name, "background task started");
                let result = job(&worker_token, &progress);
                match &result {
                    Ok(_) => tracing::debug!(task = %task_name, "background task finished"),
                    Err(e) if e.is_cancelled() => {
                        tracing::debug!(task = %task_name, "background task cancelled")
                    }
                    Err(e) => tracing::warn!(task = %task_name, error = %e, "background task failed"),
                }
                progress.hide();
                active.store(false, Ordering::SeqCst);
                let _ = sender.send(TaskEvent::Done(result));
            })?;

        Ok(TaskHandle {
            token,
            events,
            thread: Some(thread),
        })
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_task_runs_and_reports() {
        let queue = TaskQueue::new();
        let handle = queue
            .submit("sum", |_cancel, progress| {
                progress.report(0.5);
                Ok(21 + 21)
            })
            .unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_single_slot_blocks_second_submit() {
        let queue = TaskQueue::new();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = queue
            .submit("hold", move |_c, _p| {
                release_rx.recv().ok();
                Ok(())
            })
            .unwrap();

        let second = queue.submit("rejected", |_c, _p| Ok(()));
        assert!(matches!(second, Err(Error::WorkerBusy)));

        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(!queue.is_busy());

        // Slot is free again after completion
        let third = queue.submit("ok", |_c, _p| Ok(7u32)).unwrap();
        assert_eq!(third.join().unwrap(), 7);
    }

    #[test]
    fn test_cancellation_at_checkpoint() {
        let queue = TaskQueue::new();
        let handle = queue
            .submit("loop", |cancel, _progress| {
                loop {
                    cancel.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
                #[allow(unreachable_code)]
                Ok(())
            })
            .unwrap();
        handle.cancel();
        match handle.join() {
            Err(Error::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_progress_events_polled() {
        let queue = TaskQueue::new();
        let handle = queue
            .submit("steps", |_c, progress| {
                for i in 1..=4 {
                    progress.report(i as f64 / 4.0);
                }
                Ok(())
            })
            .unwrap();

        // Wait for completion, then drain: progress events precede Done.
        loop {
            if !queue.is_busy() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let events = handle.try_events();
        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|ev| match ev {
                TaskEvent::Progress(f) => Some(*f),
                _ => None,
            })
            .collect();
        assert!(fractions.contains(&1.0));
        // Hidden marker sent after the job body
        assert!(fractions.contains(&-1.0));
    }
}
