//! The deferred job queue observers are notified on.
//!
//! Notifications never run inside `then` or inside a settlement call; they
//! are pushed here and run when the owner drains the queue.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A unit of deferred work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO of jobs. Clones are handles onto the same queue.
///
/// # Examples
///
/// ```
/// use thenable::MicrotaskQueue;
/// use std::sync::{Arc, Mutex};
///
/// let queue = MicrotaskQueue::new();
/// let seen = Arc::new(Mutex::new(vec![]));
/// for i in 0..3 {
///     let seen = seen.clone();
///     queue.enqueue(move || seen.lock().unwrap().push(i));
/// }
/// assert_eq!(queue.run_until_idle(), 3);
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
/// ```
#[derive(Clone, Default)]
pub struct MicrotaskQueue {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    jobs: VecDeque<Job>,
    total_enqueued: u64,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        self.push(Box::new(job));
    }

    pub(crate) fn push(&self, job: Job) {
        let mut inner = self.inner.lock();
        inner.jobs.push_back(job);
        inner.total_enqueued += 1;
        trace!(pending = inner.jobs.len(), "job enqueued");
    }

    /// Runs jobs until none are left, including ones enqueued while
    /// running. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        self.run(usize::MAX)
    }

    /// Runs at most `budget` jobs. Returns how many ran.
    pub fn run(&self, budget: usize) -> usize {
        let mut ran = 0;
        while ran < budget {
            // The lock guard is a temporary, so it is released before the job runs.
            let Some(job) = self.inner.lock().jobs.pop_front() else {
                break;
            };
            job();
            ran += 1;
        }
        trace!(ran, remaining = self.len(), "queue drained");
        ran
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of jobs ever enqueued on this queue.
    pub fn total_enqueued(&self) -> u64 {
        self.inner.lock().total_enqueued
    }
}

impl fmt::Debug for MicrotaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MicrotaskQueue")
            .field("pending", &inner.jobs.len())
            .field("total_enqueued", &inner.total_enqueued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::MicrotaskQueue;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_new_queue_is_empty() {
        let queue = MicrotaskQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.total_enqueued(), 0);
        assert_eq!(queue.run_until_idle(), 0);
    }

    #[test]
    fn test_jobs_enqueued_while_running_run_last() {
        let queue = MicrotaskQueue::new();
        let seen = Arc::new(Mutex::new(vec![]));
        {
            let seen = seen.clone();
            let inner_queue = queue.clone();
            queue.enqueue(move || {
                seen.lock().unwrap().push("outer");
                let seen = seen.clone();
                inner_queue.enqueue(move || seen.lock().unwrap().push("nested"));
            });
        }
        {
            let seen = seen.clone();
            queue.enqueue(move || seen.lock().unwrap().push("second"));
        }
        assert_eq!(queue.run_until_idle(), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "second", "nested"]);
        assert_eq!(queue.total_enqueued(), 3);
    }

    #[test]
    fn test_run_respects_budget() {
        let queue = MicrotaskQueue::new();
        for _ in 0..5 {
            queue.enqueue(|| {});
        }
        assert_eq!(queue.run(2), 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.run(10), 3);
        assert!(queue.is_empty());
    }
}
