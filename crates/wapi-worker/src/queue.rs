//! Monitor-style wrapper around [`wapi_queue::BoundedQueue`]: one mutex
//! guards the ring buffer, one condvar wakes the decode
//! loop thread when work arrives instead of having it spin-poll.

use std::sync::{Arc, Condvar, Mutex};

use wapi_common::Result;
use wapi_protocol::Task;
use wapi_queue::BoundedQueue;

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<(Mutex<BoundedQueue<Task>>, Condvar)>,
}

pub enum WaitOutcome {
    Got(Task),
    TimedOut,
    Stopped,
}

impl JobQueue {
    pub fn new(cap: usize) -> Self {
        Self { inner: Arc::new((Mutex::new(BoundedQueue::new(cap)), Condvar::new())) }
    }

    /// Enqueues a task and wakes one waiting decode-loop thread.
    pub fn put(&self, task: Task) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut q = lock.lock().expect("queue mutex poisoned");
        q.put(task)?;
        cvar.notify_one();
        Ok(())
    }

    /// Waits up to `poll_interval` for a task. Returns `Stopped` as soon as
    /// `stop` flips true, `TimedOut` if nothing arrived within the
    /// interval (the caller uses this tick to check idle-unload), or
    /// `Got(task)` once dequeued.
    pub fn wait_next(&self, stop: &std::sync::atomic::AtomicBool, poll_interval: std::time::Duration) -> WaitOutcome {
        use std::sync::atomic::Ordering;

        let (lock, cvar) = &*self.inner;
        let mut q = lock.lock().expect("queue mutex poisoned");
        if stop.load(Ordering::SeqCst) {
            return WaitOutcome::Stopped;
        }
        if !q.is_empty() {
            return WaitOutcome::Got(q.next().expect("checked non-empty").clone());
        }
        let (guard, timeout) = cvar.wait_timeout(q, poll_interval).expect("queue mutex poisoned");
        q = guard;
        if stop.load(Ordering::SeqCst) {
            return WaitOutcome::Stopped;
        }
        if !timeout.timed_out() {
            if !q.is_empty() {
                return WaitOutcome::Got(q.next().expect("checked non-empty").clone());
            }
        }
        WaitOutcome::TimedOut
    }

    pub fn position(&self, task_id: &str) -> Option<usize> {
        let (lock, _) = &*self.inner;
        lock.lock().expect("queue mutex poisoned").position(&task_id.to_string())
    }

    /// Position -> task snapshot, used to answer `Message::Status`.
    pub fn snapshot(&self) -> std::collections::HashMap<usize, Task> {
        let (lock, _) = &*self.inner;
        lock.lock().expect("queue mutex poisoned").snapshot()
    }

    pub fn len(&self) -> usize {
        let (lock, _) = &*self.inner;
        lock.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wapi_common::WApiError;
    use wapi_protocol::TaskType;

    fn task() -> Task {
        Task::new("/tmp/a.wav".to_string(), None, TaskType::Transcribe, None, None)
    }

    #[test]
    fn put_then_wait_next_returns_the_task() {
        let q = JobQueue::new(2);
        let t = task();
        let id = t.uuid.clone();
        q.put(t).unwrap();
        let stop = std::sync::atomic::AtomicBool::new(false);
        match q.wait_next(&stop, std::time::Duration::from_millis(50)) {
            WaitOutcome::Got(got) => assert_eq!(got.uuid, id),
            _ => panic!("expected a task"),
        }
    }

    #[test]
    fn wait_next_reports_stopped_with_nothing_queued() {
        let q = JobQueue::new(2);
        let stop = std::sync::atomic::AtomicBool::new(true);
        assert!(matches!(q.wait_next(&stop, std::time::Duration::from_millis(50)), WaitOutcome::Stopped));
    }

    #[test]
    fn wait_next_times_out_when_idle() {
        let q: JobQueue = JobQueue::new(2);
        let stop = std::sync::atomic::AtomicBool::new(false);
        assert!(matches!(q.wait_next(&stop, std::time::Duration::from_millis(20)), WaitOutcome::TimedOut));
    }

    #[test]
    fn put_reports_queue_full() {
        let q = JobQueue::new(1);
        q.put(task()).unwrap();
        match q.put(task()) {
            Err(WApiError::QueueFull(1)) => {}
            other => panic!("expected QueueFull(1), got {other:?}"),
        }
    }
}
