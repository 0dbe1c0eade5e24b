//! Unbounded FIFO of pending jobs with an idle-worker counter

use super::job::Job;
use super::signal::Signal;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a worker pulls off the queue
pub enum Slot {
    /// A real job to execute
    Work(Box<dyn Job>),
    /// Stop request: the receiving worker exits without executing anything
    Poison,
}

impl Slot {
    /// True for the stop sentinel
    pub fn is_poison(&self) -> bool {
        matches!(self, Slot::Poison)
    }
}

/// The shared job queue.
///
/// `available` holds one permit per slot in `jobs`, so a worker that gets
/// past the semaphore normally finds an entry; it still re-checks under the
/// list lock and goes back to waiting if it does not.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Slot>>,
    available: Signal,
    waiting: CachePadded<AtomicUsize>,
    // real jobs in `jobs`, kept in step under the list lock
    pending: CachePadded<AtomicUsize>,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            available: Signal::new(0),
            waiting: CachePadded::new(AtomicUsize::new(0)),
            pending: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Append `job` and wake one worker.
    ///
    /// Returns the number of workers that were blocked waiting at the time
    /// the job was appended; the dispatcher's scaling policy keys off it.
    pub fn enqueue(&self, job: Box<dyn Job>) -> usize {
        let waiting = {
            let mut jobs = self.jobs.lock();
            jobs.push_back(Slot::Work(job));
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.waiting.load(Ordering::SeqCst)
        };
        self.available.signal();
        waiting
    }

    /// Block until a slot is available and take it from the head
    pub fn dequeue(&self) -> Slot {
        loop {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            self.available.wait();
            self.waiting.fetch_sub(1, Ordering::SeqCst);

            let mut jobs = self.jobs.lock();
            if let Some(slot) = jobs.pop_front() {
                if !slot.is_poison() {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                }
                return slot;
            }
        }
    }

    /// Put `n` stop sentinels in front of all pending work
    pub fn request_stop(&self, n: usize) {
        if n == 0 {
            return;
        }
        {
            let mut jobs = self.jobs.lock();
            for _ in 0..n {
                jobs.push_front(Slot::Poison);
            }
        }
        for _ in 0..n {
            self.available.signal();
        }
    }

    /// Workers currently blocked in [`JobQueue::dequeue`]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Real jobs not yet picked up
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// All slots, stop sentinels included
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct Tagged(ResourceId);

    impl Job for Tagged {
        fn resource_id(&self) -> &ResourceId {
            &self.0
        }

        fn execute(self: Box<Self>) {}
    }

    fn job(tag: &str) -> Box<dyn Job> {
        Box::new(Tagged(ResourceId::new(tag)))
    }

    fn tag(slot: Slot) -> Option<String> {
        match slot {
            Slot::Work(job) => Some(job.resource_id().to_string()),
            Slot::Poison => None,
        }
    }

    #[test]
    fn jobs_come_out_in_order() {
        let queue = JobQueue::new();
        for t in ["a", "b", "c"] {
            assert_eq!(queue.enqueue(job(t)), 0);
        }
        assert_eq!(queue.pending(), 3);
        assert_eq!(tag(queue.dequeue()).as_deref(), Some("a"));
        assert_eq!(tag(queue.dequeue()).as_deref(), Some("b"));
        assert_eq!(tag(queue.dequeue()).as_deref(), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_requests_jump_the_queue() {
        let queue = JobQueue::new();
        queue.enqueue(job("a"));
        queue.enqueue(job("b"));
        queue.request_stop(2);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.pending(), 2);
        assert!(queue.dequeue().is_poison());
        assert!(queue.dequeue().is_poison());
        assert_eq!(tag(queue.dequeue()).as_deref(), Some("a"));
        assert_eq!(tag(queue.dequeue()).as_deref(), Some("b"));
    }

    #[test]
    fn enqueue_reports_blocked_workers() {
        let queue = Arc::new(JobQueue::new());
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || tag(queue.dequeue()))
            })
            .collect();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while queue.waiting() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(queue.waiting(), 2);

        assert_eq!(queue.enqueue(job("x")), 2);
        queue.enqueue(job("y"));

        let mut got: Vec<_> = consumers
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        got.sort();
        assert_eq!(got, vec!["x", "y"]);
        assert_eq!(queue.waiting(), 0);
    }

    #[test]
    fn pending_tracks_work_not_sentinels() {
        let queue = JobQueue::new();
        for i in 0..1000 {
            queue.enqueue(job(&format!("vm-{}", i)));
        }
        queue.request_stop(3);
        assert_eq!(queue.pending(), 1000);
        assert_eq!(queue.len(), 1003);

        for _ in 0..3 {
            assert!(queue.dequeue().is_poison());
            assert_eq!(queue.pending(), 1000);
        }
        for left in (0..1000).rev() {
            assert!(!queue.dequeue().is_poison());
            assert_eq!(queue.pending(), left);
        }
        assert!(queue.is_empty());
    }
}
