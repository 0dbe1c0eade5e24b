//! Worker threads pulling from a shared [`JobQueue`]

use super::queue::{JobQueue, Slot};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error};

struct PoolShared {
    queue: Arc<JobQueue>,
    // worker number -> OS thread, filled in once the thread is running
    members: Mutex<HashMap<usize, Option<ThreadId>>>,
    changed: Condvar,
    next_id: AtomicUsize,
}

/// A set of worker loops.
///
/// Workers are OS threads. Each one repeatedly dequeues a slot and executes
/// it; a poison slot makes it deregister and exit. Membership is tracked so
/// that shutdown can wait for the pool to drain.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create an empty pool serving `queue`
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue,
                members: Mutex::new(HashMap::new()),
                changed: Condvar::new(),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawn `n` workers; returns how many actually started
    pub fn start(&self, n: usize) -> usize {
        let mut started = 0;
        for _ in 0..n {
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            // register before spawning so the idle count never exceeds size
            self.shared.members.lock().insert(id, None);

            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("vmd-worker-{}", id))
                .spawn(move || run_worker(shared, id));

            match spawned {
                Ok(handle) => {
                    let tid = handle.thread().id();
                    if let Some(slot) = self.shared.members.lock().get_mut(&id) {
                        *slot = Some(tid);
                    }
                    started += 1;
                }
                Err(e) => {
                    error!(worker = id, error = %e, "failed to spawn worker thread");
                    self.shared.deregister(id);
                }
            }
        }
        started
    }

    /// Ask every current worker to exit
    pub fn stop_all(&self) {
        self.shared.queue.request_stop(self.size());
    }

    /// Ask `n` workers to exit
    pub fn stop_n(&self, n: usize) {
        self.shared.queue.request_stop(n);
    }

    /// Current number of registered workers
    pub fn size(&self) -> usize {
        self.shared.members.lock().len()
    }

    /// Block until no workers remain, or `timeout` elapses.
    ///
    /// A lone remaining worker that is the calling thread counts as drained,
    /// so a job may shut the pool down without waiting on itself. Returns
    /// `false` on timeout.
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let me = thread::current().id();
        let mut members = self.shared.members.lock();
        loop {
            if members.is_empty() {
                return true;
            }
            if members.len() == 1 && members.values().all(|t| *t == Some(me)) {
                return true;
            }
            if self
                .shared
                .changed
                .wait_until(&mut members, deadline)
                .timed_out()
            {
                return members.is_empty()
                    || (members.len() == 1 && members.values().all(|t| *t == Some(me)));
            }
        }
    }

    /// Queue this pool serves
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.shared.queue
    }
}

impl PoolShared {
    fn deregister(&self, id: usize) {
        self.members.lock().remove(&id);
        self.changed.notify_all();
    }
}

/// Removes the worker from the pool however its loop ends
struct Registration {
    shared: Arc<PoolShared>,
    id: usize,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(worker = self.id, "worker thread unwound out of a job");
        }
        self.shared.deregister(self.id);
    }
}

fn run_worker(shared: Arc<PoolShared>, id: usize) {
    let registration = Registration {
        shared: Arc::clone(&shared),
        id,
    };
    debug!(worker = id, "worker started");

    loop {
        match shared.queue.dequeue() {
            Slot::Poison => break,
            Slot::Work(job) => job.execute(),
        }
    }

    debug!(worker = id, "worker stopped");
    drop(registration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceId;
    use crate::dispatch::job::Job;
    use std::sync::atomic::AtomicBool;

    struct Hold {
        id: ResourceId,
        release: Arc<AtomicBool>,
    }

    impl Job for Hold {
        fn resource_id(&self) -> &ResourceId {
            &self.id
        }

        fn execute(self: Box<Self>) {
            while !self.release.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn start_and_stop_all() {
        let pool = WorkerPool::new(Arc::new(JobQueue::new()));
        assert_eq!(pool.start(3), 3);
        assert_eq!(pool.size(), 3);
        assert!(wait_until(|| pool.queue().waiting() == 3));

        pool.stop_all();
        assert!(pool.wait_for_drain(Duration::from_secs(5)));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn stop_n_removes_exactly_n() {
        let pool = WorkerPool::new(Arc::new(JobQueue::new()));
        pool.start(4);
        pool.stop_n(1);
        assert!(wait_until(|| pool.size() == 3));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.size(), 3);

        pool.stop_all();
        assert!(pool.wait_for_drain(Duration::from_secs(5)));
    }

    #[test]
    fn drain_times_out_while_jobs_run() {
        let queue = Arc::new(JobQueue::new());
        let pool = WorkerPool::new(Arc::clone(&queue));
        pool.start(1);
        let release = Arc::new(AtomicBool::new(false));
        queue.enqueue(Box::new(Hold {
            id: ResourceId::new("busy"),
            release: Arc::clone(&release),
        }));
        assert!(wait_until(|| queue.is_empty()));

        pool.stop_all();
        assert!(!pool.wait_for_drain(Duration::from_millis(50)));
        assert_eq!(pool.size(), 1);

        release.store(true, Ordering::SeqCst);
        assert!(pool.wait_for_drain(Duration::from_secs(5)));
    }

    #[test]
    fn worker_may_wait_on_its_own_pool() {
        struct SelfDrain {
            id: ResourceId,
            pool: WorkerPool,
            drained: Arc<AtomicBool>,
        }

        impl Job for SelfDrain {
            fn resource_id(&self) -> &ResourceId {
                &self.id
            }

            fn execute(self: Box<Self>) {
                self.pool.stop_all();
                let ok = self.pool.wait_for_drain(Duration::from_secs(5));
                self.drained.store(ok, Ordering::SeqCst);
            }
        }

        let queue = Arc::new(JobQueue::new());
        let pool = WorkerPool::new(Arc::clone(&queue));
        pool.start(1);
        let drained = Arc::new(AtomicBool::new(false));
        queue.enqueue(Box::new(SelfDrain {
            id: ResourceId::new("self"),
            pool: pool.clone(),
            drained: Arc::clone(&drained),
        }));

        assert!(wait_until(|| drained.load(Ordering::SeqCst)));
        assert!(pool.wait_for_drain(Duration::from_secs(5)));
    }
}
