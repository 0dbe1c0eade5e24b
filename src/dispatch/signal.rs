//! Counting semaphore used for producer/consumer handoff

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore.
///
/// `wait` consumes one permit, blocking while none are available; `signal`
/// adds one permit and wakes at most one waiter. No fairness is promised.
#[derive(Debug, Default)]
pub struct Signal {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Signal {
    /// Create a semaphore holding `initial` permits
    pub fn new(initial: usize) -> Self {
        Self {
            permits: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Like [`Signal::wait`] but gives up after `timeout`; returns whether a
    /// permit was taken
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.cond.wait_until(&mut permits, deadline).timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Release one permit
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.cond.notify_one();
    }

    /// Permits currently available
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_immediately_when_permits_exist() {
        let signal = Signal::new(2);
        signal.wait();
        signal.wait();
        assert_eq!(signal.available(), 0);
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn signal_releases_a_blocked_waiter() {
        let signal = Arc::new(Signal::new(0));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.signal();
        waiter.join().unwrap();
        assert_eq!(signal.available(), 0);
    }

    #[test]
    fn permits_are_counted_not_coalesced() {
        let signal = Arc::new(Signal::new(0));
        for _ in 0..3 {
            signal.signal();
        }
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.wait_timeout(Duration::from_secs(5)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(signal.available(), 0);
    }
}
