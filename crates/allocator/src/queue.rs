//! Condition-filtered blocking queue
//!
//! A thread-safe, unbounded FIFO queue whose distinguishing operation is
//! taking the *oldest element matching a predicate*, blocking until one
//! exists. Waiters with disjoint predicates can block on the same queue at
//! once, so `add` wakes every waiter rather than a single one; each waiter
//! re-scans from the head on wake. FIFO order holds among the elements a
//! given predicate matches; there is no fairness guarantee between waiters.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner<T> {
    items: VecDeque<T>,
    cancelled: bool,
}

pub struct ConditionBlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    changed: Condvar,
}

impl<T> ConditionBlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                cancelled: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Append an element to the tail. Never blocks.
    pub fn add(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(item);
        // Broadcast: waiters have per-call predicates, and only the waiter
        // itself can tell whether the new element matches.
        self.changed.notify_all();
    }

    /// Remove and return the oldest element matching `matches`, blocking
    /// until one exists. Returns `None` only after [`cancel_waits`].
    ///
    /// [`cancel_waits`]: ConditionBlockingQueue::cancel_waits
    pub fn take<P>(&self, matches: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.cancelled {
                return None;
            }
            if let Some(pos) = inner.items.iter().position(&matches) {
                return inner.items.remove(pos);
            }
            inner = self.changed.wait(inner).unwrap();
        }
    }

    /// Like [`take`], but gives up after `timeout` and returns `None`.
    ///
    /// [`take`]: ConditionBlockingQueue::take
    pub fn poll<P>(&self, timeout: Duration, matches: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.cancelled {
                return None;
            }
            if let Some(pos) = inner.items.iter().position(&matches) {
                return inner.items.remove(pos);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timed_out) = self.changed.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    /// Remove the oldest element matching `matches` without waiting.
    pub fn remove_first<P>(&self, matches: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.items.iter().position(matches)?;
        inner.items.remove(pos)
    }

    pub fn contains<P>(&self, matches: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.inner.lock().unwrap().items.iter().any(matches)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().items.is_empty()
    }

    /// Wake every blocked waiter and make current and future blocking calls
    /// return `None`. Non-blocking operations keep working.
    pub fn cancel_waits(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.cancelled = true;
        self.changed.notify_all();
    }
}

impl<T: Clone> ConditionBlockingQueue<T> {
    /// Copy of the queue contents, oldest first. Consistent at call time;
    /// diagnostics only.
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().unwrap().items.iter().cloned().collect()
    }
}

impl<T> Default for ConditionBlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn take_returns_oldest_match() {
        let queue = ConditionBlockingQueue::new();
        queue.add(1);
        queue.add(2);
        queue.add(3);
        queue.add(4);
        assert_eq!(queue.take(|n| n % 2 == 0), Some(2));
        assert_eq!(queue.take(|n| n % 2 == 0), Some(4));
        assert_eq!(queue.take(|_| true), Some(1));
        assert_eq!(queue.take(|_| true), Some(3));
    }

    #[test]
    fn poll_times_out_when_nothing_matches() {
        let queue: ConditionBlockingQueue<u32> = ConditionBlockingQueue::new();
        queue.add(1);
        let start = Instant::now();
        assert_eq!(queue.poll(Duration::from_millis(100), |n| *n > 10), None);
        assert!(start.elapsed() >= Duration::from_millis(100));
        // non-matching element is untouched
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn take_blocks_until_matching_add() {
        let queue = Arc::new(ConditionBlockingQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take(|n| *n == 7))
        };
        thread::sleep(Duration::from_millis(50));
        queue.add(3);
        queue.add(7);
        assert_eq!(waiter.join().unwrap(), Some(7));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn add_wakes_waiters_with_disjoint_predicates() {
        let queue = Arc::new(ConditionBlockingQueue::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for wanted in [10, 20] {
            let queue = Arc::clone(&queue);
            let woken = Arc::clone(&woken);
            handles.push(thread::spawn(move || {
                let taken = queue.take(move |n| *n == wanted);
                woken.fetch_add(1, Ordering::SeqCst);
                taken
            }));
        }
        thread::sleep(Duration::from_millis(50));
        // A single add must give the matching waiter a chance even though
        // another waiter may be woken first.
        queue.add(20);
        queue.add(10);
        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(woken.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_releases_blocked_waiters() {
        let queue: Arc<ConditionBlockingQueue<u32>> = Arc::new(ConditionBlockingQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take(|_| true))
        };
        thread::sleep(Duration::from_millis(50));
        queue.cancel_waits();
        assert_eq!(waiter.join().unwrap(), None);
        // blocking calls after cancellation return immediately
        assert_eq!(queue.take(|_| true), None);
        assert_eq!(queue.poll(Duration::from_secs(5), |_| true), None);
    }

    #[test]
    fn remove_first_takes_only_the_first_match() {
        let queue = ConditionBlockingQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(queue.remove_first(|s| *s == "a"), Some("a"));
        assert_eq!(queue.snapshot(), vec!["b", "a"]);
        assert_eq!(queue.remove_first(|s| *s == "c"), None);
    }
}
