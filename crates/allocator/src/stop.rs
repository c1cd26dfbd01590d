//! Cooperative stop signal for background threads

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A raise-once flag paired with a condvar so sleeping threads can be
/// interrupted mid-wait instead of noticing the flag a poll interval later.
pub(crate) struct StopSignal {
    raised: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap();
        *raised = true;
        self.changed.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap()
    }

    /// Sleep for `duration` or until the signal is raised, whichever comes
    /// first. Returns whether the signal is raised.
    pub fn wait(&self, duration: Duration) -> bool {
        let raised = self.raised.lock().unwrap();
        if *raised {
            return true;
        }
        let (raised, _timed_out) = self
            .changed
            .wait_timeout_while(raised, duration, |raised| !*raised)
            .unwrap();
        *raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn wait_returns_early_when_raised() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                let start = Instant::now();
                let raised = signal.wait(Duration::from_secs(30));
                (raised, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        signal.raise();
        let (raised, elapsed) = waiter.join().unwrap();
        assert!(raised);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn wait_times_out_when_not_raised() {
        let signal = StopSignal::new();
        assert!(!signal.wait(Duration::from_millis(50)));
        assert!(!signal.is_raised());
    }
}
