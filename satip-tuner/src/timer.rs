//! Monotonic timers and the interruptible sleep used by the worker loop.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A named interval timer on the monotonic clock.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    name: &'static str,
    interval: Duration,
    started: Instant,
}

impl Stopwatch {
    /// Create a timer that becomes due `interval` from now.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            started: Instant::now(),
        }
    }

    /// Create a timer that is already due.
    pub fn expired(name: &'static str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            name,
            interval,
            started: now.checked_sub(interval).unwrap_or(now),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval without restarting.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Restart the timer.
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Has the interval passed since the last reset?
    pub fn is_due(&self) -> bool {
        self.elapsed() >= self.interval
    }

    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.elapsed())
    }
}

/// Sleep primitive that any thread can cut short.
#[derive(Debug, Default)]
pub struct Wakeup {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep up to `timeout`. Returns true if woken by [`Wakeup::signal`].
    ///
    /// A signal raised while nobody was waiting is remembered and consumed
    /// by the next wait.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    /// Wake the sleeper.
    pub fn signal(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stopwatch_due() {
        let mut timer = Stopwatch::new("status", Duration::from_millis(20));
        assert!(!timer.is_due());
        thread::sleep(Duration::from_millis(30));
        assert!(timer.is_due());
        timer.reset();
        assert!(!timer.is_due());
        assert_eq!(timer.name(), "status");
    }

    #[test]
    fn test_stopwatch_expired() {
        let timer = Stopwatch::expired("keepalive", Duration::from_millis(500));
        assert!(timer.is_due());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_wakeup_times_out() {
        let wakeup = Wakeup::new();
        let start = Instant::now();
        assert!(!wakeup.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wakeup_signal_interrupts() {
        let wakeup = Arc::new(Wakeup::new());
        let waker = Arc::clone(&wakeup);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.signal();
        });

        let start = Instant::now();
        assert!(wakeup.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_pending_signal_is_consumed_once() {
        let wakeup = Wakeup::new();
        wakeup.signal();
        assert!(wakeup.wait(Duration::from_secs(1)));
        assert!(!wakeup.wait(Duration::from_millis(10)));
    }
}
