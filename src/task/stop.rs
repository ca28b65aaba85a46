//! Cooperative stop requests.
//!
//! A [`StopToken`] is the flag a task checks at every loop boundary and
//! suspension point. Sleeping through the token ([`StopToken::sleep`]) is
//! interruptible: a stop request wakes every sleeper immediately instead of
//! letting it finish its interval.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct StopInner {
    requested: Mutex<bool>,
    wake: Condvar,
}

/// Shared, cloneable stop flag.
#[derive(Clone, Default)]
pub struct StopToken {
    inner: Arc<StopInner>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop. Idempotent.
    ///
    /// Returns `true` if this call made the request, `false` if a stop had
    /// already been requested.
    pub fn request_stop(&self) -> bool {
        let mut requested = self.inner.requested.lock();
        if *requested {
            return false;
        }
        *requested = true;
        self.inner.wake.notify_all();
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.inner.requested.lock()
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the sleep ended because of a stop request.
    pub fn sleep(&self, duration: Duration) -> bool {
        // A duration too large to represent sleeps until stopped.
        let deadline = Instant::now().checked_add(duration);
        let mut requested = self.inner.requested.lock();
        while !*requested {
            match deadline {
                Some(deadline) => {
                    if self.inner.wake.wait_until(&mut requested, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wake.wait(&mut requested),
            }
        }
        *requested
    }
}

impl fmt::Debug for StopToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopToken")
            .field("requested", &self.is_stop_requested())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_request_is_idempotent() {
        let token = StopToken::new();
        assert!(!token.is_stop_requested());
        assert!(token.request_stop());
        assert!(!token.request_stop());
        assert!(token.clone().is_stop_requested());
    }

    #[test]
    fn test_sleep_runs_full_interval_without_request() {
        let token = StopToken::new();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_interrupted_by_request_from_other_thread() {
        let token = StopToken::new();
        let remote = token.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request_stop();
        });

        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_sleep_after_request_returns_immediately() {
        let token = StopToken::new();
        token.request_stop();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
