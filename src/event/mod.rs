//! Producer-to-consumer readiness notification.
//!
//! An [`EventChannel`] is a condition-style wait point with a sticky
//! `signaled` flag. A producer calls [`EventChannel::signal`]; consumers
//! either block in [`EventChannel::wait_blocking`] or ask
//! [`EventChannel::poll_ready`] from inside their own outer polling loop.
//!
//! Two flavours are chosen at construction time:
//!
//! - [`SignalMode::Level`]: the flag stays set until someone calls
//!   [`EventChannel::clear`]. Every observer sees it; a signal raised with
//!   nobody waiting is still there for the next poll.
//! - [`SignalMode::EdgeConsumed`]: the first observer (a returning waiter
//!   or a `poll_ready` call) clears the flag, so each signal is delivered
//!   exactly once.
//!
//! Blocked waiters re-check their [`StopToken`] at least once per wait
//! quantum, which bounds how long a cancelled wait can linger.
//! [`EventChannel::interrupt`] makes them re-check immediately.

mod subscriber;

pub use subscriber::Subscription;

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::task::StopToken;

/// Default stop re-check interval for blocked waiters.
pub const DEFAULT_WAIT_QUANTUM: Duration = Duration::from_millis(10);

/// How the `signaled` flag is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalMode {
    /// Sticky until explicitly cleared.
    Level,
    /// Cleared by the first observer.
    EdgeConsumed,
}

impl fmt::Display for SignalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level => write!(f, "level"),
            Self::EdgeConsumed => write!(f, "edge-consumed"),
        }
    }
}

/// Result of a blocking wait. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
struct ChannelState {
    signaled: bool,
    waiters: usize,
    generation: u64,
}

/// Condition-variable backed readiness flag.
pub struct EventChannel {
    mode: SignalMode,
    quantum: Duration,
    state: Mutex<ChannelState>,
    cond: Condvar,
    notify: watch::Sender<u64>,
}

impl EventChannel {
    /// Create a channel.
    ///
    /// `quantum` is the longest a waiter sleeps between stop-token checks;
    /// zero is raised to one millisecond.
    pub fn new(mode: SignalMode, quantum: Duration) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            mode,
            quantum: quantum.max(Duration::from_millis(1)),
            state: Mutex::new(ChannelState::default()),
            cond: Condvar::new(),
            notify,
        }
    }

    pub fn level() -> Self {
        Self::new(SignalMode::Level, DEFAULT_WAIT_QUANTUM)
    }

    pub fn edge_consumed() -> Self {
        Self::new(SignalMode::EdgeConsumed, DEFAULT_WAIT_QUANTUM)
    }

    /// Raise the flag and wake waiters.
    ///
    /// Edge-consumed channels wake a single waiter, which consumes the
    /// signal; level channels wake all of them since the flag stays set.
    pub fn signal(&self) {
        let generation = {
            let mut state = self.state.lock();
            state.signaled = true;
            state.generation += 1;
            match self.mode {
                SignalMode::EdgeConsumed => {
                    self.cond.notify_one();
                }
                SignalMode::Level => {
                    self.cond.notify_all();
                }
            }
            state.generation
        };
        self.notify.send_replace(generation);
        tracing::trace!(generation, mode = %self.mode, "signal raised");
    }

    /// Block until signaled, timed out, or cancelled through `stop`.
    ///
    /// `None` waits without a deadline. A zero timeout never sleeps: it
    /// reports `Signaled` if the flag is already up and `TimedOut`
    /// otherwise. A pending signal wins over a pending stop request.
    pub fn wait_blocking(&self, timeout: Option<Duration>, stop: &StopToken) -> WaitOutcome {
        // A timeout too large to represent is treated as no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        let mut state = self.state.lock();
        state.waiters += 1;
        let outcome = loop {
            if state.signaled {
                if self.mode == SignalMode::EdgeConsumed {
                    state.signaled = false;
                }
                break WaitOutcome::Signaled;
            }
            if stop.is_stop_requested() {
                break WaitOutcome::Cancelled;
            }

            let now = Instant::now();
            let slice_end = match deadline {
                Some(deadline) if now >= deadline => break WaitOutcome::TimedOut,
                Some(deadline) => deadline.min(now + self.quantum),
                None => now + self.quantum,
            };
            self.cond.wait_until(&mut state, slice_end);
        };
        state.waiters -= 1;
        outcome
    }

    /// Non-blocking readiness check.
    ///
    /// On an edge-consumed channel a `true` answer consumes the signal.
    pub fn poll_ready(&self) -> bool {
        let mut state = self.state.lock();
        if !state.signaled {
            return false;
        }
        if self.mode == SignalMode::EdgeConsumed {
            state.signaled = false;
        }
        true
    }

    /// Look at the flag without consuming it.
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Lower the flag (the explicit clear of level-mode channels).
    pub fn clear(&self) {
        self.state.lock().signaled = false;
    }

    /// Wake every waiter so it re-checks its stop token now.
    pub fn interrupt(&self) {
        let _state = self.state.lock();
        self.cond.notify_all();
    }

    /// Number of callers currently blocked in `wait_blocking`.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    /// Number of signals raised so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn mode(&self) -> SignalMode {
        self.mode
    }

    /// Register an async listener for future signals.
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.notify.subscribe())
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventChannel")
            .field("mode", &self.mode)
            .field("signaled", &state.signaled)
            .field("waiters", &state.waiters)
            .field("generation", &state.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const LONG: Duration = Duration::from_secs(10);

    fn wait_for_waiters(channel: &EventChannel, n: usize) {
        let start = Instant::now();
        while channel.waiters() < n {
            assert!(start.elapsed() < LONG, "waiters never blocked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_signal_then_wait_returns_signaled() {
        let channel = EventChannel::level();
        channel.signal();
        let outcome = channel.wait_blocking(Some(LONG), &StopToken::new());
        assert_eq!(outcome, WaitOutcome::Signaled);
    }

    #[test]
    fn test_zero_timeout_without_signal_times_out() {
        let channel = EventChannel::edge_consumed();
        let outcome = channel.wait_blocking(Some(Duration::ZERO), &StopToken::new());
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(channel.waiters(), 0);
    }

    #[test]
    fn test_short_timeout_elapses() {
        let channel = EventChannel::new(SignalMode::Level, Duration::from_millis(2));
        let start = Instant::now();
        let outcome = channel.wait_blocking(Some(Duration::from_millis(15)), &StopToken::new());
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_level_signal_is_sticky_until_cleared() {
        let channel = EventChannel::level();
        channel.signal();
        assert!(channel.poll_ready());
        assert!(channel.poll_ready());
        let stop = StopToken::new();
        assert_eq!(channel.wait_blocking(Some(Duration::ZERO), &stop), WaitOutcome::Signaled);
        channel.clear();
        assert!(!channel.poll_ready());
    }

    #[test]
    fn test_edge_signal_consumed_by_first_observer() {
        let channel = EventChannel::edge_consumed();
        channel.signal();
        assert!(channel.is_signaled());
        assert!(channel.poll_ready());
        assert!(!channel.poll_ready());

        channel.signal();
        let stop = StopToken::new();
        assert_eq!(channel.wait_blocking(Some(Duration::ZERO), &stop), WaitOutcome::Signaled);
        assert_eq!(channel.wait_blocking(Some(Duration::ZERO), &stop), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let channel = Arc::new(EventChannel::edge_consumed());
        let c = Arc::clone(&channel);
        let waiter = thread::spawn(move || c.wait_blocking(None, &StopToken::new()));

        wait_for_waiters(&channel, 1);
        channel.signal();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Signaled);
        assert!(!channel.is_signaled());
    }

    #[test]
    fn test_edge_signal_releases_exactly_one_waiter() {
        let channel = Arc::new(EventChannel::edge_consumed());
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let c = Arc::clone(&channel);
                thread::spawn(move || {
                    c.wait_blocking(Some(Duration::from_millis(300)), &StopToken::new())
                })
            })
            .collect();

        wait_for_waiters(&channel, 2);
        channel.signal();
        let outcomes: Vec<_> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
        let signaled = outcomes.iter().filter(|o| **o == WaitOutcome::Signaled).count();
        assert_eq!(signaled, 1);
        assert!(outcomes.contains(&WaitOutcome::TimedOut));
    }

    #[test]
    fn test_stop_request_cancels_unbounded_wait() {
        let channel = Arc::new(EventChannel::new(SignalMode::Level, Duration::from_millis(5)));
        let stop = StopToken::new();
        let (c, s) = (Arc::clone(&channel), stop.clone());
        let waiter = thread::spawn(move || c.wait_blocking(None, &s));

        wait_for_waiters(&channel, 1);
        let requested_at = Instant::now();
        stop.request_stop();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
        assert!(requested_at.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_interrupt_makes_cancellation_immediate() {
        let channel = Arc::new(EventChannel::new(SignalMode::Level, Duration::from_secs(30)));
        let stop = StopToken::new();
        let (c, s) = (Arc::clone(&channel), stop.clone());
        let waiter = thread::spawn(move || c.wait_blocking(None, &s));

        wait_for_waiters(&channel, 1);
        let requested_at = Instant::now();
        stop.request_stop();
        channel.interrupt();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Cancelled);
        assert!(requested_at.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_pending_signal_wins_over_stop() {
        let channel = EventChannel::level();
        let stop = StopToken::new();
        stop.request_stop();
        channel.signal();
        assert_eq!(channel.wait_blocking(None, &stop), WaitOutcome::Signaled);
        channel.clear();
        assert_eq!(channel.wait_blocking(None, &stop), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_generation_counts_signals() {
        let channel = EventChannel::edge_consumed();
        channel.signal();
        channel.signal();
        assert_eq!(channel.generation(), 2);
        assert!(channel.poll_ready());
        assert!(!channel.poll_ready());
    }

    #[tokio::test]
    async fn test_subscription_receives_signal() {
        let channel = Arc::new(EventChannel::edge_consumed());
        let mut sub = channel.subscribe();
        assert_eq!(sub.latest(), 0);

        let c = Arc::clone(&channel);
        let signaler = tokio::task::spawn_blocking(move || c.signal());
        let generation = tokio::time::timeout(LONG, sub.next()).await.unwrap();
        signaler.await.unwrap();
        assert_eq!(generation, Some(1));
        assert!(channel.is_signaled(), "subscriptions do not consume the flag");
    }

    #[test]
    fn test_subscription_coalesces_and_ends_with_channel() {
        let channel = EventChannel::level();
        let mut sub = channel.subscribe();
        channel.signal();
        channel.signal();
        assert!(sub.has_pending());
        assert_eq!(tokio_test::block_on(sub.next()), Some(2));
        assert!(!sub.has_pending());

        drop(channel);
        assert_eq!(tokio_test::block_on(sub.next()), None);
    }
}
