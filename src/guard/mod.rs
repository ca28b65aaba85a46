//! Admission control for the shared cell.
//!
//! A [`Guard`] owns a resource and admits at most `max` holders at a time:
//! one for [`AdmissionMode::Exclusive`] (a mutex), `n` for
//! [`AdmissionMode::Counting`] (a semaphore). Acquisition is
//! strictly non-blocking. Polling loops call [`Guard::try_acquire`], back
//! off on refusal and try again; nothing ever sleeps on the guard itself, so
//! there is no blocking acquisition to deadlock on. Livelock under permanent
//! contention is possible and accepted.
//!
//! Admission hands out a [`GuardPermit`], the only way to reach the
//! resource. Dropping the permit (including during unwinding, or when a
//! task leaves its loop on a stop request) releases the slot, so a release
//! can never come from a caller that does not hold the guard.
//!
//! # Example
//!
//! ```
//! use drvsync::cell::SharedCell;
//! use drvsync::guard::Guard;
//!
//! let guard = Guard::exclusive(SharedCell::new());
//! let permit = guard.try_acquire("writer").unwrap();
//! permit.write(7);
//! assert!(guard.try_acquire("reader").is_none());
//! permit.release();
//! assert_eq!(guard.try_acquire("reader").unwrap().read().value, 7);
//! ```

mod refusal;

pub use refusal::RoleStats;

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use refusal::RoleLedger;

/// How many holders a guard admits at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// A single holder.
    Exclusive,
    /// Up to `n` simultaneous holders.
    Counting(usize),
}

impl AdmissionMode {
    /// Maximum simultaneous holders.
    pub fn max(&self) -> usize {
        match self {
            Self::Exclusive => 1,
            Self::Counting(n) => *n,
        }
    }
}

impl fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Counting(n) => write!(f, "counting({n})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Non-blocking admission control around a resource `T`.
///
/// The holder count only moves through atomic compare-and-set, and there
/// is a single guard per resource, so there is no lock ordering to get
/// wrong. The role ledger is touched after the count has been settled.
pub struct Guard<T> {
    mode: AdmissionMode,
    max: usize,
    held: AtomicUsize,
    peak: AtomicUsize,
    roles: RoleLedger,
    resource: T,
}

impl<T> Guard<T> {
    /// Create a guard around `resource`.
    ///
    /// # Panics
    ///
    /// Panics if `mode` admits zero holders; such a guard could never be
    /// acquired.
    pub fn new(mode: AdmissionMode, resource: T) -> Self {
        let max = mode.max();
        assert!(max >= 1, "guard must admit at least one holder, got {mode}");
        Self {
            mode,
            max,
            held: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            roles: RoleLedger::default(),
            resource,
        }
    }

    /// A single-holder guard.
    pub fn exclusive(resource: T) -> Self {
        Self::new(AdmissionMode::Exclusive, resource)
    }

    /// A guard admitting up to `n` holders.
    pub fn counting(n: usize, resource: T) -> Self {
        Self::new(AdmissionMode::Counting(n), resource)
    }

    /// Try to take one slot without blocking.
    ///
    /// On refusal the first failure of a streak for `role` emits a
    /// "resource busy" notice; later refusals in the same streak stay
    /// silent until `role` is admitted again.
    pub fn try_acquire(&self, role: &str) -> Option<GuardPermit<'_, T>> {
        let mut current = self.held.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                let refusal = self.roles.record_refusal(role);
                if refusal.notify {
                    tracing::info!(role, held = current, max = self.max, "resource busy");
                }
                return None;
            }
            match self.held.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let now_held = current + 1;
        assert!(
            now_held <= self.max,
            "guard invariant violated: {now_held} holders exceed max {}",
            self.max
        );
        self.peak.fetch_max(now_held, Ordering::Relaxed);
        let ended_streak = self.roles.record_acquisition(role);
        tracing::trace!(role, held = now_held, "guard acquired");

        Some(GuardPermit {
            guard: self,
            ended_streak,
        })
    }

    fn release_slot(&self) {
        let released = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                held.checked_sub(1)
            });
        if released.is_err() {
            panic!("guard invariant violated: release with no holders");
        }
    }

    /// Current number of holders.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }

    /// Maximum number of simultaneous holders.
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// Highest number of simultaneous holders ever observed.
    pub fn peak_held(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Whether a `try_acquire` made right now would find a free slot.
    pub fn is_available(&self) -> bool {
        self.held() < self.max
    }

    /// Consecutive refusals `role` has seen since its last admission.
    pub fn refusal_streak(&self, role: &str) -> u32 {
        self.roles.streak(role)
    }

    /// Counters for one role, if it ever called `try_acquire`.
    pub fn role_stats(&self, role: &str) -> Option<RoleStats> {
        self.roles.stats(role)
    }

    /// Counters for every role, sorted by role name.
    pub fn stats(&self) -> Vec<RoleStats> {
        self.roles.all()
    }
}

impl<T> fmt::Debug for Guard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("mode", &self.mode)
            .field("held", &self.held())
            .field("peak", &self.peak_held())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Permit
// ---------------------------------------------------------------------------

/// Proof of admission; dereferences to the guarded resource.
///
/// The slot is released when the permit is dropped or passed to
/// [`GuardPermit::release`]. Release consumes the permit, so a section
/// cannot release twice.
#[must_use = "dropping the permit immediately releases the guard"]
pub struct GuardPermit<'a, T> {
    guard: &'a Guard<T>,
    ended_streak: u32,
}

impl<'a, T> GuardPermit<'a, T> {
    /// Release the slot now.
    pub fn release(self) {
        drop(self);
    }

    /// Length of the refusal streak this admission ended (0 if the role was
    /// admitted on its first try).
    pub fn ended_streak(&self) -> u32 {
        self.ended_streak
    }

    /// Whether this admission followed one or more refusals.
    pub fn after_contention(&self) -> bool {
        self.ended_streak > 0
    }
}

impl<T> Deref for GuardPermit<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard.resource
    }
}

impl<T> Drop for GuardPermit<'_, T> {
    fn drop(&mut self) {
        self.guard.release_slot();
    }
}

impl<T> fmt::Debug for GuardPermit<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardPermit")
            .field("ended_streak", &self.ended_streak)
            .finish_non_exhaustive()
    }
}
