//! A shared cell, its guard and its event channel as one owned unit.
//!
//! [`Subsystem`] is what a driver would keep in module-level statics: the
//! published value, the admission policy protecting it and the channel that
//! announces new data. Tasks receive it by reference (usually an `Arc`)
//! instead of reaching for globals.
//!
//! The methods here are the entry points a thin device layer maps onto
//! file operations:
//!
//! | device op | method |
//! |---|---|
//! | `write()` / interrupt callback | [`Subsystem::write`], [`Subsystem::try_write`] |
//! | blocking `read()` | [`Subsystem::read_blocking`] |
//! | `poll()` | [`Subsystem::poll`] |
//! | `/proc` read | [`Subsystem::status`] |

mod status;

pub use status::StatusReport;

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::cell::{CellSnapshot, SharedCell};
use crate::config::{RetryPolicy, SubsystemConfig};
use crate::error::{ConfigError, Result, SyncError};
use crate::event::{EventChannel, SignalMode, WaitOutcome};
use crate::guard::{Guard, GuardPermit};
use crate::task::StopToken;

/// Role name used by the status probe.
pub const STATUS_ROLE: &str = "status";

/// Shared cell + guard + event channel.
pub struct Subsystem {
    name: String,
    guard: Guard<SharedCell>,
    events: EventChannel,
    retry: RetryPolicy,
}

impl Subsystem {
    /// Build a subsystem from validated configuration.
    pub fn new(config: &SubsystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        tracing::debug!(
            name = %config.name,
            admission = %config.admission_mode(),
            signal = %config.signal,
            "subsystem created"
        );
        Ok(Self {
            name: config.name.clone(),
            guard: Guard::new(config.admission_mode(), SharedCell::new()),
            events: EventChannel::new(config.signal, config.wait_quantum()),
            retry: config.retry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guard(&self) -> &Guard<SharedCell> {
        &self.guard
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One write attempt: acquire, publish, release, signal.
    pub fn try_write(&self, role: &str, value: i64) -> Result<()> {
        let permit = self.admit(role)?;
        permit.write(value);
        permit.release();
        self.events.signal();
        tracing::debug!(subsystem = %self.name, role, value, "wrote");
        Ok(())
    }

    /// Write, retrying refused attempts per the retry policy.
    ///
    /// Fails only with [`SyncError::Cancelled`] once `stop` is requested.
    pub fn write(&self, role: &str, value: i64, stop: &StopToken) -> Result<()> {
        loop {
            match self.try_write(role, value) {
                Err(SyncError::ResourceBusy { .. }) => self.back_off(role, stop, None)?,
                other => return other,
            }
        }
    }

    /// One non-blocking read of the cell; does not consume readiness.
    pub fn try_read(&self, role: &str) -> Result<CellSnapshot> {
        Ok(self.admit(role)?.read())
    }

    /// Wait for data, then read and consume it.
    ///
    /// Blocks until the channel is signaled (or `timeout` elapses, or
    /// `stop` is requested), then retries the guard until admitted; the
    /// deadline bounds those retries as well. A signal whose data an earlier
    /// read already consumed is skipped and the wait resumes with whatever
    /// is left of `timeout`. The returned value is the cell's current value,
    /// which may be newer than the write that raised the signal.
    ///
    /// Readiness is taken atomically, so under a counting guard each write
    /// is returned by at most one blocking read.
    pub fn read_blocking(
        &self,
        role: &str,
        timeout: Option<Duration>,
        stop: &StopToken,
    ) -> Result<i64> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            match self.events.wait_blocking(remaining, stop) {
                WaitOutcome::Signaled => {}
                WaitOutcome::TimedOut => {
                    return Err(SyncError::TimedOut(timeout.unwrap_or_default()))
                }
                WaitOutcome::Cancelled => return Err(SyncError::Cancelled),
            }
            if let Some(value) = self.take_ready(role, stop, deadline, timeout)? {
                return Ok(value);
            }
            tracing::trace!(subsystem = %self.name, role, "stale signal");
        }
    }

    /// Readiness query for an outer poll loop.
    ///
    /// Consumes the signal on edge-consumed subsystems.
    pub fn poll(&self) -> bool {
        self.events.poll_ready()
    }

    /// Snapshot for diagnostics.
    ///
    /// The cell is only read if the probe is admitted by the guard.
    pub fn status(&self) -> StatusReport {
        let cell = self.guard.try_acquire(STATUS_ROLE).map(|permit| permit.read());
        StatusReport {
            name: self.name.clone(),
            taken_at: Utc::now(),
            admission: self.guard.mode(),
            held: self.guard.held(),
            max: self.guard.max(),
            peak_held: self.guard.peak_held(),
            signal_mode: self.events.mode(),
            signaled: self.events.is_signaled(),
            waiters: self.events.waiters(),
            generation: self.events.generation(),
            cell,
            roles: self
                .guard
                .stats()
                .into_iter()
                .filter(|role| role.role != STATUS_ROLE)
                .collect(),
        }
    }

    /// Wake every blocked waiter so it can observe a pending stop request.
    pub fn shutdown(&self) {
        tracing::debug!(subsystem = %self.name, "interrupting waiters");
        self.events.interrupt();
    }

    /// Consume the cell if it holds unread data.
    fn take_ready(
        &self,
        role: &str,
        stop: &StopToken,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<Option<i64>> {
        loop {
            if let Some(permit) = self.guard.try_acquire(role) {
                // Clear before reading so a write that lands after the read
                // still leaves its signal behind.
                if self.events.mode() == SignalMode::Level {
                    self.events.clear();
                }
                let value = permit.take();
                if let Some(value) = value {
                    tracing::debug!(subsystem = %self.name, role, value, "read");
                }
                return Ok(value);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(SyncError::TimedOut(timeout.unwrap_or_default()));
            }
            self.back_off(role, stop, deadline)?;
        }
    }

    fn admit(&self, role: &str) -> Result<GuardPermit<'_, SharedCell>> {
        self.guard
            .try_acquire(role)
            .ok_or_else(|| SyncError::ResourceBusy {
                role: role.to_string(),
            })
    }

    /// Sleep before the next guard attempt, never past `deadline`.
    fn back_off(&self, role: &str, stop: &StopToken, deadline: Option<Instant>) -> Result<()> {
        let streak = self.guard.refusal_streak(role).saturating_sub(1);
        let mut delay = self.retry.delay_for(streak);
        if let Some(deadline) = deadline {
            delay = delay.min(deadline.saturating_duration_since(Instant::now()));
        }
        if stop.sleep(delay) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }
}

impl fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subsystem")
            .field("name", &self.name)
            .field("guard", &self.guard)
            .field("events", &self.events)
            .finish()
    }
}
