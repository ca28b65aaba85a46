//! Reference producer/consumer scenarios.
//!
//! Each scenario builds a [`Subsystem`], starts its tasks on a shared stop
//! token and returns a [`ScenarioHandle`]. Stopping the handle requests a
//! stop, interrupts blocked waiters, joins every task and returns the final
//! status report.
//!
//! - [`mutex`]: one writer and one reader contending for an exclusive guard.
//! - [`semaphore`]: one writer and several readers on a counting guard.
//! - [`waitqueue`]: a timer-driven producer waking a blocked consumer.
//! - [`button`]: a sampled input line raising an edge-consumed channel for
//!   a polling caller.

pub mod button;
pub mod journal;
pub mod mutex;
pub mod semaphore;
pub mod waitqueue;

pub use journal::{Journal, JournalEntry, JournalEvent};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cell::SharedCell;
use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::subsystem::{StatusReport, Subsystem};
use crate::task::{StopToken, TaskContext, TaskHandle};

/// The scenarios the demo binary can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    Mutex,
    Semaphore,
    WaitQueue,
    Button,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        Self::Mutex,
        Self::Semaphore,
        Self::WaitQueue,
        Self::Button,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mutex => "mutex",
            Self::Semaphore => "semaphore",
            Self::WaitQueue => "waitqueue",
            Self::Button => "button",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown scenario {s:?}, expected one of {}", known.join(", "))
            })
    }
}

/// Start `kind` with its default wiring.
///
/// The button scenario gets a synthetic input line that reads high on every
/// third sample.
pub fn start(kind: ScenarioKind, config: &ScenarioConfig) -> Result<ScenarioHandle> {
    match kind {
        ScenarioKind::Mutex => mutex::start(config),
        ScenarioKind::Semaphore => semaphore::start(config),
        ScenarioKind::WaitQueue => waitqueue::start(config),
        ScenarioKind::Button => {
            let mut samples = 0u64;
            button::start(config, move || {
                samples += 1;
                samples % 3 == 0
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Running scenario: its subsystem, its tasks and their journal.
pub struct ScenarioHandle {
    subsystem: Arc<Subsystem>,
    journal: Arc<Journal>,
    stop: StopToken,
    tasks: Vec<TaskHandle>,
}

impl ScenarioHandle {
    pub(crate) fn new(subsystem: Arc<Subsystem>, journal: Arc<Journal>, stop: StopToken) -> Self {
        Self {
            subsystem,
            journal,
            stop,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, task: TaskHandle) {
        self.tasks.push(task);
    }

    pub fn subsystem(&self) -> &Arc<Subsystem> {
        &self.subsystem
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    /// Token shared by every task of the scenario.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Stop every task and return the final status.
    ///
    /// All tasks are joined even if one of them failed; the first failure
    /// is returned.
    pub fn stop(mut self) -> Result<StatusReport> {
        for task in &self.tasks {
            task.request_stop();
        }
        self.subsystem.shutdown();

        let mut first_error = None;
        for task in self.tasks.drain(..) {
            if let Err(err) = task.join() {
                tracing::error!(error = %err, "scenario task failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(self.subsystem.status()),
        }
    }
}

impl fmt::Debug for ScenarioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioHandle")
            .field("subsystem", &self.subsystem.name())
            .field("tasks", &self.task_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared loop step
// ---------------------------------------------------------------------------

/// One polling pass against the guard.
///
/// If admitted, `work` runs on the cell, the permit is held for `hold`
/// (cut short by a stop request) and released, `on_release` runs, and the
/// task then pauses for the retry interval so other roles get a window. If
/// refused, the task sleeps for the backoff matching its refusal streak.
/// Returns whether the pass was admitted.
pub(crate) fn guarded_pass<W, R>(
    ctx: &TaskContext,
    subsystem: &Subsystem,
    hold: Duration,
    work: W,
    on_release: R,
) -> bool
where
    W: FnOnce(&SharedCell, u32),
    R: FnOnce(),
{
    let role = ctx.name();
    match subsystem.guard().try_acquire(role) {
        Some(permit) => {
            work(&*permit, permit.ended_streak());
            ctx.sleep(hold);
            permit.release();
            on_release();
            ctx.sleep(subsystem.retry().interval());
            true
        }
        None => {
            let streak = subsystem.guard().refusal_streak(role);
            ctx.sleep(subsystem.retry().delay_for(streak.saturating_sub(1)));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("mutex".parse::<ScenarioKind>().unwrap(), ScenarioKind::Mutex);
        assert_eq!(" WaitQueue ".parse::<ScenarioKind>().unwrap(), ScenarioKind::WaitQueue);
        let err = "spinlock".parse::<ScenarioKind>().unwrap_err();
        assert!(err.contains("semaphore"));
        for kind in ScenarioKind::ALL {
            assert_eq!(kind.to_string().parse::<ScenarioKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_every_kind_starts_and_stops() {
        let config = ScenarioConfig::fast(Duration::from_millis(1));
        for kind in ScenarioKind::ALL {
            let handle = start(kind, &config).unwrap();
            assert!(!handle.task_names().is_empty());
            std::thread::sleep(Duration::from_millis(10));
            let report = handle.stop().unwrap();
            assert_eq!(report.held, 0, "{kind} left the guard held");
        }
    }
}
