//! Background tasks with a cooperative stop protocol.
//!
//! A task is a named OS thread running a loop body until it is asked to
//! stop. Each pass through the body performs at most one guard attempt and
//! one sleep or wait, then yields to the scheduler; the loop re-checks the
//! [`StopToken`] before every pass. Stopping is two-phase, mirroring module
//! teardown: [`TaskHandle::request_stop`] (safe from any thread, idempotent)
//! followed by [`TaskHandle::join`].
//!
//! Guard permits are scoped to a single pass of the body, so by the time
//! `join` returns every permit the task took has been dropped, even when the
//! body panicked.

mod stop;

pub use stop::StopToken;

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set(&self, to: TaskState) {
        self.0.store(to as u8, Ordering::Release);
    }
}

/// Marks the task stopped when the thread leaves, normally or by unwinding.
struct StoppedOnExit(Arc<StateCell>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.set(TaskState::Stopped);
    }
}

// ---------------------------------------------------------------------------
// Context handed to the loop body
// ---------------------------------------------------------------------------

/// Per-task view passed to every iteration of the loop body.
#[derive(Debug)]
pub struct TaskContext {
    name: Arc<str>,
    stop: StopToken,
    iteration: u64,
}

impl TaskContext {
    /// Task name, also used as the thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of completed iterations before the current one.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_stop_requested()
    }

    /// Interruptible sleep; returns `true` if a stop request cut it short.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.stop.sleep(duration)
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Builder for background tasks.
#[derive(Debug, Clone)]
pub struct Task {
    name: String,
    stop: StopToken,
}

impl Task {
    /// Describe a task with a fresh stop token.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stop: StopToken::new(),
        }
    }

    /// Share an existing stop token, so one request stops a group of tasks.
    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    /// Start the loop on a new thread.
    ///
    /// The body runs until it returns `ControlFlow::Break(())` or the stop
    /// token is observed at an iteration boundary.
    pub fn start<F>(self, mut body: F) -> Result<TaskHandle>
    where
        F: FnMut(&mut TaskContext) -> ControlFlow<()> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(self.name);
        let state = Arc::new(StateCell::default());

        let mut ctx = TaskContext {
            name: Arc::clone(&name),
            stop: self.stop.clone(),
            iteration: 0,
        };
        let thread_state = Arc::clone(&state);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = StoppedOnExit(Arc::clone(&thread_state));
                thread_state.transition(TaskState::Created, TaskState::Running);
                tracing::info!(task = %ctx.name, "running");

                while !ctx.should_stop() {
                    if body(&mut ctx).is_break() {
                        break;
                    }
                    ctx.iteration += 1;
                    thread::yield_now();
                }

                tracing::info!(task = %ctx.name, iterations = ctx.iteration, "stopping");
            })
            .map_err(|source| SyncError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(TaskHandle {
            name,
            stop: self.stop,
            state,
            thread: Some(thread),
        })
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Owner-side handle of a running task.
///
/// Dropping the handle requests a stop and joins the thread.
pub struct TaskHandle {
    name: Arc<str>,
    stop: StopToken,
    state: Arc<StateCell>,
    thread: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    ///
    /// A stop requested through a shared [`StopToken`] shows up as
    /// [`TaskState::StopRequested`] even if it bypassed this handle.
    pub fn state(&self) -> TaskState {
        match self.state.get() {
            TaskState::Created | TaskState::Running if self.stop.is_stop_requested() => {
                TaskState::StopRequested
            }
            state => state,
        }
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    /// Ask the task to stop. Safe from any thread; repeated calls are no-ops.
    pub fn request_stop(&self) {
        if self.stop.request_stop() {
            tracing::debug!(task = %self.name, "stop requested");
        }
        if !self.state.transition(TaskState::Running, TaskState::StopRequested) {
            self.state.transition(TaskState::Created, TaskState::StopRequested);
        }
    }

    /// Wait for the task to reach [`TaskState::Stopped`].
    ///
    /// Does not request a stop by itself; a task whose body never breaks
    /// keeps `join` waiting until someone calls [`request_stop`].
    ///
    /// [`request_stop`]: TaskHandle::request_stop
    pub fn join(mut self) -> Result<()> {
        self.join_inner()
    }

    /// `request_stop` followed by `join`.
    pub fn stop(self) -> Result<()> {
        self.request_stop();
        self.join()
    }

    fn join_inner(&mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| SyncError::TaskPanicked(self.name.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.request_stop();
            if let Err(err) = self.join_inner() {
                tracing::error!(task = %self.name, error = %err, "task ended abnormally");
            }
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::Guard;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    #[test]
    fn test_body_runs_until_stop() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let handle = Task::new("counter")
            .start(move |ctx| {
                c.fetch_add(1, Ordering::SeqCst);
                ctx.sleep(Duration::from_millis(1));
                ControlFlow::Continue(())
            })
            .unwrap();

        while counter.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.state(), TaskState::Running);
        handle.request_stop();
        handle.request_stop();
        assert!(matches!(
            handle.state(),
            TaskState::StopRequested | TaskState::Stopped
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_break_ends_task_without_stop_request() {
        let handle = Task::new("once")
            .start(|ctx| {
                if ctx.iteration() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        let state = Arc::clone(&handle.state);
        handle.join().unwrap();
        assert_eq!(state.get(), TaskState::Stopped);
    }

    #[test]
    fn test_stop_interrupts_long_sleep() {
        let handle = Task::new("sleeper")
            .start(|ctx| {
                ctx.sleep(Duration::from_secs(60));
                ControlFlow::Continue(())
            })
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        handle.stop().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_join_releases_guard_held_mid_section() {
        let guard = Arc::new(Guard::exclusive(()));
        let g = Arc::clone(&guard);
        let handle = Task::new("holder")
            .start(move |ctx| {
                if let Some(_permit) = g.try_acquire("holder") {
                    ctx.sleep(Duration::from_secs(60));
                }
                ControlFlow::Continue(())
            })
            .unwrap();

        while guard.held() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        handle.stop().unwrap();
        assert_eq!(guard.held(), 0);
    }

    #[test]
    fn test_panicking_body_reports_and_releases() {
        let guard = Arc::new(Guard::exclusive(()));
        let g = Arc::clone(&guard);
        let handle = Task::new("faulty")
            .start(move |_ctx| {
                let _permit = g.try_acquire("faulty");
                panic!("section failed");
            })
            .unwrap();

        let err = handle.join().unwrap_err();
        assert!(matches!(err, SyncError::TaskPanicked(name) if name == "faulty"));
        assert_eq!(guard.held(), 0);
    }

    #[test]
    fn test_shared_token_stops_group() {
        let token = StopToken::new();
        let handles: Vec<_> = (0..3)
            .map(|i| {
                Task::new(format!("worker{i}"))
                    .with_stop_token(token.clone())
                    .start(|ctx| {
                        ctx.sleep(Duration::from_secs(60));
                        ControlFlow::Continue(())
                    })
                    .unwrap()
            })
            .collect();

        token.request_stop();
        for handle in handles {
            assert!(handle.stop_token().is_stop_requested());
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_stop_through_shared_token_is_visible_on_handle() {
        let token = StopToken::new();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
        let handle = Task::new("busy")
            .with_stop_token(token.clone())
            .start(move |_ctx| {
                let _ = entered_tx.send(());
                let _ = release_rx.recv();
                ControlFlow::Continue(())
            })
            .unwrap();

        entered_rx.recv().unwrap();
        assert_eq!(handle.state(), TaskState::Running);
        token.request_stop();
        assert_eq!(handle.state(), TaskState::StopRequested);

        release_tx.send(()).unwrap();
        let state = Arc::clone(&handle.state);
        handle.join().unwrap();
        assert_eq!(state.get(), TaskState::Stopped);
    }

    #[test]
    fn test_drop_stops_and_joins() {
        let ran = Arc::new(AtomicU64::new(0));
        let r = Arc::clone(&ran);
        let handle = Task::new("dropped")
            .start(move |ctx| {
                r.fetch_add(1, Ordering::SeqCst);
                ctx.sleep(Duration::from_secs(60));
                ControlFlow::Continue(())
            })
            .unwrap();
        while ran.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        drop(handle);
        let after = ran.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ran.load(Ordering::SeqCst), after);
    }
}
