//! A sampled input line raising an edge-consumed channel.
//!
//! The sampler task reads the line once per producer period. Each high
//! sample counts a press, publishes the running count and raises the
//! channel; a caller polling [`Subsystem::poll`] sees each raise at most
//! once.
//!
//! [`Subsystem::poll`]: crate::subsystem::Subsystem::poll

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::event::SignalMode;
use crate::guard::AdmissionMode;
use crate::subsystem::Subsystem;
use crate::task::{StopToken, Task};

use super::{Journal, JournalEvent, ScenarioHandle};

pub const SAMPLER: &str = "sampler";

/// Start sampling `line`, which returns `true` while the button is down.
pub fn start<S>(config: &ScenarioConfig, mut line: S) -> Result<ScenarioHandle>
where
    S: FnMut() -> bool + Send + 'static,
{
    let subsystem = Arc::new(Subsystem::new(&config.subsystem(
        "button",
        AdmissionMode::Exclusive,
        SignalMode::EdgeConsumed,
    ))?);
    let journal = Arc::new(Journal::new());
    let stop = StopToken::new();
    let period = config.producer_period();
    let mut handle =
        ScenarioHandle::new(Arc::clone(&subsystem), Arc::clone(&journal), stop.clone());

    let (sys, log) = (subsystem, journal);
    let mut presses = 0i64;
    let sampler = Task::new(SAMPLER)
        .with_stop_token(stop)
        .start(move |ctx| {
            if line() {
                // A press that finds the cell busy is picked up by the next
                // high sample.
                match sys.try_write(ctx.name(), presses + 1) {
                    Ok(()) => {
                        presses += 1;
                        log.record(ctx.name(), JournalEvent::Edge);
                        tracing::info!(task = ctx.name(), presses, "button pressed");
                    }
                    Err(err) => tracing::debug!(task = ctx.name(), error = %err, "press deferred"),
                }
            }
            if ctx.sleep(period) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
    handle.push(sampler);

    Ok(handle)
}
