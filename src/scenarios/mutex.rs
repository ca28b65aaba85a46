//! One writer and one reader contending for an exclusive guard.
//!
//! The writer publishes an increasing counter and raises the channel after
//! every admitted pass; the reader consumes whatever it finds. Each side
//! keeps the guard for `hold` so the other one is refused and reports the
//! busy resource once per refusal streak.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::config::ScenarioConfig;
use crate::error::Result;
use crate::event::SignalMode;
use crate::guard::AdmissionMode;
use crate::subsystem::Subsystem;
use crate::task::{StopToken, Task};

use super::{guarded_pass, Journal, JournalEvent, ScenarioHandle};

pub const WRITER: &str = "writer";
pub const READER: &str = "reader";

pub fn start(config: &ScenarioConfig) -> Result<ScenarioHandle> {
    let subsystem = Arc::new(Subsystem::new(&config.subsystem(
        "mutex",
        AdmissionMode::Exclusive,
        SignalMode::Level,
    ))?);
    let journal = Arc::new(Journal::new());
    let stop = StopToken::new();
    let hold = config.hold();
    let mut handle =
        ScenarioHandle::new(Arc::clone(&subsystem), Arc::clone(&journal), stop.clone());

    let (sys, log) = (Arc::clone(&subsystem), Arc::clone(&journal));
    let mut next = 0i64;
    let writer = Task::new(WRITER)
        .with_stop_token(stop.clone())
        .start(move |ctx| {
            guarded_pass(
                ctx,
                &sys,
                hold,
                |cell, ended_streak| {
                    cell.write(next);
                    log.record(ctx.name(), JournalEvent::Wrote(next));
                    if ended_streak > 0 {
                        tracing::info!(
                            task = ctx.name(),
                            value = next,
                            refused = ended_streak,
                            "wrote after contention"
                        );
                    } else {
                        tracing::debug!(task = ctx.name(), value = next, "wrote");
                    }
                    next += 1;
                },
                || sys.events().signal(),
            );
            ControlFlow::Continue(())
        })?;
    handle.push(writer);

    let (sys, log) = (Arc::clone(&subsystem), Arc::clone(&journal));
    let reader = Task::new(READER)
        .with_stop_token(stop)
        .start(move |ctx| {
            guarded_pass(
                ctx,
                &sys,
                hold,
                |cell, ended_streak| {
                    let snapshot = cell.read();
                    cell.clear_ready();
                    log.record(ctx.name(), JournalEvent::Read(snapshot));
                    tracing::info!(
                        task = ctx.name(),
                        value = snapshot.value,
                        ready = snapshot.ready,
                        refused = ended_streak,
                        "read"
                    );
                },
                || {},
            );
            ControlFlow::Continue(())
        })?;
    handle.push(reader);

    Ok(handle)
}
