//! One writer and several readers on a counting guard.
//!
//! With two slots and three contenders at most two tasks are inside at any
//! time; the third is refused and announces the busy resource once until it
//! gets in again. Readers only look at the cell here, so two readers may
//! hold their slots together.

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

/// Name of the `index`-th reader, counting from one.
pub fn reader_name(index: usize) -> String {
    format!("reader{index}")
}

pub fn start(config: &ScenarioConfig) -> Result<ScenarioHandle> {
    let subsystem = Arc::new(Subsystem::new(&config.subsystem(
        "semaphore",
        AdmissionMode::Counting(config.semaphore_slots),
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
                    tracing::info!(
                        task = ctx.name(),
                        value = next,
                        holders = sys.guard().held(),
                        refused = ended_streak,
                        "wrote"
                    );
                    next += 1;
                },
                || sys.events().signal(),
            );
            ControlFlow::Continue(())
        })?;
    handle.push(writer);

    for index in 1..=config.semaphore_readers {
        let (sys, log) = (Arc::clone(&subsystem), Arc::clone(&journal));
        let reader = Task::new(reader_name(index))
            .with_stop_token(stop.clone())
            .start(move |ctx| {
                guarded_pass(
                    ctx,
                    &sys,
                    hold,
                    |cell, ended_streak| {
                        let snapshot = cell.read();
                        log.record(ctx.name(), JournalEvent::Read(snapshot));
                        tracing::info!(
                            task = ctx.name(),
                            value = snapshot.value,
                            holders = sys.guard().held(),
                            refused = ended_streak,
                            "read"
                        );
                    },
                    || {},
                );
                ControlFlow::Continue(())
            })?;
        handle.push(reader);
    }

    Ok(handle)
}
