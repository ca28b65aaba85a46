//! A timer-driven producer waking a consumer blocked on the channel.
//!
//! The producer publishes a counter once per period. The consumer sleeps in
//! [`Subsystem::read_blocking`] with no deadline and wakes when the
//! producer signals or when the scenario is stopped, which interrupts the
//! wait instead of letting it run out.
//!
//! [`Subsystem::read_blocking`]: crate::subsystem::Subsystem::read_blocking

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::cell::CellSnapshot;
use crate::config::ScenarioConfig;
use crate::error::{Result, SyncError};
use crate::event::SignalMode;
use crate::guard::AdmissionMode;
use crate::subsystem::Subsystem;
use crate::task::{StopToken, Task};

use super::{Journal, JournalEvent, ScenarioHandle};

pub const PRODUCER: &str = "producer";
pub const CONSUMER: &str = "consumer";

/// Producer and background consumer.
pub fn start(config: &ScenarioConfig) -> Result<ScenarioHandle> {
    let mut handle = start_producer(config)?;

    let (sys, log) = (Arc::clone(handle.subsystem()), Arc::clone(handle.journal()));
    let consumer = Task::new(CONSUMER)
        .with_stop_token(handle.stop_token().clone())
        .start(move |ctx| match sys.read_blocking(ctx.name(), None, ctx.stop_token()) {
            Ok(value) => {
                log.record(ctx.name(), JournalEvent::Read(CellSnapshot { value, ready: true }));
                tracing::info!(task = ctx.name(), value, "woke with data");
                ControlFlow::Continue(())
            }
            Err(SyncError::Cancelled) => ControlFlow::Break(()),
            Err(err) => {
                tracing::warn!(task = ctx.name(), error = %err, "read failed");
                ControlFlow::Continue(())
            }
        })?;
    handle.push(consumer);

    Ok(handle)
}

/// Producer only, for a caller that reads from its own thread.
///
/// This is the shape of a device whose `read()` blocks the calling process
/// until the kernel thread has something new.
pub fn start_producer(config: &ScenarioConfig) -> Result<ScenarioHandle> {
    let subsystem = Arc::new(Subsystem::new(&config.subsystem(
        "waitqueue",
        AdmissionMode::Exclusive,
        SignalMode::Level,
    ))?);
    let journal = Arc::new(Journal::new());
    let stop = StopToken::new();
    let period = config.producer_period();
    let mut handle =
        ScenarioHandle::new(Arc::clone(&subsystem), Arc::clone(&journal), stop.clone());

    let (sys, log) = (subsystem, journal);
    let mut next = 0i64;
    let producer = Task::new(PRODUCER)
        .with_stop_token(stop)
        .start(move |ctx| {
            if ctx.sleep(period) {
                return ControlFlow::Break(());
            }
            match sys.write(ctx.name(), next, ctx.stop_token()) {
                Ok(()) => {
                    log.record(ctx.name(), JournalEvent::Wrote(next));
                    tracing::info!(task = ctx.name(), value = next, "published");
                    next += 1;
                    ControlFlow::Continue(())
                }
                Err(SyncError::Cancelled) => ControlFlow::Break(()),
                Err(err) => {
                    tracing::warn!(task = ctx.name(), error = %err, "publish failed");
                    ControlFlow::Continue(())
                }
            }
        })?;
    handle.push(producer);

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_consumer_sees_increasing_values() {
        let config = ScenarioConfig::fast(Duration::from_millis(3));
        let handle = start(&config).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.journal().reads_by(CONSUMER).len() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        let journal = Arc::clone(handle.journal());
        handle.stop().unwrap();

        let reads: Vec<i64> = journal.reads_by(CONSUMER).iter().map(|s| s.value).collect();
        assert!(reads.len() >= 4);
        assert!(reads.windows(2).all(|w| w[1] > w[0]));
        let writes = journal.writes();
        assert!(reads.iter().all(|v| writes.contains(v)));
    }

    #[test]
    fn test_stop_wakes_blocked_consumer_promptly() {
        let config = ScenarioConfig {
            producer_period_ms: 60_000,
            ..ScenarioConfig::fast(Duration::from_millis(1))
        };
        let handle = start(&config).unwrap();
        while handle.subsystem().events().waiters() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let stopping = Instant::now();
        let report = handle.stop().unwrap();
        assert!(stopping.elapsed() < Duration::from_secs(2));
        assert_eq!(report.waiters, 0);
        assert_eq!(report.cell.map(|c| c.ready), Some(false));
    }

    #[test]
    fn test_foreground_read_blocks_for_producer() {
        let config = ScenarioConfig::fast(Duration::from_millis(5));
        let handle = start_producer(&config).unwrap();
        let stop = StopToken::new();

        let first = handle.subsystem().read_blocking("cat", None, &stop).unwrap();
        let second = handle.subsystem().read_blocking("cat", None, &stop).unwrap();
        assert!(second > first);

        let report = handle.stop().unwrap();
        assert!(report.roles.iter().any(|r| r.role == "cat"));
    }
}
