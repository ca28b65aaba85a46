//! # drvsync
//!
//! Coordination primitives for a producer/consumer device driver, modelled
//! on the kernel's locking and wait-queue idioms and run on OS threads.
//!
//! A [`Subsystem`] ties together a [`SharedCell`] holding the latest value,
//! a [`Guard`] deciding who may touch it (exclusive or counting admission,
//! never blocking) and an [`EventChannel`] announcing new data (level or
//! edge-consumed). Background producers and consumers are [`Task`]s with a
//! cooperative, two-phase stop.
//!
//! ```
//! use drvsync::{AdmissionMode, SignalMode, StopToken, Subsystem, SubsystemConfig};
//!
//! let config = SubsystemConfig::named("demo")
//!     .with_admission(AdmissionMode::Exclusive)
//!     .with_signal(SignalMode::EdgeConsumed);
//! let dev = Subsystem::new(&config).unwrap();
//!
//! dev.try_write("writer", 7).unwrap();
//! assert!(dev.poll());
//! assert!(!dev.poll());
//!
//! dev.try_write("writer", 8).unwrap();
//! assert_eq!(dev.read_blocking("reader", None, &StopToken::new()).unwrap(), 8);
//! ```

pub mod cell;
pub mod config;
pub mod error;
pub mod event;
pub mod guard;
pub mod logging;
pub mod scenarios;
pub mod subsystem;
pub mod task;

pub use cell::{CellSnapshot, SharedCell};
pub use config::{RetryPolicy, ScenarioConfig, SubsystemConfig};
pub use error::{ConfigError, Result, SyncError};
pub use event::{EventChannel, SignalMode, Subscription, WaitOutcome};
pub use guard::{AdmissionMode, Guard, GuardPermit, RoleStats};
pub use scenarios::{ScenarioHandle, ScenarioKind};
pub use subsystem::{StatusReport, Subsystem};
pub use task::{StopToken, Task, TaskContext, TaskHandle, TaskState};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
