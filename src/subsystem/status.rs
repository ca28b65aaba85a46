//! Point-in-time status of a subsystem, rendered like a `/proc` entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::CellSnapshot;
use crate::event::SignalMode;
use crate::guard::{AdmissionMode, RoleStats};

/// Snapshot returned by [`Subsystem::status`](super::Subsystem::status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub admission: AdmissionMode,
    /// Holders at the time of the snapshot, excluding the status probe.
    pub held: usize,
    pub max: usize,
    pub peak_held: usize,
    pub signal_mode: SignalMode,
    pub signaled: bool,
    pub waiters: usize,
    pub generation: u64,
    /// `None` when every slot was taken and the probe could not get in.
    pub cell: Option<CellSnapshot>,
    pub roles: Vec<RoleStats>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name:       {}", self.name)?;
        writeln!(
            f,
            "guard:      {} ({}/{} held, peak {})",
            self.admission, self.held, self.max, self.peak_held
        )?;
        writeln!(
            f,
            "channel:    {} ({}, {} waiting, generation {})",
            self.signal_mode,
            if self.signaled { "signaled" } else { "idle" },
            self.waiters,
            self.generation
        )?;
        match self.cell {
            Some(cell) => writeln!(
                f,
                "value:      {} ({})",
                cell.value,
                if cell.ready { "ready" } else { "consumed" }
            )?,
            None => writeln!(f, "value:      busy")?,
        }
        for role in &self.roles {
            writeln!(
                f,
                "role {}: {} acquired, {} refused, {} busy notices",
                role.role, role.acquisitions, role.refusals, role.busy_notices
            )?;
        }
        Ok(())
    }
}
