//! Per-role bookkeeping for guard admissions and refusals.
//!
//! A role is the name a caller presents to [`Guard::try_acquire`]
//! (`"writer"`, `"reader1"`, ...). For each role the ledger counts
//! admissions and refusals and tracks the current refusal streak, so that
//! the "resource busy" notice fires once when a streak starts and not again
//! until the role has been admitted in between.
//!
//! [`Guard::try_acquire`]: super::Guard::try_acquire

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Counters for one role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStats {
    /// Role name as passed to `try_acquire`.
    pub role: String,
    /// Successful admissions.
    pub acquisitions: u64,
    /// Refused attempts.
    pub refusals: u64,
    /// Busy notices emitted (one per refusal streak).
    pub busy_notices: u64,
    /// Length of the refusal streak in progress (0 when last attempt succeeded).
    pub streak: u32,
}

#[derive(Debug, Default)]
struct RoleState {
    acquisitions: u64,
    refusals: u64,
    busy_notices: u64,
    streak: u32,
    refusal_logged: bool,
}

/// What the guard should do after recording a refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Refusal {
    /// Consecutive refusals including this one.
    pub streak: u32,
    /// True only for the first refusal of a streak.
    pub notify: bool,
}

/// Role table shared by every caller of one guard.
#[derive(Debug, Default)]
pub(crate) struct RoleLedger {
    roles: Mutex<BTreeMap<String, RoleState>>,
}

impl RoleLedger {
    fn with_role<R>(&self, role: &str, f: impl FnOnce(&mut RoleState) -> R) -> R {
        let mut roles = self.roles.lock();
        if let Some(state) = roles.get_mut(role) {
            return f(state);
        }
        f(roles.entry(role.to_string()).or_default())
    }

    /// Record an admission; returns the refusal streak it ended.
    pub fn record_acquisition(&self, role: &str) -> u32 {
        self.with_role(role, |state| {
            state.acquisitions += 1;
            state.refusal_logged = false;
            std::mem::take(&mut state.streak)
        })
    }

    pub fn record_refusal(&self, role: &str) -> Refusal {
        self.with_role(role, |state| {
            state.refusals += 1;
            state.streak = state.streak.saturating_add(1);
            let notify = !state.refusal_logged;
            if notify {
                state.refusal_logged = true;
                state.busy_notices += 1;
            }
            Refusal {
                streak: state.streak,
                notify,
            }
        })
    }

    pub fn streak(&self, role: &str) -> u32 {
        self.roles.lock().get(role).map_or(0, |s| s.streak)
    }

    pub fn stats(&self, role: &str) -> Option<RoleStats> {
        self.roles.lock().get(role).map(|s| snapshot(role, s))
    }

    pub fn all(&self) -> Vec<RoleStats> {
        self.roles
            .lock()
            .iter()
            .map(|(role, s)| snapshot(role, s))
            .collect()
    }
}

fn snapshot(role: &str, state: &RoleState) -> RoleStats {
    RoleStats {
        role: role.to_string(),
        acquisitions: state.acquisitions,
        refusals: state.refusals,
        busy_notices: state.busy_notices,
        streak: state.streak,
    }
}
