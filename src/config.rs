//! Configuration for subsystems and scenarios.
//!
//! All durations are expressed in milliseconds so that YAML files and
//! environment overrides stay plain integers. Defaults reproduce the timing
//! of the classic driver demos (one-second retries, five-second critical
//! sections, a three-second producer period); tests shrink them to a few
//! milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::SignalMode;
use crate::guard::AdmissionMode;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "DRVSYNC_";

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Delay schedule for polling loops that retry a refused guard.
///
/// The n-th consecutive refusal waits `interval * multiplier^n`, capped at
/// `max_interval`. A multiplier of `1.0` gives the fixed cadence of the
/// try-lock loops; the streak resets once the guard is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Base delay between attempts.
    pub interval_ms: u64,
    /// Upper bound for the grown delay.
    pub max_interval_ms: u64,
    /// Growth factor per consecutive refusal.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_interval_ms: 1000,
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// A fixed-cadence policy.
    pub fn fixed(interval: Duration) -> Self {
        let ms = duration_ms(interval);
        Self {
            interval_ms: ms,
            max_interval_ms: ms,
            multiplier: 1.0,
        }
    }

    /// An exponential policy starting at `interval` and capped at `max`.
    pub fn backoff(interval: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            interval_ms: duration_ms(interval),
            max_interval_ms: duration_ms(max),
            multiplier,
        }
    }

    /// Base delay between attempts.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Delay before the next attempt after `streak` consecutive refusals.
    pub fn delay_for(&self, streak: u32) -> Duration {
        let cap = self.max_interval_ms.max(self.interval_ms) as f64;
        let grown = self.interval_ms as f64 * self.multiplier.powi(streak.min(64) as i32);
        Duration::from_millis(grown.min(cap) as u64)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry interval_ms must be at least 1".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Subsystem configuration
// ---------------------------------------------------------------------------

/// Admission policy as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardKind {
    Exclusive,
    Counting,
}

/// Construction parameters for a [`Subsystem`](crate::subsystem::Subsystem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemConfig {
    /// Name used in logs and the status report.
    pub name: String,
    /// Exclusive or counting admission.
    pub guard: GuardKind,
    /// Slot count for counting guards; ignored for exclusive ones.
    pub slots: usize,
    /// Level or edge-consumed event channel.
    pub signal: SignalMode,
    /// Longest a blocked waiter sleeps before re-checking its stop token.
    pub wait_quantum_ms: u64,
    /// Retry cadence used by the blocking entry points.
    pub retry: RetryPolicy,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            name: "drvsync".to_string(),
            guard: GuardKind::Exclusive,
            slots: 1,
            signal: SignalMode::Level,
            wait_quantum_ms: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl SubsystemConfig {
    /// Create a config with the given name and default parameters.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: set the admission mode.
    pub fn with_admission(mut self, mode: AdmissionMode) -> Self {
        match mode {
            AdmissionMode::Exclusive => {
                self.guard = GuardKind::Exclusive;
                self.slots = 1;
            }
            AdmissionMode::Counting(n) => {
                self.guard = GuardKind::Counting;
                self.slots = n;
            }
        }
        self
    }

    /// Builder: set the signal mode.
    pub fn with_signal(mut self, signal: SignalMode) -> Self {
        self.signal = signal;
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: set the wait quantum.
    pub fn with_wait_quantum(mut self, quantum: Duration) -> Self {
        self.wait_quantum_ms = duration_ms(quantum);
        self
    }

    /// The admission mode this config describes.
    pub fn admission_mode(&self) -> AdmissionMode {
        match self.guard {
            GuardKind::Exclusive => AdmissionMode::Exclusive,
            GuardKind::Counting => AdmissionMode::Counting(self.slots),
        }
    }

    /// The wait quantum as a `Duration`.
    pub fn wait_quantum(&self) -> Duration {
        Duration::from_millis(self.wait_quantum_ms)
    }

    /// Reject values the primitives cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guard == GuardKind::Counting && self.slots == 0 {
            return Err(ConfigError::Invalid(
                "counting guard needs at least one slot".to_string(),
            ));
        }
        if self.wait_quantum_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait quantum must be at least 1 ms".to_string(),
            ));
        }
        self.retry.validate()
    }
}

// ---------------------------------------------------------------------------
// Scenario configuration
// ---------------------------------------------------------------------------

/// Timing and sizing shared by the reference scenarios.
///
/// This is also the top-level shape of a configuration file:
///
/// ```yaml
/// hold_ms: 5000
/// producer_period_ms: 3000
/// semaphore_slots: 2
/// retry:
///   interval_ms: 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// How long a task keeps the guard once admitted.
    pub hold_ms: u64,
    /// Period of timer-driven producers.
    pub producer_period_ms: u64,
    /// Stop-token re-check interval for blocked waiters.
    pub wait_quantum_ms: u64,
    /// Slots of the counting guard in the semaphore scenario.
    pub semaphore_slots: usize,
    /// Consumers competing with the writer in the semaphore scenario.
    pub semaphore_readers: usize,
    /// Cadence of guard retries.
    pub retry: RetryPolicy,
    /// Optional run length for the demo binary; `None` runs until Ctrl-C.
    pub run_secs: Option<u64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            hold_ms: 5000,
            producer_period_ms: 3000,
            wait_quantum_ms: 10,
            semaphore_slots: 2,
            semaphore_readers: 2,
            retry: RetryPolicy::default(),
            run_secs: None,
        }
    }
}

impl ScenarioConfig {
    /// A config with every interval set to `tick`, for fast runs.
    pub fn fast(tick: Duration) -> Self {
        let ms = duration_ms(tick).max(1);
        Self {
            hold_ms: ms,
            producer_period_ms: ms,
            wait_quantum_ms: ms,
            retry: RetryPolicy::fixed(Duration::from_millis(ms)),
            ..Self::default()
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Apply `DRVSYNC_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys: `HOLD_MS`, `PERIOD_MS`, `QUANTUM_MS`, `RETRY_MS`,
    /// `SLOTS`, `READERS`, `RUN_SECS`, each prefixed with [`ENV_PREFIX`].
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| -> Result<Option<u64>, ConfigError> {
            let key = format!("{ENV_PREFIX}{suffix}");
            match lookup(&key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| ConfigError::Invalid(format!("{key}={raw:?}: {e}"))),
                None => Ok(None),
            }
        };

        if let Some(v) = get("HOLD_MS")? {
            self.hold_ms = v;
        }
        if let Some(v) = get("PERIOD_MS")? {
            self.producer_period_ms = v;
        }
        if let Some(v) = get("QUANTUM_MS")? {
            self.wait_quantum_ms = v;
        }
        if let Some(v) = get("RETRY_MS")? {
            self.retry.interval_ms = v;
            self.retry.max_interval_ms = self.retry.max_interval_ms.max(v);
        }
        if let Some(v) = get("SLOTS")? {
            self.semaphore_slots = v as usize;
        }
        if let Some(v) = get("READERS")? {
            self.semaphore_readers = v as usize;
        }
        if let Some(v) = get("RUN_SECS")? {
            self.run_secs = Some(v);
        }
        self.validate()
    }

    /// Reject values the scenarios cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.semaphore_slots == 0 {
            return Err(ConfigError::Invalid(
                "semaphore_slots must be at least 1".to_string(),
            ));
        }
        if self.wait_quantum_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait_quantum_ms must be at least 1".to_string(),
            ));
        }
        if self.producer_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "producer_period_ms must be at least 1".to_string(),
            ));
        }
        self.retry.validate()
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn producer_period(&self) -> Duration {
        Duration::from_millis(self.producer_period_ms)
    }

    pub fn wait_quantum(&self) -> Duration {
        Duration::from_millis(self.wait_quantum_ms)
    }

    /// Subsystem parameters for a scenario with the given shape.
    pub fn subsystem(
        &self,
        name: &str,
        admission: AdmissionMode,
        signal: SignalMode,
    ) -> SubsystemConfig {
        SubsystemConfig::named(name)
            .with_admission(admission)
            .with_signal(signal)
            .with_retry(self.retry)
            .with_wait_quantum(self.wait_quantum())
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_millis(20));
        assert_eq!(policy.delay_for(0), Duration::from_millis(20));
        assert_eq!(policy.delay_for(10), Duration::from_millis(20));
    }

    #[test]
    fn test_backoff_policy_grows_and_caps() {
        let policy =
            RetryPolicy::backoff(Duration::from_millis(10), Duration::from_millis(35), 2.0);
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(35));
        assert_eq!(policy.delay_for(1000), Duration::from_millis(35));
    }

    #[test]
    fn test_yaml_partial_document_keeps_defaults() {
        let config = ScenarioConfig::from_yaml_str("hold_ms: 50\nretry:\n  interval_ms: 5\n")
            .unwrap();
        assert_eq!(config.hold_ms, 50);
        assert_eq!(config.retry.interval_ms, 5);
        assert_eq!(config.retry.multiplier, 1.0);
        assert_eq!(config.producer_period_ms, 3000);
        assert_eq!(config.semaphore_slots, 2);
    }

    #[test]
    fn test_yaml_rejects_zero_slots() {
        let err = ScenarioConfig::from_yaml_str("semaphore_slots: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "producer_period_ms: 7\nrun_secs: 3").unwrap();
        let config = ScenarioConfig::from_file(file.path()).unwrap();
        assert_eq!(config.producer_period_ms, 7);
        assert_eq!(config.run_secs, Some(3));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScenarioConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_overrides_apply_and_validate() {
        let vars: HashMap<&str, &str> = [
            ("DRVSYNC_HOLD_MS", "12"),
            ("DRVSYNC_RETRY_MS", "3"),
            ("DRVSYNC_SLOTS", "3"),
        ]
        .into_iter()
        .collect();
        let mut config = ScenarioConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.hold_ms, 12);
        assert_eq!(config.retry.interval_ms, 3);
        assert_eq!(config.semaphore_slots, 3);
        assert_eq!(config.producer_period_ms, 3000);
    }

    #[test]
    fn test_override_parse_error_names_key() {
        let mut config = ScenarioConfig::default();
        let err = config
            .apply_overrides(|k| (k == "DRVSYNC_PERIOD_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("DRVSYNC_PERIOD_MS"));
    }

    #[test]
    fn test_subsystem_config_validation() {
        let config = SubsystemConfig::named("sem").with_admission(AdmissionMode::Counting(0));
        assert!(config.validate().is_err());

        let config = SubsystemConfig::named("mtx").with_wait_quantum(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SubsystemConfig::named("ok").with_admission(AdmissionMode::Counting(2));
        assert!(config.validate().is_ok());
        assert_eq!(config.admission_mode(), AdmissionMode::Counting(2));
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let err = ScenarioConfig::from_yaml_str("retry:\n  interval_ms: 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_ms"));

        let err = ScenarioConfig::from_yaml_str("producer_period_ms: 0\n").unwrap_err();
        assert!(err.to_string().contains("producer_period_ms"));

        let mut config = ScenarioConfig::default();
        let err = config
            .apply_overrides(|k| (k == "DRVSYNC_RETRY_MS").then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = SubsystemConfig::named("spin").with_retry(RetryPolicy::fixed(Duration::ZERO));
        assert!(config.validate().is_err());

        // A zero hold is fine: admitted passes still pause for the retry interval.
        assert!(ScenarioConfig::from_yaml_str("hold_ms: 0\n").is_ok());
    }

    #[test]
    fn test_subsystem_yaml_uses_snake_case_names() {
        let config: SubsystemConfig =
            serde_yaml::from_str("name: btn\nguard: counting\nslots: 3\nsignal: edge_consumed\n")
                .unwrap();
        assert_eq!(config.admission_mode(), AdmissionMode::Counting(3));
        assert_eq!(config.signal, SignalMode::EdgeConsumed);
    }
}
