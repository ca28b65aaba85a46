//! drvsync demo runner.
//!
//! Starts one of the reference scenarios, lets it run until Ctrl-C (or for
//! a fixed time) and prints the final status report as JSON.
//!
//! # Environment Variables
//!
//! - `DRVSYNC_SCENARIO`: scenario when none is given on the command line
//!   (default: "mutex")
//! - `DRVSYNC_CONFIG`: YAML config file (default: built-in defaults)
//! - `DRVSYNC_HOLD_MS`, `DRVSYNC_PERIOD_MS`, `DRVSYNC_RUN_SECS`, ...:
//!   overrides applied on top of the config file
//! - `RUST_LOG`: tracing filter (default: "info,drvsync=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin drvsync -- semaphore
//! DRVSYNC_RUN_SECS=10 DRVSYNC_HOLD_MS=500 cargo run --bin drvsync -- waitqueue
//! ```

use std::time::Duration;

use anyhow::Context;
use drvsync::logging;
use drvsync::scenarios::{self, ScenarioKind};
use drvsync::ScenarioConfig;

fn load_config() -> anyhow::Result<ScenarioConfig> {
    let mut config = match std::env::var("DRVSYNC_CONFIG") {
        Ok(path) => ScenarioConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        Err(_) => ScenarioConfig::default(),
    };
    config
        .apply_env()
        .context("applying DRVSYNC_* overrides")?;
    Ok(config)
}

async fn run_until_stopped(run_secs: Option<u64>) {
    match run_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::info!(secs, "run time elapsed")
                }
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::DEFAULT_FILTER);

    let scenario = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DRVSYNC_SCENARIO").ok())
        .unwrap_or_else(|| ScenarioKind::Mutex.to_string());
    let kind: ScenarioKind = scenario.parse().map_err(anyhow::Error::msg)?;
    let config = load_config()?;

    tracing::info!(
        version = drvsync::VERSION,
        scenario = %kind,
        hold_ms = config.hold_ms,
        period_ms = config.producer_period_ms,
        "drvsync starting"
    );

    let handle = scenarios::start(kind, &config)?;
    tracing::info!("Tasks: {}", handle.task_names().join(", "));

    // Async listener, the way a registered process would be signalled.
    let mut subscription = handle.subsystem().events().subscribe();
    let listener = tokio::spawn(async move {
        while let Some(generation) = subscription.next().await {
            tracing::debug!(generation, "signal delivered");
        }
    });

    // The button scenario has no consumer task; poll from here instead.
    let poller = (kind == ScenarioKind::Button).then(|| {
        let subsystem = std::sync::Arc::clone(handle.subsystem());
        let period = config.wait_quantum();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if subsystem.poll() {
                    tracing::info!("poll: data ready");
                }
            }
        })
    });

    run_until_stopped(config.run_secs).await;

    if let Some(poller) = poller {
        poller.abort();
    }
    let report = tokio::task::spawn_blocking(move || handle.stop())
        .await
        .context("joining scenario tasks")??;
    listener.abort();

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("drvsync stopped");
    Ok(())
}
