//! One-shot and periodic scan drivers.
//!
//! The periodic driver subtracts the scan duration from the interval, so
//! a slow scan never drifts the cadence; cancellation short-circuits the
//! inter-tick sleep.

use crate::system::signals::Shutdown;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

pub async fn run_once<F, Fut, E>(mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    if let Err(err) = tick().await {
        error!(error = %err, "Scan failed");
    }
}

pub async fn run_periodic<F, Fut, E>(interval: Duration, shutdown: Shutdown, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    loop {
        if shutdown.is_cancelled() {
            info!("Shutdown requested, leaving the scan loop");
            return;
        }

        let started = Instant::now();
        if let Err(err) = tick().await {
            // A failing tick never terminates the loop.
            error!(error = %err, "Scan failed, next scan stays scheduled");
        }

        let sleep = interval.saturating_sub(started.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, leaving the scan loop");
                return;
            }
        }
    }
}
