//! Periodic driver for the engine.
//!
//! A fixed wall-clock interval computes the next fire time independently
//! of how long a tick takes; a missed tick is skipped, never replayed.
//! Cancellation is checked at tick boundaries only, so a tick either runs
//! to completion or is never started.

use anyhow::Result;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::engine::TrackerEngine;

pub struct TrackerScheduler {
    engine: TrackerEngine,
}

impl TrackerScheduler {
    pub fn new(engine: TrackerEngine) -> Self {
        Self { engine }
    }

    /// Run ticks until the token is cancelled. The first tick fires
    /// immediately, establishing baselines for every repository.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<TrackerEngine> {
        let period = Duration::from_secs(self.engine.interval_minutes() * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Tracking every {:?}", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested; stopping tracker");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.engine.tick().await {
                        tracing::error!("Tick failed: {:#}", e);
                    }
                }
            }
        }

        Ok(self.engine)
    }
}
