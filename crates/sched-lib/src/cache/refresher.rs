//! Periodic cache refresh
//!
//! The loop is driven by an injected [`Ticker`] so tests can step it by
//! hand. It runs on its own task and stops on the shutdown broadcast.

use super::NodeStateCache;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drives refresh cycles
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next cycle
    async fn tick(&mut self);
}

/// Fixed-interval ticker backed by the tokio clock.
///
/// The first tick completes immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Refresh loop over one cache
pub struct RefreshLoop {
    cache: Arc<NodeStateCache>,
    ticker: Box<dyn Ticker>,
}

impl RefreshLoop {
    pub fn new(cache: Arc<NodeStateCache>, ticker: Box<dyn Ticker>) -> Self {
        Self { cache, ticker }
    }

    /// Run until a shutdown message arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting node cache refresh loop");
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                _ = self.ticker.tick() => {
                    let summary = self.cache.refresh_all().await;
                    cycles += 1;
                    if summary.unknown > 0 {
                        warn!(
                            unknown = summary.unknown,
                            "Nodes missing from metrics source"
                        );
                    }
                    debug!(cycle = cycles, refreshed = summary.refreshed, "Refresh cycle complete");
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycles, "Shutting down node cache refresh loop");
                    break;
                }
            }
        }
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        RefreshHandle { shutdown_tx, join }
    }
}

/// Handle to a running refresh loop
pub struct RefreshHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the loop and wait for it to exit
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            warn!(error = %e, "Refresh loop task failed");
        }
    }
}
