//! Retention sweeper
//!
//! Background loop that releases the workspaces of jobs whose retention
//! window has passed and forgets the jobs. Runs until the supervisor shuts
//! down or is dropped.

use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::supervisor::{Inner, Supervisor};

/// Runs the sweep loop
///
/// Holds only a weak reference so an abandoned supervisor is not kept
/// alive by its own sweeper.
pub(crate) async fn run(inner: Weak<Inner>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Retention sweeper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Retention sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("Supervisor dropped, retention sweeper exiting");
                    break;
                };
                let swept = Supervisor::from_inner(inner).sweep_expired().await;
                if swept > 0 {
                    info!(swept, "Retention sweep released expired jobs");
                } else {
                    debug!("Retention sweep: nothing expired");
                }
            }
        }
    }
}
