//! Background task that evicts expired clients on a fixed cadence.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::engine::RateAccountingEngine;

/// Start sweeping `engine` every `sweep_interval`.
///
/// Returns `None` when sweeping is disabled in the engine's configuration or
/// the engine has already been shut down. The task stops once
/// [`RateAccountingEngine::shutdown`] is called or the engine is dropped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_sweeper(engine: &Arc<RateAccountingEngine>) -> Option<JoinHandle<()>> {
    let config = engine.config();
    if !config.sweep_enabled {
        debug!("Sweeping disabled, no sweeper started");
        return None;
    }
    if engine.is_shut_down() {
        debug!("Engine already shut down, no sweeper started");
        return None;
    }

    let period = config.sweep_interval;
    let mut shutdown = engine.subscribe_shutdown();
    let engine: Weak<RateAccountingEngine> = Arc::downgrade(engine);

    info!(interval = ?period, "Starting client sweeper");

    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    engine.sweep();
                }
                changed = shutdown.changed() => {
                    // An error means the engine was dropped
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Client sweeper stopped");
    }))
}
