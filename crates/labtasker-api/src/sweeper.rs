//! Background timeout sweeper.
//!
//! One long-lived loop per coordinator process. Each wakeup calls
//! `handle_timeouts`, which transitions every expired RUNNING task through
//! the same FSM contract the report endpoint uses.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use labtasker_db::TaskRepository;

/// Spawn the sweeper. Dropping or sending on the returned channel stops it.
pub fn spawn_sweeper(tasks: TaskRepository, interval_secs: f64) -> mpsc::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        let period = Duration::from_secs_f64(interval_secs.max(0.1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs, "Timeout sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match tasks.handle_timeouts().await {
                        Ok(transitioned) if !transitioned.is_empty() => {
                            tracing::info!(count = transitioned.len(), "Swept timed-out tasks");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "Timeout sweep failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Timeout sweeper shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}
