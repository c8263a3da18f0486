//! Background heartbeat sender.
//!
//! One tokio task per claimed task, refreshing the server-side watchdog on
//! a fixed interval until stopped. Transient network errors are logged and
//! retried on the next tick; the loop only exits on the stop signal.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use labtasker_api_client::ApiClient;

pub struct HeartbeatHandle {
    stop_tx: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Start sending heartbeats for `task_id` every `interval`.
    pub fn start(client: ApiClient, task_id: Uuid, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the cadence is
            // one refresh per interval after the fetch stamped the initial
            // heartbeat.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = client.refresh_task_heartbeat(task_id).await {
                            tracing::warn!(task_id = %task_id, error = %err,
                                "Heartbeat refresh failed; will retry");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(task_id = %task_id, "Heartbeat sender stopped");
        });

        Self { stop_tx, join }
    }

    /// Signal the sender to stop and wait for it to wind down.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}
