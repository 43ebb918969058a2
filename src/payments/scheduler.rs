use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::executor::PaymentExecutor;

/// Runs an execution pass every `every` until the runtime shuts down.
pub fn spawn(executor: PaymentExecutor, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?every, "payment scheduler started");

        loop {
            interval.tick().await;
            if let Err(e) = executor.execute_due(Utc::now()).await {
                crate::error::log_error(&e);
            }
        }
    })
}
