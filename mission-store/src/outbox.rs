//! Outbox worker: drains pending rows to the event bus.
//!
//! At-least-once: a crash between publish and mark-processed leaves the row
//! pending, and consumers deduplicate on `(mission_id, seq)`. A failing
//! iteration (including a panic on the blocking pool, surfaced as a join
//! error) is logged and retried after a bounded back-off; the loop itself
//! never dies.

use std::sync::Arc;
use std::time::Duration;

use helm::bus::EventBus;
use mission_event::StoredEvent;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::store::MissionStore;

pub struct OutboxWorker {
    store: Arc<MissionStore>,
    bus: Arc<EventBus<StoredEvent>>,
    interval: Duration,
    batch_size: usize,
    retry_cap: i64,
}

impl OutboxWorker {
    pub fn new(
        store: Arc<MissionStore>,
        bus: Arc<EventBus<StoredEvent>>,
        interval: Duration,
        batch_size: usize,
        retry_cap: i64,
    ) -> Self {
        Self {
            store,
            bus,
            interval,
            batch_size,
            retry_cap,
        }
    }

    /// Runs the drain loop until the task is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                batch_size = self.batch_size,
                "outbox worker started"
            );
            let mut consecutive_failures: u32 = 0;
            loop {
                match self.drain_once().await {
                    Ok(published) => {
                        consecutive_failures = 0;
                        if published > 0 {
                            tracing::debug!(published, "outbox drained");
                        }
                        tokio::time::sleep(self.interval).await;
                    }
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        let backoff = backoff_delay(self.interval, consecutive_failures);
                        tracing::error!(
                            error = %e,
                            retry_in_secs = backoff.as_secs(),
                            "outbox iteration failed, restarting after back-off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        })
    }

    /// One drain cycle: claim a batch, publish each row to its mission
    /// topic, mark processed (or failed on a malformed payload).
    pub async fn drain_once(&self) -> Result<usize, StoreError> {
        let batch = self
            .store
            .claim_outbox_batch(self.batch_size, self.retry_cap)
            .await?;
        let mut published = 0;
        for row in batch {
            match serde_json::from_str::<StoredEvent>(&row.payload) {
                Ok(event) => {
                    let topic = format!("mission:{}", event.mission_id);
                    self.bus.publish(&topic, event);
                    self.store.mark_outbox_processed(row.id).await?;
                    published += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = row.id,
                        event_type = %row.event_type,
                        error = %e,
                        "outbox payload unreadable, marking failed"
                    );
                    self.store.mark_outbox_failed(row.id).await?;
                }
            }
        }
        Ok(published)
    }
}

/// Doubles the base interval per consecutive failure, capped at one minute.
fn backoff_delay(base: Duration, consecutive_failures: u32) -> Duration {
    let factor = 1u64 << consecutive_failures.min(6);
    std::cmp::min(base.saturating_mul(factor as u32), Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: back-off grows with failures and saturates at 60 s.
    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, 10), Duration::from_secs(60));
    }
}
