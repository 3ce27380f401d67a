use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::queue::{Dequeued, JobReceiver, NotificationJob};
use crate::api::ChatDelivery;
use crate::core::{DeliveryError, HealthChecker};

const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
    pub discarded: u64,
}

/// Consumes the dispatch queue and hands each job to the chat channel.
pub struct DeliveryLoop {
    chat: Arc<dyn ChatDelivery>,
    jobs: JobReceiver,
    health: HealthChecker,
    shutdown: CancellationToken,
    dequeue_timeout: Duration,
    drain_timeout: Duration,
    stats: DeliveryStats,
}

impl DeliveryLoop {
    pub fn new(
        chat: Arc<dyn ChatDelivery>,
        jobs: JobReceiver,
        health: HealthChecker,
        shutdown: CancellationToken,
        dequeue_timeout: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            chat,
            jobs,
            health,
            shutdown,
            dequeue_timeout,
            drain_timeout,
            stats: DeliveryStats::default(),
        }
    }

    pub async fn run(mut self) -> DeliveryStats {
        tracing::info!("📬 Delivery loop started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.jobs.dequeue(self.dequeue_timeout) => next,
            };

            match next {
                Dequeued::Job(job) => self.deliver(job).await,
                Dequeued::Empty => continue,
                Dequeued::Closed => {
                    tracing::info!("📭 Dispatch queue closed");
                    return self.finish().await;
                }
            }
        }

        self.drain().await;
        self.finish().await
    }

    /// Delivers what is already queued until the drain window closes, then drops the rest.
    async fn drain(&mut self) {
        self.jobs.close();
        let deadline = Instant::now() + self.drain_timeout;
        tracing::info!(
            "🚿 Draining dispatch queue for up to {}s",
            self.drain_timeout.as_secs()
        );

        while Instant::now() < deadline {
            let job = match self.jobs.try_dequeue() {
                Some(job) => job,
                None => break,
            };
            if tokio::time::timeout_at(deadline, self.deliver(job)).await.is_err() {
                self.stats.discarded += 1;
                break;
            }
        }

        let discarded = self.jobs.discard_remaining();
        self.stats.discarded += discarded;
        if self.stats.discarded > 0 {
            tracing::warn!(
                "🗑️ Discarded {} undelivered notifications at shutdown",
                self.stats.discarded
            );
            self.health.record_discarded(self.stats.discarded).await;
        }
    }

    async fn finish(self) -> DeliveryStats {
        tracing::info!(
            "🛑 Delivery loop stopped ({} delivered, {} failed, {} discarded)",
            self.stats.delivered,
            self.stats.failed,
            self.stats.discarded
        );
        self.stats
    }

    async fn deliver(&mut self, job: NotificationJob) {
        let buttons = job.message.buttons();
        let mut result = self
            .chat
            .send_message(&job.account, &job.message.text, &buttons)
            .await;

        if let Err(DeliveryError::RateLimited { retry_after_secs }) = &result {
            let wait = Duration::from_secs(*retry_after_secs).min(MAX_RETRY_AFTER);
            tracing::warn!(
                "⏳ Chat channel rate limited, retrying account {} in {}s",
                job.account,
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
            result = self
                .chat
                .send_message(&job.account, &job.message.text, &buttons)
                .await;
        }

        match result {
            Ok(()) => {
                self.stats.delivered += 1;
                self.health.record_delivery(true).await;
                tracing::debug!(
                    "📨 Delivered {} for item {} to account {}",
                    job.transition,
                    job.message.item_id,
                    job.account
                );
            }
            Err(e) => {
                self.stats.failed += 1;
                self.health.record_delivery(false).await;
                tracing::error!(
                    "❌ Failed to deliver notification for item {} to account {}: {}",
                    job.message.item_id,
                    job.account,
                    e
                );
            }
        }
    }
}
