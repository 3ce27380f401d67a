use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::AccountId;
use crate::watcher::{Message, Transition};

/// A rendered notification waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationJob {
    pub account: AccountId,
    pub transition: Transition,
    pub message: Message,
}

impl NotificationJob {
    pub fn new(account: AccountId, transition: Transition, message: Message) -> Self {
        Self {
            account,
            transition,
            message,
        }
    }
}

/// Result of waiting on the queue.
#[derive(Debug, PartialEq)]
pub enum Dequeued {
    Job(NotificationJob),
    /// Nothing arrived within the timeout.
    Empty,
    /// Every sender is gone and the queue is drained.
    Closed,
}

/// Producer half, held by the polling worker.
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<NotificationJob>,
}

impl JobSender {
    /// Never blocks. Returns false if the delivery side has gone away.
    pub fn enqueue(&self, job: NotificationJob) -> bool {
        match self.tx.send(job) {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                tracing::warn!(
                    "📭 Dispatch queue closed, dropping notification for account {} (item {})",
                    job.account,
                    job.message.item_id
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, held by the delivery loop.
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<NotificationJob>,
}

impl JobReceiver {
    pub async fn dequeue(&mut self, timeout: Duration) -> Dequeued {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(job)) => Dequeued::Job(job),
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Empty,
        }
    }

    /// Takes a job only if one is already waiting.
    pub fn try_dequeue(&mut self) -> Option<NotificationJob> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting new jobs; already queued jobs can still be taken.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Drops everything still queued and returns how many jobs were discarded.
    pub fn discard_remaining(&mut self) -> u64 {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

pub fn dispatch_queue() -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobSender { tx }, JobReceiver { rx })
}
