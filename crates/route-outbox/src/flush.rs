//! Flush coordinator: drains the route queue against the API.

use crate::{OutboxResult, QueueItem, RouteQueue, RouteSubmitter};
use altrinity_auth::AuthSession;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Supplies the bearer token for submissions.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl TokenSource for AuthSession {
    fn bearer_token(&self) -> Option<String> {
        self.token()
    }
}

/// Why a flush did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyQueue,
    NoAuthToken,
    /// Another flush was already running.
    InProgress,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Delivery attempts made.
    pub attempted: usize,
    pub delivered: usize,
    /// Failed items kept for the next flush.
    pub retained: usize,
    /// Failed items moved to the dead-letter list.
    pub dead_lettered: usize,
    pub skipped: Option<SkipReason>,
}

impl FlushReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }
}

/// Drains the queue: one attempt per item, in queue order, keeping failures.
pub struct FlushCoordinator {
    queue: Arc<RouteQueue>,
    submitter: Arc<dyn RouteSubmitter>,
    tokens: Arc<dyn TokenSource>,
    max_attempts: Option<u32>,
    flush_guard: Mutex<()>,
}

impl FlushCoordinator {
    /// Create a coordinator. `max_attempts` of `None` retries forever.
    pub fn new(
        queue: Arc<RouteQueue>,
        submitter: Arc<dyn RouteSubmitter>,
        tokens: Arc<dyn TokenSource>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            queue,
            submitter,
            tokens,
            max_attempts,
            flush_guard: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &Arc<RouteQueue> {
        &self.queue
    }

    /// Attempt delivery of every pending item once.
    ///
    /// Items are submitted sequentially, oldest first. Afterwards the queue
    /// holds exactly the failed items in their original order, followed by
    /// anything enqueued during the flush. Overlapping calls return
    /// [`SkipReason::InProgress`] instead of submitting twice.
    pub async fn flush(&self) -> OutboxResult<FlushReport> {
        let Ok(_guard) = self.flush_guard.try_lock() else {
            debug!("Flush already running, skipping");
            return Ok(FlushReport::skipped(SkipReason::InProgress));
        };

        let items = self.queue.begin_flush().await?;
        if items.is_empty() {
            return Ok(FlushReport::skipped(SkipReason::EmptyQueue));
        }

        let Some(token) = self.tokens.bearer_token() else {
            warn!(pending = items.len(), "No auth token, skipping flush");
            return Ok(FlushReport::skipped(SkipReason::NoAuthToken));
        };

        info!(count = items.len(), "Flushing routes");

        let attempted = items.len();
        let mut report = FlushReport {
            attempted,
            ..Default::default()
        };
        let mut retained: Vec<QueueItem> = Vec::new();
        let mut dead_lettered: Vec<QueueItem> = Vec::new();

        for mut item in items {
            match self.submitter.submit(&token, &item).await {
                Ok(()) => {
                    report.delivered += 1;
                    info!(item_id = %item.id, "Route sent successfully");
                }
                Err(e) => {
                    item.record_failure(e.to_string());
                    if item.is_exhausted(self.max_attempts) {
                        warn!(
                            item_id = %item.id,
                            attempts = item.attempts,
                            error = %e,
                            "Route failed too many times, moving to dead letters"
                        );
                        dead_lettered.push(item);
                    } else {
                        warn!(
                            item_id = %item.id,
                            attempts = item.attempts,
                            error = %e,
                            "Failed to send route"
                        );
                        retained.push(item);
                    }
                }
            }
        }

        report.retained = retained.len();
        report.dead_lettered = dead_lettered.len();
        self.queue
            .finish_flush(attempted, retained, dead_lettered)
            .await?;

        info!(
            delivered = report.delivered,
            retained = report.retained,
            dead_lettered = report.dead_lettered,
            "Flush finished"
        );
        Ok(report)
    }
}
