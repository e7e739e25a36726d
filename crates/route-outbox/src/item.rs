//! Queue item envelope and route payloads.

use crate::OutboxResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

/// Envelope schema version written by this build.
pub const CURRENT_ITEM_VERSION: u32 = 1;

/// Kind tag for route submissions.
pub const ROUTE_KIND: &str = "route";

/// One pending mutation awaiting submission.
///
/// The payload is opaque to the queue and is sent verbatim as the request
/// body. `id` only labels log lines; enqueuing the same payload twice yields
/// two items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub version: u32,
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Wrap `payload` in a fresh envelope.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            version: CURRENT_ITEM_VERSION,
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Envelope for a route submission.
    pub fn route(submission: &RouteSubmission) -> OutboxResult<Self> {
        Ok(Self::new(ROUTE_KIND, serde_json::to_value(submission)?))
    }

    /// Count a failed delivery.
    pub(crate) fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
    }

    /// Whether the item has used up its delivery attempts.
    pub fn is_exhausted(&self, max_attempts: Option<u32>) -> bool {
        max_attempts.is_some_and(|max| self.attempts >= max)
    }

    /// Forget past failures, used when a dead letter goes back to the queue.
    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

/// A recorded route, the body of `POST /routes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSubmission {
    pub route: Vec<RoutePoint>,
}

/// One GPS fix along a route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    /// Milliseconds spent at this point.
    pub duration: i64,
    /// Unix time in milliseconds.
    pub timestamp: i64,
}

/// Persisted entry: either a current envelope or a bare record written
/// before envelopes existed.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredItem {
    Envelope(QueueItem),
    Legacy(Value),
}

/// Decode a persisted slot, wrapping legacy records into envelopes.
///
/// Also returns how many entries were migrated.
pub(crate) fn decode_items(raw: &str) -> OutboxResult<(Vec<QueueItem>, usize)> {
    let stored: Vec<StoredItem> = serde_json::from_str(raw)?;
    let mut migrated = 0usize;

    let items: Vec<QueueItem> = stored
        .into_iter()
        .map(|entry| match entry {
            StoredItem::Envelope(item) => {
                if item.version > CURRENT_ITEM_VERSION {
                    warn!(
                        item_id = %item.id,
                        version = item.version,
                        "Queue item written by a newer version, keeping as is"
                    );
                }
                item
            }
            StoredItem::Legacy(payload) => {
                migrated += 1;
                QueueItem::new(ROUTE_KIND, payload)
            }
        })
        .collect();

    if migrated > 0 {
        info!(count = migrated, "Migrated legacy queue entries");
    }

    Ok((items, migrated))
}

pub(crate) fn encode_items(items: &[QueueItem]) -> OutboxResult<String> {
    Ok(serde_json::to_string(items)?)
}
