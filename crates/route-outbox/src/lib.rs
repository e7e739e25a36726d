//! Offline outbox for route submissions.
//!
//! This crate provides:
//! - RouteQueue: ordered pending queue persisted in a key-value slot, with a
//!   dead-letter list for items that keep failing
//! - FlushCoordinator: drains the queue against the API, one attempt per item
//!   per flush, keeping failures for the next flush
//! - HttpRouteSubmitter: `POST <base>/routes` with a bearer token
//! - ConnectivityMonitor / ConnectivityProbe: online/offline signal that
//!   triggers a flush when connectivity comes back

mod connectivity;
mod error;
mod flush;
mod item;
mod queue;
mod sender;

pub use connectivity::{
    spawn_connectivity_flush, ConnectivityMonitor, ConnectivityProbe, ConnectivityState,
};
pub use error::{OutboxError, OutboxResult};
pub use flush::{FlushCoordinator, FlushReport, SkipReason, TokenSource};
pub use item::{QueueItem, RoutePoint, RouteSubmission, CURRENT_ITEM_VERSION, ROUTE_KIND};
pub use queue::RouteQueue;
pub use sender::{HttpRouteSubmitter, RouteSubmitter, SenderConfig};
