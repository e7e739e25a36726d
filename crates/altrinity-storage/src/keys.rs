//! Storage key constants.

/// Slot names used by the sync client.
pub struct StorageKeys;

impl StorageKeys {
    /// Pending route submissions (JSON array of queue items)
    pub const ROUTE_QUEUE: &'static str = "routeQueue";

    /// Dead-lettered route submissions (JSON array of queue items)
    pub const ROUTE_QUEUE_FAILED: &'static str = "routeQueue.failed";

    /// Identity provider access token (JWT)
    pub const ACCESS_TOKEN: &'static str = "auth.accessToken";

    /// Identity provider refresh token
    pub const REFRESH_TOKEN: &'static str = "auth.refreshToken";
}
