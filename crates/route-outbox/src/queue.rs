//! Route queue persisted in the key-value store.

use crate::item::{decode_items, encode_items};
use crate::{OutboxError, OutboxResult, QueueItem};
use altrinity_storage::{KeyValueStore, StorageKeys};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct QueueState {
    loaded: bool,
    /// Oldest first.
    pending: Vec<QueueItem>,
    /// Items that used up their attempts; never retried automatically.
    failed: Vec<QueueItem>,
}

/// Ordered queue of pending submissions.
///
/// Every mutation is written through to storage before it returns, so the
/// persisted slots always match memory.
pub struct RouteQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
    pending_count: watch::Sender<usize>,
    failed_count: watch::Sender<usize>,
}

impl RouteQueue {
    /// Create an unloaded queue over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (pending_count, _) = watch::channel(0);
        let (failed_count, _) = watch::channel(0);
        Self {
            store,
            state: Mutex::new(QueueState::default()),
            pending_count,
            failed_count,
        }
    }

    /// Read the persisted queue into memory.
    ///
    /// Missing slots load as empty. Legacy entries are migrated and written
    /// back so their ids stay stable across restarts. Calling this again is
    /// a no-op.
    pub async fn load(&self) -> OutboxResult<()> {
        let mut state = self.state.lock().await;
        if state.loaded {
            debug!("Route queue already loaded");
            return Ok(());
        }

        let (pending, pending_migrated) = self.read_slot(StorageKeys::ROUTE_QUEUE)?;
        let (failed, failed_migrated) = self.read_slot(StorageKeys::ROUTE_QUEUE_FAILED)?;
        if pending_migrated + failed_migrated > 0 {
            self.write_slots(&pending, &failed, false)?;
        }

        state.pending = pending;
        state.failed = failed;
        state.loaded = true;
        self.publish_counts(&state);

        info!(
            pending = state.pending.len(),
            failed = state.failed.len(),
            "Loaded route queue"
        );
        Ok(())
    }

    /// Append `item` and persist.
    ///
    /// If the write fails the item is not kept in memory either.
    pub async fn enqueue(&self, item: QueueItem) -> OutboxResult<()> {
        let mut state = self.loaded_state().await?;
        let item_id = item.id;

        let mut pending = state.pending.clone();
        pending.push(item);
        let failed = state.failed.clone();
        self.commit(&mut state, pending, failed)?;

        debug!(item_id = %item_id, pending = state.pending.len(), "Enqueued route");
        Ok(())
    }

    /// Write the in-memory queue to storage, overwriting the stored value.
    pub async fn persist(&self) -> OutboxResult<()> {
        let state = self.loaded_state().await?;
        self.write_slots(&state.pending, &state.failed, false)
    }

    /// Number of pending items.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Snapshot of the pending items, oldest first.
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        self.state.lock().await.pending.clone()
    }

    /// Number of dead-lettered items.
    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    /// Snapshot of the dead-lettered items.
    pub async fn failed_items(&self) -> Vec<QueueItem> {
        self.state.lock().await.failed.clone()
    }

    /// Observe the pending count.
    pub fn subscribe_pending_count(&self) -> watch::Receiver<usize> {
        self.pending_count.subscribe()
    }

    /// Observe the dead-letter count.
    pub fn subscribe_failed_count(&self) -> watch::Receiver<usize> {
        self.failed_count.subscribe()
    }

    /// Move every dead letter back to the end of the pending queue with a
    /// fresh attempt budget. Returns how many moved.
    pub async fn requeue_failed(&self) -> OutboxResult<usize> {
        let mut state = self.loaded_state().await?;
        if state.failed.is_empty() {
            return Ok(0);
        }

        let count = state.failed.len();
        let mut pending = state.pending.clone();
        pending.extend(state.failed.iter().cloned().map(|mut item| {
            item.reset_attempts();
            item
        }));
        self.commit(&mut state, pending, Vec::new())?;

        info!(count, "Requeued dead-lettered routes");
        Ok(count)
    }

    /// Drop every dead letter. Returns how many were dropped.
    pub async fn discard_failed(&self) -> OutboxResult<usize> {
        let mut state = self.loaded_state().await?;
        let count = state.failed.len();
        if count == 0 {
            return Ok(0);
        }

        let pending = state.pending.clone();
        self.commit(&mut state, pending, Vec::new())?;

        info!(count, "Discarded dead-lettered routes");
        Ok(count)
    }

    /// Copy of the pending items a flush will attempt.
    pub(crate) async fn begin_flush(&self) -> OutboxResult<Vec<QueueItem>> {
        Ok(self.loaded_state().await?.pending.clone())
    }

    /// Replace the `attempted` items taken by [`Self::begin_flush`] with the
    /// ones that failed, keeping anything enqueued since behind them.
    ///
    /// Only one flush runs at a time and nothing else removes pending items,
    /// so the first `attempted` entries are still the snapshot.
    pub(crate) async fn finish_flush(
        &self,
        attempted: usize,
        retained: Vec<QueueItem>,
        dead_lettered: Vec<QueueItem>,
    ) -> OutboxResult<()> {
        let mut state = self.loaded_state().await?;

        let split = attempted.min(state.pending.len());
        let mut pending = retained;
        pending.extend_from_slice(&state.pending[split..]);
        let mut failed = state.failed.clone();
        failed.extend(dead_lettered);

        self.commit(&mut state, pending, failed)
    }

    async fn loaded_state(&self) -> OutboxResult<MutexGuard<'_, QueueState>> {
        let state = self.state.lock().await;
        if !state.loaded {
            return Err(OutboxError::NotLoaded);
        }
        Ok(state)
    }

    fn read_slot(&self, key: &str) -> OutboxResult<(Vec<QueueItem>, usize)> {
        match self.store.get(key)? {
            Some(raw) => decode_items(&raw),
            None => Ok((Vec::new(), 0)),
        }
    }

    /// Persist the new slots, then make them the in-memory state.
    ///
    /// On a failed write `state` is left untouched.
    fn commit(
        &self,
        state: &mut QueueState,
        pending: Vec<QueueItem>,
        failed: Vec<QueueItem>,
    ) -> OutboxResult<()> {
        let failed_grows = failed.len() > state.failed.len();
        self.write_slots(&pending, &failed, failed_grows)?;
        state.pending = pending;
        state.failed = failed;
        self.publish_counts(state);
        Ok(())
    }

    /// Write both slots in one batch.
    ///
    /// The slot gaining items goes first, so a store without atomic batches
    /// that fails halfway leaves an item in both slots rather than neither.
    fn write_slots(
        &self,
        pending: &[QueueItem],
        failed: &[QueueItem],
        failed_first: bool,
    ) -> OutboxResult<()> {
        let pending = encode_items(pending)?;
        let failed = encode_items(failed)?;
        let pending = (StorageKeys::ROUTE_QUEUE, pending.as_str());
        let failed = (StorageKeys::ROUTE_QUEUE_FAILED, failed.as_str());

        if failed_first {
            self.store.set_many(&[failed, pending])?;
        } else {
            self.store.set_many(&[pending, failed])?;
        }
        Ok(())
    }

    fn publish_counts(&self, state: &QueueState) {
        self.pending_count.send_replace(state.pending.len());
        self.failed_count.send_replace(state.failed.len());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ROUTE_KIND;
    use altrinity_storage::{MemoryStore, StorageError, StorageResult};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Store whose writes can be switched off, for every key or just one.
    /// Batches are written key by key, so a single failing key leaves the
    /// batch half applied.
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        pub fail_writes: AtomicBool,
        pub fail_key: StdMutex<Option<&'static str>>,
    }

    impl FlakyStore {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_writes: AtomicBool::new(false),
                fail_key: StdMutex::new(None),
            }
        }
    }

    impl KeyValueStore for FlakyStore {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            let key_fails = *self.fail_key.lock().unwrap() == Some(key);
            if key_fails || self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            self.inner.delete(key)
        }
    }

    pub(crate) fn route(n: i64) -> QueueItem {
        QueueItem::new(ROUTE_KIND, json!({ "route": [], "n": n }))
    }

    async fn loaded_queue(store: Arc<dyn KeyValueStore>) -> RouteQueue {
        let queue = RouteQueue::new(store);
        queue.load().await.unwrap();
        queue
    }

    fn persisted(store: &dyn KeyValueStore) -> Vec<QueueItem> {
        persisted_slot(store, StorageKeys::ROUTE_QUEUE)
    }

    fn persisted_slot(store: &dyn KeyValueStore, key: &str) -> Vec<QueueItem> {
        match store.get(key).unwrap() {
            Some(raw) => decode_items(&raw).unwrap().0,
            None => Vec::new(),
        }
    }

    type DeadLetterFixture = (Arc<FlakyStore>, RouteQueue, QueueItem, QueueItem);

    /// Queue over a `FlakyStore` holding one pending and one dead-lettered item.
    async fn queue_with_dead_letter() -> DeadLetterFixture {
        let store = Arc::new(FlakyStore::new());
        let queue = loaded_queue(store.clone()).await;
        let (live, mut dead) = (route(1), route(2));
        dead.record_failure("HTTP 400");
        queue.enqueue(live.clone()).await.unwrap();
        queue
            .finish_flush(0, Vec::new(), vec![dead.clone()])
            .await
            .unwrap();
        (store, queue, live, dead)
    }

    async fn assert_memory_matches_store(queue: &RouteQueue, store: &dyn KeyValueStore) {
        assert_eq!(queue.pending_items().await, persisted(store));
        assert_eq!(
            queue.failed_items().await,
            persisted_slot(store, StorageKeys::ROUTE_QUEUE_FAILED)
        );
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let queue = loaded_queue(Arc::new(MemoryStore::new())).await;

        assert_eq!(queue.pending_count().await, 0);
        assert_eq!(queue.failed_count().await, 0);
        assert!(queue.pending_items().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_persists_in_order() {
        let store = Arc::new(MemoryStore::new());
        let queue = loaded_queue(store.clone()).await;
        let items: Vec<QueueItem> = (1..=4).map(route).collect();

        for item in &items {
            queue.enqueue(item.clone()).await.unwrap();
        }

        assert_eq!(persisted(store.as_ref()), items);
        assert_eq!(queue.pending_items().await, items);
    }

    #[tokio::test]
    async fn test_enqueue_same_item_twice_keeps_both() {
        let store = Arc::new(MemoryStore::new());
        let queue = loaded_queue(store.clone()).await;
        let item = route(1);

        queue.enqueue(item.clone()).await.unwrap();
        queue.enqueue(item.clone()).await.unwrap();

        assert_eq!(persisted(store.as_ref()), vec![item.clone(), item]);
    }

    #[tokio::test]
    async fn test_persist_then_reload_roundtrip() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = loaded_queue(store.clone()).await;
        queue.enqueue(route(1)).await.unwrap();
        queue.enqueue(route(2)).await.unwrap();
        queue.persist().await.unwrap();
        let before = queue.pending_items().await;

        let restarted = loaded_queue(store).await;

        assert_eq!(restarted.pending_items().await, before);
    }

    #[tokio::test]
    async fn test_load_twice_is_noop() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        loaded_queue(store.clone()).await.enqueue(route(1)).await.unwrap();

        let queue = loaded_queue(store.clone()).await;
        queue.enqueue(route(2)).await.unwrap();
        queue.load().await.unwrap();
        queue.load().await.unwrap();

        assert_eq!(queue.pending_count().await, 2);
        assert_eq!(persisted(store.as_ref()).len(), 2);
    }

    #[tokio::test]
    async fn test_operations_require_load() {
        let queue = RouteQueue::new(Arc::new(MemoryStore::new()));

        assert!(matches!(
            queue.enqueue(route(1)).await,
            Err(OutboxError::NotLoaded)
        ));
        assert!(matches!(queue.persist().await, Err(OutboxError::NotLoaded)));
        assert!(matches!(
            queue.requeue_failed().await,
            Err(OutboxError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn test_load_migrates_legacy_slot() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                StorageKeys::ROUTE_QUEUE,
                r#"[{"route":[{"lat":1.5,"lng":2.5,"duration":10,"timestamp":20}]}]"#,
            )
            .unwrap();

        let queue = loaded_queue(store.clone()).await;
        let items = queue.pending_items().await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ROUTE_KIND);
        assert_eq!(items[0].payload["route"][0]["lat"], json!(1.5));

        // the migrated envelope is written back, so ids survive a restart
        assert_eq!(persisted(store.as_ref()), items);
        let restarted = loaded_queue(store).await;
        assert_eq!(restarted.pending_items().await, items);
    }

    #[tokio::test]
    async fn test_load_corrupt_slot_fails() {
        let store = Arc::new(MemoryStore::new());
        store.set(StorageKeys::ROUTE_QUEUE, "{broken").unwrap();

        let queue = RouteQueue::new(store);
        assert!(matches!(queue.load().await, Err(OutboxError::Json(_))));
    }

    #[tokio::test]
    async fn test_storage_failure_propagates_and_rolls_back() {
        let store = Arc::new(FlakyStore::new());
        let queue = loaded_queue(store.clone()).await;
        queue.enqueue(route(1)).await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let result = queue.enqueue(route(2)).await;

        assert!(matches!(result, Err(OutboxError::Storage(_))));
        assert_eq!(queue.pending_count().await, 1);
        assert!(matches!(queue.persist().await, Err(OutboxError::Storage(_))));
    }

    #[tokio::test]
    async fn test_pending_count_observable() {
        let queue = loaded_queue(Arc::new(MemoryStore::new())).await;
        let mut rx = queue.subscribe_pending_count();
        assert_eq!(*rx.borrow_and_update(), 0);

        queue.enqueue(route(1)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        queue.enqueue(route(2)).await.unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn test_finish_flush_keeps_items_enqueued_meanwhile() {
        let queue = loaded_queue(Arc::new(MemoryStore::new())).await;
        let (a, b, c) = (route(1), route(2), route(3));
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        let snapshot = queue.begin_flush().await.unwrap();
        queue.enqueue(c.clone()).await.unwrap();
        queue
            .finish_flush(snapshot.len(), vec![b.clone()], Vec::new())
            .await
            .unwrap();

        assert_eq!(queue.pending_items().await, vec![b, c]);
    }

    #[tokio::test]
    async fn test_dead_letter_requeue_and_discard() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = loaded_queue(store.clone()).await;
        let mut dead = route(1);
        dead.record_failure("HTTP 400");
        queue.enqueue(route(2)).await.unwrap();

        let snapshot = queue.begin_flush().await.unwrap();
        queue
            .finish_flush(snapshot.len(), snapshot.clone(), vec![dead.clone()])
            .await
            .unwrap();
        assert_eq!(queue.failed_count().await, 1);

        // dead letters survive a restart
        let restarted = loaded_queue(store).await;
        assert_eq!(restarted.failed_items().await, vec![dead.clone()]);

        assert_eq!(restarted.requeue_failed().await.unwrap(), 1);
        let pending = restarted.pending_items().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].id, dead.id);
        assert_eq!(pending[1].attempts, 0);
        assert_eq!(restarted.failed_count().await, 0);

        assert_eq!(restarted.discard_failed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discard_failed() {
        let queue = loaded_queue(Arc::new(MemoryStore::new())).await;
        queue
            .finish_flush(0, Vec::new(), vec![route(1), route(2)])
            .await
            .unwrap();
        let mut failed_rx = queue.subscribe_failed_count();
        assert_eq!(*failed_rx.borrow_and_update(), 2);

        assert_eq!(queue.discard_failed().await.unwrap(), 2);
        assert_eq!(queue.failed_count().await, 0);
        assert_eq!(*failed_rx.borrow(), 0);
    }

    #[tokio::test]
    async fn test_requeue_failed_write_error_keeps_state() {
        let (store, queue, live, dead) = queue_with_dead_letter().await;

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            queue.requeue_failed().await,
            Err(OutboxError::Storage(_))
        ));

        assert_eq!(queue.pending_items().await, vec![live]);
        assert_eq!(queue.failed_items().await, vec![dead]);
        assert_memory_matches_store(&queue, store.as_ref()).await;
    }

    #[tokio::test]
    async fn test_discard_failed_write_error_keeps_state() {
        let (store, queue, _, dead) = queue_with_dead_letter().await;
        let mut failed_rx = queue.subscribe_failed_count();
        failed_rx.borrow_and_update();

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(queue.discard_failed().await.is_err());

        assert_eq!(queue.failed_items().await, vec![dead]);
        assert!(!failed_rx.has_changed().unwrap());
        assert_memory_matches_store(&queue, store.as_ref()).await;
    }

    #[tokio::test]
    async fn test_finish_flush_write_error_keeps_state() {
        let (store, queue, live, dead) = queue_with_dead_letter().await;
        let snapshot = queue.begin_flush().await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(queue
            .finish_flush(snapshot.len(), Vec::new(), snapshot)
            .await
            .is_err());

        assert_eq!(queue.pending_items().await, vec![live]);
        assert_eq!(queue.failed_items().await, vec![dead]);

        // a later successful write does not pick up the abandoned change
        store.fail_writes.store(false, Ordering::SeqCst);
        queue.persist().await.unwrap();
        assert_memory_matches_store(&queue, store.as_ref()).await;
    }

    #[tokio::test]
    async fn test_half_written_dead_letter_is_not_lost() {
        let store = Arc::new(FlakyStore::new());
        let queue = loaded_queue(store.clone()).await;
        let item = route(1);
        queue.enqueue(item.clone()).await.unwrap();
        let snapshot = queue.begin_flush().await.unwrap();

        *store.fail_key.lock().unwrap() = Some(StorageKeys::ROUTE_QUEUE);
        assert!(queue
            .finish_flush(snapshot.len(), Vec::new(), snapshot)
            .await
            .is_err());

        *store.fail_key.lock().unwrap() = None;
        let restarted = loaded_queue(store).await;
        assert_eq!(restarted.pending_items().await, vec![item.clone()]);
        assert_eq!(restarted.failed_items().await[0].id, item.id);
    }

    #[tokio::test]
    async fn test_half_written_requeue_is_not_lost() {
        let (store, _queue, _, dead) = queue_with_dead_letter().await;
        let queue = loaded_queue(store.clone()).await;

        *store.fail_key.lock().unwrap() = Some(StorageKeys::ROUTE_QUEUE_FAILED);
        assert!(queue.requeue_failed().await.is_err());

        *store.fail_key.lock().unwrap() = None;
        let restarted = loaded_queue(store).await;
        assert!(restarted.pending_items().await.iter().any(|i| i.id == dead.id));
        assert_eq!(restarted.failed_items().await, vec![dead]);
    }
}
