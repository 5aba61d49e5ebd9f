use crate::registry::{BroadcastMessage, SubscriberHandle, SubscriberRegistry};
use crate::traits::RecordStore;
use crate::types::Batch;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default bound on a single subscriber send
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Default bound on a single store write
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Batches waiting for the persistence worker
const PERSIST_QUEUE_CAPACITY: usize = 256;

/// Why a batch could not be handed to one subscriber
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Subscriber channel closed")]
    Closed,

    #[error("Subscriber did not accept data within {0:?}")]
    Timeout(Duration),
}

/// Outcome of distributing one batch
#[derive(Debug, Clone, Serialize)]
pub struct DistributionResult {
    pub batch_id: Uuid,
    pub persisted: bool,
    pub delivered: usize,
    pub dropped: Vec<SubscriberHandle>,
}

/// Outcome of the broadcast half of a distribution
#[derive(Debug, Clone, Default)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: Vec<SubscriberHandle>,
}

/// Persists flushed batches and fans them out to subscribers
#[derive(Clone)]
pub struct Distributor {
    store: Arc<dyn RecordStore>,
    registry: SubscriberRegistry,
    send_timeout: Duration,
    persist_timeout: Duration,
}

impl Distributor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: SubscriberRegistry,
        send_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            send_timeout,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
        }
    }

    /// Bound on a single `persist` call; a store that takes longer counts
    /// as a failed write
    pub fn with_persist_timeout(mut self, persist_timeout: Duration) -> Self {
        self.persist_timeout = persist_timeout;
        self
    }

    /// Persist and broadcast a batch. Both are attempted; neither failure
    /// suppresses the other.
    pub async fn distribute(&self, batch: Batch) -> DistributionResult {
        let (persisted, outcome) = tokio::join!(self.persist(&batch), self.broadcast(&batch));

        DistributionResult {
            batch_id: batch.id(),
            persisted,
            delivered: outcome.delivered,
            dropped: outcome.dropped,
        }
    }

    /// Write a batch to the store, giving up after the persist timeout
    pub async fn persist(&self, batch: &Batch) -> bool {
        match timeout(self.persist_timeout, self.store.persist(batch.records())).await {
            Ok(Ok(ids)) => {
                debug!("Batch {} persisted as {} records", batch.id(), ids.len());
                true
            }
            Ok(Err(e)) => {
                error!("Failed to persist batch {}: {}", batch.id(), e);
                false
            }
            Err(_) => {
                error!(
                    "Persisting batch {} timed out after {:?}",
                    batch.id(),
                    self.persist_timeout
                );
                false
            }
        }
    }

    /// Push one serialized copy of the batch to every registered subscriber
    pub async fn broadcast(&self, batch: &Batch) -> BroadcastOutcome {
        let message: BroadcastMessage = match serde_json::to_string(batch) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize batch {}: {}", batch.id(), e);
                return BroadcastOutcome::default();
            }
        };

        let sends = self.registry.snapshot().into_iter().map(|(handle, sender)| {
            let message = message.clone();
            async move {
                // Unregistered since the snapshot was taken
                if !self.registry.is_registered(handle) {
                    return (handle, None);
                }
                (handle, Some(self.deliver(&sender, message).await))
            }
        });

        let mut outcome = BroadcastOutcome::default();
        for (handle, result) in join_all(sends).await {
            match result {
                Some(Ok(())) => outcome.delivered += 1,
                Some(Err(e)) => {
                    if self.registry.unregister(handle) {
                        warn!("Dropping subscriber {}: {}", handle, e);
                        outcome.dropped.push(handle);
                    } else {
                        debug!("Send to {} failed after it left: {}", handle, e);
                    }
                }
                None => {}
            }
        }

        outcome
    }

    async fn deliver(
        &self,
        sender: &mpsc::Sender<BroadcastMessage>,
        message: BroadcastMessage,
    ) -> Result<(), DeliveryError> {
        sender
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout(self.send_timeout),
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }
}

/// Run the distributor over a stream of flushed batches, in arrival order.
///
/// Broadcasting and persistence run on separate tasks. The broadcast loop
/// hands each batch to the persistence queue without waiting, so a slow
/// store never delays live delivery. When that queue is full the batch is
/// broadcast but not persisted. The returned handle completes once both
/// tasks have drained.
pub fn spawn_distributor(
    distributor: Distributor,
    mut batches: mpsc::Receiver<Batch>,
) -> JoinHandle<()> {
    let (persist_tx, mut persist_rx) = mpsc::channel::<Batch>(PERSIST_QUEUE_CAPACITY);

    let writer = distributor.clone();
    let persistence = tokio::spawn(async move {
        while let Some(batch) = persist_rx.recv().await {
            let persisted = writer.persist(&batch).await;
            debug!("Batch {} persisted={}", batch.id(), persisted);
        }
        info!("Persistence queue drained");
    });

    tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            let batch_id = batch.id();
            let size = batch.len();

            match persist_tx.try_send(batch.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    error!(
                        "Persistence queue full, batch {} will not be persisted",
                        batch_id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    error!("Persistence worker gone, batch {} will not be persisted", batch_id);
                }
            }

            let outcome = distributor.broadcast(&batch).await;
            info!(
                "Broadcast batch {} ({} records): delivered={}, dropped={}",
                batch_id,
                size,
                outcome.delivered,
                outcome.dropped.len()
            );
        }

        drop(persist_tx);
        if let Err(e) = persistence.await {
            error!("Persistence worker failed: {}", e);
        }
        info!("Batch channel closed, distributor stopping");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;
    use crate::traits::{StoreError, StoreResult};
    use crate::types::{
        Accelerometer, ClassifiedRecord, Gps, RawSample, RecordId, RoadState, StoredRecord,
    };
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn persist(&self, _records: &[ClassifiedRecord]) -> StoreResult<Vec<RecordId>> {
            Err(StoreError::Unavailable("database is down".to_string()))
        }

        async fn get_record(&self, id: RecordId) -> StoreResult<StoredRecord> {
            Err(StoreError::NotFound(id))
        }

        async fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
            Ok(Vec::new())
        }

        async fn update_record(
            &self,
            id: RecordId,
            _record: &ClassifiedRecord,
        ) -> StoreResult<StoredRecord> {
            Err(StoreError::NotFound(id))
        }

        async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
            Err(StoreError::NotFound(id))
        }
    }

    /// Memory store whose writes take `delay`
    struct SlowStore {
        delay: Duration,
        inner: MemoryRecordStore,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                inner: MemoryRecordStore::new(),
            }
        }
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn persist(&self, records: &[ClassifiedRecord]) -> StoreResult<Vec<RecordId>> {
            tokio::time::sleep(self.delay).await;
            self.inner.persist(records).await
        }

        async fn get_record(&self, id: RecordId) -> StoreResult<StoredRecord> {
            self.inner.get_record(id).await
        }

        async fn list_records(&self) -> StoreResult<Vec<StoredRecord>> {
            self.inner.list_records().await
        }

        async fn update_record(
            &self,
            id: RecordId,
            record: &ClassifiedRecord,
        ) -> StoreResult<StoredRecord> {
            self.inner.update_record(id, record).await
        }

        async fn delete_record(&self, id: RecordId) -> StoreResult<()> {
            self.inner.delete_record(id).await
        }
    }

    fn batch(zs: &[f64]) -> Batch {
        Batch::new(
            zs.iter()
                .map(|&z| ClassifiedRecord {
                    road_state: RoadState::Normal,
                    sample: RawSample::new(
                        Accelerometer { x: 0.0, y: 0.0, z },
                        Gps {
                            latitude: 50.0,
                            longitude: 30.0,
                        },
                        "2024-02-28T12:30:00Z",
                    )
                    .unwrap(),
                })
                .collect(),
        )
    }

    fn decode(message: &BroadcastMessage) -> Vec<f64> {
        let records: Vec<ClassifiedRecord> = serde_json::from_str(message).unwrap();
        records.iter().map(|r| r.sample.accelerometer().z).collect()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber_in_order() {
        let registry = SubscriberRegistry::new();
        let store = Arc::new(MemoryRecordStore::new());
        let distributor = Distributor::new(store.clone(), registry.clone(), DEFAULT_SEND_TIMEOUT);

        let mut subs: Vec<_> = (0..3).map(|_| registry.register().unwrap()).collect();

        let first = distributor.distribute(batch(&[1.0, 2.0])).await;
        let second = distributor.distribute(batch(&[3.0])).await;

        assert!(first.persisted && second.persisted);
        assert_eq!(first.delivered, 3);
        assert!(first.dropped.is_empty());

        for sub in subs.iter_mut() {
            assert_eq!(decode(&sub.receiver.recv().await.unwrap()), vec![1.0, 2.0]);
            assert_eq!(decode(&sub.receiver.recv().await.unwrap()), vec![3.0]);
        }
        assert_eq!(store.list_records().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_persistence_failure_still_broadcasts() {
        let registry = SubscriberRegistry::new();
        let distributor =
            Distributor::new(Arc::new(FailingStore), registry.clone(), DEFAULT_SEND_TIMEOUT);
        let mut sub = registry.register().unwrap();

        let result = distributor.distribute(batch(&[1.0])).await;

        assert!(!result.persisted);
        assert_eq!(result.delivered, 1);
        assert_eq!(decode(&sub.receiver.recv().await.unwrap()), vec![1.0]);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_isolated() {
        let registry = SubscriberRegistry::new();
        let distributor = Distributor::new(
            Arc::new(MemoryRecordStore::new()),
            registry.clone(),
            DEFAULT_SEND_TIMEOUT,
        );
        let mut alive = registry.register().unwrap();
        let gone = registry.register().unwrap();
        let gone_handle = gone.handle;
        drop(gone);

        let result = distributor.distribute(batch(&[7.0])).await;

        assert_eq!(result.delivered, 1);
        assert_eq!(result.dropped, vec![gone_handle]);
        assert!(!registry.is_registered(gone_handle));
        assert_eq!(decode(&alive.receiver.recv().await.unwrap()), vec![7.0]);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out_without_blocking_others() {
        let registry = SubscriberRegistry::with_limits(10, 1);
        let send_timeout = Duration::from_millis(50);
        let distributor =
            Distributor::new(Arc::new(MemoryRecordStore::new()), registry.clone(), send_timeout);

        let mut fast = registry.register().unwrap();
        let stalled = registry.register().unwrap();

        // Fill the stalled queue; it is never drained
        distributor.distribute(batch(&[1.0])).await;
        assert_eq!(decode(&fast.receiver.recv().await.unwrap()), vec![1.0]);

        let result = distributor.distribute(batch(&[2.0])).await;

        assert_eq!(result.delivered, 1);
        assert_eq!(result.dropped, vec![stalled.handle]);
        assert_eq!(decode(&fast.receiver.recv().await.unwrap()), vec![2.0]);
        assert_eq!(registry.active_handles(), vec![fast.handle]);
    }

    #[tokio::test]
    async fn test_unregistered_subscriber_receives_nothing_further() {
        let registry = SubscriberRegistry::new();
        let distributor = Distributor::new(
            Arc::new(MemoryRecordStore::new()),
            registry.clone(),
            DEFAULT_SEND_TIMEOUT,
        );
        let mut keep = registry.register().unwrap();
        let mut leave = registry.register().unwrap();

        distributor.distribute(batch(&[1.0])).await;
        registry.unregister(leave.handle);
        let result = distributor.distribute(batch(&[2.0])).await;

        assert_eq!(result.delivered, 1);
        assert!(result.dropped.is_empty());
        assert_eq!(decode(&keep.receiver.recv().await.unwrap()), vec![1.0]);
        assert_eq!(decode(&keep.receiver.recv().await.unwrap()), vec![2.0]);
        assert_eq!(decode(&leave.receiver.recv().await.unwrap()), vec![1.0]);
        assert!(leave.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_distributor_worker_preserves_flush_order() {
        let registry = SubscriberRegistry::new();
        let store = Arc::new(MemoryRecordStore::new());
        let distributor = Distributor::new(store.clone(), registry.clone(), DEFAULT_SEND_TIMEOUT);
        let mut sub = registry.register().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let worker = spawn_distributor(distributor, rx);
        for i in 0..4 {
            tx.send(batch(&[i as f64])).await.unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        for i in 0..4 {
            assert_eq!(decode(&sub.receiver.recv().await.unwrap()), vec![i as f64]);
        }
        // the worker only finishes once queued writes are done
        let stored: Vec<f64> = store.list_records().await.unwrap().iter().map(|r| r.z).collect();
        assert_eq!(stored, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_slow_store_does_not_delay_broadcast() {
        let registry = SubscriberRegistry::new();
        let store = Arc::new(SlowStore::new(Duration::from_secs(2)));
        let distributor = Distributor::new(store, registry.clone(), DEFAULT_SEND_TIMEOUT);
        let mut sub = registry.register().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let _worker = spawn_distributor(distributor, rx);

        let started = std::time::Instant::now();
        for i in 0..3 {
            tx.send(batch(&[i as f64])).await.unwrap();
        }
        for i in 0..3 {
            let message = timeout(Duration::from_millis(500), sub.receiver.recv())
                .await
                .expect("broadcast waited for the store")
                .unwrap();
            assert_eq!(decode(&message), vec![i as f64]);
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hung_store_times_out_as_not_persisted() {
        let registry = SubscriberRegistry::new();
        let distributor = Distributor::new(
            Arc::new(SlowStore::new(Duration::from_secs(60))),
            registry.clone(),
            DEFAULT_SEND_TIMEOUT,
        )
        .with_persist_timeout(Duration::from_millis(50));
        let mut sub = registry.register().unwrap();

        let result = timeout(Duration::from_secs(1), distributor.distribute(batch(&[1.0])))
            .await
            .expect("persist timeout not applied");

        assert!(!result.persisted);
        assert_eq!(result.delivered, 1);
        assert_eq!(decode(&sub.receiver.recv().await.unwrap()), vec![1.0]);
    }

    #[tokio::test]
    async fn test_unregister_during_broadcast_affects_only_that_subscriber() {
        let registry = SubscriberRegistry::with_limits(10, 1);
        let distributor = Distributor::new(
            Arc::new(MemoryRecordStore::new()),
            registry.clone(),
            Duration::from_millis(300),
        );
        let mut keep = registry.register().unwrap();
        let mut leave = registry.register().unwrap();

        // fills the single slot of `leave`, which is never drained
        distributor.distribute(batch(&[1.0])).await;
        assert_eq!(decode(&keep.receiver.recv().await.unwrap()), vec![1.0]);

        let in_flight = tokio::spawn({
            let distributor = distributor.clone();
            async move { distributor.distribute(batch(&[2.0])).await }
        });

        // the send to `leave` is now waiting on its full queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.unregister(leave.handle));

        let result = in_flight.await.unwrap();
        assert_eq!(result.delivered, 1);
        // already gone, so not reported as dropped by the broadcast
        assert!(result.dropped.is_empty());
        assert_eq!(decode(&keep.receiver.recv().await.unwrap()), vec![2.0]);

        let result = distributor.distribute(batch(&[3.0])).await;
        assert_eq!(result.delivered, 1);
        assert_eq!(decode(&keep.receiver.recv().await.unwrap()), vec![3.0]);

        assert_eq!(decode(&leave.receiver.recv().await.unwrap()), vec![1.0]);
        assert!(leave.receiver.try_recv().is_err());
    }
}
