//! Consumes order-lifecycle events and drives the dispatch coordinator.
//! An event is committed only after the work it triggers has been applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::dispatch::DispatchCoordinator;
use crate::error::AppError;
use crate::models::events::OrderEvent;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredEvent {
    pub offset: u64,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    pub event: OrderEvent,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn next(&self) -> Option<DeliveredEvent>;
    async fn ack(&self, offset: u64) -> Result<(), AppError>;
    async fn nack(&self, delivered: DeliveredEvent) -> Result<(), AppError>;
}

/// Process-local log. Offsets are assigned on publish; nacked events go to
/// the back of the queue.
pub struct InMemoryEventLog {
    tx: mpsc::UnboundedSender<DeliveredEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<DeliveredEvent>>,
    next_offset: AtomicU64,
    /// Every offset below this is committed.
    low_water: AtomicU64,
    /// Committed offsets at or above `low_water`.
    committed: DashSet<u64>,
    capacity: usize,
}

impl InMemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            next_offset: AtomicU64::new(0),
            low_water: AtomicU64::new(0),
            committed: DashSet::new(),
            capacity,
        }
    }

    pub fn publish(&self, event: OrderEvent) -> Result<u64, AppError> {
        if self.pending() >= self.capacity {
            return Err(AppError::Infrastructure("event log is full".to_string()));
        }

        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(DeliveredEvent {
                offset,
                attempt: 1,
                event,
            })
            .map_err(|err| AppError::Infrastructure(format!("event log closed: {err}")))?;
        Ok(offset)
    }

    pub fn is_committed(&self, offset: u64) -> bool {
        offset < self.low_water.load(Ordering::SeqCst) || self.committed.contains(&offset)
    }

    /// Published but not yet committed.
    pub fn pending(&self) -> usize {
        let settled = self.low_water.load(Ordering::SeqCst) as usize + self.committed.len();
        (self.next_offset.load(Ordering::SeqCst) as usize).saturating_sub(settled)
    }

    #[cfg(test)]
    fn tracked_commits(&self) -> usize {
        self.committed.len()
    }

    /// Folds the contiguous committed prefix into `low_water`.
    fn compact(&self) {
        loop {
            let low = self.low_water.load(Ordering::SeqCst);
            if !self.committed.contains(&low) {
                return;
            }
            if self
                .low_water
                .compare_exchange(low, low + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.committed.remove(&low);
            }
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn next(&self) -> Option<DeliveredEvent> {
        self.rx.lock().await.recv().await
    }

    async fn ack(&self, offset: u64) -> Result<(), AppError> {
        if offset >= self.low_water.load(Ordering::SeqCst) {
            self.committed.insert(offset);
            self.compact();
        }
        Ok(())
    }

    async fn nack(&self, mut delivered: DeliveredEvent) -> Result<(), AppError> {
        delivered.attempt += 1;
        self.tx
            .send(delivered)
            .map_err(|err| AppError::Infrastructure(format!("event log closed: {err}")))
    }
}

pub async fn handle_event(coordinator: &DispatchCoordinator, event: &OrderEvent) -> Result<(), AppError> {
    match event {
        OrderEvent::NewOrder { order_id } => {
            coordinator.create_delivery(*order_id).await?;
        }
        OrderEvent::HandOvered { order_id } => {
            coordinator.mark_picked_up(*order_id).await?;
        }
    }
    Ok(())
}

/// Processes one delivered event and settles it on the log.
pub async fn process(
    log: &dyn EventLog,
    coordinator: &DispatchCoordinator,
    delivered: DeliveredEvent,
    max_attempts: u32,
    metrics: &Metrics,
) {
    let kind = delivered.event.kind();
    let order_id = delivered.event.order_id();
    let offset = delivered.offset;

    let settle = match handle_event(coordinator, &delivered.event).await {
        Ok(()) => {
            metrics.ingest_events_total.with_label_values(&[kind, "applied"]).inc();
            info!(offset, kind, order_id = %order_id, "order event applied");
            log.ack(offset).await
        }
        Err(err) if err.is_retryable() && delivered.attempt < max_attempts => {
            metrics.ingest_events_total.with_label_values(&[kind, "retried"]).inc();
            warn!(offset, kind, order_id = %order_id, attempt = delivered.attempt, error = %err, "order event failed; requesting redelivery");
            log.nack(delivered).await
        }
        Err(err) => {
            let outcome = if err.is_retryable() { "dead_lettered" } else { "rejected" };
            metrics.ingest_events_total.with_label_values(&[kind, outcome]).inc();
            error!(offset, kind, order_id = %order_id, attempt = delivered.attempt, error = %err, outcome, "order event dropped");
            log.ack(offset).await
        }
    };

    if let Err(err) = settle {
        error!(offset, error = %err, "failed to settle order event");
    }
}

pub async fn run_ingest(
    log: Arc<dyn EventLog>,
    coordinator: Arc<DispatchCoordinator>,
    max_attempts: u32,
    metrics: Metrics,
) {
    info!("event ingest started");

    while let Some(delivered) = log.next().await {
        process(log.as_ref(), &coordinator, delivered, max_attempts, &metrics).await;
    }

    warn!("event ingest stopped: log closed");
}
