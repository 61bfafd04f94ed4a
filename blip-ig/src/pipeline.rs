//! Processing pipeline
//!
//! Fixed pool of async workers, one bounded queue per worker. A delivery
//! is routed by hashing its device address, so all events for one
//! address land on the same worker and are processed in arrival order;
//! events for different addresses proceed in parallel. A full queue
//! makes `dispatch` wait, which is the backpressure point: the caller
//! stops pulling from the bus and redelivery pressure builds there
//! instead of in memory here.
//!
//! Per delivery: archive verbatim, classify, decode (bounded by a
//! timeout), append the reading, fold into the inventory, then settle
//! the delivery. Only an archive failure withholds the ack; every later
//! failure is logged and counted but never blocks settlement, because
//! the archived event can be reprocessed offline while a redelivery
//! loop could not.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use blip_common::config::PipelineConfig;
use blip_common::metrics::{bump, PipelineCounters};
use blip_common::types::{DecodedReading, RawEvent};
use blip_common::{Error, Result};

use crate::decoders::{DecodeError, Decoder, DecoderRegistry};
use crate::inventory::DeviceInventory;
use crate::repo::EventStore;
use crate::transport::Delivery;

/// Everything a worker needs, shared across the pool.
struct WorkerContext {
    registry: Arc<DecoderRegistry>,
    store: Arc<dyn EventStore>,
    inventory: DeviceInventory,
    counters: Arc<PipelineCounters>,
    decode_timeout: Duration,
}

/// Fixed-size worker pool over the event processing stages.
pub struct ProcessingPipeline {
    senders: Vec<mpsc::Sender<Delivery>>,
    workers: Vec<JoinHandle<()>>,
}

impl ProcessingPipeline {
    /// Spawn the worker pool. The registry and store are fixed for the
    /// pipeline's lifetime.
    pub fn new(
        registry: Arc<DecoderRegistry>,
        store: Arc<dyn EventStore>,
        counters: Arc<PipelineCounters>,
        config: &PipelineConfig,
    ) -> Self {
        let context = Arc::new(WorkerContext {
            registry,
            inventory: DeviceInventory::new(Arc::clone(&store)),
            store,
            counters,
            decode_timeout: config.decode_timeout(),
        });

        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_depth);
            senders.push(tx);
            let context = Arc::clone(&context);
            workers.push(tokio::spawn(worker_loop(worker_id, rx, context)));
        }

        info!(
            workers = config.workers,
            queue_depth = config.queue_depth,
            "processing pipeline started"
        );

        Self { senders, workers }
    }

    /// Hand one delivery to its address's worker. Waits when that
    /// worker's queue is full.
    pub async fn dispatch(&self, delivery: Delivery) -> Result<()> {
        let index = worker_index(&delivery.event.address, self.senders.len());
        self.senders[index]
            .send(delivery)
            .await
            .map_err(|_| Error::Internal("pipeline worker gone".to_string()))
    }

    /// Stop accepting deliveries, let the workers drain their queues,
    /// and wait for them to exit.
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("pipeline worker panicked: {}", e);
            }
        }
        info!("processing pipeline stopped");
    }
}

/// Stable address-to-worker routing.
fn worker_index(address: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    address.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<Delivery>,
    context: Arc<WorkerContext>,
) {
    debug!(worker_id, "pipeline worker started");
    while let Some(delivery) = rx.recv().await {
        process_delivery(&context, delivery).await;
    }
    debug!(worker_id, "pipeline worker stopped");
}

async fn process_delivery(context: &WorkerContext, delivery: Delivery) {
    let Delivery { event, handle } = delivery;

    // Archive first. Nothing else may happen to an event that is not
    // safely on disk; a failure here requeues so the bus redelivers.
    match context.store.insert_raw(&event).await {
        Ok(true) => bump(&context.counters.archived),
        Ok(false) => {
            debug!(event_id = %event.id, "redelivered event already archived");
            bump(&context.counters.archived);
        }
        Err(e) => {
            error!(event_id = %event.id, "failed to archive event: {}", e);
            bump(&context.counters.archive_failed);
            handle.requeue().await;
            return;
        }
    }

    let reading = match context.registry.classify(&event) {
        Some(decoder) => decode_bounded(context, decoder, &event).await,
        None => {
            bump(&context.counters.no_decoder);
            None
        }
    };

    if let Some(reading) = &reading {
        match context.store.insert_reading(reading).await {
            Ok(()) => bump(&context.counters.readings_stored),
            Err(e) => {
                error!(event_id = %event.id, "failed to store reading: {}", e);
                bump(&context.counters.reading_store_failed);
            }
        }
    }

    // The inventory moves on every event, decoded or not. Classification
    // and name only carry through when a reading was produced.
    let device_type = reading.as_ref().map(|r| r.device_type);
    let name = reading.as_ref().and_then(|_| event.name.clone());
    match context
        .inventory
        .record_observation(&event.address, event.detected_at, device_type, name)
        .await
    {
        Ok(_) => bump(&context.counters.device_upserts),
        Err(e) => {
            error!(address = %event.address, "failed to upsert device: {}", e);
            bump(&context.counters.upsert_failed);
        }
    }

    handle.ack().await;
}

/// Run one decode on the blocking pool under a timeout.
///
/// Decoders are pure functions, but a malformed payload hitting a buggy
/// decoder must not be able to stall the worker.
async fn decode_bounded(
    context: &WorkerContext,
    decoder: Arc<dyn Decoder>,
    event: &RawEvent,
) -> Option<DecodedReading> {
    let decoder_name = decoder.name();
    let event_clone = event.clone();
    let result = tokio::time::timeout(
        context.decode_timeout,
        tokio::task::spawn_blocking(move || decoder.decode(&event_clone)),
    )
    .await;

    let decode_result = match result {
        Ok(Ok(decode_result)) => decode_result,
        Ok(Err(join_error)) => {
            error!(decoder = decoder_name, "decode task failed: {}", join_error);
            bump(&context.counters.decode_failed);
            return None;
        }
        Err(_) => Err(DecodeError::Timeout),
    };

    match decode_result {
        Ok(reading) => {
            bump(&context.counters.decoded);
            Some(reading)
        }
        Err(e) => {
            warn!(
                decoder = decoder_name,
                event_id = %event.id,
                address = %event.address,
                "decode failed: {}", e
            );
            bump(&context.counters.decode_failed);
            None
        }
    }
}
