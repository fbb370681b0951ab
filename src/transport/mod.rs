//! In-process partitioned transport
//!
//! Stands in for the message broker: messages are routed to one of N
//! ordered partitions by an FNV hash of the metric name, so every event for
//! a name is delivered in publish order by a single worker. Delivery is
//! at-least-once: a worker redelivers until the consumer acknowledges.
//!
//! ```text
//! publish(key, payload)
//!     │ fnv(key) % N
//!     ▼
//! ┌─────────────┐  ┌─────────────┐       ┌─────────────┐
//! │ partition 0 │  │ partition 1 │  ...  │ partition N │   unbounded mpsc
//! └──────┬──────┘  └──────┬──────┘       └──────┬──────┘
//!        ▼                ▼                     ▼
//!    worker 0         worker 1              worker N      ack | redeliver | dead-letter
//! ```

pub mod codec;
pub mod worker;

pub use worker::{spawn_workers, DeadLetter, PoolReport, WorkerConfig, WorkerPool, WorkerReport};

use crate::buggify::faults::transport as faults;
use crate::buggify::FaultConfig;
use crate::io::SimulatedRng;
use crate::metrics::MetricEvent;
use fnv::FnvHasher;
use parking_lot::Mutex;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub enum TransportError {
    /// The partition's consumer is gone
    Closed,
    Encode(serde_json::Error),
    Decode(serde_json::Error),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Encode(e) => write!(f, "Failed to encode metric event: {}", e),
            TransportError::Decode(e) => write!(f, "Failed to decode metric event: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Closed => None,
            TransportError::Encode(e) | TransportError::Decode(e) => Some(e),
        }
    }
}

/// One message as seen by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub partition: usize,
    pub offset: u64,
    pub payload: Vec<u8>,
    /// Deliveries made so far, including the current one
    pub attempt: u32,
}

/// Receiving end of one partition
#[derive(Debug)]
pub struct PartitionReceiver {
    pub partition: usize,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl PartitionReceiver {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

#[inline]
pub fn partition_for(key: &str, partitions: usize) -> usize {
    debug_assert!(partitions > 0, "at least one partition required");
    let mut hasher = FnvHasher::default();
    hasher.write(key.as_bytes());
    (hasher.finish() % partitions.max(1) as u64) as usize
}

struct DuplicateInjector {
    rng: SimulatedRng,
    faults: FaultConfig,
}

/// Publishing side of the transport
pub struct PartitionedTransport {
    senders: Vec<mpsc::UnboundedSender<Delivery>>,
    offsets: Vec<AtomicU64>,
    duplicates: Option<Mutex<DuplicateInjector>>,
}

impl PartitionedTransport {
    pub fn new(partitions: usize) -> (Self, Vec<PartitionReceiver>) {
        let partitions = partitions.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions)
            .map(|partition| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, PartitionReceiver { partition, rx })
            })
            .unzip();

        let transport = PartitionedTransport {
            senders,
            offsets: (0..partitions).map(|_| AtomicU64::new(0)).collect(),
            duplicates: None,
        };
        (transport, receivers)
    }

    /// Duplicate published messages according to `faults`
    pub fn with_duplicates(mut self, seed: u64, faults: FaultConfig) -> Self {
        self.duplicates = Some(Mutex::new(DuplicateInjector {
            rng: SimulatedRng::new(seed),
            faults,
        }));
        self
    }

    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    /// Messages published to `partition` so far
    pub fn published(&self, partition: usize) -> u64 {
        self.offsets
            .get(partition)
            .map_or(0, |o| o.load(Ordering::Acquire))
    }

    pub fn publish(&self, key: &str, payload: Vec<u8>) -> Result<u64, TransportError> {
        let partition = partition_for(key, self.senders.len());
        let offset = self.enqueue(partition, payload.clone())?;

        let duplicate = self.duplicates.as_ref().is_some_and(|d| {
            let mut d = d.lock();
            let DuplicateInjector { rng, faults: config } = &mut *d;
            crate::buggify!(rng, faults::DUPLICATE_DELIVERY, config = config)
        });
        if duplicate {
            debug!(partition, offset, "Duplicating delivery of {}", key);
            self.enqueue(partition, payload)?;
        }
        Ok(offset)
    }

    pub fn publish_event(&self, event: &MetricEvent) -> Result<u64, TransportError> {
        self.publish(&event.name, codec::encode(event)?)
    }

    /// Publish a raw payload, routed by its `metricName` when it has one
    pub fn publish_raw(&self, payload: Vec<u8>) -> Result<u64, TransportError> {
        let key = codec::routing_key(&payload).unwrap_or_default();
        self.publish(&key, payload)
    }

    /// Stop accepting messages; workers drain what is queued and exit
    pub fn close(self) {
        drop(self.senders);
    }

    fn enqueue(&self, partition: usize, payload: Vec<u8>) -> Result<u64, TransportError> {
        let offset = self.offsets[partition].fetch_add(1, Ordering::AcqRel);
        self.senders[partition]
            .send(Delivery {
                partition,
                offset,
                payload,
                attempt: 0,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(offset)
    }
}
