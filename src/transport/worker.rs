//! Per-partition consumer workers
//!
//! One tokio task per partition. Each delivery is handled on the blocking
//! pool (store calls are synchronous); a no-ack holds the partition and
//! redelivers the same message after `redelivery_delay`, so later messages
//! for the same key never overtake it. After `max_redeliveries` the message
//! is moved to the dead-letter list and the partition moves on.

use super::{Delivery, PartitionReceiver};
use crate::metrics::{AckDecision, ConsumerAdapter};
use crate::store::MetricStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub redelivery_delay: Duration,
    /// Redeliveries after the first attempt before dead-lettering
    pub max_redeliveries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            redelivery_delay: Duration::from_millis(500),
            max_redeliveries: 10,
        }
    }
}

/// A message that was never acknowledged
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub last_error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub partition: usize,
    pub delivered: u64,
    pub acknowledged: u64,
    pub redeliveries: u64,
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
pub struct PoolReport {
    pub workers: Vec<WorkerReport>,
    pub dead_letters: Vec<DeadLetter>,
}

impl PoolReport {
    pub fn acknowledged(&self) -> u64 {
        self.workers.iter().map(|w| w.acknowledged).sum()
    }

    pub fn redeliveries(&self) -> u64 {
        self.workers.iter().map(|w| w.redeliveries).sum()
    }
}

/// Running workers, one per partition
pub struct WorkerPool {
    handles: Vec<JoinHandle<WorkerReport>>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl WorkerPool {
    /// Dead letters recorded so far
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Wait for every worker to drain its partition
    pub async fn join(self) -> PoolReport {
        let mut workers: Vec<WorkerReport> = futures::future::join_all(self.handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("Consumer worker failed: {}", e);
                    None
                }
            })
            .collect();
        workers.sort_by_key(|w| w.partition);

        let dead_letters = std::mem::take(&mut *self.dead_letters.lock());
        PoolReport {
            workers,
            dead_letters,
        }
    }
}

/// Spawn one worker per partition receiver. Must be called inside a tokio runtime.
pub fn spawn_workers<S: MetricStore>(
    receivers: Vec<PartitionReceiver>,
    consumer: ConsumerAdapter<S>,
    config: WorkerConfig,
) -> WorkerPool {
    let dead_letters = Arc::new(Mutex::new(Vec::new()));
    let handles = receivers
        .into_iter()
        .map(|rx| {
            let worker = PartitionWorker {
                rx,
                consumer: consumer.clone(),
                config,
                dead_letters: dead_letters.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect();

    WorkerPool {
        handles,
        dead_letters,
    }
}

struct PartitionWorker<S: MetricStore> {
    rx: PartitionReceiver,
    consumer: ConsumerAdapter<S>,
    config: WorkerConfig,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl<S: MetricStore> PartitionWorker<S> {
    async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport {
            partition: self.rx.partition,
            ..Default::default()
        };
        debug!(partition = report.partition, "Consumer worker started");

        while let Some(mut delivery) = self.rx.recv().await {
            loop {
                delivery.attempt += 1;
                report.delivered += 1;

                let error = match Self::handle(self.consumer.clone(), &delivery).await {
                    Ok(()) => {
                        report.acknowledged += 1;
                        break;
                    }
                    Err(error) => error,
                };

                if delivery.attempt > self.config.max_redeliveries {
                    error!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Dead-lettering after {} deliveries: {}",
                        delivery.attempt,
                        error
                    );
                    report.dead_lettered += 1;
                    self.dead_letters.lock().push(DeadLetter {
                        delivery,
                        last_error: error,
                    });
                    break;
                }

                warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    attempt = delivery.attempt,
                    "Delivery not acknowledged, redelivering: {}",
                    error
                );
                report.redeliveries += 1;
                tokio::time::sleep(self.config.redelivery_delay).await;
            }
        }

        info!(
            "Partition {} drained: {} acknowledged, {} redeliveries, {} dead-lettered",
            report.partition, report.acknowledged, report.redeliveries, report.dead_lettered
        );
        report
    }

    async fn handle(consumer: ConsumerAdapter<S>, delivery: &Delivery) -> Result<(), String> {
        let payload = delivery.payload.clone();
        let decision = tokio::task::spawn_blocking(move || consumer.handle_payload(&payload))
            .await
            .map_err(|e| format!("consumer task failed: {}", e))?;

        match decision {
            AckDecision::Acknowledge => Ok(()),
            AckDecision::DoNotAcknowledge(e) => Err(e.to_string()),
        }
    }
}
