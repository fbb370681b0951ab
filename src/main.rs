//! Metric Aggregator
//!
//! Reads newline-delimited JSON metric events on stdin, routes them through
//! the partitioned transport to one consumer worker per partition, and logs
//! the final store inventory at EOF. Logs go to stderr.
//!
//! Configuration: see `metric_aggregator::config` (METRIC_AGG_* variables).

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use metric_aggregator::config::{AggregatorConfig, StoreBackend};
use metric_aggregator::metrics::{log_inventory, Aggregator, ConsumerAdapter};
use metric_aggregator::observability::init_tracing;
use metric_aggregator::store::{InMemoryMetricStore, JournalMetricStore, MetricStore};
use metric_aggregator::transport::{spawn_workers, PartitionedTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AggregatorConfig::load()?;
    init_tracing(&config.logging)?;

    info!(
        backend = ?config.store.backend,
        partitions = config.consumer.partitions,
        strategy = ?config.aggregator.increment_strategy,
        "Metric aggregator starting"
    );

    match config.store.backend {
        StoreBackend::Memory => run(InMemoryMetricStore::new(), &config).await,
        StoreBackend::Journal => {
            let store =
                JournalMetricStore::open(&config.store.journal_path, config.store.sync_every_write)?;
            let report = store.replay_report();
            info!(
                path = %config.store.journal_path.display(),
                frames = report.frames_applied,
                records = report.records,
                truncated_bytes = report.truncated_bytes,
                "Journal replayed"
            );
            run(store, &config).await
        }
    }
}

async fn run<S: MetricStore>(
    store: S,
    config: &AggregatorConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let aggregator = Arc::new(Aggregator::with_strategy(store, config.aggregator.strategy()));

    let warmed = aggregator.load_all()?;
    info!("Cache warmed with {} counters", warmed);
    log_inventory(aggregator.store(), "Startup")?;

    let consumer = ConsumerAdapter::new(aggregator.clone());
    let (transport, receivers) = PartitionedTransport::new(config.consumer.partitions);
    let pool = spawn_workers(receivers, consumer.clone(), config.consumer.worker_config());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut published = 0u64;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match transport.publish_raw(line.as_bytes().to_vec()) {
            Ok(_) => published += 1,
            Err(e) => {
                error!("Failed to publish event: {}", e);
                break;
            }
        }
    }
    info!("Input closed after {} events, draining partitions", published);
    transport.close();

    let report = pool.join().await;
    for dead in &report.dead_letters {
        warn!(
            partition = dead.delivery.partition,
            offset = dead.delivery.offset,
            attempts = dead.delivery.attempt,
            "Dead letter: {}",
            dead.last_error
        );
    }

    let stats = consumer.stats();
    info!(
        received = stats.received,
        applied = stats.applied,
        skipped = stats.skipped,
        rejected = stats.rejected,
        undecodable = stats.undecodable,
        race_retries = stats.race_retries,
        redeliveries = report.redeliveries(),
        dead_letters = report.dead_letters.len(),
        "Consumer finished"
    );

    log_inventory(aggregator.store(), "Final")?;
    Ok(())
}
