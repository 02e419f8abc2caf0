//! One ETL run: open the source, connect, stream, drain, close.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EtlConfig;
use crate::coordinator::{BatchCoordinator, CoordinatorConfig};
use crate::db::Database;
use crate::source::{self, OpenedSource};
use crate::stats::RunSummary;
use crate::storage::{BatchProcessor, PgBatchProcessor};
use crate::Result;

/// Run the pipeline against Postgres.
///
/// The source is opened (and downloaded, for URLs) before the pool is
/// created, so an unreadable source never touches the database.
pub async fn run(config: &EtlConfig, cancel: CancellationToken) -> Result<RunSummary> {
    let source = source::open(&config.source, config.http_timeout).await?;

    let db = Arc::new(Database::connect(&config.database).await?);
    if config.run_migrations {
        if let Err(e) = db.migrate().await {
            db.close().await;
            return Err(e);
        }
    }

    let processor = Arc::new(PgBatchProcessor::new(
        Arc::clone(&db),
        config.batch.chunk_size,
    ));

    let result = run_with_processor(
        source,
        processor,
        config.batch.coordinator(),
        config.batch.queue_capacity,
        cancel,
    )
    .await;

    // The coordinator already closed the pool; this only matters if it never ran.
    db.close().await;
    result
}

/// Stream an opened source through a coordinator driving `processor`.
pub async fn run_with_processor<P: BatchProcessor>(
    source: OpenedSource,
    processor: Arc<P>,
    coordinator: CoordinatorConfig,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    info!(
        format = %source.format,
        name = %source.name,
        batch_size = coordinator.batch_size,
        max_in_flight = coordinator.max_in_flight,
        "Starting ingestion"
    );

    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let reader = source::spawn_reader(source, tx, cancel.clone());

    let summary = BatchCoordinator::new(processor, coordinator)
        .run(rx, cancel)
        .await;

    // Reader failures surface only after in-flight batches have settled.
    match reader.await? {
        Ok(()) => {}
        Err(e) => {
            error!(error = %e, "Source stream failed");
            return Err(e);
        }
    }

    if summary.interrupted {
        warn!(?summary, "Ingestion interrupted");
    } else {
        info!(
            rows_read = summary.rows_read,
            rows_inserted = summary.rows_inserted,
            batches_committed = summary.batches_committed,
            batches_failed = summary.batches_failed,
            "Ingestion finished"
        );
    }

    Ok(summary)
}
