//! Batch coordinator
//!
//! Consumes [`SourceEvent`]s, buffers valid rows per worksheet and hands full
//! buffers to a [`BatchProcessor`] on spawned tasks. Each worksheet moves
//! through `Accumulating → Flushing → Accumulating → … → Draining → Done`.
//!
//! Backpressure comes from two places: the bounded event channel, and a
//! semaphore that caps in-flight flushes. When every permit is taken the
//! coordinator stops receiving until a flush completes, which in turn blocks
//! the reader once the channel fills up.
//!
//! A finished worksheet drains on its own task so a slow transaction in one
//! sheet does not hold up reading the next. The processor is shut down once,
//! after every worksheet has drained.

use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::models::{Batch, CellValue, SaleRow};
use crate::parser::SheetHeader;
use crate::stats::{RunStats, RunSummary};
use crate::storage::BatchProcessor;
use crate::DEFAULT_MAX_IN_FLIGHT;

/// What a source reader pushes to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    SheetStarted { sheet: Arc<str> },
    /// Row 1 of the current worksheet; empty when that row is blank
    Header { cells: Vec<CellValue> },
    /// A data row; `row_number` is the 1-based worksheet row
    Row { row_number: u32, cells: Vec<CellValue> },
    SheetFinished,
    /// No more worksheets. Closing the channel means the same thing.
    SourceFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Rows per batch transaction
    pub batch_size: usize,
    /// Batches allowed in flight across all worksheets
    pub max_in_flight: usize,
}

impl CoordinatorConfig {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetPhase {
    Accumulating,
    Flushing,
    Draining,
    Done,
}

/// Everything a flush task needs.
struct FlushContext<P> {
    processor: Arc<P>,
    stats: Arc<RunStats>,
    permits: Arc<Semaphore>,
    batch_size: usize,
}

struct WorksheetState {
    name: Arc<str>,
    phase: SheetPhase,
    header: Option<SheetHeader>,
    skipped: bool,
    buffer: Vec<SaleRow>,
    batches: u64,
    flushes: JoinSet<()>,
}

impl WorksheetState {
    fn new(name: Arc<str>, batch_size: usize) -> Self {
        Self {
            name,
            phase: SheetPhase::Accumulating,
            header: None,
            skipped: false,
            buffer: Vec::with_capacity(batch_size),
            batches: 0,
            flushes: JoinSet::new(),
        }
    }

    fn enter(&mut self, phase: SheetPhase) {
        trace!(sheet = %self.name, from = ?self.phase, to = ?phase, "Worksheet phase");
        self.phase = phase;
    }
}

pub struct BatchCoordinator<P> {
    ctx: FlushContext<P>,
    current: Option<WorksheetState>,
    /// One drain task per finished worksheet
    sheets: JoinSet<()>,
}

impl<P: BatchProcessor> BatchCoordinator<P> {
    pub fn new(processor: Arc<P>, config: CoordinatorConfig) -> Self {
        Self {
            ctx: FlushContext {
                processor,
                stats: Arc::new(RunStats::new()),
                permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
                batch_size: config.batch_size.max(1),
            },
            current: None,
            sheets: JoinSet::new(),
        }
    }

    /// Consume events until the source finishes or `cancel` fires, then drain
    /// every worksheet and shut the processor down.
    ///
    /// On cancellation, rows already received are still flushed.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SourceEvent>,
        cancel: CancellationToken,
    ) -> RunSummary {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Cancellation requested; draining in-flight batches");
                    self.ctx.stats.mark_interrupted();
                    break;
                }
                event = events.recv() => event,
            };

            match event {
                Some(SourceEvent::SourceFinished) | None => break,
                Some(event) => self.handle(event).await,
            }
        }

        // Unblocks a reader waiting on a full channel.
        drop(events);
        self.finish().await
    }

    async fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::SheetStarted { sheet } => {
                self.finish_sheet().await;
                self.ctx.stats.sheet_started();
                info!(sheet = %sheet, "Reading worksheet");
                self.current = Some(WorksheetState::new(sheet, self.ctx.batch_size));
            }
            SourceEvent::Header { cells } => self.accept_header(&cells),
            SourceEvent::Row { row_number, cells } => self.accept_row(row_number, cells).await,
            SourceEvent::SheetFinished => self.finish_sheet().await,
            SourceEvent::SourceFinished => {}
        }
    }

    fn accept_header(&mut self, cells: &[CellValue]) {
        let Some(sheet) = self.current.as_mut() else {
            warn!("Header received outside a worksheet; ignoring");
            return;
        };

        let header = SheetHeader::resolve(cells);
        if header.is_ingestible() {
            debug!(sheet = %sheet.name, columns = ?header.names(), "Resolved header");
        } else {
            let missing: Vec<&str> = header.missing().iter().map(|c| c.canonical_name()).collect();
            warn!(
                sheet = %sheet.name,
                missing = ?missing,
                "Skipping worksheet without required columns"
            );
            sheet.skipped = true;
            self.ctx.stats.sheet_skipped();
        }
        sheet.header = Some(header);
    }

    async fn accept_row(&mut self, row_number: u32, cells: Vec<CellValue>) {
        let stats = &self.ctx.stats;
        stats.row_read();

        let Some(sheet) = self.current.as_mut() else {
            stats.row_ignored();
            return;
        };
        let header = match &sheet.header {
            Some(header) if !sheet.skipped => header,
            _ => {
                stats.row_ignored();
                return;
            }
        };

        match header.extract(cells).validate(row_number) {
            Ok(row) => sheet.buffer.push(row),
            Err(reason) => {
                stats.row_rejected();
                warn!(sheet = %sheet.name, row = row_number, %reason, "Dropping invalid row");
                return;
            }
        }

        if sheet.buffer.len() >= self.ctx.batch_size {
            Self::flush(&self.ctx, sheet).await;
        }
    }

    /// Hand the current buffer to a flush task. Waits for a permit when the
    /// in-flight limit is reached.
    async fn flush(ctx: &FlushContext<P>, sheet: &mut WorksheetState) {
        if sheet.buffer.is_empty() {
            return;
        }

        let resume = sheet.phase;
        sheet.enter(SheetPhase::Flushing);

        let rows = std::mem::replace(&mut sheet.buffer, Vec::with_capacity(ctx.batch_size));
        sheet.batches += 1;
        let batch = Batch {
            sheet: Arc::clone(&sheet.name),
            ordinal: sheet.batches,
            rows,
        };

        match Arc::clone(&ctx.permits).acquire_owned().await {
            Ok(permit) => {
                let processor = Arc::clone(&ctx.processor);
                let stats = Arc::clone(&ctx.stats);
                sheet
                    .flushes
                    .spawn(process_batch(processor, stats, batch, permit));
            }
            Err(e) => {
                error!(sheet = %batch.sheet, batch = batch.ordinal, error = %e, "Flush permits closed");
                ctx.stats.batch_failed(batch.len());
            }
        }

        sheet.enter(resume);
    }

    /// Flush the remainder of the current worksheet exactly once and move its
    /// pending flushes onto a drain task.
    async fn finish_sheet(&mut self) {
        let Some(mut sheet) = self.current.take() else {
            return;
        };

        sheet.enter(SheetPhase::Draining);
        Self::flush(&self.ctx, &mut sheet).await;

        self.sheets.spawn(async move {
            while let Some(joined) = sheet.flushes.join_next().await {
                if let Err(e) = joined {
                    error!(sheet = %sheet.name, error = %e, "Flush task aborted");
                }
            }
            sheet.enter(SheetPhase::Done);
            info!(sheet = %sheet.name, batches = sheet.batches, skipped = sheet.skipped, "Worksheet done");
        });
    }

    async fn finish(mut self) -> RunSummary {
        self.finish_sheet().await;

        while let Some(joined) = self.sheets.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worksheet drain task aborted");
            }
        }

        self.ctx.processor.shutdown().await;
        self.ctx.stats.summary()
    }
}

async fn process_batch<P: BatchProcessor>(
    processor: Arc<P>,
    stats: Arc<RunStats>,
    batch: Batch,
    _permit: OwnedSemaphorePermit,
) {
    let (first_row, last_row) = batch.source_rows().unwrap_or_default();

    match processor.process(&batch).await {
        Ok(report) => {
            debug!(
                sheet = %batch.sheet,
                batch = batch.ordinal,
                rows = report.rows,
                inserted = report.inserted,
                existing = report.existing,
                unresolved = report.unresolved,
                "Batch committed"
            );
            stats.batch_committed(&report);
        }
        Err(e) => {
            error!(
                sheet = %batch.sheet,
                batch = batch.ordinal,
                size = batch.len(),
                first_row,
                last_row,
                error = %e,
                "Batch rolled back; its rows were not loaded"
            );
            stats.batch_failed(batch.len());
        }
    }
}
