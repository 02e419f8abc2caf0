//! Stream source adapter
//!
//! Turns a local file or a fetched URL into a push sequence of
//! [`SourceEvent`]s on a bounded channel. Readers run on a blocking thread and
//! block on a full channel, which is what pauses parsing while the
//! coordinator is busy.
//!
//! - [`workbook`]: xlsx/xlsm (streamed cell by cell), xls, xlsb, ods
//! - [`delimited`]: csv, as a single worksheet named after the file
//! - [`remote`]: HTTP fetch

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::SourceEvent;
use crate::models::CellValue;
use crate::{EtlError, Result};

pub mod delimited;
pub mod remote;
pub mod workbook;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    /// Office Open XML workbook (`.xlsx`, `.xlsm`)
    Xlsx,
    /// Legacy binary workbook
    Xls,
    /// Binary Office Open XML workbook
    Xlsb,
    /// OpenDocument spreadsheet
    Ods,
    Csv,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            "xls" => Some(Self::Xls),
            "xlsb" => Some(Self::Xlsb),
            "ods" => Some(Self::Ods),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Xls => "xls",
            Self::Xlsb => "xlsb",
            Self::Ods => "ods",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for SourceFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s.trim().trim_start_matches('.'))
            .ok_or_else(|| EtlError::config(format!("Unsupported source format: {}", s)))
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the spreadsheet comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    Url(String),
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// A source location plus an optional explicit format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub location: SourceLocation,
    /// Overrides the format inferred from the file or URL extension
    pub format: Option<SourceFormat>,
}

impl SourceSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: SourceLocation::File(path.into()),
            format: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            location: SourceLocation::Url(url.into()),
            format: None,
        }
    }

    pub fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = Some(format);
        self
    }
}

#[derive(Debug)]
pub enum SourceData {
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A source that is known to be readable, ready to hand to a reader thread.
#[derive(Debug)]
pub struct OpenedSource {
    pub data: SourceData,
    pub format: SourceFormat,
    /// File stem; names the single worksheet of a csv source
    pub name: String,
}

/// Check that the source is reachable and determine its format.
///
/// Remote sources are downloaded here, so every source-level failure
/// surfaces before ingestion starts.
pub async fn open(spec: &SourceSpec, http_timeout: Duration) -> Result<OpenedSource> {
    match &spec.location {
        SourceLocation::File(path) => {
            let metadata = tokio::fs::metadata(path).await.map_err(|e| {
                EtlError::Source(format!("Cannot read {}: {}", path.display(), e))
            })?;
            if !metadata.is_file() {
                return Err(EtlError::Source(format!("{} is not a file", path.display())));
            }

            let format = spec
                .format
                .or_else(|| SourceFormat::from_path(path))
                .ok_or_else(|| {
                    EtlError::Source(format!(
                        "Cannot infer spreadsheet format of {}; set ETL_SOURCE_FORMAT",
                        path.display()
                    ))
                })?;

            info!(path = %path.display(), %format, bytes = metadata.len(), "Opened source file");

            Ok(OpenedSource {
                data: SourceData::File(path.clone()),
                format,
                name: file_stem(path),
            })
        }
        SourceLocation::Url(url) => {
            let format = spec
                .format
                .or_else(|| remote::format_from_url(url))
                .ok_or_else(|| {
                    EtlError::Source(format!(
                        "Cannot infer spreadsheet format of {}; set ETL_SOURCE_FORMAT",
                        url
                    ))
                })?;

            let bytes = remote::fetch(url, http_timeout).await?;

            Ok(OpenedSource {
                data: SourceData::Bytes(bytes),
                format,
                name: remote::name_from_url(url),
            })
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Sheet1".to_string())
}

/// Read the whole source on a blocking thread, pushing events into `tx`.
///
/// The reader stops early when `cancel` fires or the receiver goes away.
pub fn spawn_reader(
    source: OpenedSource,
    tx: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        let mut sink = RowSink::new(tx, cancel);
        let result = read_source(source, &mut sink);
        debug!(rows = sink.rows_sent(), "Source reader finished");
        sink.finish();
        result
    })
}

/// Dispatch on format. Blocking.
pub fn read_source(source: OpenedSource, sink: &mut RowSink) -> Result<()> {
    let OpenedSource { data, format, name } = source;
    match data {
        SourceData::File(path) => {
            let reader = BufReader::new(File::open(&path)?);
            match format {
                SourceFormat::Csv => delimited::read_csv(reader, &name, sink),
                other => workbook::read_workbook(reader, other, sink),
            }
        }
        SourceData::Bytes(bytes) => {
            let reader = Cursor::new(bytes);
            match format {
                SourceFormat::Csv => delimited::read_csv(reader, &name, sink),
                other => workbook::read_workbook(reader, other, sink),
            }
        }
    }
}

/// Producer side of the event channel.
///
/// Classifies row 1 of each worksheet as its header, by position only, and
/// drops fully empty data rows. A worksheet whose row 1 is blank or missing
/// gets an empty header, so it is skipped rather than guessed at. Every method returns `false` once the consumer is
/// gone or the run was cancelled; readers stop at that point.
#[derive(Debug)]
pub struct RowSink {
    tx: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
    header_pending: bool,
    stopped: bool,
    rows_sent: u64,
}

impl RowSink {
    pub fn new(tx: mpsc::Sender<SourceEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            header_pending: false,
            stopped: false,
            rows_sent: 0,
        }
    }

    pub fn start_sheet(&mut self, name: &str) -> bool {
        self.header_pending = true;
        self.send(SourceEvent::SheetStarted {
            sheet: Arc::from(name),
        })
    }

    /// `row_number` is the 1-based worksheet row.
    pub fn row(&mut self, row_number: u32, cells: Vec<CellValue>) -> bool {
        if std::mem::take(&mut self.header_pending) {
            if row_number == 1 {
                return self.send(SourceEvent::Header { cells });
            }
            // Readers do not report blank rows, so row 1 was empty.
            if !self.send(SourceEvent::Header { cells: Vec::new() }) {
                return false;
            }
        }

        if cells.iter().all(CellValue::is_empty) {
            return self.accepting();
        }

        self.rows_sent += 1;
        self.send(SourceEvent::Row { row_number, cells })
    }

    pub fn finish_sheet(&mut self) -> bool {
        self.header_pending = false;
        self.send(SourceEvent::SheetFinished)
    }

    pub fn rows_sent(&self) -> u64 {
        self.rows_sent
    }

    fn finish(mut self) {
        self.send(SourceEvent::SourceFinished);
    }

    fn accepting(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.stopped = true;
        }
        !self.stopped
    }

    fn send(&mut self, event: SourceEvent) -> bool {
        if !self.accepting() {
            return false;
        }
        if self.tx.blocking_send(event).is_err() {
            debug!("Event receiver dropped; stopping source reader");
            self.stopped = true;
        }
        !self.stopped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    /// Collect everything a reader pushed into a sink.
    pub(crate) fn drain(rx: &mut mpsc::Receiver<SourceEvent>) -> Vec<SourceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("sales.XLSX")), Some(SourceFormat::Xlsx));
        assert_eq!(SourceFormat::from_path(Path::new("a/b/sales.xlsm")), Some(SourceFormat::Xlsx));
        assert_eq!(SourceFormat::from_path(Path::new("sales.ods")), Some(SourceFormat::Ods));
        assert_eq!(SourceFormat::from_path(Path::new("sales")), None);
        assert_eq!(".csv".parse::<SourceFormat>().unwrap(), SourceFormat::Csv);
        assert!("parquet".parse::<SourceFormat>().is_err());
    }

    #[test]
    fn test_sink_classifies_row_one_as_header() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, CancellationToken::new());

        assert!(sink.start_sheet("Orders"));
        assert!(sink.row(1, vec!["Order ID".into()]));
        assert!(sink.row(2, vec![CellValue::Empty, "".into()]));
        assert!(sink.row(3, vec!["O1".into()]));
        assert!(sink.finish_sheet());
        assert_eq!(sink.rows_sent(), 1);
        sink.finish();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert!(matches!(&events[0], SourceEvent::SheetStarted { sheet } if &**sheet == "Orders"));
        assert!(matches!(&events[1], SourceEvent::Header { cells } if cells.len() == 1));
        assert!(matches!(&events[2], SourceEvent::Row { row_number: 3, .. }));
        assert!(matches!(events[3], SourceEvent::SheetFinished));
        assert!(matches!(events[4], SourceEvent::SourceFinished));
    }

    #[test]
    fn test_sink_blank_row_one_yields_empty_header() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, CancellationToken::new());

        assert!(sink.start_sheet("Orders"));
        assert!(sink.row(1, vec![CellValue::Empty]));
        assert!(sink.row(2, vec!["Order ID".into(), "Order Date".into()]));
        assert!(sink.row(3, vec!["O1".into(), "2021-01-05".into()]));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[1], SourceEvent::Header { cells } if cells.iter().all(CellValue::is_empty)));
        assert!(matches!(&events[2], SourceEvent::Row { row_number: 2, .. }));
        assert!(matches!(&events[3], SourceEvent::Row { row_number: 3, .. }));
    }

    #[test]
    fn test_sink_missing_row_one_yields_empty_header() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, CancellationToken::new());

        // Streaming readers skip absent rows entirely.
        assert!(sink.start_sheet("Orders"));
        assert!(sink.row(2, vec!["Order ID".into()]));

        let events = drain(&mut rx);
        assert!(matches!(&events[1], SourceEvent::Header { cells } if cells.is_empty()));
        assert!(matches!(&events[2], SourceEvent::Row { row_number: 2, .. }));
    }

    #[test]
    fn test_sink_stops_when_cancelled_or_receiver_dropped() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, cancel.clone());
        assert!(sink.start_sheet("Orders"));
        cancel.cancel();
        assert!(!sink.row(2, vec!["O1".into()]));

        let (tx, rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, CancellationToken::new());
        drop(rx);
        assert!(!sink.start_sheet("Orders"));
        assert!(!sink.row(2, vec!["O1".into()]));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_a_source_error() {
        let spec = SourceSpec::file("/definitely/not/here.xlsx");
        let err = open(&spec, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, EtlError::Source(_)));
    }

    #[tokio::test]
    async fn test_open_requires_known_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.dat");
        std::fs::write(&path, "Order ID\n").unwrap();

        let err = open(&SourceSpec::file(&path), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Source(_)));

        let opened = open(
            &SourceSpec::file(&path).with_format(SourceFormat::Csv),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(opened.format, SourceFormat::Csv);
        assert_eq!(opened.name, "sales");
    }
}
