//! CSV reader

use std::io::Read;
use tracing::debug;

use super::RowSink;
use crate::models::CellValue;
use crate::Result;

/// Read a csv stream as one worksheet called `sheet`.
///
/// Records may have differing lengths; empty fields become [`CellValue::Empty`].
pub fn read_csv<R: Read>(reader: R, sheet: &str, sink: &mut RowSink) -> Result<()> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    if !sink.start_sheet(sheet) {
        return Ok(());
    }

    let mut record = csv::StringRecord::new();
    let mut line = 0u32;
    while csv.read_record(&mut record)? {
        line = record
            .position()
            .and_then(|p| u32::try_from(p.line()).ok())
            .unwrap_or(line + 1);

        let cells = record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    CellValue::Empty
                } else {
                    CellValue::Text(field.to_string())
                }
            })
            .collect();

        if !sink.row(line, cells) {
            return Ok(());
        }
    }

    debug!(sheet, lines = line, "Finished reading csv");
    sink.finish_sheet();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::coordinator::SourceEvent;
    use crate::source::tests::drain;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_read_csv_as_single_sheet() {
        let data = "Order ID,Order Date,Sales\nO1,2021-01-05,\"$1,234\"\n\nO2,2021-01-06\n";
        let (tx, mut rx) = mpsc::channel(16);
        let mut sink = RowSink::new(tx, CancellationToken::new());

        read_csv(data.as_bytes(), "sales", &mut sink).unwrap();
        let events = drain(&mut rx);

        assert!(matches!(&events[0], SourceEvent::SheetStarted { sheet } if &**sheet == "sales"));
        assert!(matches!(&events[1], SourceEvent::Header { cells } if cells.len() == 3));
        match &events[2] {
            SourceEvent::Row { row_number, cells } => {
                assert_eq!(*row_number, 2);
                assert_eq!(cells[2], CellValue::Text("$1,234".to_string()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[3] {
            SourceEvent::Row { cells, .. } => assert_eq!(cells.len(), 2),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events[4], SourceEvent::SheetFinished));
        assert_eq!(events.len(), 5);
    }
}
