//! Spreadsheet workbook readers
//!
//! xlsx/xlsm worksheets are streamed cell by cell so only the current row is
//! held in memory. xls, xlsb and ods have no streaming reader in calamine and
//! are read one worksheet range at a time.

use calamine::{Data, DataRef, Ods, Reader, Xls, Xlsb, Xlsx};
use std::io::{Read, Seek};
use tracing::debug;

use super::{RowSink, SourceFormat};
use crate::models::CellValue;
use crate::Result;

pub fn read_workbook<RS: Read + Seek>(
    reader: RS,
    format: SourceFormat,
    sink: &mut RowSink,
) -> Result<()> {
    match format {
        SourceFormat::Xlsx => read_xlsx(reader, sink),
        SourceFormat::Xls => {
            let workbook = Xls::new(reader).map_err(calamine::Error::from)?;
            read_ranges(workbook, sink)
        }
        SourceFormat::Xlsb => {
            let workbook = Xlsb::new(reader).map_err(calamine::Error::from)?;
            read_ranges(workbook, sink)
        }
        SourceFormat::Ods => {
            let workbook = Ods::new(reader).map_err(calamine::Error::from)?;
            read_ranges(workbook, sink)
        }
        SourceFormat::Csv => Err(crate::EtlError::Source(
            "csv is not a workbook format".to_string(),
        )),
    }
}

/// Stream every worksheet of an xlsx workbook.
pub fn read_xlsx<RS: Read + Seek>(reader: RS, sink: &mut RowSink) -> Result<()> {
    let mut workbook: Xlsx<RS> = Xlsx::new(reader)?;
    let sheet_names = workbook.sheet_names();

    for name in sheet_names {
        if !sink.start_sheet(&name) {
            return Ok(());
        }

        let mut cells = workbook.worksheet_cells_reader(&name)?;
        let mut current: Option<u32> = None;
        let mut row: Vec<CellValue> = Vec::new();

        while let Some(cell) = cells.next_cell()? {
            let (row_idx, col_idx) = cell.get_position();
            if current != Some(row_idx) {
                if let Some(done) = current.replace(row_idx) {
                    if !sink.row(done + 1, std::mem::take(&mut row)) {
                        return Ok(());
                    }
                }
            }

            let col = col_idx as usize;
            if row.len() <= col {
                row.resize(col + 1, CellValue::Empty);
            }
            row[col] = from_data_ref(cell.get_value());
        }

        if let Some(done) = current {
            if !sink.row(done + 1, row) {
                return Ok(());
            }
        }

        debug!(sheet = %name, "Finished streaming worksheet");
        if !sink.finish_sheet() {
            return Ok(());
        }
    }

    Ok(())
}

/// Read every worksheet as a whole range.
pub fn read_ranges<R, RS>(mut workbook: R, sink: &mut RowSink) -> Result<()>
where
    R: Reader<RS>,
    RS: Read + Seek,
    calamine::Error: From<R::Error>,
{
    let sheet_names = workbook.sheet_names();

    for name in sheet_names {
        if !sink.start_sheet(&name) {
            return Ok(());
        }

        let range = workbook
            .worksheet_range(&name)
            .map_err(calamine::Error::from)?;
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);
        let first_col = range.start().map(|(_, col)| col as usize).unwrap_or(0);

        for (offset, cells) in range.rows().enumerate() {
            // Ranges start at the first used cell; pad back to absolute columns.
            let mut row = vec![CellValue::Empty; first_col];
            row.extend(cells.iter().map(from_data));
            if !sink.row(first_row + offset as u32 + 1, row) {
                return Ok(());
            }
        }

        debug!(sheet = %name, rows = range.height(), "Finished reading worksheet");
        if !sink.finish_sheet() {
            return Ok(());
        }
    }

    Ok(())
}

fn from_data(value: &Data) -> CellValue {
    match value {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Empty,
    }
}

fn from_data_ref(value: &DataRef<'_>) -> CellValue {
    match value {
        DataRef::Empty => CellValue::Empty,
        DataRef::String(s) => CellValue::Text(s.clone()),
        DataRef::SharedString(s) => CellValue::Text((*s).to_string()),
        DataRef::Int(i) => CellValue::Number(*i as f64),
        DataRef::Float(f) => CellValue::Number(*f),
        DataRef::Bool(b) => CellValue::Bool(*b),
        DataRef::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => CellValue::Text(s.clone()),
        #[allow(unreachable_patterns)]
        _ => CellValue::Empty,
    }
}
