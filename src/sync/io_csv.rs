// Primitives for reading CSV exports of the probe.

use calamine::DataType;

use crate::sync::io_xlsx::SourceSheet;
use crate::sync::*;

/// Name given to the single sheet of a CSV file when it is exported again.
pub const CSV_SHEET_NAME: &str = "Sheet1";

fn text_cell(s: String) -> DataType {
    if s.is_empty() {
        DataType::Empty
    } else {
        DataType::String(s)
    }
}

/// Reads a CSV file. All the cells are read as text, empty cells as blanks.
pub fn read_csv(path: &str, bytes: &[u8]) -> SyncResult<SourceSheet> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = rdr.into_records();

    let raw_headers: Vec<String> = match records.next() {
        Some(line_r) => {
            let line = line_r.context(ReadingCsvSnafu { path })?;
            line.iter()
                .map(|s| s.trim_start_matches('\u{feff}').to_string())
                .collect()
        }
        None => vec![],
    };
    let headers: Vec<String> = raw_headers.iter().map(|h| h.trim().to_string()).collect();

    let mut cells: Vec<Vec<DataType>> = Vec::new();
    for (idx, line_r) in records.enumerate() {
        let line = line_r.context(ReadingCsvSnafu { path })?;
        debug!("read_csv: line {}: {:?}", idx, line);
        cells.push(line.iter().map(|s| text_cell(s.to_string())).collect());
    }

    Ok(SourceSheet {
        name: CSV_SHEET_NAME.to_string(),
        headers,
        header_cells: raw_headers.into_iter().map(text_cell).collect(),
        cells,
    })
}
