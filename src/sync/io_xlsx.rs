// Reading probe spreadsheets, and writing them back with the survey answers.

use calamine::{DataType, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::collections::HashMap;
use std::io::Cursor;

use crate::sync::io_common::file_extension;
use crate::sync::*;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EXCEL_DATE_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// The first worksheet of a file: the header row and the data lines below it.
///
/// The cells keep their spreadsheet types so that the sheet can be written
/// back unchanged.
#[derive(PartialEq, Debug, Clone)]
pub struct SourceSheet {
    pub name: String,
    /// Header names, trimmed.
    pub headers: Vec<String>,
    /// The header row as it was read, written back as is.
    pub header_cells: Vec<DataType>,
    pub cells: Vec<Vec<DataType>>,
}

/// Reads a .xlsx or .csv file.
pub fn read_source(path: &str, bytes: &[u8]) -> SyncResult<SourceSheet> {
    match file_extension(path).as_deref() {
        Some("xlsx") => read_xlsx(path, bytes),
        Some("csv") => io_csv::read_csv(path, bytes),
        _ => UnsupportedFileSnafu { path }.fail(),
    }
}

pub fn read_xlsx(path: &str, bytes: &[u8]) -> SyncResult<SourceSheet> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).context(OpeningExcelSnafu { path })?;
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context(MissingWorksheetSnafu { path })?;
    let wrange = workbook
        .worksheet_range_at(0)
        .context(MissingWorksheetSnafu { path })?
        .context(OpeningExcelSnafu { path })?;
    debug!(
        "read_xlsx: {}: worksheet {:?} size {:?}",
        path,
        name,
        wrange.get_size()
    );

    let mut iter = wrange.rows();
    let header_cells: Vec<DataType> = iter.next().map(|h| h.to_vec()).unwrap_or_default();
    let headers: Vec<String> = header_cells
        .iter()
        .map(|c| cell_text(c).trim().to_string())
        .collect();
    let cells: Vec<Vec<DataType>> = iter.map(|row| row.to_vec()).collect();
    Ok(SourceSheet {
        name,
        headers,
        header_cells,
        cells,
    })
}

/// The text of a cell, as the import sees it.
pub fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(s) => s.clone(),
        DataType::Int(i) => i.to_string(),
        DataType::Float(f) => f.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::DateTime(f) => match cell.as_datetime() {
            Some(dt) => dt.format(DATE_FORMAT).to_string(),
            None => f.to_string(),
        },
        DataType::Error(e) => e.to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

fn is_blank(row: &[DataType]) -> bool {
    row.iter().all(|c| cell_text(c).trim().is_empty())
}

impl SourceSheet {
    /// The data lines as named cells. Blank lines are left out but keep their
    /// place in the numbering.
    pub fn rows(&self) -> Vec<SheetRow> {
        let mut res: Vec<SheetRow> = Vec::new();
        for (idx, row) in self.cells.iter().enumerate() {
            if is_blank(row) {
                debug!("rows: line {} is blank", idx);
                continue;
            }
            let mut sr = SheetRow::new(idx);
            for (header, cell) in self.headers.iter().zip(row.iter()) {
                if !header.is_empty() {
                    sr.push(header, &cell_text(cell));
                }
            }
            res.push(sr);
        }
        res
    }

    /// Number of columns used by the header or by any line.
    pub fn width(&self) -> usize {
        self.cells
            .iter()
            .map(|r| r.len())
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    /// Writes the sheet back with the survey answers of each line.
    ///
    /// The answer columns are added after the last used column, or overwritten
    /// if the sheet already has them. Lines without answers are left as they are.
    pub fn annotated(&self, batch: &ReadyBatch) -> SyncResult<Vec<u8>> {
        let mut next_col = self.width();
        let mut appended: Vec<(u16, &str)> = Vec::new();
        let mut answer_cols: HashMap<&str, u16> = HashMap::new();
        for name in APPENDED_COLUMNS.iter() {
            let col = match self.headers.iter().position(|h| h == name) {
                Some(c) => c as u16,
                None => {
                    let c = next_col as u16;
                    next_col += 1;
                    appended.push((c, *name));
                    c
                }
            };
            answer_cols.insert(*name, col);
        }

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        if !self.name.is_empty() {
            worksheet.set_name(&self.name).context(WritingExcelSnafu {})?;
        }
        let date_format = Format::new().set_num_format(EXCEL_DATE_FORMAT);

        for (col, h) in self.headers.iter().enumerate() {
            match self.header_cells.get(col) {
                Some(cell) => write_cell(worksheet, 0, col as u16, cell, &date_format)?,
                None => {
                    worksheet
                        .write_string(0, col as u16, h)
                        .context(WritingExcelSnafu {})?;
                }
            }
        }
        for (col, name) in appended.iter() {
            worksheet
                .write_string(0, *col, *name)
                .context(WritingExcelSnafu {})?;
        }

        let mut annotated = 0;
        for (idx, row) in self.cells.iter().enumerate() {
            let line = (idx + 1) as u32;
            let factors = batch.factors_for_source(idx);
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                if factors.is_some() && answer_cols.values().any(|c| *c == col) {
                    continue;
                }
                write_cell(worksheet, line, col, cell, &date_format)?;
            }
            if let Some(f) = factors {
                for (name, value) in annotation_cells(f) {
                    if let Some(col) = answer_cols.get(name) {
                        worksheet
                            .write_string(line, *col, &value)
                            .context(WritingExcelSnafu {})?;
                    }
                }
                annotated += 1;
            }
        }
        info!(
            "annotated: {} of {} lines annotated",
            annotated,
            self.cells.len()
        );

        workbook.save_to_buffer().context(WritingExcelSnafu {})
    }
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &DataType,
    date_format: &Format,
) -> SyncResult<()> {
    let res = match cell {
        DataType::Empty => return Ok(()),
        DataType::Int(i) => worksheet.write_number(row, col, *i as f64),
        DataType::Float(f) => worksheet.write_number(row, col, *f),
        DataType::Bool(b) => worksheet.write_boolean(row, col, *b),
        DataType::DateTime(f) => worksheet.write_number_with_format(row, col, *f, date_format),
        DataType::String(s) => worksheet.write_string(row, col, s),
        other => worksheet.write_string(row, col, &cell_text(other)),
    };
    res.context(WritingExcelSnafu {})?;
    Ok(())
}
