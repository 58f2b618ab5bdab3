mod config;
pub mod manual;
pub mod survey;

use log::{debug, info, warn};

use std::collections::HashSet;

pub use crate::config::*;

/// Text written in the exported sheet for a "yes" answer.
pub const ANSWER_YES: &str = "Sim";
/// Text written in the exported sheet for a "no" answer.
pub const ANSWER_NO: &str = "Não";

/// The columns appended to the exported sheet, in order.
pub const APPENDED_COLUMNS: [&str; 6] = [
    "Cor_Alterada",
    "Cheiro_Alterado",
    "Chuva_48h",
    "Residuos_Visiveis",
    "Volume_Reduzido",
    NOTES_COLUMN,
];

/// Checks the column names of a sheet against the rules.
///
/// The sheet is accepted only if all the essential columns are present and at
/// least `min_match_percent` of the expected columns are found. Unknown columns
/// are ignored.
pub fn validate_headers<S: AsRef<str>>(headers: &[S], rules: &ImportRules) -> HeaderReport {
    let present: HashSet<&str> = headers.iter().map(|h| h.as_ref()).collect();

    let essential_missing: Vec<String> = rules
        .essential_headers
        .iter()
        .filter(|h| !present.contains(*h))
        .map(|h| h.to_string())
        .collect();

    let matched = rules
        .expected_headers
        .iter()
        .filter(|h| present.contains(*h))
        .count();
    let expected = rules.expected_headers.len();

    // Integer form of matched / expected >= min_match_percent / 100
    let enough_matches = matched * 100 >= (rules.min_match_percent as usize) * expected;
    let is_valid = essential_missing.is_empty() && enough_matches;

    debug!(
        "validate_headers: matched {}/{} essential_missing: {:?} valid: {}",
        matched, expected, essential_missing, is_valid
    );

    HeaderReport {
        essential_missing,
        matched,
        expected,
        is_valid,
    }
}

/// Parses a measurement cell.
///
/// Blank cells and the probe's `-` placeholder mean "not measured", as does
/// any text that is not a finite decimal number. A missing value is never
/// turned into zero.
pub fn parse_value(cell: &str) -> Option<f64> {
    let s = cell.trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() => Some(x),
        _ => None,
    }
}

/// Turns one sheet row into a processed row.
///
/// Returns None when the row has no date or when none of the parameter columns
/// holds a usable number.
pub fn process_row(row: &SheetRow, rules: &ImportRules) -> Option<ProcessedRow> {
    let measured_at = match row.get(rules.date_column) {
        Some(d) if !d.trim().is_empty() => d.to_string(),
        _ => {
            debug!("process_row: row {}: no date, skipping", row.index);
            return None;
        }
    };

    let parameters: Vec<ParameterValue> = rules
        .parameters
        .iter()
        .filter_map(|pc| {
            row.get(pc.column)
                .and_then(parse_value)
                .map(|value| ParameterValue {
                    parameter_id: pc.parameter_id,
                    value,
                })
        })
        .collect();

    debug!(
        "process_row: row {}: date {:?} parameters: {:?}",
        row.index, measured_at, parameters
    );

    if parameters.is_empty() {
        return None;
    }

    Some(ProcessedRow {
        measured_at,
        parameters,
        original: row.clone(),
    })
}

/// Runs the whole import over the rows of a sheet.
///
/// Arguments:
/// * `headers` the column names of the header row
/// * `rows` the data rows, in file order
/// * `rules` the import rules
///
/// Rows without a date or without any measurement are dropped. They are not an
/// error, but their indexes are returned in the summary.
pub fn import_rows<S: AsRef<str>>(
    headers: &[S],
    rows: &[SheetRow],
    rules: &ImportRules,
) -> Result<ImportSummary, ImportErrors> {
    info!("import_rows: processing {} rows", rows.len());
    if rows.is_empty() {
        return Err(ImportErrors::EmptySheet);
    }

    let report = validate_headers(headers, rules);
    if !report.is_valid {
        warn!(
            "import_rows: invalid headers: {:.1}% matched, missing essential columns {:?}",
            report.match_percent(),
            report.essential_missing
        );
        return Err(ImportErrors::InvalidHeaders(report));
    }

    let mut kept: Vec<ProcessedRow> = Vec::new();
    let mut skipped: Vec<usize> = Vec::new();
    for row in rows {
        match process_row(row, rules) {
            Some(pr) => kept.push(pr),
            None => skipped.push(row.index),
        }
    }

    if !skipped.is_empty() {
        warn!(
            "import_rows: {} rows skipped (no date or no valid parameter): {:?}",
            skipped.len(),
            skipped
        );
    }

    if kept.is_empty() {
        return Err(ImportErrors::NoValidRows {
            skipped: skipped.len(),
        });
    }

    info!("import_rows: {} valid rows", kept.len());
    Ok(ImportSummary {
        rows: kept,
        skipped,
    })
}

/// The values written in the appended columns for one answered row, in the
/// order of `APPENDED_COLUMNS`.
///
/// An unanswered question is written as "no".
pub fn annotation_cells(factors: &EnvironmentalFactors) -> Vec<(&'static str, String)> {
    let mut cells: Vec<(&'static str, String)> = Factor::ALL
        .iter()
        .map(|f| {
            let answer = if factors.get(*f).unwrap_or(false) {
                ANSWER_YES
            } else {
                ANSWER_NO
            };
            (f.column_name(), answer.to_string())
        })
        .collect();
    cells.push((NOTES_COLUMN, factors.notes.clone().unwrap_or_default()));
    cells
}
