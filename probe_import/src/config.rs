// ********* Input data structures ***********

use std::error::Error;
use std::fmt::Display;

/// One line of the probe spreadsheet, as column name -> cell text.
///
/// The cells keep the order of the header row. `index` is the position of the
/// row among the data rows of the sheet (the header row is not counted), which
/// is what ties a processed row back to its line when the sheet is exported
/// again.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SheetRow {
    pub index: usize,
    pub cells: Vec<(String, String)>,
}

impl SheetRow {
    pub fn new(index: usize) -> SheetRow {
        SheetRow {
            index,
            cells: Vec::new(),
        }
    }

    /// Builds a row from (column, value) pairs. Mostly useful for tests and small tools.
    pub fn from_pairs(index: usize, pairs: &[(&str, &str)]) -> SheetRow {
        SheetRow {
            index,
            cells: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn push(&mut self, column: &str, value: &str) {
        self.cells.push((column.to_string(), value.to_string()));
    }

    /// The value of a column. If a column name appears twice, the first one wins.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }
}

/// Identifier of a measured parameter in the backend `parameters` table.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct ParameterId(pub u32);

/// Maps a spreadsheet column to a backend parameter.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct ParameterColumn {
    pub column: &'static str,
    pub parameter_id: ParameterId,
    pub description: &'static str,
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ParameterValue {
    pub parameter_id: ParameterId,
    pub value: f64,
}

/// A spreadsheet row that passed processing.
///
/// Invariant: `measured_at` is not blank and `parameters` is never empty.
#[derive(PartialEq, Debug, Clone)]
pub struct ProcessedRow {
    pub measured_at: String,
    pub parameters: Vec<ParameterValue>,
    pub original: SheetRow,
}

impl ProcessedRow {
    /// Position of the originating line among the data rows of the sheet.
    pub fn source_index(&self) -> usize {
        self.original.index
    }
}

// ********* Environmental survey **********

/// The five yes/no questions asked for every sample.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Factor {
    AlteredColor,
    AlteredSmell,
    RainLast48h,
    VisibleResidue,
    ReducedVolume,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::AlteredColor,
        Factor::AlteredSmell,
        Factor::RainLast48h,
        Factor::VisibleResidue,
        Factor::ReducedVolume,
    ];

    /// Name of the column added to the exported spreadsheet.
    pub fn column_name(&self) -> &'static str {
        match self {
            Factor::AlteredColor => "Cor_Alterada",
            Factor::AlteredSmell => "Cheiro_Alterado",
            Factor::RainLast48h => "Chuva_48h",
            Factor::VisibleResidue => "Residuos_Visiveis",
            Factor::ReducedVolume => "Volume_Reduzido",
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            Factor::AlteredColor => "Is the colour of the water altered?",
            Factor::AlteredSmell => "Is there a noticeable smell in the water?",
            Factor::RainLast48h => "Has it rained in the last 48 hours?",
            Factor::VisibleResidue => "Is there visible residue?",
            Factor::ReducedVolume => "Is the water volume reduced?",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Factor::AlteredColor => "Check whether the water looks different from its usual colour",
            Factor::AlteredSmell => "Check for a strong or unpleasant odour",
            Factor::RainLast48h => "Consider any rain during the last 48 hours",
            Factor::VisibleResidue => "Look for litter, plastics or other waste",
            Factor::ReducedVolume => "Check whether the water level is low",
        }
    }
}

/// Name of the free text column added to the exported spreadsheet.
pub const NOTES_COLUMN: &str = "Observacoes";

/// Answers to the environmental survey for one sample.
///
/// A set is complete when the five questions have an answer. The notes are
/// never required.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct EnvironmentalFactors {
    pub altered_color: Option<bool>,
    pub altered_smell: Option<bool>,
    pub rain_last_48h: Option<bool>,
    pub visible_residue: Option<bool>,
    pub reduced_volume: Option<bool>,
    pub notes: Option<String>,
}

impl EnvironmentalFactors {
    pub fn get(&self, factor: Factor) -> Option<bool> {
        match factor {
            Factor::AlteredColor => self.altered_color,
            Factor::AlteredSmell => self.altered_smell,
            Factor::RainLast48h => self.rain_last_48h,
            Factor::VisibleResidue => self.visible_residue,
            Factor::ReducedVolume => self.reduced_volume,
        }
    }

    pub fn set(&mut self, factor: Factor, answer: bool) {
        let slot = match factor {
            Factor::AlteredColor => &mut self.altered_color,
            Factor::AlteredSmell => &mut self.altered_smell,
            Factor::RainLast48h => &mut self.rain_last_48h,
            Factor::VisibleResidue => &mut self.visible_residue,
            Factor::ReducedVolume => &mut self.reduced_volume,
        };
        *slot = Some(answer);
    }

    /// The questions that have not been answered yet, in question order.
    pub fn missing(&self) -> Vec<Factor> {
        Factor::ALL
            .iter()
            .filter(|f| self.get(**f).is_none())
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

// ********* Configuration **********

/// The import rules: which columns a probe file is expected to carry, and how
/// they map to parameters.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ImportRules {
    /// All the columns written by the probe firmware, in file order.
    pub expected_headers: &'static [&'static str],
    /// Columns without which a file is rejected, whatever the overall match.
    pub essential_headers: &'static [&'static str],
    /// Minimum share of `expected_headers` (in percent) that must be present.
    pub min_match_percent: u32,
    /// Column holding the sample timestamp.
    pub date_column: &'static str,
    pub parameters: &'static [ParameterColumn],
}

impl ImportRules {
    pub const DEFAULT_RULES: ImportRules = ImportRules {
        expected_headers: &[
            "ID",
            "Model Name",
            "Date",
            "EC",
            "EC(Unit)",
            "TDS",
            "TDS(Unit)",
            "SALT(%)",
            "SALT(TDS)",
            "SALT(TDS)(Unit)",
            "SALT(S.G.)",
            "pH",
            "Humidity(%)",
            "ORP(mV)",
            "H2(ppb)",
            "H2(ppm)",
            "DO(mg/L)",
            "DO(%)",
            "CF",
            "CL(mg/L)",
            "Temperature(°C)",
            "Temperature(°F)",
            "Location",
            "Notes",
        ],
        essential_headers: &["ID", "Date", "EC", "pH", "Temperature(°C)"],
        min_match_percent: 70,
        date_column: "Date",
        parameters: &[
            ParameterColumn {
                column: "EC",
                parameter_id: ParameterId(10),
                description: "Electrical conductivity",
            },
            ParameterColumn {
                column: "TDS",
                parameter_id: ParameterId(29),
                description: "Total dissolved solids",
            },
            ParameterColumn {
                column: "pH",
                parameter_id: ParameterId(2),
                description: "pH",
            },
            ParameterColumn {
                column: "ORP(mV)",
                parameter_id: ParameterId(34),
                description: "Oxidation-reduction potential",
            },
            ParameterColumn {
                column: "DO(mg/L)",
                parameter_id: ParameterId(3),
                description: "Dissolved oxygen",
            },
            ParameterColumn {
                column: "Temperature(°C)",
                parameter_id: ParameterId(1),
                description: "Temperature",
            },
            ParameterColumn {
                column: "SALT(%)",
                parameter_id: ParameterId(33),
                description: "Salinity",
            },
        ],
    };
}

// ******** Output data structures *********

/// Outcome of checking the header row of a sheet.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct HeaderReport {
    pub essential_missing: Vec<String>,
    pub matched: usize,
    pub expected: usize,
    pub is_valid: bool,
}

impl HeaderReport {
    pub fn match_percent(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        (self.matched as f64) * 100.0 / (self.expected as f64)
    }
}

/// The rows kept by the import, in file order, and the indexes of the dropped ones.
#[derive(PartialEq, Debug, Clone)]
pub struct ImportSummary {
    pub rows: Vec<ProcessedRow>,
    pub skipped: Vec<usize>,
}

/// Errors that prevent a sheet from being imported.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ImportErrors {
    /// The sheet has no data rows.
    EmptySheet,
    /// The header row does not look like a probe export.
    InvalidHeaders(HeaderReport),
    /// Every row lacked a date or a usable measurement.
    NoValidRows { skipped: usize },
}

impl Error for ImportErrors {}

impl Display for ImportErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportErrors::EmptySheet => write!(f, "the file does not contain any data"),
            ImportErrors::InvalidHeaders(_) => write!(
                f,
                "invalid file format: check that this is a file exported by the collection probe"
            ),
            ImportErrors::NoValidRows { .. } => {
                write!(f, "no valid readings were found in the file")
            }
        }
    }
}
