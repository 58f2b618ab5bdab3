//! The environmental survey: one set of answers per processed row, collected in file order.
//!
//! ```
//! use probe_import::survey::{BatchState, SurveySequencer, SurveyStep};
//! use probe_import::*;
//!
//! let row = SheetRow::from_pairs(0, &[("Date", "2024-05-10 10:00"), ("pH", "7.0")]);
//! let processed = process_row(&row, &ImportRules::DEFAULT_RULES).unwrap();
//!
//! let mut seq = SurveySequencer::new(vec![processed])?;
//! seq.begin()?;
//! let mut factors = EnvironmentalFactors::default();
//! for f in Factor::ALL {
//!     factors.set(f, false);
//! }
//! assert_eq!(seq.complete(factors)?, SurveyStep::ReadyToSync);
//! assert_eq!(seq.state(), BatchState::ReadyToSync);
//! let batch = seq.into_batch()?;
//! assert_eq!(batch.len(), 1);
//! # Ok::<(), probe_import::survey::SurveyError>(())
//! ```

use log::{debug, info};

use std::error::Error;
use std::fmt::Display;

use crate::config::*;

/// Where the current row stands.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum RowState {
    /// Waiting for the questions to be shown.
    Pending,
    /// The questions are being answered.
    InProgress,
}

/// State of the whole batch.
///
/// A row that has been answered is never visited again: there is no way back.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum BatchState {
    Surveying { index: usize, row: RowState },
    ReadyToSync,
    Cancelled,
}

/// What the caller should do after a row has been completed.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum SurveyStep {
    /// Continue with the row at this index.
    Next { index: usize, measured_at: String },
    /// That was the last row. The batch can be submitted.
    ReadyToSync,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum SurveyError {
    EmptyBatch,
    /// The operation is only possible while a row is being answered.
    NotInProgress,
    /// The operation is only possible while a row is waiting.
    NotPending,
    /// Some questions are still unanswered.
    Incomplete { missing: Vec<Factor> },
    Cancelled,
    /// The batch was requested before every row was answered.
    NotReady { answered: usize, total: usize },
}

impl Error for SurveyError {}

impl Display for SurveyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SurveyError::EmptyBatch => write!(f, "there are no readings to survey"),
            SurveyError::NotInProgress => write!(f, "no row is currently being answered"),
            SurveyError::NotPending => write!(f, "the current row has already been started"),
            SurveyError::Incomplete { missing } => {
                write!(f, "please answer all the questions ({} left)", missing.len())
            }
            SurveyError::Cancelled => write!(f, "the import was cancelled"),
            SurveyError::NotReady { answered, total } => write!(
                f,
                "{} readings still have no environmental factors",
                total - answered
            ),
        }
    }
}

/// A processed row with its answers. The answers are always complete.
#[derive(PartialEq, Debug, Clone)]
pub struct AnsweredRow {
    pub row: ProcessedRow,
    pub factors: EnvironmentalFactors,
}

/// A batch where every row has been answered, in file order.
#[derive(PartialEq, Debug, Clone)]
pub struct ReadyBatch {
    rows: Vec<AnsweredRow>,
}

impl ReadyBatch {
    pub fn rows(&self) -> &[AnsweredRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The answers of the row coming from the given data line of the sheet, if
    /// that line was kept by the import.
    pub fn factors_for_source(&self, source_index: usize) -> Option<&EnvironmentalFactors> {
        self.rows
            .iter()
            .find(|ar| ar.row.source_index() == source_index)
            .map(|ar| &ar.factors)
    }
}

/// Walks the processed rows one at a time and collects the survey answers.
///
/// The sequencer is driven from the outside: `begin` when the questions of the
/// current row are shown, `complete` when they have all been answered. After the
/// last row the batch becomes ready to sync. `cancel` abandons the whole batch.
#[derive(Debug, Clone)]
pub struct SurveySequencer {
    rows: Vec<ProcessedRow>,
    answers: Vec<Option<EnvironmentalFactors>>,
    state: BatchState,
}

impl SurveySequencer {
    pub fn new(rows: Vec<ProcessedRow>) -> Result<SurveySequencer, SurveyError> {
        if rows.is_empty() {
            return Err(SurveyError::EmptyBatch);
        }
        let answers = vec![None; rows.len()];
        Ok(SurveySequencer {
            rows,
            answers,
            state: BatchState::Surveying {
                index: 0,
                row: RowState::Pending,
            },
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows answered so far.
    pub fn answered(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    /// The row waiting or being answered, with its index.
    pub fn current(&self) -> Option<(usize, &ProcessedRow)> {
        match self.state {
            BatchState::Surveying { index, .. } => self.rows.get(index).map(|r| (index, r)),
            _ => None,
        }
    }

    /// Shows the questions of the current row.
    pub fn begin(&mut self) -> Result<&ProcessedRow, SurveyError> {
        match self.state {
            BatchState::Surveying {
                index,
                row: RowState::Pending,
            } => {
                debug!("survey: starting row {}/{}", index + 1, self.rows.len());
                self.state = BatchState::Surveying {
                    index,
                    row: RowState::InProgress,
                };
                Ok(&self.rows[index])
            }
            BatchState::Surveying { .. } => Err(SurveyError::NotPending),
            BatchState::Cancelled => Err(SurveyError::Cancelled),
            BatchState::ReadyToSync => Err(SurveyError::NotInProgress),
        }
    }

    /// Records the answers of the current row and moves on.
    ///
    /// The answers are refused (and the row stays in progress) unless the five
    /// questions are answered. The notes are optional.
    pub fn complete(&mut self, factors: EnvironmentalFactors) -> Result<SurveyStep, SurveyError> {
        let index = match self.state {
            BatchState::Surveying {
                index,
                row: RowState::InProgress,
            } => index,
            BatchState::Cancelled => return Err(SurveyError::Cancelled),
            _ => return Err(SurveyError::NotInProgress),
        };

        let missing = factors.missing();
        if !missing.is_empty() {
            return Err(SurveyError::Incomplete { missing });
        }

        self.answers[index] = Some(factors);
        debug!(
            "survey: row {}/{} answered ({} answered)",
            index + 1,
            self.rows.len(),
            self.answered()
        );

        let next = index + 1;
        if next == self.rows.len() {
            info!("survey: all {} rows answered, ready to sync", self.rows.len());
            self.state = BatchState::ReadyToSync;
            Ok(SurveyStep::ReadyToSync)
        } else {
            self.state = BatchState::Surveying {
                index: next,
                row: RowState::Pending,
            };
            Ok(SurveyStep::Next {
                index: next,
                measured_at: self.rows[next].measured_at.clone(),
            })
        }
    }

    /// Abandons the batch. Nothing from it can be submitted afterwards.
    pub fn cancel(&mut self) {
        info!(
            "survey: cancelled after {}/{} rows",
            self.answered(),
            self.rows.len()
        );
        self.state = BatchState::Cancelled;
    }

    /// The answered batch. Only available once the batch is ready to sync.
    pub fn into_batch(self) -> Result<ReadyBatch, SurveyError> {
        match self.state {
            BatchState::ReadyToSync => {}
            BatchState::Cancelled => return Err(SurveyError::Cancelled),
            BatchState::Surveying { .. } => {
                return Err(SurveyError::NotReady {
                    answered: self.answered(),
                    total: self.rows.len(),
                })
            }
        }
        let total = self.rows.len();
        let mut rows: Vec<AnsweredRow> = Vec::with_capacity(total);
        for (row, answer) in self.rows.into_iter().zip(self.answers) {
            match answer {
                Some(factors) => rows.push(AnsweredRow { row, factors }),
                None => {
                    return Err(SurveyError::NotReady {
                        answered: rows.len(),
                        total,
                    })
                }
            }
        }
        Ok(ReadyBatch { rows })
    }
}
