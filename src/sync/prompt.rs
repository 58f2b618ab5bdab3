// Drivers of the survey: the terminal, or a file of answers.

use probe_import::survey::SurveyStep;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::sync::*;

const YES: [&str; 4] = ["s", "sim", "y", "yes"];
const NO: [&str; 4] = ["n", "nao", "não", "no"];
const QUIT: &str = "q";

/// The answers of one row, as written in an answers file.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerSet {
    pub cor_alterada: Option<bool>,
    pub cheiro_alterado: Option<bool>,
    pub chuva_48h: Option<bool>,
    pub residuos_visiveis: Option<bool>,
    pub volume_reduzido: Option<bool>,
    pub observacoes: Option<String>,
}

impl AnswerSet {
    pub fn into_factors(self) -> EnvironmentalFactors {
        EnvironmentalFactors {
            altered_color: self.cor_alterada,
            altered_smell: self.cheiro_alterado,
            rain_last_48h: self.chuva_48h,
            visible_residue: self.residuos_visiveis,
            reduced_volume: self.volume_reduzido,
            notes: clean_notes(self.observacoes.as_deref().unwrap_or("")),
        }
    }
}

fn clean_notes(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

pub async fn read_answers(path: &str) -> SyncResult<Vec<AnswerSet>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(OpeningJsonSnafu { path })?;
    serde_json::from_str(&contents).context(ParsingJsonSnafu { path })
}

/// Answers the rows in order from the given sets, one per row.
///
/// Any incomplete set abandons the whole batch.
pub fn apply_answer_sets(mut seq: SurveySequencer, sets: Vec<AnswerSet>) -> SyncResult<ReadyBatch> {
    if sets.len() != seq.total() {
        whatever!(
            "the answers file has {} answer sets but {} readings were found",
            sets.len(),
            seq.total()
        );
    }
    for set in sets {
        seq.begin().context(SurveySnafu {})?;
        if let Err(e) = seq.complete(set.into_factors()) {
            seq.cancel();
            return Err(SyncError::Survey { source: e });
        }
    }
    seq.into_batch().context(SurveySnafu {})
}

/// Reads one line. None at the end of the input.
fn read_answer<R: BufRead>(input: &mut R) -> SyncResult<Option<String>> {
    let mut line = String::new();
    let n = input.read_line(&mut line).context(TerminalSnafu {})?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_lowercase()))
}

/// Asks a yes/no question until it gets an answer. None if the user quits.
fn ask_yes_no<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    factor: Factor,
) -> SyncResult<Option<bool>> {
    loop {
        write!(output, "{} [s/n, q to cancel]: ", factor.question()).context(TerminalSnafu {})?;
        output.flush().context(TerminalSnafu {})?;
        let answer = match read_answer(input)? {
            Some(a) => a,
            None => return Ok(None),
        };
        if YES.contains(&answer.as_str()) {
            return Ok(Some(true));
        }
        if NO.contains(&answer.as_str()) {
            return Ok(Some(false));
        }
        if answer == QUIT {
            return Ok(None);
        }
        writeln!(
            output,
            "please answer s (yes) or n (no). {}.",
            factor.description()
        )
        .context(TerminalSnafu {})?;
    }
}

fn cancelled(mut seq: SurveySequencer) -> SyncResult<ReadyBatch> {
    seq.cancel();
    Err(SyncError::Survey {
        source: SurveyError::Cancelled,
    })
}

/// [run_survey] on the blocking thread pool, the terminal reads being blocking.
pub async fn run_survey_blocking<R, W>(
    seq: SurveySequencer,
    input: R,
    output: W,
) -> SyncResult<ReadyBatch>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    tokio::task::spawn_blocking(move || run_survey(seq, input, output))
        .await
        .whatever_context("the survey was interrupted")?
}

/// Asks the survey questions of every row on a terminal.
///
/// Quitting, or the end of the input, abandons the whole batch.
pub fn run_survey<R: BufRead, W: Write>(
    mut seq: SurveySequencer,
    mut input: R,
    mut output: W,
) -> SyncResult<ReadyBatch> {
    let total = seq.total();
    loop {
        let (index, measured_at) = match seq.current() {
            Some((index, row)) => (index, row.measured_at.clone()),
            None => break,
        };
        seq.begin().context(SurveySnafu {})?;
        writeln!(output, "\nReading {}/{} - {}", index + 1, total, measured_at)
            .context(TerminalSnafu {})?;

        let mut factors = EnvironmentalFactors::default();
        for factor in Factor::ALL.iter() {
            match ask_yes_no(&mut input, &mut output, *factor)? {
                Some(answer) => factors.set(*factor, answer),
                None => return cancelled(seq),
            }
        }

        write!(output, "Notes (optional): ").context(TerminalSnafu {})?;
        output.flush().context(TerminalSnafu {})?;
        let mut line = String::new();
        if input.read_line(&mut line).context(TerminalSnafu {})? == 0 {
            return cancelled(seq);
        }
        factors.notes = clean_notes(&line);

        match seq.complete(factors).context(SurveySnafu {})? {
            SurveyStep::Next { .. } => continue,
            SurveyStep::ReadyToSync => break,
        }
    }
    seq.into_batch().context(SurveySnafu {})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer(dates: &[&str]) -> SurveySequencer {
        let rows: Vec<ProcessedRow> = dates
            .iter()
            .enumerate()
            .map(|(i, d)| {
                process_row(
                    &SheetRow::from_pairs(i, &[("Date", *d), ("pH", "7.0")]),
                    &ImportRules::DEFAULT_RULES,
                )
                .unwrap()
            })
            .collect();
        SurveySequencer::new(rows).unwrap()
    }

    #[test]
    fn terminal_survey() {
        let input = "s\nn\nsim\nxx\nnão\nN\n  lots of foam \ny\nn\nn\nn\nn\n\n";
        let mut out: Vec<u8> = Vec::new();
        let batch = run_survey(sequencer(&["d1", "d2"]), input.as_bytes(), &mut out).unwrap();
        assert_eq!(batch.len(), 2);

        let first = &batch.rows()[0].factors;
        assert_eq!(first.altered_color, Some(true));
        assert_eq!(first.altered_smell, Some(false));
        assert_eq!(first.rain_last_48h, Some(true));
        assert_eq!(first.visible_residue, Some(false));
        assert_eq!(first.reduced_volume, Some(false));
        assert_eq!(first.notes.as_deref(), Some("lots of foam"));
        assert_eq!(batch.rows()[1].factors.notes, None);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Reading 2/2 - d2"));
        assert!(text.contains("please answer s (yes) or n (no). Look for litter"));
    }

    #[test]
    fn quitting_abandons_the_batch() {
        let mut out: Vec<u8> = Vec::new();
        let err = run_survey(sequencer(&["d1", "d2"]), "s\nq\n".as_bytes(), &mut out).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Survey {
                source: SurveyError::Cancelled
            }
        ));

        // Input ending in the middle of the second row.
        let input = "s\ns\ns\ns\ns\n\ns\n";
        let err = run_survey(sequencer(&["d1", "d2"]), input.as_bytes(), &mut out).unwrap_err();
        assert!(matches!(err, SyncError::Survey { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn terminal_survey_off_the_runtime() {
        let input = std::io::Cursor::new("s\ns\nn\nn\nn\n\n".as_bytes().to_vec());
        let batch = run_survey_blocking(sequencer(&["d1"]), input, std::io::sink())
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rows()[0].factors.altered_smell, Some(true));
        assert_eq!(batch.rows()[0].factors.reduced_volume, Some(false));
    }

    #[test]
    fn answer_sets() {
        let js = r#"[{"cor_alterada": false, "cheiro_alterado": false, "chuva_48h": true,
                      "residuos_visiveis": false, "volume_reduzido": false, "observacoes": " "}]"#;
        let sets: Vec<AnswerSet> = serde_json::from_str(js).unwrap();
        let batch = apply_answer_sets(sequencer(&["d1"]), sets.clone()).unwrap();
        assert_eq!(batch.rows()[0].factors.rain_last_48h, Some(true));
        assert_eq!(batch.rows()[0].factors.notes, None);

        assert!(apply_answer_sets(sequencer(&["d1", "d2"]), sets).is_err());

        let incomplete = vec![AnswerSet {
            cor_alterada: Some(true),
            ..AnswerSet::default()
        }];
        let err = apply_answer_sets(sequencer(&["d1"]), incomplete).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Survey {
                source: SurveyError::Incomplete { .. }
            }
        ));
    }
}
