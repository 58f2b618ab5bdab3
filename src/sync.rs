use log::{debug, error, info, warn};

use probe_import::survey::{ReadyBatch, SurveyError, SurveySequencer};
use probe_import::*;
use snafu::{prelude::*, Snafu};

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use crate::sync::backend::{Backend, BackendError, Point, StoredReading};
use crate::sync::config_reader::AppConfig;
use crate::sync::credentials::CredentialVerifier;
use crate::sync::io_xlsx::SourceSheet;
use crate::sync::session::*;
use crate::sync::submit::{SourceFile, Submitter, SyncReport};
use crate::sync::upload::UploadRejection;

pub mod backend;
pub mod config_reader;
pub mod credentials;
pub mod io_common;
pub mod io_csv;
pub mod io_xlsx;
#[cfg(test)]
pub mod memory;
pub mod prompt;
pub mod rest;
pub mod session;
pub mod submit;
pub mod upload;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("{message}"))]
    InvalidInput { message: String },
    #[snafu(display("code or password incorrect"))]
    AuthenticationFailed {},
    #[snafu(display("could not reach the server, check your internet connection ({source})"))]
    Connectivity { source: BackendError },

    #[snafu(display("not logged in: run `probesync login` first"))]
    NotLoggedIn {},
    #[snafu(display("no collection point selected: run `probesync select-point`"))]
    NoPointSelected {},
    #[snafu(display("point {point_id} is not one of your collection points"))]
    UnknownPoint { point_id: i64 },

    #[snafu(display("error reading file {path}"))]
    ReadingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("{path}: only .xlsx and .csv files can be imported"))]
    UnsupportedFile { path: String },
    #[snafu(display("error opening file {path}: {source}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("{path} does not contain any worksheet"))]
    MissingWorksheet { path: String },
    #[snafu(display("error reading csv file {path}: {source}"))]
    ReadingCsv { source: csv::Error, path: String },
    #[snafu(display("error writing the annotated spreadsheet: {source}"))]
    WritingExcel {
        source: rust_xlsxwriter::XlsxError,
    },

    #[snafu(display("{source}"))]
    Import { source: ImportErrors },
    #[snafu(display("{source}"))]
    Survey { source: SurveyError },

    #[snafu(display("error opening {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("error parsing {path}: {source}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("terminal error"))]
    Terminal { source: std::io::Error },

    #[snafu(display("server error: {source}"))]
    Backend { source: BackendError },
    #[snafu(display(
        "synchronization failed: {stored} of {total} readings were saved and will not be \
         removed, contact the coordinator before importing this file again ({source})"
    ))]
    SyncFailed {
        stored: usize,
        total: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("upload rejected: {reason}"))]
    UploadRejected { reason: UploadRejection },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type SyncResult<T> = Result<T, SyncError>;

/// What every command needs: the backend handle, the configuration and the
/// session file.
pub struct SyncContext {
    pub backend: Arc<dyn Backend>,
    pub config: AppConfig,
    pub store: SessionStore,
}

impl SyncContext {
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig) -> SyncContext {
        let store = SessionStore::new(&config.session_path);
        SyncContext {
            backend,
            config,
            store,
        }
    }

    /// Connects to the backend described in the configuration.
    pub fn from_config(config: AppConfig) -> SyncResult<SyncContext> {
        let backend = rest::RestBackend::new(&config.backend, config.connect_timeout())
            .context(BackendSnafu {})?;
        Ok(SyncContext::new(Arc::new(backend), config))
    }
}

/// Options of the import command.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub path: String,
    /// JSON file with the survey answers. The survey is asked on the terminal when absent.
    pub answers: Option<String>,
    /// Keeps the source file after a successful synchronization.
    pub keep_file: bool,
}

fn load_sheet(path: &str, bytes: &[u8]) -> SyncResult<SourceSheet> {
    let sheet = io_xlsx::read_source(path, bytes)?;
    info!(
        "load_sheet: {}: worksheet {:?}, {} columns, {} lines",
        path,
        sheet.name,
        sheet.headers.len(),
        sheet.cells.len()
    );
    Ok(sheet)
}

fn import_sheet(sheet: &SourceSheet) -> SyncResult<ImportSummary> {
    let rows = sheet.rows();
    import_rows(&sheet.headers, &rows, &ImportRules::DEFAULT_RULES).context(ImportSnafu {})
}

fn print_summary(summary: &ImportSummary) {
    println!("{} readings found", summary.rows.len());
    for row in summary.rows.iter() {
        println!(
            "  line {}: {} ({} parameters)",
            row.source_index() + 2,
            row.measured_at,
            row.parameters.len()
        );
    }
    if !summary.skipped.is_empty() {
        // Line numbers as shown by a spreadsheet program: the header is line 1.
        let lines: Vec<String> = summary
            .skipped
            .iter()
            .map(|i| (i + 2).to_string())
            .collect();
        println!(
            "{} lines skipped (no date or no valid measurement): {}",
            summary.skipped.len(),
            lines.join(", ")
        );
    }
}

fn current_point(session: &Session) -> SyncResult<Point> {
    session
        .current_point()
        .cloned()
        .context(NoPointSelectedSnafu {})
}

pub async fn run_login(
    ctx: &SyncContext,
    code: &str,
    password: &str,
    now: DateTime<Utc>,
) -> SyncResult<Session> {
    let verifier = CredentialVerifier::new(ctx.backend.as_ref(), ctx.config.connect_timeout());
    let record = verifier.login(code, password).await?;
    let points = resolve_points(ctx.backend.as_ref(), &record).await?;
    if points.is_empty() {
        warn!("run_login: volunteer {:?} has no collection point", record.code);
    }
    let session = Session::new(volunteer_from_record(&record, points), now);
    ctx.store.save(&session).await?;
    info!("run_login: logged in as {:?}", session.volunteer.code);

    println!("Welcome, {}", session.volunteer.name);
    match session.current_point() {
        Some(p) => println!("Collection point: {}", p.label()),
        None => println!("No collection point is associated with your account"),
    }
    Ok(session)
}

pub async fn run_logout(ctx: &SyncContext) -> SyncResult<()> {
    ctx.store.clear().await?;
    info!("run_logout: session cleared");
    Ok(())
}

pub async fn run_points(ctx: &SyncContext) -> SyncResult<Session> {
    let session = ctx.store.require().await?;
    for p in session.volunteer.points.iter() {
        let marker = if Some(p.id) == session.selected_point_id {
            "*"
        } else {
            " "
        };
        let primary = if p.is_primary { " (primary)" } else { "" };
        println!("{} {:>5}  {}{}", marker, p.id, p.label(), primary);
    }
    Ok(session)
}

pub async fn run_select_point(ctx: &SyncContext, point_id: i64) -> SyncResult<Session> {
    let mut session = ctx.store.require().await?;
    let label = session.select_point(point_id)?.label();
    ctx.store.save(&session).await?;
    println!("Collection point: {}", label);
    Ok(session)
}

/// Parses and checks a file without contacting the backend.
pub async fn run_check(path: &str) -> SyncResult<ImportSummary> {
    let bytes = tokio::fs::read(path)
        .await
        .context(ReadingFileSnafu { path })?;
    let sheet = load_sheet(path, &bytes)?;
    let summary = import_sheet(&sheet)?;
    print_summary(&summary);
    Ok(summary)
}

/// Warns about rows that look already submitted. Never blocks the import.
async fn warn_duplicates(submitter: &Submitter<'_>, point_id: i64, rows: &[ProcessedRow]) -> usize {
    let mut found = 0;
    for row in rows {
        match submitter.is_duplicate(point_id, &row.measured_at).await {
            Ok(true) => {
                warn!(
                    "warn_duplicates: {} already submitted for point {}",
                    row.measured_at, point_id
                );
                println!(
                    "warning: a reading at {} already exists for this point",
                    row.measured_at
                );
                found += 1;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("warn_duplicates: duplicate check unavailable: {}", e);
                break;
            }
        }
    }
    found
}

async fn collect_answers(seq: SurveySequencer, answers: Option<&str>) -> SyncResult<ReadyBatch> {
    match answers {
        Some(p) => {
            let sets = prompt::read_answers(p).await?;
            prompt::apply_answer_sets(seq, sets)
        }
        None => {
            prompt::run_survey_blocking(seq, std::io::BufReader::new(std::io::stdin()), std::io::stdout()).await
        }
    }
}

/// The whole pipeline: parse, survey, insert, annotate, upload.
pub async fn run_import(
    ctx: &SyncContext,
    opts: &ImportOptions,
    now: DateTime<Utc>,
) -> SyncResult<SyncReport> {
    let session = ctx.store.require().await?;
    let point = current_point(&session)?;
    info!("run_import: {} for point {}", opts.path, point.id);

    let bytes = tokio::fs::read(&opts.path)
        .await
        .context(ReadingFileSnafu {
            path: opts.path.clone(),
        })?;
    let sheet = load_sheet(&opts.path, &bytes)?;
    let summary = import_sheet(&sheet)?;
    print_summary(&summary);

    let submitter = Submitter::new(ctx.backend.as_ref(), &ctx.config.backend.bucket);
    warn_duplicates(&submitter, point.id, &summary.rows).await;

    let seq = SurveySequencer::new(summary.rows).context(SurveySnafu {})?;
    let batch = collect_answers(seq, opts.answers.as_deref()).await?;

    let source = SourceFile {
        name: io_common::simplify_file_name(&opts.path),
        bytes,
        local_path: if opts.keep_file {
            None
        } else {
            Some(Path::new(&opts.path).to_path_buf())
        },
    };
    let report = match submitter
        .submit(&batch, point.id, &session.volunteer.code, &source, now)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            error!("run_import: {}", e);
            return Err(e);
        }
    };

    println!(
        "{} readings synchronized, annotated file stored at {}",
        report.reading_ids.len(),
        report.uploaded_path
    );
    if source.local_path.is_some() && !report.local_file_removed {
        println!("note: the local file {} could not be removed", opts.path);
    }
    Ok(report)
}

fn answer_text(answer: Option<bool>) -> &'static str {
    match answer {
        Some(true) => ANSWER_YES,
        Some(false) => ANSWER_NO,
        None => "-",
    }
}

/// Names of the parameters by id. Empty when the backend cannot list them.
async fn parameter_names(backend: &dyn Backend) -> Vec<(u32, String)> {
    match backend.list_parameters().await {
        Ok(ps) => ps.into_iter().map(|p| (p.id, p.description)).collect(),
        Err(e) => {
            warn!("parameter_names: parameter names unavailable: {}", e);
            vec![]
        }
    }
}

/// One reading of the history, as printed.
fn reading_lines(r: &StoredReading, names: &[(u32, String)]) -> Vec<String> {
    let name_of = |id: u32| -> String {
        names
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, n)| n.clone())
            .unwrap_or_else(|| format!("#{}", id))
    };
    let values: Vec<String> = r
        .reading_values
        .iter()
        .map(|v| format!("{}={}", name_of(v.parameter_id), v.value))
        .collect();
    let mut lines = vec![
        format!("{}  {}", r.measured_at, values.join(" ")),
        format!(
            "    color {} smell {} rain {} residue {} volume {}",
            answer_text(r.cor_alterada),
            answer_text(r.cheiro_alterado),
            answer_text(r.chuva_48h),
            answer_text(r.residuos_visiveis),
            answer_text(r.volume_reduzido)
        ),
    ];
    if let Some(notes) = r.context.as_ref().and_then(|c| c.observacoes.as_ref()) {
        lines.push(format!("    {}", notes));
    }
    lines
}

pub async fn run_history(ctx: &SyncContext, limit: Option<usize>) -> SyncResult<Vec<StoredReading>> {
    let session = ctx.store.require().await?;
    let point = current_point(&session)?;
    let limit = limit.unwrap_or(ctx.config.history_limit);

    let readings = ctx
        .backend
        .list_readings_for_point(point.id, limit)
        .await
        .context(BackendSnafu {})?;
    debug!("run_history: {} readings for point {}", readings.len(), point.id);

    let names = parameter_names(ctx.backend.as_ref()).await;
    println!("{} - {} readings", point.label(), readings.len());
    for r in readings.iter() {
        for line in reading_lines(r, &names) {
            println!("{}", line);
        }
    }
    Ok(readings)
}
