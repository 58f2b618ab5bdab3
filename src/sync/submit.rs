// Submission of an answered batch.
//
// Readings are inserted one after the other, in file order. There is no
// transaction: when an insert or the upload fails, the readings already
// inserted stay in the backend and the error reports how many there are.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::sync::backend::{Backend, NewReading, NewReadingValue};
use crate::sync::upload::{export_file_name, Uploader};
use crate::sync::*;

/// The imported file, as read from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Removed after a successful submission when present.
    pub local_path: Option<PathBuf>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SyncReport {
    pub reading_ids: Vec<i64>,
    pub uploaded_path: String,
    pub local_file_removed: bool,
}

pub struct Submitter<'a> {
    backend: &'a dyn Backend,
    bucket: &'a str,
}

impl<'a> Submitter<'a> {
    pub fn new(backend: &'a dyn Backend, bucket: &'a str) -> Submitter<'a> {
        Submitter { backend, bucket }
    }

    /// Inserts one reading per row, with its values, and returns the reading ids.
    pub async fn insert_readings(&self, batch: &ReadyBatch, point_id: i64) -> SyncResult<Vec<i64>> {
        let total = batch.len();
        let mut ids: Vec<i64> = Vec::with_capacity(total);
        for answered in batch.rows() {
            let reading = NewReading::from_answered(point_id, answered);
            let reading_id = match self.backend.insert_reading(&reading).await {
                Ok(id) => id,
                Err(e) => {
                    return Err(SyncError::SyncFailed {
                        stored: ids.len(),
                        total,
                        source: Box::new(e),
                    })
                }
            };
            ids.push(reading_id);

            let values: Vec<NewReadingValue> = answered
                .row
                .parameters
                .iter()
                .map(|pv| NewReadingValue {
                    reading_id,
                    parameter_id: pv.parameter_id.0,
                    value: pv.value,
                })
                .collect();
            if let Err(e) = self.backend.insert_reading_values(&values).await {
                return Err(SyncError::SyncFailed {
                    stored: ids.len(),
                    total,
                    source: Box::new(e),
                });
            }
            debug!(
                "insert_readings: reading {} at {} with {} values",
                reading_id,
                reading.measured_at,
                values.len()
            );
        }
        info!("insert_readings: {} readings inserted", ids.len());
        Ok(ids)
    }

    /// Whether a reading already exists at the same point and time.
    pub async fn is_duplicate(&self, point_id: i64, measured_at: &str) -> SyncResult<bool> {
        let found = self
            .backend
            .find_reading(point_id, measured_at)
            .await
            .context(BackendSnafu {})?;
        Ok(found.is_some())
    }

    async fn upload_annotated(
        &self,
        batch: &ReadyBatch,
        volunteer_code: &str,
        source: &SourceFile,
        now: DateTime<Utc>,
    ) -> SyncResult<String> {
        let sheet = io_xlsx::read_source(&source.name, &source.bytes)?;
        let annotated = sheet.annotated(batch)?;
        let file_name = export_file_name(volunteer_code, now);
        Uploader::new(self.backend, self.bucket)
            .upload_volunteer_file(volunteer_code, &file_name, annotated, now)
            .await
    }

    /// Inserts the readings, then uploads the source file annotated with the
    /// answers, then removes the local file.
    ///
    /// A failure to remove the local file is only logged.
    pub async fn submit(
        &self,
        batch: &ReadyBatch,
        point_id: i64,
        volunteer_code: &str,
        source: &SourceFile,
        now: DateTime<Utc>,
    ) -> SyncResult<SyncReport> {
        let reading_ids = self.insert_readings(batch, point_id).await?;
        let stored = reading_ids.len();

        // The readings are in the backend from here on: any failure is
        // reported together with the number of readings kept.
        let uploaded_path = match self.upload_annotated(batch, volunteer_code, source, now).await {
            Ok(p) => p,
            Err(e) => {
                return Err(SyncError::SyncFailed {
                    stored,
                    total: stored,
                    source: Box::new(e),
                })
            }
        };

        let local_file_removed = match &source.local_path {
            Some(p) => match tokio::fs::remove_file(p).await {
                Ok(()) => {
                    debug!("submit: removed {}", p.display());
                    true
                }
                Err(e) => {
                    warn!("submit: could not remove {}: {}", p.display(), e);
                    false
                }
            },
            None => false,
        };

        Ok(SyncReport {
            reading_ids,
            uploaded_path,
            local_file_removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::io_xlsx::tests::probe_workbook;
    use crate::sync::memory::MemoryBackend;
    use crate::sync::upload::upload_path;

    fn batch(bytes: &[u8]) -> ReadyBatch {
        let sheet = io_xlsx::read_source("probe.xlsx", bytes).unwrap();
        let summary =
            import_rows(&sheet.headers, &sheet.rows(), &ImportRules::DEFAULT_RULES).unwrap();
        let mut seq = SurveySequencer::new(summary.rows).unwrap();
        while seq.current().is_some() {
            seq.begin().unwrap();
            let mut f = EnvironmentalFactors::default();
            for factor in Factor::ALL.iter() {
                f.set(*factor, false);
            }
            f.set(Factor::AlteredSmell, true);
            seq.complete(f).unwrap();
        }
        seq.into_batch().unwrap()
    }

    fn source(bytes: Vec<u8>, local_path: Option<PathBuf>) -> SourceFile {
        SourceFile {
            name: "probe.xlsx".to_string(),
            bytes,
            local_path,
        }
    }

    fn probe() -> Vec<u8> {
        probe_workbook(&[
            ("2024-03-01 10:00:00", "7.1", "412"),
            ("2024-03-01 11:00:00", "6.8", "-"),
        ])
    }

    #[tokio::test]
    async fn readings_then_values_in_order() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let bytes = probe();
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("probe.xlsx");
        std::fs::write(&local, &bytes).unwrap();

        let report = Submitter::new(&backend, "bucket")
            .submit(
                &batch(&bytes),
                8,
                "VOL1",
                &source(bytes.clone(), Some(local.clone())),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(report.reading_ids, vec![1, 2]);
        let readings = backend.readings();
        assert_eq!(readings[0].1.cheiro_alterado, Some(true));
        assert_eq!(readings[0].1.cor_alterada, Some(false));
        assert_eq!(readings[0].1.context.observacoes, None);

        let values = backend.reading_values();
        // pH and EC for the first reading, pH only for the second.
        assert_eq!(values.len(), 3);
        assert!(values
            .iter()
            .any(|v| v.reading_id == 1 && v.parameter_id == 2 && v.value == 7.1));
        assert!(values
            .iter()
            .any(|v| v.reading_id == 1 && v.parameter_id == 10 && v.value == 412.0));
        assert!(values.iter().all(|v| v.reading_id != 2 || v.parameter_id == 2));

        let calls = backend.calls();
        let inserts: Vec<&str> = calls
            .iter()
            .map(|c| c.as_str())
            .filter(|c| c.starts_with("insert"))
            .collect();
        assert_eq!(
            inserts,
            vec![
                "insert_reading",
                "insert_reading_values",
                "insert_reading",
                "insert_reading_values"
            ]
        );
        assert_eq!(calls.last().map(|c| c.as_str()), Some("upload_object"));

        let (uploaded, _) = backend.object(&report.uploaded_path).unwrap();
        let back = io_xlsx::read_source("out.xlsx", &uploaded).unwrap();
        assert_eq!(back.rows()[1].get("Cheiro_Alterado"), Some("Sim"));
        assert!(report.local_file_removed);
        assert!(!local.exists());
    }

    #[tokio::test]
    async fn failure_keeps_inserted_readings() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        // Reading 1 and its values go through, reading 2 fails.
        backend.fail_inserts_after(2);
        let bytes = probe();
        let err = Submitter::new(&backend, "bucket")
            .submit(&batch(&bytes), 8, "VOL1", &source(bytes.clone(), None), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::SyncFailed {
                stored: 1,
                total: 2,
                ..
            }
        ));
        assert_eq!(backend.readings().len(), 1);
        assert!(!backend.calls().iter().any(|c| c == "upload_object"));
    }

    #[tokio::test]
    async fn rejected_upload_keeps_inserted_readings() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let bytes = probe_workbook(&[("2024-03-01 10:00:00", "7.1", "412")]);
        let now = Utc::now();
        let taken = upload_path("VOL1", now, &export_file_name("VOL1", now));
        backend.add_object(&taken, vec![0]);

        let err = Submitter::new(&backend, "bucket")
            .submit(&batch(&bytes), 8, "VOL1", &source(bytes.clone(), None), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::SyncFailed {
                stored: 1,
                total: 1,
                ..
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains("1 of 1 readings were saved"));
        assert!(msg.contains("already exists"));
        assert_eq!(backend.readings().len(), 1);
        assert!(!backend.calls().iter().any(|c| c == "upload_object"));
    }

    #[tokio::test]
    async fn unreadable_source_after_inserts() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let bytes = probe();
        let broken = SourceFile {
            name: "probe.xlsx".to_string(),
            bytes: b"not a workbook".to_vec(),
            local_path: None,
        };
        let err = Submitter::new(&backend, "bucket")
            .submit(&batch(&bytes), 8, "VOL1", &broken, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::SyncFailed {
                stored: 2,
                total: 2,
                ..
            }
        ));
        assert_eq!(backend.readings().len(), 2);
    }

    #[tokio::test]
    async fn missing_local_file_is_not_an_error() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let bytes = probe();
        let report = Submitter::new(&backend, "bucket")
            .submit(
                &batch(&bytes),
                8,
                "VOL1",
                &source(bytes.clone(), Some(PathBuf::from("/nonexistent/probe.xlsx"))),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(!report.local_file_removed);
        assert_eq!(report.reading_ids.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_check() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let bytes = probe();
        let submitter = Submitter::new(&backend, "bucket");
        assert!(!submitter.is_duplicate(8, "2024-03-01 10:00:00").await.unwrap());
        submitter.insert_readings(&batch(&bytes), 8).await.unwrap();
        assert!(submitter.is_duplicate(8, "2024-03-01 10:00:00").await.unwrap());
        assert!(!submitter.is_duplicate(9, "2024-03-01 10:00:00").await.unwrap());
    }
}
