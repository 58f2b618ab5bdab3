// Upload of the annotated files to the storage bucket.
//
// Objects are stored under `{volunteer code}/{YYYY-MM}/{file name}`, the month
// being the one of the upload. An object is written once and never replaced.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Display;

use crate::sync::backend::Backend;
use crate::sync::io_common::file_extension;
use crate::sync::*;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const CSV_CONTENT_TYPE: &str = "text/csv";

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum UploadRejection {
    UnsupportedExtension { file_name: String },
    TooLarge { size: usize },
    InactiveVolunteer { code: String },
    AlreadyExists { path: String },
}

impl Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadRejection::UnsupportedExtension { file_name } => {
                write!(f, "{}: the file name must end with .csv or .xlsx", file_name)
            }
            UploadRejection::TooLarge { size } => write!(
                f,
                "the file is too large ({} bytes, at most {} MB)",
                size,
                MAX_UPLOAD_BYTES / (1024 * 1024)
            ),
            UploadRejection::InactiveVolunteer { code } => {
                write!(f, "volunteer {} is not active", code)
            }
            UploadRejection::AlreadyExists { path } => {
                write!(f, "{} already exists", path)
            }
        }
    }
}

pub fn upload_path(code: &str, now: DateTime<Utc>, file_name: &str) -> String {
    format!("{}/{}/{}", code, now.format("%Y-%m"), file_name)
}

/// `coleta-voluntarios-{code}-{timestamp}.xlsx`, with `:` and `.` of the
/// timestamp replaced so that the name is valid everywhere.
pub fn export_file_name(code: &str, now: DateTime<Utc>) -> String {
    let ts = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("coleta-voluntarios-{}-{}.xlsx", code, ts)
}

pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    match file_extension(file_name).as_deref() {
        Some("xlsx") => Some(XLSX_CONTENT_TYPE),
        Some("csv") => Some(CSV_CONTENT_TYPE),
        _ => None,
    }
}

fn reject<T>(reason: UploadRejection) -> SyncResult<T> {
    warn!("upload rejected: {}", reason);
    UploadRejectedSnafu { reason }.fail()
}

pub struct Uploader<'a> {
    backend: &'a dyn Backend,
    bucket: &'a str,
}

impl<'a> Uploader<'a> {
    pub fn new(backend: &'a dyn Backend, bucket: &'a str) -> Uploader<'a> {
        Uploader { backend, bucket }
    }

    /// Stores a file of a volunteer and returns its path in the bucket.
    ///
    /// The name and the size are checked before anything is sent.
    pub async fn upload_volunteer_file(
        &self,
        code: &str,
        file_name: &str,
        bytes: Vec<u8>,
        now: DateTime<Utc>,
    ) -> SyncResult<String> {
        let content_type = match content_type_for(file_name) {
            Some(c) => c,
            None => {
                return reject(UploadRejection::UnsupportedExtension {
                    file_name: file_name.to_string(),
                })
            }
        };
        if bytes.len() > MAX_UPLOAD_BYTES {
            return reject(UploadRejection::TooLarge { size: bytes.len() });
        }

        let active = self
            .backend
            .find_active_volunteer(code)
            .await
            .context(BackendSnafu {})?;
        if active.is_none() {
            return reject(UploadRejection::InactiveVolunteer {
                code: code.to_string(),
            });
        }

        let path = upload_path(code, now, file_name);
        let exists = self
            .backend
            .object_exists(self.bucket, &path)
            .await
            .context(BackendSnafu {})?;
        if exists {
            return reject(UploadRejection::AlreadyExists { path });
        }

        debug!(
            "upload_volunteer_file: {} ({} bytes, {})",
            path,
            bytes.len(),
            content_type
        );
        let stored = match self
            .backend
            .upload_object(self.bucket, &path, bytes, content_type)
            .await
        {
            Ok(p) => p,
            // Lost a race with another upload of the same file.
            Err(BackendError::Status { status: 409, .. }) => {
                return reject(UploadRejection::AlreadyExists { path })
            }
            Err(e) => return Err(SyncError::Backend { source: e }),
        };
        info!("upload_volunteer_file: stored {}", stored);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::MemoryBackend;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-12-31T23:59:59.5-03:00")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn naming() {
        // The month is the UTC month of the upload.
        assert_eq!(upload_path("VOL1", now(), "a.xlsx"), "VOL1/2025-01/a.xlsx");
        assert_eq!(
            export_file_name("VOL1", now()),
            "coleta-voluntarios-VOL1-2025-01-01T02-59-59-500Z.xlsx"
        );
        assert_eq!(content_type_for("a.csv"), Some("text/csv"));
        assert_eq!(content_type_for("a.xls"), None);
    }

    #[tokio::test]
    async fn upload_once() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let uploader = Uploader::new(&backend, "bucket");
        let path = uploader
            .upload_volunteer_file("VOL1", "a.xlsx", vec![1, 2, 3], now())
            .await
            .unwrap();
        assert_eq!(path, "VOL1/2025-01/a.xlsx");
        let (bytes, content_type) = backend.object(&path).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type, XLSX_CONTENT_TYPE);

        let err = uploader
            .upload_volunteer_file("VOL1", "a.xlsx", vec![4], now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UploadRejected {
                reason: UploadRejection::AlreadyExists { .. }
            }
        ));
        assert!(err.to_string().contains("already exists"));
        assert_eq!(backend.object(&path).unwrap().0, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn too_large_makes_no_call() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, true);
        let uploader = Uploader::new(&backend, "bucket");
        let err = uploader
            .upload_volunteer_file("VOL1", "a.xlsx", vec![0; 11 * 1024 * 1024], now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UploadRejected {
                reason: UploadRejection::TooLarge { .. }
            }
        ));
        assert!(err.to_string().contains("10 MB"));
        assert!(backend.calls().is_empty());

        let err = uploader
            .upload_volunteer_file("VOL1", "a.txt", vec![0], now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UploadRejected {
                reason: UploadRejection::UnsupportedExtension { .. }
            }
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn inactive_volunteer() {
        let backend = MemoryBackend::with_volunteer("VOL1", None, false);
        let uploader = Uploader::new(&backend, "bucket");
        let err = uploader
            .upload_volunteer_file("VOL1", "a.csv", vec![0], now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::UploadRejected {
                reason: UploadRejection::InactiveVolunteer { .. }
            }
        ));
        assert_eq!(backend.object("VOL1/2025-01/a.csv"), None);
    }
}
