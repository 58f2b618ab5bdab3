// The persisted session: who is logged in and at which point they collect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::sync::backend::{Backend, Point, Volunteer, VolunteerRecord};
use crate::sync::*;

pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Code of the demo account of early builds. Sessions using it are discarded.
const RESERVED_TEST_CODE: &str = "TEST001";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub volunteer: Volunteer,
    #[serde(rename = "selectedPointId")]
    pub selected_point_id: Option<i64>,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

impl Session {
    /// A new session. The primary point is selected, or the first one.
    pub fn new(volunteer: Volunteer, now: DateTime<Utc>) -> Session {
        let selected_point_id = volunteer
            .points
            .iter()
            .find(|p| p.is_primary)
            .or_else(|| volunteer.points.first())
            .map(|p| p.id);
        Session {
            schema_version: SESSION_SCHEMA_VERSION,
            volunteer,
            selected_point_id,
            saved_at: now,
        }
    }

    pub fn current_point(&self) -> Option<&Point> {
        let id = self.selected_point_id?;
        self.volunteer.points.iter().find(|p| p.id == id)
    }

    pub fn select_point(&mut self, point_id: i64) -> SyncResult<&Point> {
        match self.volunteer.points.iter().find(|p| p.id == point_id) {
            Some(p) => {
                self.selected_point_id = Some(point_id);
                Ok(p)
            }
            None => UnknownPointSnafu { point_id }.fail(),
        }
    }

    /// Checks that a session read from disk can be trusted.
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version != SESSION_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} (expected {})",
                self.schema_version, SESSION_SCHEMA_VERSION
            ));
        }
        let code = self.volunteer.code.trim();
        if code.is_empty() {
            return Err("empty volunteer code".to_string());
        }
        if code == RESERVED_TEST_CODE {
            return Err("test account".to_string());
        }
        if let Some(id) = self.selected_point_id {
            if !self.volunteer.points.iter().any(|p| p.id == id) {
                return Err(format!("selected point {} is not a point of the volunteer", id));
            }
        }
        Ok(())
    }
}

/// The points of a volunteer: the associated points if any, else the single
/// point of the volunteer record.
pub async fn resolve_points(
    backend: &dyn Backend,
    record: &VolunteerRecord,
) -> SyncResult<Vec<Point>> {
    let points = backend
        .list_points_for_volunteer(record.id)
        .await
        .context(BackendSnafu {})?;
    if !points.is_empty() {
        debug!("resolve_points: {} associated points", points.len());
        return Ok(points);
    }
    match record.point_id {
        Some(point_id) => {
            let point = backend.find_point(point_id).await.context(BackendSnafu {})?;
            match point {
                Some(mut p) => {
                    p.is_primary = true;
                    Ok(vec![p])
                }
                None => {
                    warn!("resolve_points: point {} not found", point_id);
                    Ok(vec![])
                }
            }
        }
        None => Ok(vec![]),
    }
}

pub fn volunteer_from_record(record: &VolunteerRecord, points: Vec<Point>) -> Volunteer {
    Volunteer {
        id: record.id,
        code: record.code.clone(),
        name: record.name.clone(),
        points,
    }
}

pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: AsRef<Path>>(path: P) -> SessionStore {
        SessionStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }

    /// Reads the stored session.
    ///
    /// A session that cannot be read back or fails validation is removed
    /// entirely and None is returned.
    pub async fn load(&self) -> SyncResult<Option<Session>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::ReadingFile {
                    source: e,
                    path: self.path_str(),
                })
            }
        };
        let problem = match serde_json::from_str::<Session>(&contents) {
            Ok(session) => match session.validate() {
                Ok(()) => return Ok(Some(session)),
                Err(reason) => reason,
            },
            Err(e) => format!("unreadable session: {}", e),
        };
        warn!("load: discarding stored session: {}", problem);
        self.clear().await?;
        Ok(None)
    }

    /// Like `load`, but a missing session is an error.
    pub async fn require(&self) -> SyncResult<Session> {
        self.load().await?.context(NotLoggedInSnafu {})
    }

    pub async fn save(&self, session: &Session) -> SyncResult<()> {
        let js = serde_json::to_string_pretty(session).context(ParsingJsonSnafu {
            path: self.path_str(),
        })?;
        tokio::fs::write(&self.path, js)
            .await
            .context(WritingFileSnafu {
                path: self.path_str(),
            })?;
        debug!("save: session written to {}", self.path_str());
        Ok(())
    }

    pub async fn clear(&self) -> SyncResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::WritingFile {
                source: e,
                path: self.path_str(),
            }),
        }
    }
}
