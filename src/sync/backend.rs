// The contract with the remote backend: the tables read and written by the
// client, and the object storage bucket receiving the annotated files.

use async_trait::async_trait;
use probe_import::survey::AnsweredRow;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("request to {url} failed: {source}"))]
    Request { source: reqwest::Error, url: String },
    #[snafu(display("{url} answered with status {status}: {body}"))]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[snafu(display("unexpected answer from {url}: {source}"))]
    Decode {
        source: serde_json::Error,
        url: String,
    },
    #[snafu(display("no answer from the server after {seconds}s"))]
    Timeout { seconds: u64 },
    #[snafu(display("{message}"))]
    Unexpected { message: String },
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub id: i64,
    pub name: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct River {
    pub id: i64,
    pub name: String,
    pub city: Option<City>,
}

/// A collection point, with its river and city when the backend provides them.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_primary: bool,
    pub river: Option<River>,
}

impl Point {
    /// "Point, River - City" as far as known.
    pub fn label(&self) -> String {
        match &self.river {
            Some(River {
                name: river,
                city: Some(city),
                ..
            }) => format!("{}, {} - {}", self.name, river, city.name),
            Some(river) => format!("{}, {}", self.name, river.name),
            None => self.name.clone(),
        }
    }
}

/// A row of the `volunteers` table.
#[derive(Eq, PartialEq, Clone, Deserialize)]
pub struct VolunteerRecord {
    pub id: i64,
    pub code: String,
    #[serde(rename = "nome")]
    pub name: String,
    pub password_hash: Option<String>,
    /// Single point of the older data model, used when no association exists.
    pub point_id: Option<i64>,
    #[serde(default)]
    pub is_active: bool,
}

// The stored credential must never reach the logs.
impl std::fmt::Debug for VolunteerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolunteerRecord")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("name", &self.name)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .field("point_id", &self.point_id)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// An authenticated volunteer and the points they collect at.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub points: Vec<Point>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadingContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observacoes: Option<String>,
}

/// A row to insert in the `readings` table.
#[derive(Eq, PartialEq, Debug, Clone, Serialize)]
pub struct NewReading {
    pub point_id: i64,
    pub measured_at: String,
    pub cor_alterada: Option<bool>,
    pub cheiro_alterado: Option<bool>,
    pub chuva_48h: Option<bool>,
    pub residuos_visiveis: Option<bool>,
    pub volume_reduzido: Option<bool>,
    pub context: ReadingContext,
}

impl NewReading {
    pub fn from_answered(point_id: i64, answered: &AnsweredRow) -> NewReading {
        let f = &answered.factors;
        NewReading {
            point_id,
            measured_at: answered.row.measured_at.clone(),
            cor_alterada: f.altered_color,
            cheiro_alterado: f.altered_smell,
            chuva_48h: f.rain_last_48h,
            residuos_visiveis: f.visible_residue,
            volume_reduzido: f.reduced_volume,
            context: ReadingContext {
                observacoes: f.notes.clone(),
            },
        }
    }
}

/// A row to insert in the `reading_values` table.
#[derive(PartialEq, Debug, Clone, Copy, Serialize)]
pub struct NewReadingValue {
    pub reading_id: i64,
    pub parameter_id: u32,
    pub value: f64,
}

#[derive(PartialEq, Debug, Clone, Deserialize)]
pub struct StoredReadingValue {
    pub parameter_id: u32,
    pub value: f64,
}

/// A reading as read back from the backend.
#[derive(PartialEq, Debug, Clone, Deserialize)]
pub struct StoredReading {
    pub id: i64,
    pub point_id: i64,
    pub measured_at: String,
    pub cor_alterada: Option<bool>,
    pub cheiro_alterado: Option<bool>,
    pub chuva_48h: Option<bool>,
    pub residuos_visiveis: Option<bool>,
    pub volume_reduzido: Option<bool>,
    #[serde(default)]
    pub context: Option<ReadingContext>,
    #[serde(default)]
    pub reading_values: Vec<StoredReadingValue>,
}

#[derive(Eq, PartialEq, Debug, Clone, Deserialize)]
pub struct Parameter {
    pub id: u32,
    pub description: String,
    pub unit: Option<String>,
}

/// Everything the client needs from the backend.
///
/// Implementations do not retry. Every call is awaited by the caller before
/// the next one is issued.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A lightweight query used to check that the backend can be reached.
    async fn ping(&self) -> Result<(), BackendError>;

    async fn find_active_volunteer(
        &self,
        code: &str,
    ) -> Result<Option<VolunteerRecord>, BackendError>;

    /// The point with its river and city.
    async fn find_point(&self, point_id: i64) -> Result<Option<Point>, BackendError>;

    async fn list_points_for_volunteer(&self, volunteer_id: i64)
        -> Result<Vec<Point>, BackendError>;

    /// Inserts a reading and returns its identifier.
    async fn insert_reading(&self, reading: &NewReading) -> Result<i64, BackendError>;

    async fn insert_reading_values(&self, values: &[NewReadingValue]) -> Result<(), BackendError>;

    /// The latest readings of a point, newest first, with their values.
    async fn list_readings_for_point(
        &self,
        point_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredReading>, BackendError>;

    /// Looks for a reading at the same point and time.
    async fn find_reading(
        &self,
        point_id: i64,
        measured_at: &str,
    ) -> Result<Option<i64>, BackendError>;

    async fn list_parameters(&self) -> Result<Vec<Parameter>, BackendError>;

    async fn object_exists(&self, bucket: &str, path: &str) -> Result<bool, BackendError>;

    /// Stores an object. Never overwrites an existing one.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volunteer_record_from_table_row() {
        let js = r#"{"id": 7, "code": "VOL1", "nome": "Ana", "password_hash": "MTIzNA==",
                     "point_id": 3, "is_active": true, "created_at": "2024-01-01"}"#;
        let v: VolunteerRecord = serde_json::from_str(js).unwrap();
        assert_eq!(v.code, "VOL1");
        assert_eq!(v.name, "Ana");
        assert_eq!(v.point_id, Some(3));
        assert!(v.is_active);
        let dbg = format!("{:?}", v);
        assert!(!dbg.contains("MTIzNA=="));
    }

    #[test]
    fn point_label() {
        let js = r#"{"id": 1, "name": "P1", "river": {"id": 2, "name": "Rio Doce",
                     "city": {"id": 3, "name": "Colatina"}}}"#;
        let p: Point = serde_json::from_str(js).unwrap();
        assert!(!p.is_primary);
        assert_eq!(p.label(), "P1, Rio Doce - Colatina");
    }

    #[test]
    fn empty_notes_are_not_sent() {
        let js = serde_json::to_value(ReadingContext::default()).unwrap();
        assert_eq!(js, serde_json::json!({}));
    }
}
