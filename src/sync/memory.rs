// In-memory backend for the tests. Every call is recorded by name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::sync::backend::*;

#[derive(Default)]
struct MemoryState {
    volunteers: Vec<VolunteerRecord>,
    points: Vec<Point>,
    volunteer_points: Vec<(i64, Point)>,
    readings: Vec<(i64, NewReading)>,
    values: Vec<NewReadingValue>,
    parameters: Vec<Parameter>,
    objects: HashMap<String, (Vec<u8>, String)>,
    calls: Vec<String>,
    offline: bool,
    // Insert calls that succeed before every insert fails.
    inserts_before_failure: Option<usize>,
    inserts: usize,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }

    pub fn with_volunteer(code: &str, password_hash: Option<&str>, active: bool) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.add_volunteer(VolunteerRecord {
            id: 1,
            code: code.to_string(),
            name: format!("Volunteer {}", code),
            password_hash: password_hash.map(|s| s.to_string()),
            point_id: None,
            is_active: active,
        });
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: &str) -> Result<(), BackendError> {
        let mut st = self.lock();
        st.calls.push(call.to_string());
        if st.offline {
            return Err(BackendError::Unexpected {
                message: "offline".to_string(),
            });
        }
        Ok(())
    }

    fn check_insert(&self) -> Result<(), BackendError> {
        let mut st = self.lock();
        if let Some(limit) = st.inserts_before_failure {
            if st.inserts >= limit {
                return Err(BackendError::Status {
                    url: "memory://insert".to_string(),
                    status: 500,
                    body: "insert failed".to_string(),
                });
            }
        }
        st.inserts += 1;
        Ok(())
    }

    pub fn add_volunteer(&self, record: VolunteerRecord) {
        self.lock().volunteers.push(record);
    }

    pub fn volunteer(&self, code: &str) -> Option<VolunteerRecord> {
        self.lock().volunteers.iter().find(|v| v.code == code).cloned()
    }

    pub fn set_legacy_point(&self, code: &str, point_id: i64) {
        if let Some(v) = self.lock().volunteers.iter_mut().find(|v| v.code == code) {
            v.point_id = Some(point_id);
        }
    }

    pub fn add_point(&self, point: Point) {
        self.lock().points.push(point);
    }

    pub fn associate_point(&self, volunteer_id: i64, point: Point) {
        self.lock().volunteer_points.push((volunteer_id, point));
    }

    pub fn add_parameter(&self, id: u32, description: &str, unit: Option<&str>) {
        self.lock().parameters.push(Parameter {
            id,
            description: description.to_string(),
            unit: unit.map(|s| s.to_string()),
        });
    }

    pub fn add_object(&self, path: &str, bytes: Vec<u8>) {
        self.lock()
            .objects
            .insert(path.to_string(), (bytes, "application/octet-stream".to_string()));
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Makes every insert fail once `n` inserts went through.
    pub fn fail_inserts_after(&self, n: usize) {
        self.lock().inserts_before_failure = Some(n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn readings(&self) -> Vec<(i64, NewReading)> {
        self.lock().readings.clone()
    }

    pub fn reading_values(&self) -> Vec<NewReadingValue> {
        self.lock().values.clone()
    }

    pub fn object(&self, path: &str) -> Option<(Vec<u8>, String)> {
        self.lock().objects.get(path).cloned()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        self.record("ping")
    }

    async fn find_active_volunteer(
        &self,
        code: &str,
    ) -> Result<Option<VolunteerRecord>, BackendError> {
        self.record("find_active_volunteer")?;
        Ok(self
            .lock()
            .volunteers
            .iter()
            .find(|v| v.code == code && v.is_active)
            .cloned())
    }

    async fn find_point(&self, point_id: i64) -> Result<Option<Point>, BackendError> {
        self.record("find_point")?;
        Ok(self.lock().points.iter().find(|p| p.id == point_id).cloned())
    }

    async fn list_points_for_volunteer(
        &self,
        volunteer_id: i64,
    ) -> Result<Vec<Point>, BackendError> {
        self.record("list_points_for_volunteer")?;
        Ok(self
            .lock()
            .volunteer_points
            .iter()
            .filter(|(vid, _)| *vid == volunteer_id)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<i64, BackendError> {
        self.record("insert_reading")?;
        self.check_insert()?;
        let mut st = self.lock();
        let id = (st.readings.len() + 1) as i64;
        st.readings.push((id, reading.clone()));
        Ok(id)
    }

    async fn insert_reading_values(&self, values: &[NewReadingValue]) -> Result<(), BackendError> {
        self.record("insert_reading_values")?;
        self.check_insert()?;
        self.lock().values.extend_from_slice(values);
        Ok(())
    }

    async fn list_readings_for_point(
        &self,
        point_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredReading>, BackendError> {
        self.record("list_readings_for_point")?;
        let st = self.lock();
        let mut res: Vec<StoredReading> = st
            .readings
            .iter()
            .filter(|(_, r)| r.point_id == point_id)
            .map(|(id, r)| StoredReading {
                id: *id,
                point_id: r.point_id,
                measured_at: r.measured_at.clone(),
                cor_alterada: r.cor_alterada,
                cheiro_alterado: r.cheiro_alterado,
                chuva_48h: r.chuva_48h,
                residuos_visiveis: r.residuos_visiveis,
                volume_reduzido: r.volume_reduzido,
                context: Some(r.context.clone()),
                reading_values: st
                    .values
                    .iter()
                    .filter(|v| v.reading_id == *id)
                    .map(|v| StoredReadingValue {
                        parameter_id: v.parameter_id,
                        value: v.value,
                    })
                    .collect(),
            })
            .collect();
        res.sort_by(|a, b| b.measured_at.cmp(&a.measured_at));
        res.truncate(limit);
        Ok(res)
    }

    async fn find_reading(
        &self,
        point_id: i64,
        measured_at: &str,
    ) -> Result<Option<i64>, BackendError> {
        self.record("find_reading")?;
        Ok(self
            .lock()
            .readings
            .iter()
            .find(|(_, r)| r.point_id == point_id && r.measured_at == measured_at)
            .map(|(id, _)| *id))
    }

    async fn list_parameters(&self) -> Result<Vec<Parameter>, BackendError> {
        self.record("list_parameters")?;
        Ok(self.lock().parameters.clone())
    }

    async fn object_exists(&self, _bucket: &str, path: &str) -> Result<bool, BackendError> {
        self.record("object_exists")?;
        Ok(self.lock().objects.contains_key(path))
    }

    async fn upload_object(
        &self,
        _bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        self.record("upload_object")?;
        let mut st = self.lock();
        if st.objects.contains_key(path) {
            return Err(BackendError::Status {
                url: format!("memory://{}", path),
                status: 409,
                body: "The resource already exists".to_string(),
            });
        }
        st.objects
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(path.to_string())
    }
}
