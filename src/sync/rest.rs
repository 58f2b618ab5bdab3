// HTTP client for the backend: PostgREST-style tables under `/rest/v1` and
// the object storage under `/storage/v1`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration;

use crate::sync::backend::*;
use crate::sync::config_reader::BackendConfig;
use log::debug;

const POINT_SELECT: &str = "*,river:rivers(*,city:cities(*))";
const READING_SELECT: &str = "*,reading_values(parameter_id,value)";

pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    /// Key sent to the storage endpoints.
    storage_key: String,
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Deserialize)]
struct VolunteerPointRow {
    #[serde(default)]
    is_primary: bool,
    point: Option<Point>,
}

#[derive(Deserialize)]
struct StorageEntry {
    name: String,
}

#[derive(Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    search: &'a str,
    limit: u32,
    offset: u32,
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

/// Splits `dir/sub/name` into `dir/sub` and `name`.
fn split_object_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Storage answers 409, or 400 with a "Duplicate" body, when the object exists.
fn is_duplicate_object(status: u16, body: &str) -> bool {
    status == 409 || (status == 400 && (body.contains("Duplicate") || body.contains("409")))
}

impl RestBackend {
    pub fn new(config: &BackendConfig, connect_timeout: Duration) -> Result<RestBackend, BackendError> {
        let base_url = config.url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .context(RequestSnafu {
                url: base_url.clone(),
            })?;
        Ok(RestBackend {
            client,
            base_url,
            api_key: config.api_key.clone(),
            storage_key: config
                .service_key
                .clone()
                .unwrap_or_else(|| config.api_key.clone()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn table_get(&self, table: &str) -> RequestBuilder {
        self.client
            .get(self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn table_post(&self, table: &str) -> RequestBuilder {
        self.client
            .post(self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn storage_post(&self, url: &str) -> RequestBuilder {
        self.client
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.storage_key)
    }

    /// Sends a request and returns the body of a successful answer.
    async fn send(&self, req: RequestBuilder, url: &str) -> Result<String, BackendError> {
        let resp = req.send().await.context(RequestSnafu { url })?;
        let status = resp.status();
        let body = resp.text().await.context(RequestSnafu { url })?;
        if !status.is_success() {
            debug!("send: {} -> {}: {}", url, status, body);
            return StatusSnafu {
                url,
                status: status.as_u16(),
                body,
            }
            .fail();
        }
        Ok(body)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        let url = self.table_url(table);
        let body = self.send(self.table_get(table).query(query), &url).await?;
        serde_json::from_str(&body).context(DecodeSnafu { url })
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn ping(&self) -> Result<(), BackendError> {
        let _: Vec<IdRow> = self
            .fetch(
                "volunteers",
                &[("select", "id".to_string()), ("limit", "1".to_string())],
            )
            .await?;
        Ok(())
    }

    async fn find_active_volunteer(
        &self,
        code: &str,
    ) -> Result<Option<VolunteerRecord>, BackendError> {
        let rows: Vec<VolunteerRecord> = self
            .fetch(
                "volunteers",
                &[
                    ("select", "*".to_string()),
                    ("code", eq(code)),
                    ("is_active", eq(true)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_point(&self, point_id: i64) -> Result<Option<Point>, BackendError> {
        let rows: Vec<Point> = self
            .fetch(
                "points",
                &[
                    ("select", POINT_SELECT.to_string()),
                    ("id", eq(point_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_points_for_volunteer(
        &self,
        volunteer_id: i64,
    ) -> Result<Vec<Point>, BackendError> {
        let rows: Vec<VolunteerPointRow> = self
            .fetch(
                "volunteer_points",
                &[
                    ("select", format!("is_primary,point:points({})", POINT_SELECT)),
                    ("volunteer_id", eq(volunteer_id)),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                r.point.map(|mut p| {
                    p.is_primary = r.is_primary;
                    p
                })
            })
            .collect())
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<i64, BackendError> {
        let url = self.table_url("readings");
        let req = self
            .table_post("readings")
            .header("Prefer", "return=representation")
            .query(&[("select", "id")])
            .json(reading);
        let body = self.send(req, &url).await?;
        let rows: Vec<IdRow> = serde_json::from_str(&body).context(DecodeSnafu { url: &url })?;
        match rows.first() {
            Some(r) => Ok(r.id),
            None => UnexpectedSnafu {
                message: format!("{}: the inserted reading was not returned", url),
            }
            .fail(),
        }
    }

    async fn insert_reading_values(&self, values: &[NewReadingValue]) -> Result<(), BackendError> {
        if values.is_empty() {
            return Ok(());
        }
        let url = self.table_url("reading_values");
        let req = self
            .table_post("reading_values")
            .header("Prefer", "return=minimal")
            .json(values);
        self.send(req, &url).await?;
        Ok(())
    }

    async fn list_readings_for_point(
        &self,
        point_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredReading>, BackendError> {
        self.fetch(
            "readings",
            &[
                ("select", READING_SELECT.to_string()),
                ("point_id", eq(point_id)),
                ("order", "measured_at.desc".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn find_reading(
        &self,
        point_id: i64,
        measured_at: &str,
    ) -> Result<Option<i64>, BackendError> {
        let rows: Vec<IdRow> = self
            .fetch(
                "readings",
                &[
                    ("select", "id".to_string()),
                    ("point_id", eq(point_id)),
                    ("measured_at", eq(measured_at)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.first().map(|r| r.id))
    }

    async fn list_parameters(&self) -> Result<Vec<Parameter>, BackendError> {
        self.fetch(
            "parameters",
            &[
                ("select", "*".to_string()),
                ("order", "description".to_string()),
            ],
        )
        .await
    }

    async fn object_exists(&self, bucket: &str, path: &str) -> Result<bool, BackendError> {
        let (prefix, name) = split_object_path(path);
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, bucket);
        let req = self.storage_post(&url).json(&ListRequest {
            prefix,
            search: name,
            limit: 100,
            offset: 0,
        });
        let body = self.send(req, &url).await?;
        let entries: Vec<StorageEntry> =
            serde_json::from_str(&body).context(DecodeSnafu { url: &url })?;
        Ok(entries.iter().any(|e| e.name == name))
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        let req = self
            .storage_post(&url)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes);
        match self.send(req, &url).await {
            Ok(_) => Ok(path.to_string()),
            Err(BackendError::Status { url, status, body }) if is_duplicate_object(status, &body) => {
                Err(BackendError::Status {
                    url,
                    status: 409,
                    body,
                })
            }
            Err(e) => Err(e),
        }
    }
}
