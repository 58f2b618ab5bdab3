use crate::sync::*;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "probesync.json";
pub const DEFAULT_BUCKET: &str = "coleta-voluntarios";
pub const DEFAULT_SESSION_PATH: &str = ".probesync-session.json";

pub const API_KEY_ENV: &str = "PROBESYNC_API_KEY";
pub const SERVICE_KEY_ENV: &str = "PROBESYNC_SERVICE_KEY";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
    /// Key with write access to the storage bucket. The api key is used when absent.
    #[serde(rename = "serviceKey")]
    pub service_key: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    #[serde(rename = "sessionPath", default = "default_session_path")]
    pub session_path: String,
    #[serde(rename = "connectTimeoutSecs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(rename = "historyLimit", default = "default_history_limit")]
    pub history_limit: usize,
}

impl AppConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Replaces the keys with the ones found in the environment, if any.
    fn apply_env(mut self, api_key: Option<String>, service_key: Option<String>) -> AppConfig {
        if let Some(k) = api_key.filter(|k| !k.is_empty()) {
            self.backend.api_key = k;
        }
        if let Some(k) = service_key.filter(|k| !k.is_empty()) {
            self.backend.service_key = Some(k);
        }
        self
    }
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_session_path() -> String {
    DEFAULT_SESSION_PATH.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_history_limit() -> usize {
    50
}

pub fn parse_config(contents: &str, path: &str) -> SyncResult<AppConfig> {
    let config: AppConfig = serde_json::from_str(contents).context(ParsingJsonSnafu { path })?;
    let config = config.apply_env(
        std::env::var(API_KEY_ENV).ok(),
        std::env::var(SERVICE_KEY_ENV).ok(),
    );
    if config.backend.url.trim().is_empty() {
        whatever!("{}: the backend url is empty", path);
    }
    if config.backend.api_key.is_empty() {
        whatever!(
            "{}: no api key (set backend.apiKey or the {} variable)",
            path,
            API_KEY_ENV
        );
    }
    Ok(config)
}

pub async fn read_config(path: &str) -> SyncResult<AppConfig> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .context(OpeningJsonSnafu { path })?;
    let config = parse_config(&contents, path)?;
    debug!(
        "read_config: backend {} bucket {} session {}",
        config.backend.url, config.backend.bucket, config.session_path
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let js = r#"{"backend": {"url": "https://example.org", "apiKey": "anon"}}"#;
        let config: AppConfig = serde_json::from_str(js).unwrap();
        assert_eq!(config.backend.bucket, "coleta-voluntarios");
        assert_eq!(config.backend.service_key, None);
        assert_eq!(config.session_path, ".probesync-session.json");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.history_limit, 50);
    }

    #[test]
    fn env_overrides_keys() {
        let js = r#"{"backend": {"url": "https://example.org", "apiKey": "anon"}}"#;
        let config: AppConfig = serde_json::from_str(js).unwrap();
        let config = config.apply_env(Some("other".to_string()), Some("".to_string()));
        assert_eq!(config.backend.api_key, "other");
        assert_eq!(config.backend.service_key, None);
    }

    #[test]
    fn bad_json_is_reported_with_path() {
        let err = parse_config("{", "conf.json").unwrap_err();
        assert!(matches!(err, SyncError::ParsingJson { .. }));
        assert!(err.to_string().contains("conf.json"));
    }
}
