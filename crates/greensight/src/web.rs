//! Web collaborator client.
//!
//! Calibration values and shot results go to the UI server over plain
//! HTTP. Every call is best-effort with a short timeout: the monitor
//! keeps working when the server is down, and failures are logged.

use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Environment variable overriding the server base URL.
pub const WEB_SERVER_URL_ENV: &str = "GREENSIGHT_WEB_SERVER_URL";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {0}")]
    Status(u16),
}

/// Blocking HTTP client against the UI server.
pub struct WebPublisher {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl WebPublisher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// Base URL from the environment override, or the default.
    pub fn from_env() -> Self {
        let base = std::env::var(WEB_SERVER_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::new(base)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `PUT /api/config/<key>` with `{"value": ...}`.
    pub fn put_config(&self, key: &str, value: &serde_json::Value) -> Result<(), PublishError> {
        let url = format!("{}/api/config/{key}", self.base_url);
        let response = self.client.put(url).json(&json!({ "value": value })).send()?;
        if !response.status().is_success() {
            return Err(PublishError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    /// Best-effort calibration update; failure is logged, never fatal.
    pub fn update_calibration(&self, key: &str, value: &serde_json::Value) -> bool {
        match self.put_config(key, value) {
            Ok(()) => {
                info!(key, "calibration pushed to web server");
                true
            }
            Err(err) => {
                warn!(key, %err, "web server unreachable; calibration saved locally only");
                false
            }
        }
    }

    /// Best-effort shot publication.
    pub fn publish_shot(&self, shot: &serde_json::Value) -> bool {
        let url = format!("{}/api/shot", self.base_url);
        let sent = self
            .client
            .put(url)
            .json(shot)
            .send()
            .map(|r| r.status().is_success());
        match sent {
            Ok(true) => true,
            Ok(false) | Err(_) => {
                warn!("failed to publish shot to web server");
                false
            }
        }
    }

    /// Probe `GET /health`.
    pub fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        self.client
            .get(url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_server_is_non_fatal() {
        // A port nothing listens on; calls report failure, not panic.
        let publisher = WebPublisher::new("http://127.0.0.1:9");
        assert!(!publisher.update_calibration("k", &serde_json::json!(1.0)));
        assert!(!publisher.is_available());
        assert!(!publisher.publish_shot(&serde_json::json!({"ok": false})));
    }

    #[test]
    fn default_base_url_is_local() {
        std::env::remove_var(WEB_SERVER_URL_ENV);
        let publisher = WebPublisher::from_env();
        assert!(publisher.base_url().starts_with("http://127.0.0.1"));
    }
}
