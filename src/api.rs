//! HTTP client for the audio-processing backend
//!
//! Three operations, all carrying the session cookie and accepting JSON:
//! GET /token establishes the session and returns the streaming token,
//! POST /loadaudio submits a file as multipart (`audioFile` field),
//! GET /taskstatus reports progress of the current task.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;

use crate::config::ClientConfig;
use crate::task::TaskStatus;

/// Errors from backend HTTP operations.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// Network or transport failure.
    Network(String),
    /// Backend answered with a non-success status.
    Http { status: u16, message: String },
    /// Response body could not be decoded.
    Parse(String),
    /// HTTP client could not be constructed.
    ClientBuild(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(e) => write!(f, "Network error: {}", e),
            ApiError::Http { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            ApiError::Parse(e) => write!(f, "Failed to parse server response: {}", e),
            ApiError::ClientBuild(e) => write!(f, "Failed to build HTTP client: {}", e),
        }
    }
}

impl std::error::Error for ApiError {}

/// Session token returned by GET /token.
///
/// The call also sets the session cookie that scopes /loadaudio and
/// /taskstatus; the token itself only authenticates the streaming connection.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionToken {
    #[serde(default)]
    pub token: String,
}

/// Backend client with a shared cookie jar.
///
/// The cookie store is what ties upload, streaming and polling to the same
/// server-side task; one client instance is reused for the whole controller
/// lifetime to avoid repeated TLS handshakes.
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Establish or refresh the authenticated session.
    pub async fn fetch_token(&self) -> Result<SessionToken, ApiError> {
        let url = format!("{}/token", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<SessionToken>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Submit an audio file for processing. The response body is ignored
    /// beyond success/failure.
    pub async fn upload_audio(&self, path: &Path) -> Result<(), ApiError> {
        let file_bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Network(format!("failed to read {:?}: {}", path, e)))?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.bin")
            .to_string();

        log::info!("Uploading audio file: {} ({} bytes)", filename, file_bytes.len());

        let file_part = Part::bytes(file_bytes).file_name(filename);
        let form = Form::new().part("audioFile", file_part);

        let url = format!("{}/loadaudio", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Upload rejected ({}): {}", status.as_u16(), body);
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(())
    }

    /// One status poll tick.
    pub async fn task_status(&self) -> Result<TaskStatus, ApiError> {
        let url = format!("{}/taskstatus", self.base_url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<TaskStatus>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}
