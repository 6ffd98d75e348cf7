use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration for the backend endpoints and cadences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the HTTP backend (/token, /loadaudio, /taskstatus).
    pub base_url: String,

    /// URL of the duplex streaming endpoint; the session token is appended
    /// as a `token` query parameter.
    pub stream_url: String,

    /// Cadence of the task-status poll loop.
    pub poll_interval_ms: u64,

    /// Consecutive transport/parse failures tolerated before polling gives up.
    pub max_poll_retries: u32,

    /// Flush interval of the chunk recorder while streaming live audio.
    pub chunk_interval_ms: u64,

    /// Per-request timeout for the HTTP client.
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            stream_url: "wss://localhost:8081/ws".to_string(),
            poll_interval_ms: 1000,
            max_poll_retries: 3,
            chunk_interval_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load configuration from a JSON file, falling back to defaults on any
    /// error. A missing file is normal; anything else logs a warning.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ClientConfig>(&contents) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Config: failed to parse {:?}: {}", path, e);
                    ClientConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ClientConfig::default(),
            Err(e) => {
                log::warn!("Config: failed to read {:?}: {}", path, e);
                ClientConfig::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_deployment() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_poll_retries, 3);
        assert_eq!(config.chunk_interval_ms, 1000);
        assert!(config.base_url.starts_with("http://"));
        assert!(config.stream_url.starts_with("wss://"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let config = ClientConfig::load(Path::new("/nonexistent/protokol.json"));
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"base_url":"http://example.test:9000"}}"#).unwrap();
        let config = ClientConfig::load(file.path());
        assert_eq!(config.base_url, "http://example.test:9000");
        assert_eq!(config.max_poll_retries, 3);
    }

    #[test]
    fn load_garbage_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let config = ClientConfig::load(file.path());
        assert_eq!(config.base_url, ClientConfig::default().base_url);
    }
}
