use collector::CollectorConfig;
use serde::Deserialize;
use std::time::Duration;
use youtube_client::{ClientConfig, DEFAULT_DATA_API_BASE_URL, DEFAULT_WEB_BASE_URL};

/// Process configuration, read from `LIVECHAT_`-prefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    /// `:memory:` keeps everything in process memory
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub api_key: String,
    #[serde(default = "default_data_api_base_url")]
    pub data_api_base_url: String,
    #[serde(default = "default_web_base_url")]
    pub web_base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_poll_fallback_interval_ms")]
    pub poll_fallback_interval_ms: u64,
    #[serde(default = "default_archive_max_retries")]
    pub archive_max_retries: u32,
    #[serde(default = "default_archive_retry_delay_ms")]
    pub archive_retry_delay_ms: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_cached_page_size")]
    pub cached_page_size: u64,
    /// Zero disables the periodic sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_retention_interval_secs")]
    pub retention_interval_secs: u64,
    #[serde(default)]
    pub log_json: bool,
}

fn default_grpc_addr() -> String {
    "[::1]:50051".to_string()
}

fn default_http_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_path() -> String {
    "livechat.db".to_string()
}

fn default_data_api_base_url() -> String {
    DEFAULT_DATA_API_BASE_URL.to_string()
}

fn default_web_base_url() -> String {
    DEFAULT_WEB_BASE_URL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_poll_fallback_interval_ms() -> u64 {
    5_000
}

fn default_archive_max_retries() -> u32 {
    3
}

fn default_archive_retry_delay_ms() -> u64 {
    5_000
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_cached_page_size() -> u64 {
    500
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_interval_secs() -> u64 {
    3_600
}

impl Config {
    pub const PREFIX: &'static str = "LIVECHAT_";

    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed(Self::PREFIX).from_env()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.api_key.clone(),
            data_api_base_url: self.data_api_base_url.clone(),
            web_base_url: self.web_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            poll_fallback_interval: Duration::from_millis(self.poll_fallback_interval_ms),
            archive_max_retries: self.archive_max_retries,
            archive_retry_delay: Duration::from_millis(self.archive_retry_delay_ms),
            subscriber_buffer: self.subscriber_buffer,
            cached_page_size: self.cached_page_size,
        }
    }

    pub fn retention_window(&self) -> Option<chrono::Duration> {
        (self.retention_days > 0).then(|| chrono::Duration::days(i64::from(self.retention_days)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, envy::Error> {
        envy::prefixed(Config::PREFIX).from_iter(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[("LIVECHAT_API_KEY", "secret")]).unwrap();
        assert_eq!(config.grpc_addr, "[::1]:50051");
        assert_eq!(config.http_addr, "127.0.0.1:8080");
        assert_eq!(config.database_path, "livechat.db");
        assert_eq!(config.data_api_base_url, "https://www.googleapis.com");
        assert_eq!(config.archive_max_retries, 3);
        assert_eq!(config.subscriber_buffer, 64);
        assert!(!config.log_json);

        let collector = config.collector_config();
        assert_eq!(collector.poll_fallback_interval, Duration::from_secs(5));
        assert_eq!(collector.archive_retry_delay, Duration::from_secs(5));
        assert_eq!(config.client_config().timeout, Duration::from_secs(30));
        assert_eq!(config.retention_window(), Some(chrono::Duration::days(30)));
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            ("LIVECHAT_API_KEY", "secret"),
            ("LIVECHAT_DATABASE_PATH", ":memory:"),
            ("LIVECHAT_ARCHIVE_MAX_RETRIES", "5"),
            ("LIVECHAT_RETENTION_DAYS", "0"),
            ("LIVECHAT_LOG_JSON", "true"),
            ("OTHER_API_KEY", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.database_path, ":memory:");
        assert_eq!(config.archive_max_retries, 5);
        assert!(config.log_json);
        assert!(config.retention_window().is_none());
    }

    #[test]
    fn test_api_key_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&[
            ("LIVECHAT_ARCHIVE_MAX_RETRIES", "many"),
            ("LIVECHAT_API_KEY", "k")
        ])
        .is_err());
    }
}
