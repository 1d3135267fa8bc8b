use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    pub max_message_length: usize,
    /// When true, `list_messages` flips the requester's unread messages to read.
    pub mark_read_on_open: bool,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            database_url: "sqlite:data/gigboard.db".to_string(),
            max_connections: 5,
            log_level: "info".to_string(),
            max_message_length: 2048,
            mark_read_on_open: true,
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env::var("SERVER_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env::var("DB_MAX_CONNECTIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_connections),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            max_message_length: env::var("MAX_MESSAGE_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_message_length),
            mark_read_on_open: env::var("MARK_READ_ON_OPEN").map(|v| v == "true" || v == "1").unwrap_or(defaults.mark_read_on_open),
            max_retries: env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.max_retries),
            retry_backoff_ms: env::var("RETRY_BACKOFF_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(defaults.retry_backoff_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}
