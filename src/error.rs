use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of a single call to the FieldClimate HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials rejected (401/403)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider throttled us (429)
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// 2xx body that is not valid JSON or carries an `error` field
    #[error("API returned an error response: {0}")]
    Response(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API request failed: {0}")]
    Generic(String),
}

impl ApiError {
    /// Only malformed responses and timeouts are worth an application-level retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Response(_) | ApiError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory '{0}'")]
    Directory(PathBuf, #[source] std::io::Error),

    #[error("Invalid value stored in {column}: {message}")]
    Corrupt { column: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load key file '{0}': {1}")]
    KeyFile(PathBuf, String),
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_response_and_timeout_are_retryable() {
        assert!(ApiError::Response("bad json".into()).is_retryable());
        assert!(ApiError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!ApiError::Auth("401".into()).is_retryable());
        assert!(!ApiError::RateLimit("429".into()).is_retryable());
        assert!(!ApiError::Generic("connection refused".into()).is_retryable());
    }
}
