//! Error types for the IPTV cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    Json(serde_json::Error),
    /// Transport-level failure (connection refused, DNS, body read)
    Http(reqwest::Error),
    /// Server answered with a non-2xx status
    Status(u16),
    TooManyRedirects,
    Timeout,
    Config(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Json(err) => write!(f, "JSON error: {}", err),
            CacheError::Http(err) => write!(f, "HTTP error: {}", err),
            CacheError::Status(code) => write!(f, "HTTP status {}", code),
            CacheError::TooManyRedirects => write!(f, "Too many redirects"),
            CacheError::Timeout => write!(f, "Request timed out"),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Json(err) => Some(err),
            CacheError::Http(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err)
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_redirect() {
            CacheError::TooManyRedirects
        } else if err.is_timeout() {
            CacheError::Timeout
        } else {
            CacheError::Http(err)
        }
    }
}

impl From<tracing_subscriber::filter::ParseError> for CacheError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        CacheError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
