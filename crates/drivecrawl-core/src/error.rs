//! Error types shared by the crawl engine, the provider adapter and the sinks

use std::sync::LazyLock;

use regex::RegexSet;

/// Message signatures of remote failures worth retrying.
///
/// Rate limiting (403/429 "User Rate Limit Exceeded", `rateLimitExceeded`)
/// and backend faults (500 "Internal Error", `backendError`).
static TRANSIENT_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"User Rate Limit Exceeded",
        r"(?i)\brate limit exceeded",
        r"\b(user)?[rR]ateLimitExceeded\b",
        r"Internal Error",
        r"\bbackendError\b",
    ])
    .expect("invalid transient error patterns")
});

/// Error returned by a remote tree or spreadsheet service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The node id does not exist (or is not visible to this identity)
    NotFound { id: String },
    /// HTTP-level failure; `message` carries the service's own error text
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Credential could not be loaded or refreshed
    Auth(String),
    /// Response body could not be decoded
    Decode(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "not found: {id}"),
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Whether the retry wrapper should try this call again.
    ///
    /// Classification is by message signature only, status codes alone
    /// never make an error transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { message, .. } => TRANSIENT_PATTERNS.is_match(message),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Error raised while constructing, feeding or closing an output sink.
#[derive(Debug)]
pub enum SinkError {
    /// Output path has no extension we know how to write
    UnsupportedFormat(String),
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Database(duckdb::Error),
    Sqlite(rusqlite::Error),
    Remote(RemoteError),
    /// A single row cannot fit in an empty spreadsheet
    CellLimit { columns: usize, limit: usize },
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFormat(ext) => write!(
                f,
                "output format not supported: {ext:?} (use one of: {})",
                crate::sink::SUPPORTED_EXTENSIONS.join(", ")
            ),
            Self::Io(e) => write!(f, "IO: {e}"),
            Self::Csv(e) => write!(f, "CSV: {e}"),
            Self::Json(e) => write!(f, "JSON: {e}"),
            Self::Database(e) => write!(f, "database: {e}"),
            Self::Sqlite(e) => write!(f, "SQLite: {e}"),
            Self::Remote(e) => write!(f, "spreadsheet service: {e}"),
            Self::CellLimit { columns, limit } => write!(
                f,
                "a row of {columns} cells does not fit under the {limit} cell limit"
            ),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Sqlite(e) => Some(e),
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for SinkError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<duckdb::Error> for SinkError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<RemoteError> for SinkError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}
