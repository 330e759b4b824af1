use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaxrefError {
    #[error("No network connectivity: {0}")]
    Connectivity(String),

    #[error("Remote service unavailable (HTTP {status})")]
    ServiceUnavailable { status: u16 },

    #[error("Ambiguous match: {total} candidates")]
    AmbiguousMatch { total: u64 },

    #[error("No reference taxon found")]
    NotFound,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Missing required fields on record store: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl TaxrefError {
    /// Errors that only cost the current job; the batch carries on.
    pub fn is_job_recoverable(&self) -> bool {
        matches!(
            self,
            TaxrefError::ServiceUnavailable { .. }
                | TaxrefError::AmbiguousMatch { .. }
                | TaxrefError::NotFound
                | TaxrefError::Transport(_)
                | TaxrefError::Timeout(_)
                | TaxrefError::MalformedResponse(_)
                | TaxrefError::Json(_)
                | TaxrefError::Http(_)
        )
    }

    /// Short label used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            TaxrefError::Connectivity(_) => "connectivity",
            TaxrefError::ServiceUnavailable { .. } => "service_unavailable",
            TaxrefError::AmbiguousMatch { .. } => "ambiguous",
            TaxrefError::NotFound => "not_found",
            TaxrefError::Transport(_) | TaxrefError::Http(_) => "transport",
            TaxrefError::Timeout(_) => "timeout",
            TaxrefError::MalformedResponse(_) | TaxrefError::Json(_) => "malformed",
            TaxrefError::Schema { .. } => "schema",
            TaxrefError::Store(_) | TaxrefError::Sqlite(_) => "store",
            TaxrefError::Config(_) | TaxrefError::Toml(_) => "config",
            TaxrefError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, TaxrefError>;
