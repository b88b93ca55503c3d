use thiserror::Error;

/// Failure scoped to a single `<script type="application/ld+json">` section.
#[derive(Debug, Error)]
pub enum LdJsonError {
    #[error("invalid LD-JSON section: {source}")]
    Processing {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("@graph is not an array in object {object}")]
    GraphShape { object: serde_json::Value },
}

/// Failure that makes a whole page unusable.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("multiple distinct {type_name} objects found on page")]
    MultipleLdTypesFound { type_name: String },
}

/// Outcome of a failed `UrlProcessor::process_url` call.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// Permanent failures: retrying the URL later would give the same result.
    pub fn is_skip(&self) -> bool {
        match self {
            ProcessError::InvalidUrl { .. } | ProcessError::Aggregate(_) => true,
            ProcessError::HttpStatus { status, .. } => {
                (400..500).contains(status) && *status != 429
            }
            _ => false,
        }
    }
}
