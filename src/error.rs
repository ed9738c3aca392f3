use thiserror::Error;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Failures raised by the filtering / projection / sync engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A metric code that is not in the catalog was requested.
    #[error("metric '{0}' is not in the catalog")]
    MetricNotFound(String),

    /// The dataset has no column with this id.
    #[error("column '{0}' does not exist")]
    ColumnNotFound(String),

    /// No row in the loaded dataset carries this id.
    #[error("no row with id {0}")]
    RowNotFound(i64),

    #[error("could not submit annotation: {0}")]
    AnnotationSubmitFailed(String),

    #[error("could not hide result: {0}")]
    HideFailed(String),

    #[error("could not fetch annotations: {0}")]
    AnnotationFetchFailed(String),

    /// A request for the same row/metric pair is still outstanding.
    #[error("a request for this point is already in flight")]
    RequestInFlight,

    /// An asynchronous result belongs to a superseded load/filter generation.
    #[error("result from generation {actual} arrived after generation {expected}")]
    StaleGeneration { expected: u64, actual: u64 },
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Failures talking to the annotation / hide persistence boundary.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {status} for {url}")]
    Status { status: u16, url: String },

    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("store format: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rejected(String),
}
