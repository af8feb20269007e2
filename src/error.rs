use thiserror::Error;

/// Failures raised by the source client boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source backend could not be reached or refused the request.
    /// Retried at the next scheduled tick, never within the same run.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// Secondary contact lookup failed. Non-fatal: identity resolution
    /// degrades to a weaker signal.
    #[error("contact lookup failed for {id}: {reason}")]
    Lookup { id: String, reason: String },

    /// Media payload could not be fetched. Non-fatal: the message is still
    /// stored with `media_path` absent.
    #[error("media fetch failed for message {id}: {reason}")]
    Media { id: String, reason: String },
}

/// Failures raised by the persistence gateway. Fatal to the current run,
/// never to the process.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking database task failed: {0}")]
    Join(String),
}

/// Per-message normalization failure. Isolated to one message; siblings and
/// the run itself are unaffected.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("message {id} carries unrepresentable timestamp {timestamp}")]
    InvalidTimestamp { id: String, timestamp: i64 },
}

/// Run-level scrape failure, converted into a `ScrapeOutcome` at the
/// orchestrator boundary and never propagated past it.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The target id does not refer to a multi-party group. No run record
    /// is created for this case.
    #[error("{0} is not a group chat")]
    NotAGroup(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
