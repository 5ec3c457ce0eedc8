use thiserror::Error;

/// Failures a sync cycle can run into, grouped by what the operator has to fix.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database or spreadsheet service unreachable, or the session dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The spreadsheet provider rejected our credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("table '{schema}.{table}' not found")]
    NotFound { schema: String, table: String },

    #[error("query error: {0}")]
    Query(String),

    #[error("write error: {0}")]
    Write(String),

    /// The table exists but has no rows; nothing is written so the previous
    /// sheet contents survive.
    #[error("table '{0}' returned no rows")]
    EmptyTable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
