// chatstats-core/src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("State store error: {0}")]
    KvDatabase(#[from] redb::DatabaseError),

    #[error("State store transaction error: {0}")]
    KvTransaction(#[from] redb::TransactionError),

    #[error("State store table error: {0}")]
    KvTable(#[from] redb::TableError),

    #[error("State store access error: {0}")]
    KvStorage(#[from] redb::StorageError),

    #[error("State store commit error: {0}")]
    KvCommit(#[from] redb::CommitError),

    #[error("Analytics sink error: {0}")]
    Sink(#[from] clickhouse::error::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Event queue closed")]
    QueueClosed,

    #[error("{} errors: [{}]", .0.len(), format_multiple(.0))]
    Multiple(Vec<Error>),
}

impl Error {
    /// True for a unique-constraint violation on the relational store.
    /// The reconciler handles these with a single retry (Postgres 23505).
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Error::DuplicateKey => true,
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }

    /// Collapse a list of per-update errors into the envelope-level result.
    pub fn combine(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

fn format_multiple(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}
