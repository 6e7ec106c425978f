use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("record not found: {id}")]
    NotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
