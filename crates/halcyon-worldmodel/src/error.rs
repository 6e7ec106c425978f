use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldModelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] halcyon_archive::ArchiveError),
}

pub type Result<T> = std::result::Result<T, WorldModelError>;
