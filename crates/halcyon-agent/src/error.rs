use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("session error: {0}")]
    Session(#[from] halcyon_session::SessionError),

    #[error("archive error: {0}")]
    Archive(#[from] halcyon_archive::ArchiveError),

    #[error("world model error: {0}")]
    WorldModel(#[from] halcyon_worldmodel::WorldModelError),

    #[error("config error: {0}")]
    Config(#[from] halcyon_core::GatewayError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
