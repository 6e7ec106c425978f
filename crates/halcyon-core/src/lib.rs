//! `halcyon-core` — shared types, error taxonomy, process configuration,
//! and the ConfigStore (C12) that every other crate in the gateway depends
//! on. Kept deliberately small: anything that needs `tokio`, `axum`, or
//! `rusqlite` lives one layer up.

pub mod atomic;
pub mod config;
pub mod config_store;
pub mod error;
pub mod types;

pub use config::GatewayConfig;
pub use config_store::ConfigStore;
pub use error::{GatewayError, Result};
pub use types::{AgentId, AliasMap, ConnId, FallbackChain, ModelRef};
