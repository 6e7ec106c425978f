use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_GATEWAY_PORT: u16 = 8420;
pub const DEFAULT_GATEWAY_HOST: &str = "127.0.0.1";
pub const MAX_HTTP_BODY_BYTES: usize = 1024 * 1024; // spec.md §4.13: ≤1 MiB
pub const HEALTH_BROADCAST_INTERVAL_SECS: u64 = 30;

/// Process-wide configuration read once at startup: `halcyon.toml` merged
/// with environment variables. Distinct from [`crate::config_store::ConfigStore`],
/// which holds the small mutable JSON documents the running agent edits
/// via in-band commands (model aliases, fallback chain, heartbeat override).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub gateway_host: String,
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,

    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "bool_true")]
    pub heartbeat_enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// `HH:MM`, start of the active-hours window (spec.md §4.9, invariant 9).
    #[serde(default = "default_active_start")]
    pub heartbeat_active_start: String,
    #[serde(default = "default_active_end")]
    pub heartbeat_active_end: String,
    /// Delivery target string, e.g. `discord:dm:123`. Empty means "last-known
    /// DM session" per spec.md §4.9.
    #[serde(default)]
    pub heartbeat_delivery: String,

    /// N in spec.md §3's buffered-turn bound.
    #[serde(default = "default_conversation_history")]
    pub state_conversation_history: usize,
    #[serde(default = "default_world_model_path")]
    pub state_world_model_path: String,
    #[serde(default = "default_archive_path")]
    pub state_archive_path: String,
    #[serde(default = "bool_true")]
    pub state_extraction_enabled: bool,
    #[serde(default = "default_extraction_timeout_ms")]
    pub state_extraction_timeout_ms: u64,

    #[serde(default = "default_timezone")]
    pub user_timezone: String,

    /// Root of the on-disk layout in spec.md §6. Not itself named in §6's
    /// env var list, but every path in that layout is relative to it, so it
    /// must be configurable (SPEC_FULL.md §10.3).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Fallback timezone for cron jobs that don't set their own (SPEC_FULL.md §10.3).
    pub cron_timezone: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_host: default_gateway_host(),
            gateway_port: default_gateway_port(),
            default_provider: default_provider(),
            default_model: default_model(),
            heartbeat_enabled: true,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_active_start: default_active_start(),
            heartbeat_active_end: default_active_end(),
            heartbeat_delivery: String::new(),
            state_conversation_history: default_conversation_history(),
            state_world_model_path: default_world_model_path(),
            state_archive_path: default_archive_path(),
            state_extraction_enabled: true,
            state_extraction_timeout_ms: default_extraction_timeout_ms(),
            user_timezone: default_timezone(),
            data_dir: default_data_dir(),
            cron_timezone: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_gateway_host() -> String {
    DEFAULT_GATEWAY_HOST.to_string()
}
fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4-6".to_string()
}
fn default_heartbeat_interval_ms() -> u64 {
    15 * 60 * 1000
}
fn default_active_start() -> String {
    "00:00".to_string()
}
fn default_active_end() -> String {
    "00:00".to_string()
}
fn default_conversation_history() -> usize {
    10
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.halcyon/data")
}
fn default_world_model_path() -> String {
    format!("{}/state/world-model.md", default_data_dir())
}
fn default_archive_path() -> String {
    format!("{}/state/archive.db", default_data_dir())
}
fn default_extraction_timeout_ms() -> u64 {
    5_000
}
fn default_timezone() -> String {
    "UTC".to_string()
}

impl GatewayConfig {
    /// Load `halcyon.toml` (if present) merged with bare environment
    /// variables matching field names case-insensitively, e.g.
    /// `GATEWAY_PORT`, `STATE_CONVERSATION_HISTORY`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: GatewayConfig = Figment::from(figment::providers::Serialized::defaults(
            GatewayConfig::default(),
        ))
        .merge(Toml::file(&path))
        .merge(Env::raw())
        .extract()
        .map_err(|e| crate::error::GatewayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.halcyon/halcyon.toml")
}
