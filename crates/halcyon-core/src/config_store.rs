//! ConfigStore (C12): the three small JSON documents under `DATA_DIR` the
//! running agent mutates via in-band commands — model aliases, the fallback
//! chain, and the heartbeat model override. Distinct from [`crate::config::GatewayConfig`],
//! which is process configuration read once at startup.
//!
//! All reads tolerate a missing or corrupt file by returning the zero value
//! (spec.md §4.12, §7 "Persisted-state corruption"); all writes are atomic.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::atomic::write_atomic;
use crate::types::{AliasMap, FallbackChain};

pub struct ConfigStore {
    aliases_path: PathBuf,
    fallbacks_path: PathBuf,
    heartbeat_model_path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            aliases_path: data_dir.join("model-aliases.json"),
            fallbacks_path: data_dir.join("model-fallbacks.json"),
            heartbeat_model_path: data_dir.join("heartbeat/model.json"),
        }
    }

    pub fn load_aliases(&self) -> AliasMap {
        read_json_or_default(&self.aliases_path)
    }

    pub fn save_aliases(&self, aliases: &AliasMap) -> std::io::Result<()> {
        write_json_atomic(&self.aliases_path, aliases)
    }

    pub fn load_fallbacks(&self) -> FallbackChain {
        read_json_or_default(&self.fallbacks_path)
    }

    pub fn save_fallbacks(&self, chain: &FallbackChain) -> std::io::Result<()> {
        write_json_atomic(&self.fallbacks_path, chain)
    }

    /// `None` means "no override, use the default model for heartbeat ticks".
    pub fn load_heartbeat_model(&self) -> Option<String> {
        let wrapper: HeartbeatModelDoc = read_json_or_default(&self.heartbeat_model_path);
        wrapper.r#ref
    }

    pub fn save_heartbeat_model(&self, model_ref: Option<String>) -> std::io::Result<()> {
        write_json_atomic(
            &self.heartbeat_model_path,
            &HeartbeatModelDoc { r#ref: model_ref },
        )
    }
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct HeartbeatModelDoc {
    r#ref: Option<String>,
}

fn read_json_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> T {
    match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt config-store file, using default");
            T::default()
        }),
        Err(_) => T::default(),
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let text = serde_json::to_string_pretty(value).expect("config-store values always serialize");
    write_atomic(path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_return_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(store.load_aliases().0.is_empty());
        assert!(store.load_fallbacks().0.is_empty());
        assert_eq!(store.load_heartbeat_model(), None);
    }

    #[test]
    fn corrupt_file_returns_zero_value_not_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model-aliases.json"), "not json").unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(store.load_aliases().0.is_empty());
    }

    #[test]
    fn alias_round_trips_and_resolves_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut aliases = store.load_aliases();
        aliases.set("Fast", "anthropic/claude-haiku-4-5");
        store.save_aliases(&aliases).unwrap();

        let reloaded = store.load_aliases();
        assert_eq!(reloaded.resolve("FAST"), "anthropic/claude-haiku-4-5");
        assert_eq!(reloaded.resolve("unmapped"), "unmapped");
    }

    #[test]
    fn heartbeat_model_override_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store
            .save_heartbeat_model(Some("anthropic/claude-opus-4-6".to_string()))
            .unwrap();
        assert_eq!(
            store.load_heartbeat_model(),
            Some("anthropic/claude-opus-4-6".to_string())
        );
        store.save_heartbeat_model(None).unwrap();
        assert_eq!(store.load_heartbeat_model(), None);
    }
}
