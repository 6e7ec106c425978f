//! In-band command layer (spec.md §4.14 "In-band command layer"). Runs
//! before RequestQueue enqueue: a recognized command resolves synchronously
//! with no LLM call.

use std::sync::Arc;

use halcyon_core::{ConfigStore, FallbackChain, ModelRef};
use tokio::sync::RwLock;

use crate::registry;
use crate::runtime::AgentRuntime;
use crate::thinking::ThinkingLevel;

/// `restart` carries no session data of its own here — SessionRouter
/// intercepts it before reaching CommandHandler so it can stamp the
/// sentinel with the originating delivery target (spec.md §4.14). Any text
/// after the keyword is carried as the restart reason.
pub enum CommandOutcome {
    Handled(String),
    Restart { reason: Option<String> },
    NotACommand,
}

pub struct CommandHandler {
    runtime: Arc<AgentRuntime>,
    config_store: Arc<ConfigStore>,
    fallback_chain: Arc<RwLock<Vec<ModelRef>>>,
}

impl CommandHandler {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        config_store: Arc<ConfigStore>,
        fallback_chain: Arc<RwLock<Vec<ModelRef>>>,
    ) -> Self {
        Self { runtime, config_store, fallback_chain }
    }

    /// Parse-then-dispatch. Commands are matched only when the input begins
    /// with a recognized keyword, optionally preceded by `/` (spec.md §9's
    /// resolution to the natural-language-ambiguity open question).
    pub async fn handle(&self, raw: &str) -> CommandOutcome {
        let trimmed = raw.trim();
        let stripped = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let mut parts = stripped.split_whitespace();
        let Some(keyword) = parts.next() else {
            return CommandOutcome::NotACommand;
        };
        let rest: Vec<&str> = parts.collect();

        match keyword.to_ascii_lowercase().as_str() {
            "models" => CommandOutcome::Handled(self.cmd_models(rest.first().copied())),
            "model" => CommandOutcome::Handled(self.cmd_model(rest.first().copied()).await),
            "alias" => CommandOutcome::Handled(self.cmd_alias(&rest)),
            "fallback" => CommandOutcome::Handled(self.cmd_fallback(&rest).await),
            "think" => CommandOutcome::Handled(self.cmd_think(rest.first().copied()).await),
            "status" => CommandOutcome::Handled(self.cmd_status().await),
            "heartbeat" => CommandOutcome::Handled(self.cmd_heartbeat(&rest)),
            "restart" => CommandOutcome::Restart { reason: (!rest.is_empty()).then(|| rest.join(" ")) },
            _ => CommandOutcome::NotACommand,
        }
    }

    fn cmd_models(&self, provider_filter: Option<&str>) -> String {
        let mut lines = Vec::new();
        for known in registry::KNOWN_PROVIDERS {
            if let Some(filter) = provider_filter {
                if !known.id.eq_ignore_ascii_case(filter) {
                    continue;
                }
            }
            lines.push(format!("{} ({}): default {}", known.id, known.name, known.default_model));
        }
        if lines.is_empty() {
            "no matching providers".to_string()
        } else {
            lines.join("\n")
        }
    }

    async fn cmd_model(&self, requested: Option<&str>) -> String {
        let Some(requested) = requested else {
            let state = self.runtime.state().await;
            return format!("current model: {}", state.model);
        };
        let aliases = self.config_store.load_aliases();
        let resolved = aliases.resolve(requested);
        match ModelRef::parse(resolved) {
            Ok(model_ref) => {
                self.runtime.set_model(model_ref.clone()).await;
                format!("model set to {model_ref}")
            }
            Err(e) => format!("invalid model reference: {e}"),
        }
    }

    fn cmd_alias(&self, rest: &[&str]) -> String {
        match rest.first().copied() {
            Some("list") | None => {
                let aliases = self.config_store.load_aliases();
                if aliases.0.is_empty() {
                    "no aliases set".to_string()
                } else {
                    let mut lines: Vec<String> =
                        aliases.0.iter().map(|(k, v)| format!("{k} -> {v}")).collect();
                    lines.sort();
                    lines.join("\n")
                }
            }
            Some("set") => {
                let (Some(name), Some(model_ref)) = (rest.get(1), rest.get(2)) else {
                    return "usage: alias set <name> <ref>".to_string();
                };
                let mut aliases = self.config_store.load_aliases();
                aliases.set(name, model_ref);
                match self.config_store.save_aliases(&aliases) {
                    Ok(()) => format!("alias {name} -> {model_ref} saved"),
                    Err(e) => format!("failed to save alias: {e}"),
                }
            }
            Some("remove") => {
                let Some(name) = rest.get(1) else {
                    return "usage: alias remove <name>".to_string();
                };
                let mut aliases = self.config_store.load_aliases();
                let existed = aliases.remove(name).is_some();
                if existed {
                    match self.config_store.save_aliases(&aliases) {
                        Ok(()) => format!("alias {name} removed"),
                        Err(e) => format!("failed to save aliases: {e}"),
                    }
                } else {
                    format!("no such alias: {name}")
                }
            }
            Some(other) => format!("unknown alias subcommand: {other}"),
        }
    }

    async fn cmd_fallback(&self, rest: &[&str]) -> String {
        match rest.first().copied() {
            Some("list") | None => {
                let chain = self.fallback_chain.read().await;
                if chain.is_empty() {
                    "fallback chain is empty".to_string()
                } else {
                    chain.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(" -> ")
                }
            }
            Some("set") => {
                let refs: Vec<ModelRef> = rest[1..].iter().filter_map(|r| ModelRef::parse(r).ok()).collect();
                if refs.len() != rest.len() - 1 {
                    return "one or more model references were invalid".to_string();
                }
                *self.fallback_chain.write().await = refs.clone();
                let persisted = FallbackChain(refs.iter().map(|r| r.as_str().to_string()).collect());
                match self.config_store.save_fallbacks(&persisted) {
                    Ok(()) => format!("fallback chain set ({} entries)", persisted.len()),
                    Err(e) => format!("failed to persist fallback chain: {e}"),
                }
            }
            Some("clear") => {
                self.fallback_chain.write().await.clear();
                match self.config_store.save_fallbacks(&FallbackChain::default()) {
                    Ok(()) => "fallback chain cleared".to_string(),
                    Err(e) => format!("failed to persist fallback chain: {e}"),
                }
            }
            Some(other) => format!("unknown fallback subcommand: {other}"),
        }
    }

    async fn cmd_think(&self, level: Option<&str>) -> String {
        let Some(level) = level else {
            let state = self.runtime.state().await;
            return format!("thinking level: {}", state.thinking_level);
        };
        match ThinkingLevel::parse(level) {
            Some(parsed) => {
                self.runtime.set_thinking_level(parsed).await;
                format!("thinking level set to {parsed}")
            }
            None => format!("unknown thinking level: {level}"),
        }
    }

    async fn cmd_status(&self) -> String {
        let state = self.runtime.state().await;
        let chain = self.fallback_chain.read().await;
        format!(
            "model: {}\nthinking: {}\nfallback chain: {} entries",
            state.model,
            state.thinking_level,
            chain.len()
        )
    }

    fn cmd_heartbeat(&self, rest: &[&str]) -> String {
        match rest.first().copied() {
            None => "usage: heartbeat model <ref|clear>".to_string(),
            Some("model") => match rest.get(1).copied() {
                Some("clear") => match self.config_store.save_heartbeat_model(None) {
                    Ok(()) => "heartbeat model override cleared".to_string(),
                    Err(e) => format!("failed to clear heartbeat model: {e}"),
                },
                Some(model_ref) => match ModelRef::parse(model_ref) {
                    Ok(m) => match self.config_store.save_heartbeat_model(Some(m.as_str().to_string())) {
                        Ok(()) => format!("heartbeat model override set to {m}"),
                        Err(e) => format!("failed to save heartbeat model: {e}"),
                    },
                    Err(e) => format!("invalid model reference: {e}"),
                },
                None => "usage: heartbeat model <ref|clear>".to_string(),
            },
            Some(other) => format!("unknown heartbeat subcommand: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Noop;

    #[async_trait]
    impl LlmProvider for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            unreachable!("commands never call the LLM")
        }
    }

    fn handler() -> (tempfile::TempDir, CommandHandler) {
        let dir = tempfile::tempdir().unwrap();
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert("noop".to_string(), Arc::new(Noop));
        let runtime = Arc::new(AgentRuntime::new(providers, ModelRef::parse("noop/x").unwrap()));
        let store = Arc::new(ConfigStore::new(dir.path()));
        let chain = Arc::new(RwLock::new(Vec::new()));
        (dir, CommandHandler::new(runtime, store, chain))
    }

    #[tokio::test]
    async fn leading_slash_is_optional() {
        let (_dir, h) = handler();
        match h.handle("/status").await {
            CommandOutcome::Handled(text) => assert!(text.contains("model:")),
            _ => panic!("expected handled"),
        }
        match h.handle("status").await {
            CommandOutcome::Handled(text) => assert!(text.contains("model:")),
            _ => panic!("expected handled"),
        }
    }

    #[tokio::test]
    async fn unrecognized_keyword_is_not_a_command() {
        let (_dir, h) = handler();
        matches!(h.handle("hey how's it going").await, CommandOutcome::NotACommand);
    }

    #[tokio::test]
    async fn alias_set_then_model_resolves_it() {
        let (_dir, h) = handler();
        h.handle("/alias set fast noop/fast-model").await;
        match h.handle("/model fast").await {
            CommandOutcome::Handled(text) => assert!(text.contains("noop/fast-model")),
            _ => panic!("expected handled"),
        }
    }

    #[tokio::test]
    async fn restart_is_reported_distinctly() {
        let (_dir, h) = handler();
        assert!(matches!(h.handle("/restart").await, CommandOutcome::Restart { reason: None }));
    }

    #[tokio::test]
    async fn restart_carries_a_reason_when_given() {
        let (_dir, h) = handler();
        match h.handle("/restart upgrading to v2").await {
            CommandOutcome::Restart { reason } => assert_eq!(reason.as_deref(), Some("upgrading to v2")),
            _ => panic!("expected restart"),
        }
    }

    #[tokio::test]
    async fn fallback_set_then_list_round_trips() {
        let (_dir, h) = handler();
        h.handle("/fallback set noop/a noop/b").await;
        match h.handle("/fallback list").await {
            CommandOutcome::Handled(text) => assert_eq!(text, "noop/a -> noop/b"),
            _ => panic!("expected handled"),
        }
    }
}
