//! Fire-and-forget post-exchange world-model extraction (spec.md §4.6).
//!
//! Never blocks user-visible latency: every error is logged and swallowed,
//! never propagated. Disableable via `state_extraction_enabled`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use halcyon_archive::Archive;
use halcyon_core::ModelRef;
use halcyon_worldmodel::{Update, WorldModel};

use crate::provider::{ChatRequest, LlmProvider, Message, Role};

#[derive(Debug, Deserialize)]
struct ExtractionResult {
    #[serde(default)]
    world_model_updates: Vec<Update>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    archive_note: String,
}

pub struct Extractor {
    providers: std::collections::HashMap<String, Arc<dyn LlmProvider>>,
    primary: ModelRef,
    fallback_chain: Vec<ModelRef>,
    world_model: Arc<WorldModel>,
    archive: Arc<Archive>,
    enabled: bool,
    timeout: Duration,
}

impl Extractor {
    pub fn new(
        providers: std::collections::HashMap<String, Arc<dyn LlmProvider>>,
        primary: ModelRef,
        fallback_chain: Vec<ModelRef>,
        world_model: Arc<WorldModel>,
        archive: Arc<Archive>,
        enabled: bool,
        timeout: Duration,
    ) -> Self {
        Self { providers, primary, fallback_chain, world_model, archive, enabled, timeout }
    }

    /// Spawn the extraction as a detached task. Returns immediately.
    pub fn fire(self: &Arc<Self>, user_message: String, assistant_response: String, archived_ids: Vec<i64>) {
        if !self.enabled {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run(&user_message, &assistant_response, &archived_ids).await {
                debug!(error = %e, "extraction failed, ignoring");
            }
        });
    }

    async fn run(&self, user_message: &str, assistant_response: &str, archived_ids: &[i64]) -> crate::error::Result<()> {
        let world_model_text = self.world_model.load()?;
        let prompt = build_prompt(&world_model_text, user_message, assistant_response);

        let mut candidates = vec![self.primary.clone()];
        candidates.extend(self.fallback_chain.iter().cloned());

        let mut last_error = None;
        for model in candidates {
            let Some(provider) = self.providers.get(model.provider()) else {
                continue;
            };
            let req = ChatRequest {
                model: model.model().to_string(),
                system: "Respond with strict JSON only, no commentary.".to_string(),
                messages: vec![Message { role: Role::User, content: prompt.clone() }],
                max_tokens: 1024,
                stream: false,
                thinking: None,
            };
            match tokio::time::timeout(self.timeout, provider.send(&req)).await {
                Ok(Ok(resp)) => match parse_extraction(&resp.content) {
                    Ok(parsed) => {
                        self.apply(parsed, archived_ids)?;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(error = %e, "extraction response was not valid JSON, trying next candidate");
                        last_error = Some(e);
                        continue;
                    }
                },
                Ok(Err(e)) => {
                    last_error = Some(e.to_string());
                    continue;
                }
                Err(_) => {
                    last_error = Some("extraction call timed out".to_string());
                    continue;
                }
            }
        }

        if let Some(e) = last_error {
            debug!(error = %e, "all extraction candidates failed");
        }
        Ok(())
    }

    fn apply(&self, result: ExtractionResult, archived_ids: &[i64]) -> crate::error::Result<()> {
        if !result.world_model_updates.is_empty() {
            self.world_model.apply_updates(&result.world_model_updates)?;
        }
        if !result.tags.is_empty() && !archived_ids.is_empty() {
            self.archive.update_tags(archived_ids, &result.tags)?;
        }
        if !result.archive_note.is_empty() {
            debug!(note = %result.archive_note, "extraction archive note");
        }
        Ok(())
    }
}

fn build_prompt(world_model_text: &str, user_message: &str, assistant_response: &str) -> String {
    format!(
        "Current world model:\n{world_model_text}\n\n\
         Exchange:\nUser: {user_message}\nAssistant: {assistant_response}\n\n\
         Respond with strict JSON only, shape:\n\
         {{\"world_model_updates\": [{{\"action\": \"replace|add|remove\", \"section\": string, \"field\": string, \"value\"?: string}}], \
         \"tags\": [string], \"archive_note\": string}}"
    )
}

/// Strip surrounding code fences, then parse. Validates shape beyond what
/// serde already enforces: each update must carry `action`+`section`+`field`,
/// which the `Update`/`UpdateAction` types already make structurally
/// mandatory, so a successful deserialize is sufficient validation here.
fn parse_extraction(raw: &str) -> Result<ExtractionResult, String> {
    let trimmed = strip_code_fences(raw);
    serde_json::from_str(trimmed).map_err(|e| e.to_string())
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start();
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fenced_block() {
        let raw = "```json\n{\"world_model_updates\": [], \"tags\": [], \"archive_note\": \"\"}\n```";
        let parsed = parse_extraction(raw).unwrap();
        assert!(parsed.world_model_updates.is_empty());
    }

    #[test]
    fn strips_plain_fenced_block() {
        let raw = "```\n{\"world_model_updates\": [], \"tags\": [\"x\"], \"archive_note\": \"\"}\n```";
        let parsed = parse_extraction(raw).unwrap();
        assert_eq!(parsed.tags, vec!["x".to_string()]);
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(parse_extraction("not json at all").is_err());
    }

    #[test]
    fn accepts_unfenced_json() {
        let raw = r#"{"world_model_updates": [{"action":"add","section":"Identity","field":"x","value":"y"}], "tags": [], "archive_note": "n"}"#;
        let parsed = parse_extraction(raw).unwrap();
        assert_eq!(parsed.world_model_updates.len(), 1);
    }
}
