//! Central agent runtime (spec.md §6 "AgentRuntime contract").
//!
//! Holds the provider set, the current `(model, thinking level)`, and a
//! "scratch" of timestamped messages produced by `prompt()` calls. The
//! `transformContext` hook is how the `ContextAssembler` (C5) replaces that
//! scratch with the full session context immediately before each LLM call —
//! see spec.md §9 ("if your runtime does not support it, wrap the call").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use halcyon_core::ModelRef;

use crate::error::{AgentError, Result};
use crate::provider::{ChatRequest, LlmProvider, Message};
use crate::stream::StreamEvent;
use crate::thinking::ThinkingLevel;

/// System prompt sent on every request. The world model carries durable
/// per-user context instead (ContextAssembler step 1), so this stays short.
const BASE_SYSTEM_PROMPT: &str =
    "You are a personal assistant with persistent memory of the user across sessions.";

#[derive(Debug, Clone)]
pub struct ScratchMessage {
    pub message: Message,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub model: ModelRef,
    pub thinking_level: ThinkingLevel,
}

pub type TransformContext = Arc<dyn Fn(&[ScratchMessage]) -> Vec<Message> + Send + Sync>;

pub struct AgentRuntime {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    current_model: RwLock<ModelRef>,
    thinking: RwLock<ThinkingLevel>,
    scratch: RwLock<Vec<ScratchMessage>>,
    transform: RwLock<Option<TransformContext>>,
    events: broadcast::Sender<StreamEvent>,
}

impl AgentRuntime {
    pub fn new(providers: HashMap<String, Arc<dyn LlmProvider>>, default_model: ModelRef) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            providers,
            current_model: RwLock::new(default_model),
            thinking: RwLock::new(ThinkingLevel::Off),
            scratch: RwLock::new(Vec::new()),
            transform: RwLock::new(None),
            events,
        }
    }

    pub async fn state(&self) -> RuntimeState {
        RuntimeState {
            model: self.current_model.read().await.clone(),
            thinking_level: *self.thinking.read().await,
        }
    }

    /// Install the pre-invocation context hook (the ContextAssembler).
    pub async fn set_transform_context(&self, f: TransformContext) {
        *self.transform.write().await = Some(f);
    }

    /// Swap the active model, returning the previous one.
    pub async fn set_model(&self, model: ModelRef) -> ModelRef {
        let mut guard = self.current_model.write().await;
        std::mem::replace(&mut *guard, model)
    }

    pub async fn set_thinking_level(&self, level: ThinkingLevel) -> ThinkingLevel {
        let mut guard = self.thinking.write().await;
        std::mem::replace(&mut *guard, level)
    }

    /// The runtime's own message accumulator is the caller's responsibility
    /// to clear between requests (spec.md §4.7 step 6).
    pub async fn clear_messages(&self) {
        self.scratch.write().await.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Send `text` to the current model. Returns once the call has been
    /// dispatched; the response streams to `subscribe()`.
    pub async fn prompt(&self, text: &str) -> Result<()> {
        let scratch_msg =
            ScratchMessage { message: Message { role: crate::provider::Role::User, content: text.to_string() }, timestamp: Utc::now() };
        self.scratch.write().await.push(scratch_msg);

        let messages = self.build_context().await;
        let model = self.current_model.read().await.clone();
        let thinking = *self.thinking.read().await;
        let provider = self
            .providers
            .get(model.provider())
            .cloned()
            .ok_or_else(|| AgentError::UnknownProvider(model.provider().to_string()))?;

        let req = ChatRequest {
            model: model.model().to_string(),
            system: BASE_SYSTEM_PROMPT.to_string(),
            messages,
            max_tokens: 4096,
            stream: true,
            thinking: Some(thinking),
        };

        info!(provider = %provider.name(), model = %model, "dispatching prompt");

        let events = self.events.clone();
        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel(64);
            let forward = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let _ = events.send(event);
                }
            });
            if let Err(e) = provider.send_stream(&req, tx).await {
                // send_stream may return before the channel closes on error;
                // the forward task drains whatever was already queued, then
                // this error becomes the terminal event.
                let _ = forward.await;
                tracing::warn!(error = %e, "provider send_stream failed");
            } else {
                let _ = forward.await;
            }
        });

        Ok(())
    }

    /// Apply the transformContext hook if installed; otherwise fall back to
    /// the scratch's own messages unchanged (spec.md §9).
    async fn build_context(&self) -> Vec<Message> {
        let scratch = self.scratch.read().await;
        match &*self.transform.read().await {
            Some(f) => f(&scratch),
            None => scratch.iter().map(|s| s.message.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, ProviderError};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: req.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    fn runtime() -> AgentRuntime {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert("echo".to_string(), Arc::new(Echo));
        AgentRuntime::new(providers, ModelRef::parse("echo/echo-1").unwrap())
    }

    #[tokio::test]
    async fn prompt_without_transform_echoes_scratch() {
        let rt = runtime();
        let mut rx = rt.subscribe();
        rt.prompt("hello").await.unwrap();
        let mut text = String::new();
        loop {
            match rx.recv().await.unwrap() {
                StreamEvent::TextDelta { text: t } => text.push_str(&t),
                StreamEvent::Done { .. } => break,
                _ => {}
            }
        }
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn clear_messages_empties_scratch() {
        let rt = runtime();
        rt.prompt("hi").await.unwrap();
        rt.clear_messages().await;
        assert!(rt.scratch.read().await.is_empty());
    }

    #[tokio::test]
    async fn set_model_returns_previous() {
        let rt = runtime();
        let prev = rt.set_model(ModelRef::parse("echo/echo-2").unwrap()).await;
        assert_eq!(prev.as_str(), "echo/echo-1");
    }
}
