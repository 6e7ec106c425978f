//! Single-file FIFO serializing every LLM invocation (spec.md §4.7).
//! At most one in-flight call process-wide; this is what makes the
//! assembler, the model-swap/restore, and the fallback chain tractable
//! (spec.md §5).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use halcyon_core::ModelRef;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{instrument, warn};

use crate::runtime::AgentRuntime;
use crate::stream::StreamEvent;

/// 500ms guard after `prompt` returns, per spec.md §4.7 step 7.
const RESOLVE_TIMEOUT_GUARD: Duration = Duration::from_millis(500);

struct QueuedRequest {
    input: String,
    resolve: oneshot::Sender<String>,
}

/// Handle held by callers (SessionRouter, HeartbeatRunner, CronService,
/// the restart successor path) to enqueue a prompt and await its text.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::UnboundedSender<QueuedRequest>,
    depth: Arc<AtomicUsize>,
}

impl RequestQueue {
    /// Spawns the single FIFO worker and returns a handle to it.
    pub fn spawn(runtime: Arc<AgentRuntime>, fallback_chain: Arc<RwLock<Vec<ModelRef>>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker_loop(runtime, fallback_chain, rx, depth.clone()));
        Self { tx, depth }
    }

    /// Enqueue `input`, returning its eventual resolved text. Per spec.md
    /// §4.7 the queue never fails to resolve a request — `prompt()`
    /// dispatch errors are folded into the resolved text via the fallback
    /// chain and, failing all of those, the primary error text.
    pub async fn enqueue(&self, input: impl Into<String>) -> String {
        let (resolve, rx) = oneshot::channel();
        let req = QueuedRequest { input: input.into(), resolve };
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(req).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return "(no response)".to_string();
        }
        rx.await.unwrap_or_else(|_| "(no response)".to_string())
    }

    /// Requests currently queued or in flight, for `/status`'s dashboard
    /// aggregate (spec.md §11's supplemental richness).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[instrument(skip(runtime, fallback_chain, rx, depth))]
async fn worker_loop(
    runtime: Arc<AgentRuntime>,
    fallback_chain: Arc<RwLock<Vec<ModelRef>>>,
    mut rx: mpsc::UnboundedReceiver<QueuedRequest>,
    depth: Arc<AtomicUsize>,
) {
    while let Some(req) = rx.recv().await {
        let primary = runtime.state().await.model;
        let text = process_one(&runtime, &fallback_chain, &req.input, &primary).await;

        // restore primary before the next request (spec.md §4.7 step 5)
        runtime.set_model(primary).await;
        runtime.clear_messages().await;

        let _ = req.resolve.send(text);
        depth.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn process_one(
    runtime: &Arc<AgentRuntime>,
    fallback_chain: &Arc<RwLock<Vec<ModelRef>>>,
    input: &str,
    primary: &ModelRef,
) -> String {
    let mut attempt_error: Option<String> = None;

    match invoke(runtime, input).await {
        Ok(text) => return text,
        Err(e) => attempt_error = Some(e),
    }

    let chain = fallback_chain.read().await.clone();
    for candidate in chain {
        runtime.set_model(candidate.clone()).await;
        runtime.clear_messages().await;
        match invoke(runtime, input).await {
            Ok(text) => return text,
            Err(e) => {
                warn!(model = %candidate, error = %e, "fallback candidate failed");
                attempt_error = Some(e);
            }
        }
    }

    attempt_error.unwrap_or_else(|| "(no response)".to_string())
}

/// Run one `prompt()` call against the runtime's current model, buffering
/// deltas and returning on the terminal event. Applies the 500ms timeout
/// guard from spec.md §4.7 step 7.
async fn invoke(runtime: &Arc<AgentRuntime>, input: &str) -> Result<String, String> {
    let mut rx = runtime.subscribe();
    runtime.prompt(input).await.map_err(|e| e.to_string())?;

    let mut buffer = String::new();
    loop {
        let next = tokio::time::timeout(RESOLVE_TIMEOUT_GUARD, rx.recv()).await;
        match next {
            Ok(Ok(StreamEvent::TextDelta { text })) => buffer.push_str(&text),
            Ok(Ok(StreamEvent::Thinking { .. })) => {}
            Ok(Ok(StreamEvent::Done { .. })) => {
                if buffer.is_empty() {
                    return Err("empty response".to_string());
                }
                return Ok(buffer);
            }
            Ok(Ok(StreamEvent::Error { message })) => return Err(message),
            Ok(Err(_)) => return Err("stream closed before a terminal event".to_string()),
            Err(_) => {
                return if buffer.is_empty() {
                    Ok("(no response)".to_string())
                } else {
                    Ok(buffer)
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc as StdArc;

    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: req.messages.last().map(|m| m.content.clone()).unwrap_or_default(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
            })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl LlmProvider for AlwaysFails {
        fn name(&self) -> &str {
            "broken"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("down".to_string()))
        }
    }

    fn runtime_with(providers: Vec<(&str, StdArc<dyn LlmProvider>)>, default: &str) -> StdArc<AgentRuntime> {
        let mut map: HashMap<String, StdArc<dyn LlmProvider>> = HashMap::new();
        for (name, p) in providers {
            map.insert(name.to_string(), p);
        }
        StdArc::new(AgentRuntime::new(map, ModelRef::parse(default).unwrap()))
    }

    #[tokio::test]
    async fn resolves_with_primary_response() {
        let runtime = runtime_with(vec![("echo", StdArc::new(Echo))], "echo/echo-1");
        let fallback = StdArc::new(RwLock::new(Vec::new()));
        let queue = RequestQueue::spawn(runtime, fallback);
        let text = queue.enqueue("hello").await;
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn falls_back_to_next_model_on_primary_failure() {
        let runtime = runtime_with(
            vec![("broken", StdArc::new(AlwaysFails)), ("echo", StdArc::new(Echo))],
            "broken/x",
        );
        let fallback = StdArc::new(RwLock::new(vec![ModelRef::parse("echo/echo-1").unwrap()]));
        let queue = RequestQueue::spawn(runtime, fallback);
        let text = queue.enqueue("world").await;
        assert_eq!(text, "world");
    }

    #[tokio::test]
    async fn restores_primary_model_after_fallback() {
        let runtime = runtime_with(
            vec![("broken", StdArc::new(AlwaysFails)), ("echo", StdArc::new(Echo))],
            "broken/x",
        );
        let fallback = StdArc::new(RwLock::new(vec![ModelRef::parse("echo/echo-1").unwrap()]));
        let queue = RequestQueue::spawn(runtime.clone(), fallback);
        let _ = queue.enqueue("world").await;
        // worker runs async; give it a moment to restore
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runtime.state().await.model.as_str(), "broken/x");
    }
}
