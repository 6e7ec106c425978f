//! `halcyon-agent` — the LLM-facing half of the gateway: provider
//! transports (C-adjacent, not individually numbered), AgentRuntime,
//! ContextAssembler (C5), Extractor (C6), RequestQueue (C7), SessionRouter
//! (C8), and the in-band CommandHandler (spec.md §4.14).

pub mod anthropic;
pub mod anthropic_stream;
pub mod commands;
pub mod context_assembler;
pub mod error;
pub mod extractor;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod request_queue;
pub mod runtime;
pub mod session_router;
pub mod stream;
pub mod thinking;

pub use anthropic::AnthropicProvider;
pub use commands::{CommandHandler, CommandOutcome};
pub use context_assembler::ContextAssembler;
pub use error::{AgentError, Result};
pub use extractor::Extractor;
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ProviderError, Role};
pub use request_queue::RequestQueue;
pub use runtime::{AgentRuntime, RuntimeState, ScratchMessage, TransformContext};
pub use session_router::{InboundMessage, RouterOutcome, SessionRouter};
pub use stream::StreamEvent;
pub use thinking::ThinkingLevel;
