/// Events emitted during LLM streaming response (spec.md §9: "Streaming via
/// subscription callbacks" → a lazy sequence of `{kind, payload}` events).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// Incremental internal reasoning content (extended thinking). Never
    /// shown to end users directly — callers decide how to surface it.
    Thinking { text: String },

    /// Stream completed successfully — the terminal event.
    Done {
        model: String,
        tokens_in: u32,
        tokens_out: u32,
        stop_reason: String,
    },

    /// Error during streaming.
    Error { message: String },
}

impl StreamEvent {
    /// True for the event that ends a stream (spec.md §4.7 step 3: "on a
    /// terminal event whose message contains ≥1 text content, resolve").
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Parse a single SSE line (`event: <type>` / `data: <json>`).
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ").map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}
