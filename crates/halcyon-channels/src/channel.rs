use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{ChannelStatus, OutboundMessage},
};

/// Common interface implemented by every channel transport (Discord, Gmail,
/// an STT/TTS subprocess, CLI readline, …). spec.md §4.14: `name, start(),
/// stop(), send(target, message), health()`.
///
/// Inbound delivery is not a trait method: a concrete adapter is handed an
/// [`InboundHandler`] at construction time and calls it directly when a
/// message arrives, per the `(sessionKey, content, replyTo)` contract in
/// spec.md §6. This keeps `ChannelHub` from having to know adapter-specific
/// construction details, and keeps this crate free of a dependency on
/// `halcyon-agent`'s `SessionRouter`.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"discord"`).
    /// Used as the key inside [`crate::hub::ChannelHub`] and as the prefix
    /// of delivery strings (`<adapterName>:<adapterSubTarget>`).
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn start(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn stop(&mut self) -> Result<(), ChannelError>;

    /// Deliver a single outbound message. `target` is the adapter-specific
    /// sub-target (e.g. `dm:<userId>`, `channel:<id>`) — already stripped of
    /// the `<adapterName>:` prefix by the hub.
    async fn send(&self, target: &str, message: &OutboundMessage) -> Result<(), ChannelError>;

    /// Current runtime status without blocking.
    fn health(&self) -> ChannelStatus;
}

/// The host side of inbound delivery. `halcyon-gateway` implements this on
/// top of `SessionRouter`, then passes `Arc<dyn InboundHandler>` into each
/// concrete adapter it constructs.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle_inbound(&self, session_key: &str, content: &str, reply_to: &str);
}
