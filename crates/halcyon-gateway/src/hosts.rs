//! Bridges between the agent-agnostic host traits each downstream crate
//! defines (`halcyon_scheduler::CronHost`/`HeartbeatHost`,
//! `halcyon_channels::InboundHandler`) and the concrete session machinery
//! in `halcyon-agent`. This is the one place those crates are allowed to
//! know about each other.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use halcyon_agent::{InboundMessage, RequestQueue, RouterOutcome, SessionRouter};
use halcyon_channels::{ChannelHub, InboundHandler, OutboundMessage};
use halcyon_core::ModelRef;
use halcyon_scheduler::{CronHost, HeartbeatHost, HeartbeatTickOutcome};
use halcyon_session::SessionKey;

/// Split a session key's `(channel, target)` into a delivery string and an
/// optional `replyTo` override (spec.md §6: `discord:dm`, `discord:channel:<id>`).
/// DM targets carry their user id via `replyTo` rather than the delivery
/// string itself, matching the examples in spec.md §6 literally.
pub fn delivery_for(key: &SessionKey) -> (String, Option<String>) {
    if let Some(user_id) = key.target.strip_prefix("dm:") {
        (format!("{}:dm", key.channel), Some(user_id.to_string()))
    } else {
        (format!("{}:{}", key.channel, key.target), None)
    }
}

/// Bridges `halcyon_channels::ChannelAdapter`s to `SessionRouter`, and keeps
/// track of the last-known DM session for the heartbeat (spec.md §4.9).
pub struct GatewayInboundHandler {
    pub session_router: Arc<SessionRouter>,
    pub channels: Arc<Mutex<ChannelHub>>,
    pub last_dm_session: Arc<RwLock<Option<SessionKey>>>,
    pub restart: Arc<crate::restart::RestartManager>,
}

#[async_trait]
impl InboundHandler for GatewayInboundHandler {
    async fn handle_inbound(&self, session_key: &str, content: &str, reply_to: &str) {
        let Ok(key) = SessionKey::parse(session_key) else {
            warn!(session_key, "inbound message with unparseable session key, dropping");
            return;
        };

        if key.target.starts_with("dm:") {
            *self.last_dm_session.write().await = Some(key.clone());
        }

        let msg = InboundMessage { key: key.clone(), content: content.to_string(), reply_to: reply_to.to_string() };
        let outcome = self.session_router.handle(msg).await;

        let (delivery, reply_override) = delivery_for(&key);
        let delivery = if reply_to.is_empty() { delivery } else { reply_to.to_string() };

        match outcome {
            RouterOutcome::Reply(text) => {
                let mut out = OutboundMessage::text(text);
                out.reply_to = reply_override;
                let channels = self.channels.lock().await;
                if let Err(e) = channels.deliver(&delivery, out).await {
                    warn!(delivery, error = %e, "failed to deliver reply");
                }
            }
            RouterOutcome::Restart { delivery_target, session_key, reason } => {
                let target = if delivery_target.is_empty() { delivery } else { delivery_target };
                if let Err(e) = self.restart.trigger_restart(
                    reason.as_deref().unwrap_or("manual restart"),
                    Some(&session_key),
                    Some(&target),
                    reply_override.as_deref(),
                ) {
                    warn!(error = %e, "failed to trigger restart");
                }
            }
        }
    }
}

/// Bridges `CronService` to `RequestQueue` and `ChannelHub`.
pub struct GatewayCronHost {
    pub request_queue: RequestQueue,
    pub channels: Arc<Mutex<ChannelHub>>,
}

#[async_trait]
impl CronHost for GatewayCronHost {
    async fn run_prompt(&self, prompt: &str) -> String {
        self.request_queue.enqueue(prompt).await
    }

    async fn deliver(&self, delivery: &str, text: &str) {
        let channels = self.channels.lock().await;
        if let Err(e) = channels.deliver(delivery, OutboundMessage::text(text)).await {
            warn!(delivery, error = %e, "cron job delivery failed");
        }
    }
}

/// Bridges `HeartbeatRunner` to `SessionRouter` (when a last-known DM
/// session exists) or a bare `RequestQueue` call (when one doesn't yet),
/// plus the model swap/restore around each tick (spec.md §4.9).
pub struct GatewayHeartbeatHost {
    pub runtime: Arc<halcyon_agent::AgentRuntime>,
    pub request_queue: RequestQueue,
    pub session_router: Arc<SessionRouter>,
    pub channels: Arc<Mutex<ChannelHub>>,
    pub last_dm_session: Arc<RwLock<Option<SessionKey>>>,
    pub fallback_delivery: String,
}

#[async_trait]
impl HeartbeatHost for GatewayHeartbeatHost {
    async fn tick(&self, instruction: &str, model_override: Option<&str>) -> HeartbeatTickOutcome {
        let previous_model = match model_override.and_then(|m| ModelRef::parse(m).ok()) {
            Some(model_ref) => Some(self.runtime.set_model(model_ref).await),
            None => None,
        };

        let outcome = self.run_instruction(instruction).await;

        if let Some(prev) = previous_model {
            self.runtime.set_model(prev).await;
        }

        outcome
    }
}

impl GatewayHeartbeatHost {
    async fn run_instruction(&self, instruction: &str) -> HeartbeatTickOutcome {
        let session_key = self.last_dm_session.read().await.clone();

        match session_key {
            Some(key) => {
                let (delivery, reply_override) = delivery_for(&key);
                let msg = InboundMessage { key, content: instruction.to_string(), reply_to: String::new() };
                match self.session_router.handle(msg).await {
                    RouterOutcome::Reply(text) => {
                        let mut out = OutboundMessage::text(text.clone());
                        out.reply_to = reply_override;
                        self.deliver(&delivery, out).await;
                        HeartbeatTickOutcome { response: Some(text), delivery_target: delivery }
                    }
                    // a heartbeat instruction that happens to read as `/restart`
                    // is vanishingly unlikely, but handled rather than dropped.
                    RouterOutcome::Restart { delivery_target, .. } => {
                        HeartbeatTickOutcome { response: None, delivery_target }
                    }
                }
            }
            None if !self.fallback_delivery.is_empty() => {
                let text = self.request_queue.enqueue(instruction).await;
                self.deliver(&self.fallback_delivery, OutboundMessage::text(text.clone())).await;
                HeartbeatTickOutcome { response: Some(text), delivery_target: self.fallback_delivery.clone() }
            }
            None => {
                warn!("heartbeat fired with no known session and no configured delivery target, skipping");
                HeartbeatTickOutcome { response: None, delivery_target: String::new() }
            }
        }
    }

    async fn deliver(&self, delivery: &str, message: OutboundMessage) {
        let channels = self.channels.lock().await;
        if let Err(e) = channels.deliver(delivery, message).await {
            warn!(delivery, error = %e, "heartbeat delivery failed");
        }
    }
}
