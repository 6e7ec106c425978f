use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;
use tracing::{info, warn};

use halcyon_archive::{Role as ArchiveRole, Turn as ArchiveTurn};
use halcyon_channels::{ChannelHub, OutboundMessage};
use halcyon_core::GatewayConfig;
use halcyon_session::SessionKey;

use crate::restart::RestartSentinel;

/// Spec.md §4.11 step 2: up to 20 tries at 500ms before giving up on an
/// adapter ever connecting.
const CHANNEL_WAIT_RETRIES: u32 = 20;
const CHANNEL_WAIT_DELAY: Duration = Duration::from_millis(500);

mod app;
mod channels;
mod hosts;
mod http;
mod restart;
mod skills;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "halcyon_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("HALCYON_CONFIG").ok();
    let config = GatewayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config load failed, using defaults");
        GatewayConfig::default()
    });

    let host = config.gateway_host.clone();
    let port = config.gateway_port;

    let state = app::build(config).await?;

    // Adapters must be registered and started before the successor protocol
    // attempts delivery below, or every `deliver` call hits an empty
    // registry and fails with `UnknownAdapter`.
    state
        .channels
        .lock()
        .await
        .register(Box::new(channels::cli::CliAdapter::new(app::inbound_handler(&state))));
    state.channels.lock().await.start_all().await;

    // Successor protocol (spec.md §4.11): a sentinel left by a prior
    // process asking to be restarted means we owe it a recovery message.
    if let Some(sentinel) = state.restart.consume() {
        info!(reason = %sentinel.reason, delivery_target = ?sentinel.delivery_target, "resuming after restart");
        run_successor_protocol(&state, sentinel).await;
    }

    state.cron.start().await?;

    let shutdown_rx = state.shutdown.subscribe();
    tokio::spawn(state.cron.clone().run(shutdown_rx.clone()));
    tokio::spawn(state.heartbeat.clone().run(shutdown_rx.clone()));
    app::spawn_health_broadcast(state.clone());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let router = app::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "halcyon gateway listening");

    let serve_state = state.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown_signal(serve_state))
            .await
    });

    server.await??;
    shut_down(&state).await;

    Ok(())
}

async fn wait_for_shutdown_signal(state: Arc<app::AppState>) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigusr1 = signal(SignalKind::user_defined1()).expect("failed to install SIGUSR1 handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigusr1.recv() => info!("received SIGUSR1"),
    }

    let _ = state.shutdown.send(true);
}

/// spec.md §4.11 successor protocol steps 2-3: wait for the target channel
/// to connect, then deliver a recovery message in-session (so the assembler
/// sees it and the session buffer is lazily restored), falling back to a
/// bare text send if the in-session path can't be taken.
async fn run_successor_protocol(state: &Arc<app::AppState>, sentinel: RestartSentinel) {
    let Some(delivery_target) = sentinel.delivery_target.clone().filter(|t| !t.is_empty()) else {
        return;
    };

    let adapter_name = delivery_target.split(':').next().unwrap_or_default();
    if !wait_for_channel_connected(&state.channels, adapter_name).await {
        warn!(channel = adapter_name, "channel never connected, attempting post-restart delivery anyway");
    }

    let text = format!("Restarted and back online. Reason: {}.", sentinel.reason);
    if deliver_recovery_in_session(state, &sentinel, &delivery_target, &text).await {
        return;
    }

    warn!("in-session recovery delivery unavailable, falling back to a raw text send");
    let channels = state.channels.lock().await;
    if let Err(e) = channels.deliver(&delivery_target, OutboundMessage::text(text)).await {
        warn!(error = %e, "failed to deliver post-restart notification");
    }
}

/// Poll `channels` until an adapter named `adapter_name` is registered, up
/// to [`CHANNEL_WAIT_RETRIES`] times, [`CHANNEL_WAIT_DELAY`] apart.
async fn wait_for_channel_connected(channels: &Mutex<ChannelHub>, adapter_name: &str) -> bool {
    for _ in 0..CHANNEL_WAIT_RETRIES {
        if channels.lock().await.health().iter().any(|(name, _)| name == adapter_name) {
            return true;
        }
        tokio::time::sleep(CHANNEL_WAIT_DELAY).await;
    }
    false
}

/// Send `text` through SessionRouter so it lands in the session log/buffer
/// the same way a normal reply would (spec.md §4.11 step 3's lazy restore,
/// plus the assembler picking it up on the next turn). Returns `false` if
/// there's no usable session to route through or delivery itself fails, in
/// which case the caller falls back to a raw channel send.
async fn deliver_recovery_in_session(
    state: &Arc<app::AppState>,
    sentinel: &RestartSentinel,
    delivery_target: &str,
    text: &str,
) -> bool {
    let Some(session_key) =
        sentinel.session_key.as_deref().and_then(|raw| SessionKey::parse(raw).ok())
    else {
        return false;
    };

    state.session_router.record_recovery_message(&session_key, text.to_string());

    let (default_delivery, reply_override) = crate::hosts::delivery_for(&session_key);
    let delivery = if delivery_target.is_empty() { default_delivery } else { delivery_target.to_string() };

    let mut message = OutboundMessage::text(text.to_string());
    message.reply_to = sentinel.reply_to.clone().or(reply_override);

    let channels = state.channels.lock().await;
    match channels.deliver(&delivery, message).await {
        Ok(()) => true,
        Err(e) => {
            warn!(delivery, error = %e, "in-session post-restart delivery failed");
            false
        }
    }
}

/// spec.md §5 graceful-shutdown sequence: HeartbeatRunner and CronService
/// have already stopped (they select on the same `shutdown` watch axum's
/// graceful-shutdown future triggered); this runs everything after.
async fn shut_down(state: &Arc<app::AppState>) {
    info!("flushing session buffers into archive");
    for (key, turns) in state.session_buffer.flush_all() {
        if turns.is_empty() {
            continue;
        }
        let session_key = key.format();
        let archive_turns: Vec<ArchiveTurn> = turns
            .into_iter()
            .map(|t| ArchiveTurn {
                role: t.role.parse().unwrap_or(ArchiveRole::User),
                content: t.content,
                timestamp: t.timestamp.timestamp_millis(),
                session_key: session_key.clone(),
            })
            .collect();
        if let Err(e) = state.archive.archive(&archive_turns) {
            warn!(session_key, error = %e, "failed to flush session buffer into archive on shutdown");
        }
    }

    if let Err(e) = state.archive.checkpoint() {
        warn!(error = %e, "failed to checkpoint archive WAL on shutdown");
    }

    state.channels.lock().await.stop_all().await;
    info!("shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use halcyon_channels::{ChannelAdapter, ChannelError, ChannelStatus};

    struct StubAdapter {
        name: &'static str,
    }

    #[async_trait]
    impl ChannelAdapter for StubAdapter {
        fn name(&self) -> &str {
            self.name
        }
        async fn start(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send(&self, _target: &str, _message: &OutboundMessage) -> Result<(), ChannelError> {
            Ok(())
        }
        fn health(&self) -> ChannelStatus {
            ChannelStatus::Connected
        }
    }

    #[tokio::test]
    async fn wait_for_channel_connected_returns_immediately_once_registered() {
        let mut hub = ChannelHub::new();
        hub.register(Box::new(StubAdapter { name: "discord" }));
        let channels = Mutex::new(hub);

        let connected = wait_for_channel_connected(&channels, "discord").await;
        assert!(connected);
    }
}
