//! Wires every crate into one running process: `AppState` is the single
//! piece of shared state every HTTP/WS handler and background task reaches
//! through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

use halcyon_agent::{
    AgentRuntime, AnthropicProvider, CommandHandler, ContextAssembler, Extractor, LlmProvider, OpenAiProvider,
    RequestQueue, SessionRouter,
};
use halcyon_archive::Archive;
use halcyon_channels::ChannelHub;
use halcyon_core::{config::HEALTH_BROADCAST_INTERVAL_SECS, ConfigStore, GatewayConfig, ModelRef};
use halcyon_scheduler::{CronService, HeartbeatConfig, HeartbeatRunner};
use halcyon_session::{SessionBuffer, SessionKey, SessionLog};
use halcyon_worldmodel::WorldModel;

use crate::hosts::{GatewayCronHost, GatewayHeartbeatHost, GatewayInboundHandler};
use crate::restart::RestartManager;
use crate::skills::SkillStore;
use crate::ws::broadcast::EventBroadcaster;

pub struct AppState {
    pub config: GatewayConfig,
    pub config_store: Arc<ConfigStore>,
    pub started_at: DateTime<Utc>,
    pub event_seq: AtomicI64,
    pub broadcaster: EventBroadcaster,
    pub ws_clients: dashmap::DashMap<String, ()>,

    pub runtime: Arc<AgentRuntime>,
    pub request_queue: RequestQueue,
    pub session_router: Arc<SessionRouter>,
    pub command_handler: Arc<CommandHandler>,
    pub extractor: Arc<Extractor>,
    pub fallback_chain: Arc<RwLock<Vec<ModelRef>>>,

    pub archive: Arc<Archive>,
    pub world_model: Arc<WorldModel>,
    pub session_log: Arc<SessionLog>,
    pub session_buffer: Arc<SessionBuffer>,

    pub cron: Arc<CronService>,
    pub heartbeat: Arc<HeartbeatRunner>,
    pub channels: Arc<Mutex<ChannelHub>>,
    pub restart: Arc<RestartManager>,
    pub last_dm_session: Arc<RwLock<Option<SessionKey>>>,
    pub skills: Arc<SkillStore>,

    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn next_seq(&self) -> i64 {
        self.event_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

/// Build every component and wire the host-trait bridges, but start
/// nothing yet — `main.rs` decides when cron/heartbeat/channels actually
/// begin running (after the successor-protocol check).
pub async fn build(config: GatewayConfig) -> anyhow::Result<Arc<AppState>> {
    let data_dir = std::path::PathBuf::from(&config.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let config_store = Arc::new(ConfigStore::new(&data_dir));

    let archive = Arc::new(Archive::open(&config.state_archive_path)?);
    let world_model = Arc::new(WorldModel::new(&config.state_world_model_path, archive.clone()));
    let session_log = Arc::new(SessionLog::new(data_dir.join("sessions"))?);
    let session_buffer = Arc::new(SessionBuffer::new(config.state_conversation_history));

    let providers = build_providers();
    if providers.is_empty() {
        warn!("no LLM provider API keys found in the environment; all prompts will fail");
    }
    let default_model = ModelRef::parse(&config.default_model)
        .unwrap_or_else(|_| ModelRef::parse("anthropic/claude-sonnet-4-6").expect("literal default parses"));

    let runtime = Arc::new(AgentRuntime::new(providers.clone(), default_model.clone()));

    let assembler = Arc::new(ContextAssembler::new(world_model.clone(), session_buffer.clone()));
    {
        let assembler_hook = assembler.clone();
        let hook: halcyon_agent::TransformContext = Arc::new(move |scratch| assembler_hook.transform(scratch));
        runtime.set_transform_context(hook).await;
    }

    let initial_fallbacks: Vec<ModelRef> =
        config_store.load_fallbacks().0.iter().filter_map(|r| ModelRef::parse(r).ok()).collect();
    let fallback_chain = Arc::new(RwLock::new(initial_fallbacks.clone()));

    let request_queue = RequestQueue::spawn(runtime.clone(), fallback_chain.clone());
    let command_handler =
        Arc::new(CommandHandler::new(runtime.clone(), config_store.clone(), fallback_chain.clone()));

    let extractor = Arc::new(Extractor::new(
        providers,
        default_model,
        initial_fallbacks,
        world_model.clone(),
        archive.clone(),
        config.state_extraction_enabled,
        Duration::from_millis(config.state_extraction_timeout_ms),
    ));

    let session_router = Arc::new(SessionRouter::new(
        session_log.clone(),
        session_buffer.clone(),
        archive.clone(),
        assembler,
        request_queue.clone(),
        command_handler.clone(),
        extractor.clone(),
        config.state_conversation_history,
    ));

    let channels = Arc::new(Mutex::new(ChannelHub::new()));
    let restart = Arc::new(RestartManager::new(&data_dir));
    let last_dm_session = Arc::new(RwLock::new(None));
    let skills = Arc::new(SkillStore::new(&data_dir)?);

    let cron_host = Arc::new(GatewayCronHost { request_queue: request_queue.clone(), channels: channels.clone() });
    let cron_tz = halcyon_scheduler::parse_timezone(
        config.cron_timezone.as_deref().unwrap_or(&config.user_timezone),
    );
    let cron = Arc::new(CronService::new(&data_dir, cron_host, cron_tz));

    let heartbeat_host = Arc::new(GatewayHeartbeatHost {
        runtime: runtime.clone(),
        request_queue: request_queue.clone(),
        session_router: session_router.clone(),
        channels: channels.clone(),
        last_dm_session: last_dm_session.clone(),
        fallback_delivery: config.heartbeat_delivery.clone(),
    });
    let heartbeat_config = HeartbeatConfig {
        enabled: config.heartbeat_enabled,
        interval: Duration::from_millis(config.heartbeat_interval_ms),
        active_start: config.heartbeat_active_start.clone(),
        active_end: config.heartbeat_active_end.clone(),
        instruction_path: data_dir.join("heartbeat/instruction.md"),
    };
    let heartbeat = Arc::new(HeartbeatRunner::new(&data_dir, heartbeat_config, config_store.clone(), heartbeat_host));

    let (shutdown, _) = watch::channel(false);

    Ok(Arc::new(AppState {
        config,
        config_store,
        started_at: Utc::now(),
        event_seq: AtomicI64::new(0),
        broadcaster: EventBroadcaster::new(),
        ws_clients: dashmap::DashMap::new(),
        runtime,
        request_queue,
        session_router,
        command_handler,
        extractor,
        fallback_chain,
        archive,
        world_model,
        session_log,
        session_buffer,
        cron,
        heartbeat,
        channels,
        restart,
        last_dm_session,
        skills,
        shutdown,
    }))
}

/// An `InboundHandler` for concrete `ChannelAdapter`s to call into.
pub fn inbound_handler(state: &Arc<AppState>) -> Arc<GatewayInboundHandler> {
    Arc::new(GatewayInboundHandler {
        session_router: state.session_router.clone(),
        channels: state.channels.clone(),
        last_dm_session: state.last_dm_session.clone(),
        restart: state.restart.clone(),
    })
}

/// Every provider with a detectable API key in the environment: Anthropic
/// and OpenAI by name, plus every `registry::KNOWN_PROVIDERS` entry that
/// speaks the OpenAI wire format.
fn build_providers() -> HashMap<String, Arc<dyn LlmProvider>> {
    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        providers.insert("anthropic".to_string(), Arc::new(AnthropicProvider::new(key, None)));
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        providers.insert("openai".to_string(), Arc::new(OpenAiProvider::new(key, None)));
    }

    for known in halcyon_agent::registry::KNOWN_PROVIDERS {
        let env_var = format!("{}_API_KEY", known.id.to_ascii_uppercase());
        if let Ok(key) = std::env::var(&env_var) {
            let provider =
                OpenAiProvider::with_path(known.id, key, known.base_url.to_string(), known.chat_path.to_string());
            providers.insert(known.id.to_string(), Arc::new(provider));
        }
    }

    info!(providers = ?providers.keys().collect::<Vec<_>>(), "LLM providers configured");
    providers
}

/// Non-`/api` routes all serve the same embedded page (spec.md §4.13's "SPA
/// fallback") — there's no on-disk static tree to traverse, so path
/// traversal is rejected by construction rather than by checking paths.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::ui::ui_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .nest("/api", crate::http::management_router())
        .fallback(get(crate::http::ui::ui_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Spawn the 30s periodic `health` event broadcast (spec.md §4.13), once,
/// process-wide — not per WS connection.
pub fn spawn_health_broadcast(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut shutdown = state.shutdown.subscribe();
        let mut interval = tokio::time::interval(Duration::from_secs(HEALTH_BROADCAST_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let payload = halcyon_protocol::frames::HealthPayload {
                        status: "ok".to_string(),
                        uptime_secs: state.uptime_secs(),
                        clients: state.ws_clients.len(),
                        sessions: state.session_log.list().map(|s| s.len()).unwrap_or(0),
                        timestamp: Utc::now().to_rfc3339(),
                    };
                    let event = halcyon_protocol::frames::EventFrame::new("health", payload);
                    if let Ok(json) = serde_json::to_string(&event) {
                        state.broadcaster.send(json);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
