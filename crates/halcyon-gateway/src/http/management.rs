//! ManagementAPI (C13, spec.md §4.13): the HTTP half. World-model,
//! heartbeat, cron, sessions, archive, model/alias/fallback, skills,
//! config, and status — all under `/api`.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path as AxumPath, Query, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use halcyon_core::config::MAX_HTTP_BODY_BYTES;
use halcyon_core::{FallbackChain, ModelRef};
use halcyon_scheduler::ScheduleType;
use halcyon_session::SessionKey;

use crate::app::AppState;

type ApiError = (axum::http::StatusCode, Json<Value>);

fn err(status: axum::http::StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": { "code": code, "message": message.into() } })))
}

fn bad_request(message: impl Into<String>) -> ApiError {
    err(axum::http::StatusCode::BAD_REQUEST, "invalid_params", message)
}

fn not_found(message: impl Into<String>) -> ApiError {
    err(axum::http::StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> ApiError {
    err(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/status", get(status))
        .route("/config", get(config_snapshot))
        .route("/world-model", get(world_model_get).put(world_model_put))
        .route("/heartbeat/config", get(heartbeat_config_get).put(heartbeat_config_put))
        .route("/heartbeat/content", get(heartbeat_content_get).put(heartbeat_content_put))
        .route("/heartbeat/runs", get(heartbeat_runs))
        .route("/cron", get(cron_list).post(cron_create))
        .route("/cron/{id}", delete(cron_delete))
        .route("/cron/{id}/trigger", post(cron_trigger))
        .route("/cron/{id}/runs", get(cron_runs))
        .route("/sessions", get(sessions_list))
        .route("/sessions/{key}", get(sessions_read))
        .route("/archive/search", get(archive_search))
        .route("/archive/{id}", get(archive_read))
        .route("/model", get(model_get).put(model_put))
        .route("/model/aliases", get(aliases_list))
        .route("/model/aliases/{name}", put(alias_put).delete(alias_delete))
        .route("/model/fallback", get(fallback_get).put(fallback_put).delete(fallback_clear))
        .route("/skills", get(skills_list).post(skills_create))
        .route("/skills/{name}", get(skills_get).put(skills_put).delete(skills_delete))
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

// ---- status / config -------------------------------------------------

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let runtime_state = state.runtime.state().await;
    let fallback_len = state.fallback_chain.read().await.len();
    let channel_health = state.channels.lock().await.health();
    let cron_jobs = state.cron.list_jobs().await.len();
    let sessions = state.session_log.list().map(|s| s.len()).unwrap_or(0);

    Json(json!({
        "uptime_secs": state.uptime_secs(),
        "ws_clients": state.ws_clients.len(),
        "sessions": sessions,
        "channels": channel_health.into_iter().map(|(name, status)| json!({"name": name, "status": status})).collect::<Vec<_>>(),
        "providers": state.runtime.provider_names(),
        "model": runtime_state.model.as_str(),
        "thinking_level": runtime_state.thinking_level.to_string(),
        "fallback_chain_len": fallback_len,
        "cron_jobs": cron_jobs,
        "heartbeat_enabled": state.heartbeat.enabled(),
        "request_queue_depth": state.request_queue.depth(),
    }))
}

/// Masked config snapshot — `GatewayConfig` itself never holds API keys
/// (those come from the environment), so this is a near-direct dump.
async fn config_snapshot(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(&state.config).unwrap_or(Value::Null))
}

// ---- world model -------------------------------------------------------

async fn world_model_get(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let content = state.world_model.load().map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "content": content })))
}

#[derive(Deserialize)]
struct WorldModelPutBody {
    content: String,
}

async fn world_model_put(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WorldModelPutBody>,
) -> Result<Json<Value>, ApiError> {
    state.world_model.replace_content(&body.content).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

// ---- heartbeat -----------------------------------------------------------

async fn heartbeat_config_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (active_start, active_end) = state.heartbeat.active_window();
    Json(json!({
        "enabled": state.heartbeat.enabled(),
        "interval_ms": state.heartbeat.interval().as_millis() as u64,
        "active_start": active_start,
        "active_end": active_end,
        "delivery": state.config.heartbeat_delivery,
        "model_override": state.config_store.load_heartbeat_model(),
    }))
}

#[derive(Deserialize)]
struct HeartbeatConfigPutBody {
    #[serde(default)]
    model_override: Option<String>,
}

/// `enabled`/`interval`/active-hours are process config (spec.md §10.3),
/// fixed at startup; only the model override is live-mutable here, the
/// same value the in-band `heartbeat model` command edits (spec.md §4.14).
async fn heartbeat_config_put(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatConfigPutBody>,
) -> Result<Json<Value>, ApiError> {
    if let Some(model_ref) = &body.model_override {
        ModelRef::parse(model_ref).map_err(|e| bad_request(e.to_string()))?;
    }
    state
        .config_store
        .save_heartbeat_model(body.model_override)
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn heartbeat_content_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let content = std::fs::read_to_string(state.heartbeat.instruction_path()).unwrap_or_default();
    Json(json!({ "content": content }))
}

#[derive(Deserialize)]
struct HeartbeatContentPutBody {
    content: String,
}

async fn heartbeat_content_put(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatContentPutBody>,
) -> Result<Json<Value>, ApiError> {
    let path = state.heartbeat.instruction_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| internal(e.to_string()))?;
    }
    std::fs::write(path, &body.content).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn heartbeat_runs(State(state): State<Arc<AppState>>, Query(q): Query<LimitQuery>) -> Json<Value> {
    let runs = state.heartbeat.runs(q.limit.unwrap_or(50)).await;
    Json(json!({ "runs": runs }))
}

// ---- cron ----------------------------------------------------------------

#[derive(Deserialize)]
struct CronCreateBody {
    name: String,
    schedule_type: String,
    schedule: String,
    prompt: String,
    delivery: String,
}

async fn cron_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "jobs": state.cron.list_jobs().await }))
}

async fn cron_create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CronCreateBody>,
) -> Result<Json<Value>, ApiError> {
    let schedule_type = match body.schedule_type.as_str() {
        "at" => ScheduleType::At,
        "every" => ScheduleType::Every,
        "cron" => ScheduleType::Cron,
        other => return Err(bad_request(format!("unknown schedule_type: {other}"))),
    };
    let job = state
        .cron
        .add_job(body.name, schedule_type, body.schedule, body.prompt, body.delivery)
        .await
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(serde_json::to_value(job).unwrap_or(Value::Null)))
}

async fn cron_delete(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    state.cron.remove_job(&id).await.map_err(|e| not_found(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn cron_trigger(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    state.cron.trigger_job(&id).await.map_err(|e| not_found(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn cron_runs(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    Query(q): Query<LimitQuery>,
) -> Json<Value> {
    let runs = state.cron.runs(&id, q.limit.unwrap_or(50)).await;
    Json(json!({ "runs": runs }))
}

// ---- sessions --------------------------------------------------------

async fn sessions_list(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let summaries = state.session_log.list().map_err(|e| internal(e.to_string()))?;
    let out: Vec<Value> = summaries
        .into_iter()
        .map(|s| json!({
            "key": s.key.format(),
            "message_count": s.message_count,
            "last_activity": s.last_activity,
        }))
        .collect();
    Ok(Json(json!({ "sessions": out })))
}

/// `:key` is the reversible hex encoding of `agent:channel:target`
/// (spec.md §3 "Filename derivation MUST be reversible"), matching the
/// on-disk session log filenames exactly.
async fn sessions_read(State(state): State<Arc<AppState>>, AxumPath(hex_key): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    let key = SessionKey::from_hex(&hex_key).map_err(|e| bad_request(e.to_string()))?;
    let turns = state.session_log.read(&key).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "key": key.format(), "turns": turns })))
}

// ---- archive ---------------------------------------------------------

#[derive(Deserialize)]
struct ArchiveSearchQuery {
    q: String,
    #[serde(default)]
    mode: Option<String>,
    limit: Option<usize>,
}

async fn archive_search(State(state): State<Arc<AppState>>, Query(q): Query<ArchiveSearchQuery>) -> Result<Json<Value>, ApiError> {
    let limit = q.limit.unwrap_or(20);
    let records = match q.mode.as_deref().unwrap_or("merged") {
        "grep" => state.archive.search_grep(&q.q, limit),
        "bm25" => state.archive.search_bm25(&q.q, limit),
        "merged" => state.archive.search_merged(&q.q, limit),
        other => return Err(bad_request(format!("unknown search mode: {other}"))),
    }
    .map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "results": records })))
}

async fn archive_read(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<i64>) -> Result<Json<Value>, ApiError> {
    let record = state.archive.read(id).map_err(|e| not_found(e.to_string()))?;
    Ok(Json(serde_json::to_value(record).unwrap_or(Value::Null)))
}

// ---- model / aliases / fallback ---------------------------------------

async fn model_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let s = state.runtime.state().await;
    Json(json!({ "model": s.model.as_str(), "thinking_level": s.thinking_level.to_string() }))
}

#[derive(Deserialize)]
struct ModelPutBody {
    #[serde(rename = "ref")]
    model_ref: String,
}

async fn model_put(State(state): State<Arc<AppState>>, Json(body): Json<ModelPutBody>) -> Result<Json<Value>, ApiError> {
    let aliases = state.config_store.load_aliases();
    let resolved = aliases.resolve(&body.model_ref).to_string();
    let model_ref = ModelRef::parse(&resolved).map_err(|e| bad_request(e.to_string()))?;
    state.runtime.set_model(model_ref.clone()).await;
    Ok(Json(json!({ "model": model_ref.as_str() })))
}

async fn aliases_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "aliases": state.config_store.load_aliases().0 }))
}

#[derive(Deserialize)]
struct AliasPutBody {
    #[serde(rename = "ref")]
    model_ref: String,
}

async fn alias_put(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(body): Json<AliasPutBody>,
) -> Result<Json<Value>, ApiError> {
    let mut aliases = state.config_store.load_aliases();
    aliases.set(&name, &body.model_ref);
    state.config_store.save_aliases(&aliases).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn alias_delete(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    let mut aliases = state.config_store.load_aliases();
    if aliases.remove(&name).is_none() {
        return Err(not_found(format!("no such alias: {name}")));
    }
    state.config_store.save_aliases(&aliases).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

async fn fallback_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let chain = state.fallback_chain.read().await;
    Json(json!({ "fallback": chain.iter().map(|m| m.as_str()).collect::<Vec<_>>() }))
}

#[derive(Deserialize)]
struct FallbackPutBody {
    refs: Vec<String>,
}

async fn fallback_put(State(state): State<Arc<AppState>>, Json(body): Json<FallbackPutBody>) -> Result<Json<Value>, ApiError> {
    let mut refs = Vec::with_capacity(body.refs.len());
    for r in &body.refs {
        refs.push(ModelRef::parse(r).map_err(|e| bad_request(e.to_string()))?);
    }
    *state.fallback_chain.write().await = refs.clone();
    let persisted = FallbackChain(refs.iter().map(|r| r.as_str().to_string()).collect());
    state.config_store.save_fallbacks(&persisted).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true, "fallback": persisted.0 })))
}

async fn fallback_clear(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.fallback_chain.write().await.clear();
    state.config_store.save_fallbacks(&FallbackChain::default()).map_err(|e| internal(e.to_string()))?;
    Ok(Json(json!({ "ok": true })))
}

// ---- skills ------------------------------------------------------------

/// Bare identifiers only — no path separators, no `..`. Keeps the on-disk
/// path confined to `DATA_DIR/skills/` without needing to canonicalize
/// and compare prefixes.
fn validate_skill_name(name: &str) -> Result<(), ApiError> {
    let is_safe = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if is_safe {
        Ok(())
    } else {
        Err(err(axum::http::StatusCode::FORBIDDEN, "path_traversal", format!("invalid skill name: {name}")))
    }
}

async fn skills_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "skills": state.skills.list() }))
}

async fn skills_get(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    validate_skill_name(&name)?;
    state
        .skills
        .get(&name)
        .map(|s| Json(serde_json::to_value(s).unwrap_or(Value::Null)))
        .ok_or_else(|| not_found(format!("no such skill: {name}")))
}

#[derive(Deserialize)]
struct SkillCreateBody {
    name: String,
    content: String,
}

async fn skills_create(State(state): State<Arc<AppState>>, Json(body): Json<SkillCreateBody>) -> Result<Json<Value>, ApiError> {
    validate_skill_name(&body.name)?;
    if state.skills.get(&body.name).is_some() {
        return Err(err(axum::http::StatusCode::BAD_REQUEST, "already_exists", format!("skill already exists: {}", body.name)));
    }
    let skill = state.skills.put(&body.name, &body.content).map_err(|e| internal(e.to_string()))?;
    Ok(Json(serde_json::to_value(skill).unwrap_or(Value::Null)))
}

#[derive(Deserialize)]
struct SkillUpdateBody {
    content: String,
}

async fn skills_put(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Json(body): Json<SkillUpdateBody>,
) -> Result<Json<Value>, ApiError> {
    validate_skill_name(&name)?;
    let skill = state.skills.put(&name, &body.content).map_err(|e| internal(e.to_string()))?;
    Ok(Json(serde_json::to_value(skill).unwrap_or(Value::Null)))
}

async fn skills_delete(State(state): State<Arc<AppState>>, AxumPath(name): AxumPath<String>) -> Result<Json<Value>, ApiError> {
    validate_skill_name(&name)?;
    if !state.skills.delete(&name) {
        return Err(not_found(format!("no such skill: {name}")));
    }
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_skill_name_accepts_bare_identifiers() {
        assert!(validate_skill_name("weather-lookup").is_ok());
        assert!(validate_skill_name("weather_lookup_v2").is_ok());
    }

    #[test]
    fn validate_skill_name_rejects_path_traversal() {
        assert!(validate_skill_name("../secrets").is_err());
        assert!(validate_skill_name("a/b").is_err());
        assert!(validate_skill_name("").is_err());
        assert!(validate_skill_name("..").is_err());
    }
}
