pub mod channels;
pub mod controller;
pub mod input;
pub mod metrics;
pub mod player;
pub mod sink;
pub mod source;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use channels::{build_lineup, CatalogConfig, Channel};
use controller::{Command, Direction, Outcome, SessionSnapshot};
use input::RemoteKey;
use player::SharedPlayer;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use sink::{SinkEvent, SinkEventSender};
use source::{fetch_records, SourcesConfig};
use std::sync::Arc;
use tracing::{info, warn};

struct AppState {
    player: SharedPlayer,
    sink_events: SinkEventSender,
    monitoring_enabled: bool,
    search: Option<SearchSource>,
}

/// Channel API that `/api/search` re-queries to rebuild the lineup.
#[derive(Clone)]
pub struct SearchSource {
    pub client: reqwest::Client,
    pub sources: SourcesConfig,
    pub catalog: CatalogConfig,
}

/// Accepts either a single string or a list of strings.
pub fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

pub fn create_app(
    player: SharedPlayer,
    sink_events: SinkEventSender,
    monitoring: metrics::MonitoringConfig,
    search: Option<SearchSource>,
) -> Router {
    let state = Arc::new(AppState {
        player,
        sink_events,
        monitoring_enabled: monitoring.enabled,
        search,
    });

    Router::new()
        .route("/api/channels", get(channels_api_handler))
        .route("/api/categories", get(categories_handler))
        .route("/api/session", get(session_handler))
        .route("/api/category", post(set_category_handler))
        .route("/api/category/{direction}", post(cycle_category_handler))
        .route("/api/select/{id}", post(select_handler))
        .route("/api/step/{direction}", post(step_handler))
        .route("/api/toggle", post(toggle_handler))
        .route("/api/remote/{key}", post(remote_handler))
        .route("/api/swipe", post(swipe_handler))
        .route("/api/search", post(search_handler))
        .route("/api/sink-event", post(sink_event_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<none>")
}

async fn fallback_handler(method: Method, uri: Uri, headers: HeaderMap) -> impl IntoResponse {
    info!(
        "HTTP 404: method={} uri={} UA=\"{}\"",
        method,
        uri,
        user_agent(&headers)
    );
    (StatusCode::NOT_FOUND, "Not found")
}

#[derive(Serialize)]
struct CommandResponse {
    outcome: Outcome,
    #[serde(flatten)]
    session: SessionSnapshot,
}

fn command_response(outcome: Outcome, session: SessionSnapshot) -> Response {
    let status = match outcome {
        Outcome::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    (status, Json(CommandResponse { outcome, session })).into_response()
}

async fn run_command(state: &AppState, command: Command) -> Response {
    let mut player = state.player.lock().await;
    let outcome = player.apply(command);
    command_response(outcome, player.snapshot())
}

fn parse_direction(value: &str) -> Option<Direction> {
    match value {
        "next" => Some(Direction::Next),
        "prev" | "previous" => Some(Direction::Prev),
        _ => None,
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

async fn channels_api_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Channel>> {
    let player = state.player.lock().await;
    Json(
        player
            .controller()
            .channels()
            .iter()
            .map(|c| c.as_ref().clone())
            .collect(),
    )
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.player.lock().await.controller().categories().to_vec())
}

async fn session_handler(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.player.lock().await.snapshot())
}

#[derive(Deserialize)]
struct CategoryRequest {
    category: String,
}

async fn set_category_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CategoryRequest>,
) -> Response {
    run_command(&state, Command::SetCategory { category: payload.category }).await
}

async fn cycle_category_handler(
    Path(direction): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match parse_direction(&direction) {
        Some(direction) => run_command(&state, Command::CycleCategory { direction }).await,
        None => bad_request(format!("Unknown direction: {direction}")),
    }
}

async fn select_handler(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    run_command(&state, Command::SelectChannel { unique_id: id }).await
}

async fn step_handler(Path(direction): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match parse_direction(&direction) {
        Some(direction) => run_command(&state, Command::Step { direction }).await,
        None => bad_request(format!("Unknown direction: {direction}")),
    }
}

async fn toggle_handler(State(state): State<Arc<AppState>>) -> Response {
    run_command(&state, Command::TogglePlayPause).await
}

async fn remote_handler(Path(key): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match RemoteKey::parse(&key) {
        Some(key) => run_command(&state, key.command()).await,
        None => bad_request(format!("Unknown key: {key}")),
    }
}

#[derive(Deserialize)]
struct SwipeRequest {
    dx: f64,
    dy: f64,
}

async fn swipe_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SwipeRequest>,
) -> Response {
    match input::swipe_command(payload.dx, payload.dy) {
        Some(command) => run_command(&state, command).await,
        None => {
            let player = state.player.lock().await;
            command_response(Outcome::Unchanged, player.snapshot())
        }
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    q: String,
}

/// Re-fetches the listing for a search query (empty means every channel) and reloads the session.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchRequest>,
) -> Response {
    let Some((search, api_url)) = state
        .search
        .as_ref()
        .and_then(|s| s.sources.api_url.as_deref().map(|url| (s, url)))
    else {
        return (StatusCode::NOT_FOUND, "No channel API configured").into_response();
    };

    let query = payload.q.trim();
    info!("Searching \"{}\" on {}", query, api_url);
    let records = match fetch_records(
        &search.client,
        api_url,
        Some(query),
        search.sources.fallback_stream_template.as_deref(),
    )
    .await
    {
        Ok(records) => records,
        Err(e) => {
            warn!("Search \"{}\" failed: {}", query, e);
            return (StatusCode::BAD_GATEWAY, format!("Channel API failed: {e}")).into_response();
        }
    };

    let (channels, categories) = build_lineup(&records, &search.catalog);
    let mut player = state.player.lock().await;
    let outcome = player.reload(channels, &categories);
    command_response(outcome, player.snapshot())
}

async fn sink_event_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(event): Json<SinkEvent>,
) -> impl IntoResponse {
    info!(
        "CLIENT event: id={} candidate={} epoch={} event={:?} detail={:?} UA=\"{}\"",
        event.ticket.channel_id,
        event.ticket.stream_index,
        event.ticket.epoch,
        event.event,
        event.detail,
        user_agent(&headers)
    );
    if state.sink_events.send(event).is_err() {
        warn!("Sink event dropped: event loop is not running");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.monitoring_enabled {
        return (StatusCode::NOT_FOUND, "Monitoring disabled").into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
        .into_response()
}
