use axum::{
    body::Body,
    extract::Query,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tower::util::ServiceExt;
use zaptv::{
    channels::{build_lineup, CatalogConfig},
    controller::{PlaybackConfig, PlaybackController},
    metrics::MonitoringConfig,
    player::{run_sink_events, Player, SharedPlayer},
    sink::ExternalSink,
    source::{parse_api_response, SourcesConfig},
    SearchSource,
};

const LISTING: &str = r#"{
    "success": true,
    "data": {
        "channels": [
            {"name": "ESPN", "category": "Esportes", "streamUrl": "https://a/espn"},
            {"name": "espn", "category": "Esportes", "logo": "https://img/espn.png", "url": "https://b/espn"},
            {"name": "HBO", "category": "Filmes", "embed_url": "https://a/hbo"},
            {"name": "Globo", "category": "TV Aberta", "stream": "https://a/globo"},
            {"name": "", "stream": "https://a/nameless"},
            {"name": "No Signal", "category": "Filmes"}
        ],
        "events": []
    }
}"#;

fn setup() -> (Router, SharedPlayer) {
    setup_with(None)
}

fn setup_with(search: Option<SearchSource>) -> (Router, SharedPlayer) {
    let records = parse_api_response(LISTING, None).unwrap();
    let mut catalog = CatalogConfig::default();
    catalog.categories = Some(vec![
        "Esportes".to_string(),
        "Filmes".to_string(),
        "Canais Abertos".to_string(),
        "Infantil".to_string(),
    ]);
    let (channels, categories) = build_lineup(&records, &catalog);
    let controller =
        PlaybackController::init(channels, &categories, &catalog.all_label, PlaybackConfig::default());

    let mut player = Player::new(controller, Box::new(ExternalSink::default()));
    player.start();
    let player = player.shared();

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(run_sink_events(player.clone(), rx));

    let app = zaptv::create_app(player.clone(), tx, MonitoringConfig::default(), search);
    (app, player)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    (status, body.to_vec())
}

async fn call_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(app, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_channels_api() {
    let (app, _) = setup();
    let (status, channels) = call_json(&app, "GET", "/api/channels", None).await;

    assert_eq!(status, StatusCode::OK);
    let channels = channels.as_array().unwrap();
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0]["unique_id"], "ESPN");
    assert_eq!(channels[0]["logo"], "https://img/espn.png");
    assert_eq!(channels[0]["streams"], serde_json::json!(["https://a/espn", "https://b/espn"]));
    assert_eq!(channels[2]["category"], "Canais Abertos");
}

#[tokio::test]
async fn test_session_starts_loading_first_channel() {
    let (app, _) = setup();
    let (status, session) = call_json(&app, "GET", "/api/session", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["active_category"], "All");
    assert_eq!(session["playback"], "loading");
    assert_eq!(session["active_channel"]["unique_id"], "ESPN");
    assert_eq!(session["stream_url"], "https://a/espn");
    assert_eq!(session["ticket"]["channel_id"], "ESPN");
    assert_eq!(session["ticket"]["stream_index"], 0);
}

#[tokio::test]
async fn test_select_and_step() {
    let (app, _) = setup();

    let (status, session) = call_json(&app, "POST", "/api/select/HBO", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["outcome"], "applied");
    assert_eq!(session["active_channel"]["unique_id"], "HBO");

    let (status, session) = call_json(&app, "POST", "/api/select/NOPE", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(session["outcome"], "not_found");
    assert_eq!(session["active_channel"]["unique_id"], "HBO");

    let (_, session) = call_json(&app, "POST", "/api/step/next", None).await;
    assert_eq!(session["active_channel"]["unique_id"], "GLOBO");
    let (_, session) = call_json(&app, "POST", "/api/step/next", None).await;
    assert_eq!(session["active_channel"]["unique_id"], "ESPN");
    let (_, session) = call_json(&app, "POST", "/api/step/prev", None).await;
    assert_eq!(session["active_channel"]["unique_id"], "GLOBO");

    let (status, _) = call(&app, "POST", "/api/step/sideways", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_categories_and_remote() {
    let (app, _) = setup();

    let (_, categories) = call_json(&app, "GET", "/api/categories", None).await;
    assert_eq!(
        categories,
        serde_json::json!(["All", "Esportes", "Filmes", "Canais Abertos", "Infantil"])
    );

    let (status, session) = call_json(
        &app,
        "POST",
        "/api/category",
        Some(serde_json::json!({"category": "Infantil"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["visible_channels"], serde_json::json!([]));
    assert_eq!(session["active_channel"], Value::Null);
    assert_eq!(session["playback"], "idle");

    let (_, session) = call_json(&app, "POST", "/api/step/next", None).await;
    assert_eq!(session["outcome"], "unchanged");

    let (_, session) = call_json(&app, "POST", "/api/remote/right", None).await;
    assert_eq!(session["active_category"], "All");
    assert_eq!(session["active_channel"]["unique_id"], "ESPN");

    let (_, session) = call_json(&app, "POST", "/api/category/next", None).await;
    assert_eq!(session["active_category"], "Esportes");
    assert_eq!(session["stream_index"], 0);
}

async fn wait_for_playback(player: &SharedPlayer, expected: &str) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = player.lock().await.snapshot();
            if serde_json::to_value(snapshot.playback).unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_sink_events_are_correlated() {
    let (app, player) = setup();

    let (_, first) = call_json(&app, "GET", "/api/session", None).await;
    let stale = first["ticket"].clone();
    let (_, session) = call_json(&app, "POST", "/api/select/HBO", None).await;
    let current = session["ticket"].clone();

    let mut late = stale.clone();
    late["event"] = "loaded".into();
    let (status, _) = call(&app, "POST", "/api/sink-event", Some(late)).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let mut loaded = current.clone();
    loaded["event"] = "loaded".into();
    call(&app, "POST", "/api/sink-event", Some(loaded)).await;

    assert!(wait_for_playback(&player, "playing").await);
    let (_, session) = call_json(&app, "GET", "/api/session", None).await;
    assert_eq!(session["active_channel"]["unique_id"], "HBO");

    let (_, session) = call_json(&app, "POST", "/api/toggle", None).await;
    assert_eq!(session["playback"], "paused");

    let mut failed = current;
    failed["event"] = "failed".into();
    failed["detail"] = "decoder error".into();
    call(&app, "POST", "/api/sink-event", Some(failed)).await;

    assert!(wait_for_playback(&player, "failed").await);
    let (_, session) = call_json(&app, "GET", "/api/session", None).await;
    assert_eq!(session["stream_fallback_exhausted"], true);
}

#[tokio::test]
async fn test_swipe_zaps() {
    let (app, _) = setup();
    let (_, session) = call_json(
        &app,
        "POST",
        "/api/swipe",
        Some(serde_json::json!({"dx": 4.0, "dy": -90.0})),
    )
    .await;
    assert_eq!(session["active_channel"]["unique_id"], "HBO");

    let (_, session) = call_json(
        &app,
        "POST",
        "/api/swipe",
        Some(serde_json::json!({"dx": 4.0, "dy": 10.0})),
    )
    .await;
    assert_eq!(session["outcome"], "unchanged");
}

#[tokio::test]
async fn test_metrics_and_fallback() {
    let (app, _) = setup();
    call(&app, "POST", "/api/step/next", None).await;

    let (status, body) = call(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("zaptv_channel_changes_total"));

    let (status, _) = call(&app, "GET", "/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

async fn channel_api(Query(params): Query<HashMap<String, String>>) -> String {
    match params.get("q").map(String::as_str) {
        Some("globo") => r#"{"success": true, "data": {
            "channels": [{"name": "Globo", "category": "TV Aberta", "streamUrl": "https://a/globo"}],
            "events": [{"title": "Final", "embeds": [{"embed_url": "https://a/final"}]}]
        }}"#
        .to_string(),
        Some(_) => r#"{"success": true, "data": {"channels": [], "events": []}}"#.to_string(),
        None => r#"{"success": true, "data": {"channels": [
            {"name": "Band", "streamUrl": "https://a/band"}
        ]}}"#
        .to_string(),
    }
}

async fn serve_channel_api() -> String {
    let app = Router::new()
        .route("/channels", get(channel_api))
        .route("/search", get(channel_api));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_search_replaces_lineup() {
    let base = serve_channel_api().await;
    let search = SearchSource {
        client: reqwest::Client::new(),
        sources: SourcesConfig {
            api_url: Some(base),
            ..Default::default()
        },
        catalog: Default::default(),
    };
    let (app, _) = setup_with(Some(search));

    let (status, session) =
        call_json(&app, "POST", "/api/search", Some(serde_json::json!({"q": " globo "}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["outcome"], "applied");
    assert_eq!(
        session["categories"],
        serde_json::json!(["All", "Canais Abertos", "Evento"])
    );
    assert_eq!(session["active_category"], "All");
    assert_eq!(session["active_channel"]["unique_id"], "GLOBO");
    assert_eq!(session["stream_url"], "https://a/globo");
    assert_eq!(session["playback"], "loading");

    let (_, channels) = call_json(&app, "GET", "/api/channels", None).await;
    assert_eq!(channels.as_array().unwrap().len(), 2);

    let (_, session) = call_json(&app, "POST", "/api/search", Some(serde_json::json!({"q": ""}))).await;
    assert_eq!(session["active_channel"]["unique_id"], "BAND");
    assert_eq!(session["active_channel"]["category"], "TV");

    let (status, session) =
        call_json(&app, "POST", "/api/search", Some(serde_json::json!({"q": "nothing"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["visible_channels"], serde_json::json!([]));
    assert_eq!(session["playback"], "idle");
}

#[tokio::test]
async fn test_search_without_api_is_not_found() {
    let (app, _) = setup();
    let (status, _) = call(&app, "POST", "/api/search", Some(serde_json::json!({"q": "globo"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, session) = call_json(&app, "GET", "/api/session", None).await;
    assert_eq!(session["active_channel"]["unique_id"], "ESPN");
}
