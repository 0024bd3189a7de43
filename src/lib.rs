pub mod advancement;
pub mod broadcast;
pub mod compose;
pub mod config;
pub mod geometry;
pub mod matchdata;
pub mod print;
pub mod structure;
pub mod sync;
pub mod types;

use compose::BracketTree;
use config::*;
use matchdata::{HttpMatchService, MatchService};
use print::print_document;
use sync::{division_snapshot, maybe_refresh_division, propose_and_read_back, spawn_division_polling};
use types::*;

use axum::{
    extract::{Path as AxumPath, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use serde_json::json;
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── Response helpers ───────────────────────────────────────────────────

fn json_no_store(body: String) -> Response {
    (
        [
            ("Content-Type", "application/json"),
            ("Cache-Control", "no-store"),
            ("Pragma", "no-cache"),
            ("Expires", "0"),
        ],
        body,
    )
        .into_response()
}

fn service_error(err: String) -> Response {
    (StatusCode::BAD_GATEWAY, Json(json!({ "error": err }))).into_response()
}

// ── Division board endpoints ───────────────────────────────────────────

async fn get_division_state(
    AxumPath(division_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
) -> Response {
    maybe_refresh_division(state.service.as_ref(), &state.board_store, division_id, false);
    let snapshot = division_snapshot(&state.board_store, division_id);
    json_no_store(serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string()))
}

// Explicit refresh, fired when a board view regains focus. Suppressed while
// a fetch for the same division is already in flight.
async fn post_division_refresh(
    AxumPath(division_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
) -> Response {
    maybe_refresh_division(state.service.as_ref(), &state.board_store, division_id, true);
    let snapshot = division_snapshot(&state.board_store, division_id);
    json_no_store(serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string()))
}

async fn get_division_print(
    AxumPath(division_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
) -> Response {
    maybe_refresh_division(state.service.as_ref(), &state.board_store, division_id, false);
    let snapshot = division_snapshot(&state.board_store, division_id);
    let tree = snapshot.tree.unwrap_or_else(BracketTree::default);
    let doc = print_document(&tree, &format!("Division {division_id}"));
    (
        [
            ("Content-Type", "image/svg+xml"),
            ("Cache-Control", "no-store"),
        ],
        doc,
    )
        .into_response()
}

// Interactive viewers measure their own boxes after every layout pass and
// ask for fresh connector routes; nothing is cached across renders.
async fn post_division_connectors(
    AxumPath(division_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
    Json(request): Json<ConnectorRequest>,
) -> Response {
    let snapshot = division_snapshot(&state.board_store, division_id);
    let tree = snapshot.tree.unwrap_or_else(BracketTree::default);
    let edge_map: HashMap<MatchKey, MatchKey> =
        tree.edges.iter().map(|edge| (edge.from, edge.to)).collect();
    let boxes: HashMap<MatchKey, (geometry::Rect, geometry::Side)> = request
        .boxes
        .iter()
        .map(|b| (b.key, (geometry::rect(b.x, b.y, b.width, b.height), b.side)))
        .collect();
    let lines = geometry::connectors(&edge_map, &boxes, 0.0);
    json_no_store(serde_json::to_string(&lines).unwrap_or_else(|_| "[]".to_string()))
}

// ── Single match endpoints ─────────────────────────────────────────────

async fn get_match_state(
    AxumPath(match_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
) -> Response {
    match state.service.match_state(match_id) {
        Ok(live) => json_no_store(serde_json::to_string(&live).unwrap_or_else(|_| "{}".to_string())),
        Err(err) => service_error(err),
    }
}

// Scorekeeper mutation: write the delta, read the full state straight back,
// return whatever the service decided. Win flags are never computed here.
async fn post_match_score(
    AxumPath(match_id): AxumPath<u64>,
    AxumState(state): AxumState<BoardServerState>,
    Json(delta): Json<StateDelta>,
) -> Response {
    match propose_and_read_back(state.service.as_ref(), match_id, &delta) {
        Ok(live) => json_no_store(serde_json::to_string(&live).unwrap_or_else(|_| "{}".to_string())),
        Err(err) => service_error(err),
    }
}

async fn post_match_broadcast(
    AxumPath(match_id): AxumPath<u64>,
    Json(request): Json<BroadcastRequest>,
) -> Response {
    let config = load_config_inner().unwrap_or_else(|_| AppConfig::default());
    let result = match request.action.as_str() {
        "start" => broadcast::start_broadcast(&config, match_id),
        "stop" => broadcast::stop_broadcast(&config, match_id),
        other => Err(format!("Unknown broadcast action {other:?}.")),
    };
    match result {
        Ok(()) => json_no_store("{\"ok\":true}".to_string()),
        Err(err) => service_error(err),
    }
}

// ── Board HTTP server ──────────────────────────────────────────────────

fn board_router(state: BoardServerState, viewer_dir: PathBuf) -> Router {
    let viewer_files = get_service(ServeDir::new(viewer_dir));

    Router::new()
        .route("/division/:id/state.json", get(get_division_state))
        .route("/division/:id/refresh", post(post_division_refresh))
        .route("/division/:id/print.svg", get(get_division_print))
        .route("/division/:id/connectors", post(post_division_connectors))
        .route("/match/:id/state.json", get(get_match_state))
        .route("/match/:id/score", post(post_match_score))
        .route("/match/:id/broadcast", post(post_match_broadcast))
        .nest_service("/", viewer_files)
        .with_state(state)
}

async fn start_board_server(state: BoardServerState, viewer_dir: PathBuf, addr: &str) {
    let app = board_router(state, viewer_dir);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("board server failed to bind {addr}: {e}");
            return;
        }
    };
    info!("board server listening at http://{addr}/");
    if let Err(e) = axum::serve(listener, app).await {
        error!("board server error: {e}");
    }
}

// ── Entry point ────────────────────────────────────────────────────────

pub fn run() {
    load_env_file();

    // Initialize tracing with file + stderr output
    let logs_dir = repo_root().join("logs");
    fs::create_dir_all(&logs_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&logs_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
    info!("Kumite board starting");
    log_env_warnings();

    let config = load_config_inner().unwrap_or_else(|_| AppConfig::default());
    let board_store: SharedBoardStore = Arc::new(Mutex::new(HashMap::new()));
    let service = Arc::new(HttpMatchService::from_config(&config));
    spawn_division_polling(service.clone(), board_store.clone());

    let viewer_dir = resolve_repo_path(&config.viewer_dir);
    fs::create_dir_all(&viewer_dir).ok();

    let state = BoardServerState {
        board_store,
        service,
    };

    let runtime = tokio::runtime::Runtime::new().expect("error while starting board runtime");
    runtime.block_on(start_board_server(state, viewer_dir, &config.board_addr));
}
