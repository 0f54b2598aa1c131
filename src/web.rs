//! Axum-based HTTP server for the heater dashboard
//!
//! JSON API over the shared [`RelayController`], a WebSocket that pushes
//! status snapshots, log tail/stream endpoints and the static dashboard. All
//! requests pass a peer-address filter first. Status and price reads come
//! from the controller's [`StatusFeed`] and never wait on a running cycle.

mod logs;
mod ws;

pub use logs::{logs_stream, logs_tail};
pub use ws::{handle_client_message, ws_handler};

use crate::controller::{RelayController, StatusFeed};
use crate::error::SpotheatError;
use crate::net::PeerFilter;
use crate::settings::HeaterSettings;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::middleware::{self, Next};
use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Mutex<RelayController>>,
    pub feed: StatusFeed,
    pub peers: Arc<PeerFilter>,
    pub log_file: String,
    pub static_dir: PathBuf,
}

impl AppState {
    pub fn new(
        controller: Arc<Mutex<RelayController>>,
        feed: StatusFeed,
        config: &crate::config::Config,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            controller,
            feed,
            peers: Arc::new(PeerFilter::from_cidrs(&config.web.allowed_networks)?),
            log_file: config.logging.file.clone(),
            static_dir: PathBuf::from(&config.web.static_dir),
        })
    }
}

/// Map a controller error onto an HTTP status and JSON body
pub fn error_response(err: &SpotheatError) -> Response {
    let status = match err {
        SpotheatError::Validation { .. } | SpotheatError::Config { .. } => StatusCode::BAD_REQUEST,
        SpotheatError::Actuation { .. }
        | SpotheatError::DeviceUnreachable { .. }
        | SpotheatError::Fetch { .. }
        | SpotheatError::Network { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/health", responses(
    (status = 200, description = "Service is healthy")
)))]
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/status", responses(
    (status = 200, description = "Controller snapshot", body = crate::controller::Snapshot)
)))]
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.feed.snapshot())
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/prices", responses(
    (status = 200, description = "Stored hourly prices", body = crate::controller::PriceOverview)
)))]
pub async fn prices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.feed.prices())
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/prices/refresh", responses((status = 200), (status = 502))))]
pub async fn refresh_prices(State(state): State<AppState>) -> Response {
    let mut ctrl = state.controller.lock().await;
    match ctrl.refresh_prices().await {
        Ok(hours) => Json(serde_json::json!({ "ok": true, "hours": hours })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/config", responses(
    (status = 200, description = "Heater settings", body = HeaterSettings)
)))]
pub async fn get_config(State(state): State<AppState>) -> Response {
    let ctrl = state.controller.lock().await;
    match ctrl.settings() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(put, path = "/api/config", request_body = HeaterSettings, responses(
    (status = 200, description = "Settings stored and applied", body = crate::controller::Snapshot),
    (status = 400, description = "Invalid settings")
)))]
pub async fn put_config(
    State(state): State<AppState>,
    Json(settings): Json<HeaterSettings>,
) -> Response {
    let mut ctrl = state.controller.lock().await;
    match ctrl.update_settings(settings).await {
        Ok(_) => Json(ctrl.snapshot()).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg(feature = "openapi")]
#[utoipa::path(get, path = "/api/config/schema", responses((status = 200)))]
pub async fn get_config_schema() -> impl IntoResponse {
    let schema = schemars::schema_for!(crate::config::Config);
    Json(serde_json::to_value(&schema).unwrap_or(serde_json::json!({"error":"schema"})))
}

async fn manual(state: AppState, on: bool) -> Response {
    let mut ctrl = state.controller.lock().await;
    match ctrl.manual_turn(on).await {
        Ok(_) => Json(ctrl.snapshot()).into_response(),
        Err(e) => error_response(&e),
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/relay/on", responses((status = 200), (status = 502))))]
pub async fn relay_on(State(state): State<AppState>) -> Response {
    manual(state, true).await
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/relay/off", responses((status = 200), (status = 502))))]
pub async fn relay_off(State(state): State<AppState>) -> Response {
    manual(state, false).await
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/resume", responses(
    (status = 200, description = "Override cleared, cycle run", body = crate::controller::Snapshot)
)))]
pub async fn resume(State(state): State<AppState>) -> impl IntoResponse {
    let mut ctrl = state.controller.lock().await;
    ctrl.resume().await;
    Json(ctrl.snapshot())
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema, utoipa::IntoParams))]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/history", params(HistoryParams), responses(
    (status = 200, description = "State log entries, oldest first", body = [crate::state_log::StateLogEntry])
)))]
pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(48).min(24 * 366);
    let ctrl = state.controller.lock().await;
    Json(ctrl.history(limit))
}

/// Reject peers outside loopback and the allowed networks
pub async fn peer_filter(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    if state.peers.allows(peer.ip()) {
        return next.run(req).await;
    }
    crate::logging::get_logger("web").warn(&format!(
        "Rejected request from {} to {}",
        peer,
        req.uri().path()
    ));
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

#[cfg(feature = "openapi")]
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        health, status, prices, refresh_prices,
        get_config, put_config, get_config_schema,
        relay_on, relay_off, resume, history,
        logs::logs_tail, logs::logs_stream,
    ),
    components(schemas(
        HeaterSettings, HistoryParams,
        crate::controller::Snapshot, crate::controller::HourPrice,
        crate::controller::LastError, crate::controller::PriceOverview,
        crate::prices::PricePoint, crate::state_log::StateLogEntry,
    )),
    tags((name = "spotheat", description = "Spotheat heater controller API"))
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/prices", get(prices))
        .route("/api/prices/refresh", post(refresh_prices))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/relay/on", post(relay_on))
        .route("/api/relay/off", post(relay_off))
        .route("/api/resume", post(resume))
        .route("/api/history", get(history))
        .route("/ws", get(ws_handler))
        .merge(logs::routes());

    #[cfg(feature = "openapi")]
    let api = {
        use utoipa::OpenApi;
        api.route("/api/config/schema", get(get_config_schema))
            .merge(utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
    };

    let router = api
        .fallback_service(
            ServeDir::new(&state.static_dir).append_index_html_on_directories(true),
        )
        .layer(middleware::from_fn_with_state(state.clone(), peer_filter))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    #[cfg(feature = "compression")]
    let router = router.layer(tower_http::compression::CompressionLayer::new());

    router
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            SocketAddr::from(([127, 0, 0, 1], port))
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{} (dashboard /, API /api, socket /ws)",
        local_addr
    ));

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
