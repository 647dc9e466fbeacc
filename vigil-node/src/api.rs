//! HTTP surface: the public heartbeat/probe/breach endpoints and the
//! bearer-authenticated administration API.
//!
//! The heartbeat endpoint is CORS-open because clients embed the
//! check-in call directly in protected pages. Everything under
//! `/api/v1/admin` requires a configured bearer token; the matched
//! credential's actor name is threaded into every state change.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vigil_common::wire::{BreachReport, HeartbeatRequest, ProbeResponse};

use crate::crypto::SealedBlob;
use crate::engine::Engine;
use crate::error::VigilError;
use crate::snapshot::SNAPSHOT_EXTENSION;

/// Authenticated administrator identity, resolved by the auth
/// middleware from the presented bearer token.
#[derive(Debug, Clone)]
pub struct AdminActor {
    pub name: String,
}

struct ApiError(VigilError);

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VigilError::NotFound(_) => StatusCode::NOT_FOUND,
            VigilError::Validation(_) => StatusCode::BAD_REQUEST,
            VigilError::TokenExpired => StatusCode::UNAUTHORIZED,
            VigilError::SecurityViolation(_) => StatusCode::FORBIDDEN,
            VigilError::Crypto(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VigilError::Broadcast(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolved client address, attached by the gate middleware.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

/// Build the full router. Admin routes are only mounted when the
/// admin API is enabled in config.
pub fn build_router(engine: Arc<Engine>) -> Router {
    // Short server-side timeout, independent of the freshness window.
    let request_timeout = engine.config().request_timeout();
    let public = Router::new()
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/probe", get(probe))
        .route("/api/v1/breach", post(breach))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&engine),
            gate_middleware,
        ))
        .layer(TimeoutLayer::new(request_timeout))
        .route("/health", get(health))
        .layer(CorsLayer::permissive());

    let mut router = public;
    if engine.config().admin.enabled {
        let admin = Router::new()
            .route("/api/v1/admin/status", get(admin_status))
            .route("/api/v1/admin/licenses", post(issue_license).get(list_licenses))
            .route("/api/v1/admin/licenses/:key", get(get_license))
            .route("/api/v1/admin/licenses/:key/suspend", post(suspend_license))
            .route("/api/v1/admin/licenses/:key/lock", post(lock_license))
            .route("/api/v1/admin/licenses/:key/release", post(release_license))
            .route("/api/v1/admin/licenses/:key/heal", post(heal_license))
            .route("/api/v1/admin/licenses/:key/staging", put(set_staging))
            .route("/api/v1/admin/licenses/:key/dev-mode", put(set_dev_mode))
            .route("/api/v1/admin/licenses/:key/forensics", get(license_forensics))
            .route("/api/v1/admin/reputation/:ip", get(get_reputation))
            .route("/api/v1/admin/reputation/:ip", delete(reset_reputation))
            .route("/api/v1/admin/threats", get(list_threats).post(ban_global))
            .route("/api/v1/admin/threats/:ip", delete(unban_global))
            .route("/api/v1/admin/snapshots", post(create_snapshot))
            .route("/api/v1/admin/snapshots/restore", post(restore_snapshot))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&engine),
                auth_middleware,
            ));
        router = router.merge(admin);
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bearer-token check for the admin API. The matched credential's
/// actor label is attached for audit attribution downstream.
async fn auth_middleware(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(presented) = presented else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing bearer token" })),
        )
            .into_response();
    };

    let credential = engine
        .config()
        .admin
        .credentials
        .iter()
        .find(|c| c.token.expose_secret().as_str() == presented);

    match credential {
        Some(c) => {
            request.extensions_mut().insert(AdminActor {
                name: c.actor.clone(),
            });
            next.run(request).await
        }
        None => {
            warn!("Admin API call with invalid bearer token");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid bearer token" })),
            )
                .into_response()
        }
    }
}

/// Resolve the client address. `X-Forwarded-For` is honored only when
/// the socket peer is a configured trusted proxy; any other peer is
/// attributed to its own address, whatever headers it forged. Without
/// a socket peer (service driven directly) the header is the only
/// source.
fn client_ip(
    engine: &Engine,
    headers: &HeaderMap,
    peer: Option<&ConnectInfo<SocketAddr>>,
) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    match peer.map(|p| p.0.ip()) {
        Some(peer_ip) if engine.is_trusted_proxy(peer_ip) => forwarded.or(Some(peer_ip)),
        Some(peer_ip) => Some(peer_ip),
        None => forwarded,
    }
}

/// Reputation and rate gate in front of the public endpoints. Runs
/// before any body is read, so a blocked IP never reaches the parser.
async fn gate_middleware(
    State(engine): State<Arc<Engine>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    mut request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&engine, request.headers(), peer.as_ref()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if engine.check_ip(ip).blocked {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !engine.admit(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

// ----------------------------------------------------------------------
// Public surface
// ----------------------------------------------------------------------

async fn health(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "deployment_id": engine.config().platform.deployment_id,
        "licenses": engine.registry().len(),
    }))
}

async fn heartbeat(
    State(engine): State<Arc<Engine>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    Json(engine.heartbeat(ip, &request, Utc::now()).await).into_response()
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    host: Option<String>,
}

async fn probe(
    State(engine): State<Arc<Engine>>,
    Extension(ClientIp(_ip)): Extension<ClientIp>,
    Query(params): Query<ProbeParams>,
) -> Response {
    let status = engine.probe(params.host.as_deref(), Utc::now()).await;
    Json(ProbeResponse { status }).into_response()
}

async fn breach(
    State(engine): State<Arc<Engine>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Json(report): Json<BreachReport>,
) -> ApiResult<Json<serde_json::Value>> {
    let suspended = engine.report_breach(ip, &report, Utc::now()).await?;
    Ok(Json(json!({ "acknowledged": true, "suspended": suspended })))
}

// ----------------------------------------------------------------------
// Admin surface
// ----------------------------------------------------------------------

async fn admin_status(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({
        "deployment_id": engine.config().platform.deployment_id,
        "licenses": engine.registry().len(),
        "tamper_events": engine.forensics().len(),
    }))
}

#[derive(Debug, Deserialize)]
struct IssueLicenseRequest {
    key: String,
    domain: String,
    expires_at: Option<DateTime<Utc>>,
}

async fn issue_license(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Json(body): Json<IssueLicenseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let license = engine.issue_license(
        &body.key,
        &body.domain,
        body.expires_at,
        &actor.name,
        Utc::now(),
    )?;
    Ok(Json(serde_json::to_value(license).map_err(VigilError::from)?))
}

async fn list_licenses(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({ "licenses": engine.registry().export() }))
}

async fn get_license(
    State(engine): State<Arc<Engine>>,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let license = engine.license_status(&key, Utc::now()).await?;
    Ok(Json(serde_json::to_value(license).map_err(VigilError::from)?))
}

#[derive(Debug, Deserialize)]
struct ReasonBody {
    reason: String,
}

async fn suspend_license(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = engine
        .suspend_license(&key, &body.reason, &actor.name, Utc::now())
        .await?;
    Ok(Json(json!({ "license_key": key, "status": record.to.to_string() })))
}

async fn lock_license(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = engine
        .lock_license(&key, &body.reason, &actor.name, Utc::now())
        .await?;
    info!(license_key = %key, actor = %actor.name, "License locked");
    Ok(Json(json!({ "license_key": key, "status": record.to.to_string() })))
}

async fn release_license(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = engine.release_license(&key, &actor.name, Utc::now()).await?;
    Ok(Json(json!({ "license_key": key, "status": record.to.to_string() })))
}

async fn heal_license(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = engine.heal_license(&key, &actor.name, Utc::now()).await?;
    Ok(Json(json!({ "license_key": key, "status": record.to.to_string() })))
}

#[derive(Debug, Deserialize)]
struct StagingBody {
    staging_domain: Option<String>,
}

async fn set_staging(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
    Json(body): Json<StagingBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let license = engine.set_staging_domain(&key, body.staging_domain, &actor.name)?;
    Ok(Json(json!({
        "license_key": key,
        "staging_domain": license.staging_domain,
    })))
}

#[derive(Debug, Deserialize)]
struct DevModeBody {
    expires_at: Option<DateTime<Utc>>,
}

async fn set_dev_mode(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(key): Path<String>,
    Json(body): Json<DevModeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let license = engine.set_dev_mode_expiry(&key, body.expires_at, &actor.name)?;
    Ok(Json(json!({
        "license_key": key,
        "dev_mode_expiry": license.dev_mode_expiry,
    })))
}

async fn license_forensics(
    State(engine): State<Arc<Engine>>,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let license = engine.license_status(&key, Utc::now()).await?;
    let events = engine.forensics().for_license(license.id);
    Ok(Json(json!({ "license_key": key, "events": events })))
}

async fn get_reputation(
    State(engine): State<Arc<Engine>>,
    Path(ip): Path<IpAddr>,
) -> Json<serde_json::Value> {
    let status = engine.check_ip(ip);
    Json(json!({
        "ip": ip,
        "blocked": status.blocked,
        "attempts": status.attempts,
    }))
}

async fn reset_reputation(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Path(ip): Path<IpAddr>,
) -> ApiResult<Json<serde_json::Value>> {
    engine.reset_reputation(ip, &actor.name, Utc::now())?;
    Ok(Json(json!({ "ip": ip, "reset": true })))
}

async fn list_threats(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(json!({ "threats": engine.threats_export() }))
}

#[derive(Debug, Deserialize)]
struct BanBody {
    ip: IpAddr,
    reason: String,
    #[serde(default)]
    proxy_or_vpn: bool,
    country: Option<String>,
}

async fn ban_global(
    State(engine): State<Arc<Engine>>,
    Extension(actor): Extension<AdminActor>,
    Json(body): Json<BanBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let entry = engine
        .ban_ip_global(
            body.ip,
            &body.reason,
            body.proxy_or_vpn,
            body.country,
            &actor.name,
            Utc::now(),
        )
        .await?;
    Ok(Json(serde_json::to_value(entry).map_err(VigilError::from)?))
}

async fn unban_global(
    State(engine): State<Arc<Engine>>,
    Path(ip): Path<IpAddr>,
) -> ApiResult<Json<serde_json::Value>> {
    let entry = engine.unban_ip_global(ip)?;
    Ok(Json(json!({ "ip": entry.ip, "removed": true })))
}

async fn create_snapshot(
    State(engine): State<Arc<Engine>>,
) -> ApiResult<Json<serde_json::Value>> {
    let (blob, snapshot_id) = engine.create_snapshot(Utc::now())?;
    Ok(Json(json!({
        "snapshot_id": snapshot_id,
        "filename": format!("{snapshot_id}.{SNAPSHOT_EXTENSION}"),
        "blob": blob.to_base64(),
    })))
}

#[derive(Debug, Deserialize)]
struct RestoreBody {
    blob: String,
}

async fn restore_snapshot(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<RestoreBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let blob = SealedBlob::from_base64(&body.blob)?;
    let summary = engine.restore_snapshot(&blob).await?;
    Ok(Json(serde_json::to_value(summary).map_err(VigilError::from)?))
}

/// Graceful shutdown: SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
