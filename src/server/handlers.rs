//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use super::state::AppState;
use crate::security::SECURITY_VERSION;

/// Create the API router (without the gateway layer)
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Public
        .route("/health", get(health_check))
        .route("/docs", get(docs))
        .route("/redoc", get(docs))
        .route("/openapi.json", get(openapi))
        .route("/config/public", get(public_config))
        // Protected
        .route("/api/status", get(status))
        .route("/api/resource", get(list_resources).post(create_resource))
        .route(
            "/api/resource/:id",
            get(get_resource).put(replace_resource).delete(delete_resource),
        )
        .with_state(state)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn docs() -> impl IntoResponse {
    Json(json!({
        "service": "shieldgate",
        "openapi": "/openapi.json",
        "public": ["/health", "/docs", "/redoc", "/openapi.json", "/config/public"],
        "protected": ["/api/status", "/api/resource", "/api/resource/{id}"],
        "auth": "Authorization: Bearer <key> or X-API-Key: <key>",
    }))
}

async fn openapi() -> impl IntoResponse {
    Json(json!({
        "openapi": "3.0.3",
        "info": { "title": "ShieldGate", "version": env!("CARGO_PKG_VERSION") },
        "components": {
            "securitySchemes": {
                "bearer": { "type": "http", "scheme": "bearer" },
                "apiKey": { "type": "apiKey", "in": "header", "name": "X-API-Key" }
            }
        },
        "paths": {
            "/health": { "get": { "summary": "Liveness" } },
            "/config/public": { "get": { "summary": "Public limits" } },
            "/api/status": { "get": { "summary": "Gateway status", "security": [{ "bearer": [] }] } },
            "/api/resource": {
                "get": { "summary": "List resources", "security": [{ "bearer": [] }] },
                "post": { "summary": "Create resource", "security": [{ "bearer": [] }] }
            },
            "/api/resource/{id}": {
                "get": { "summary": "Fetch resource", "security": [{ "bearer": [] }] },
                "put": { "summary": "Replace resource", "security": [{ "bearer": [] }] },
                "delete": { "summary": "Delete resource", "security": [{ "bearer": [] }] }
            }
        }
    }))
}

/// Limits a client may rely on. Nothing secret.
async fn public_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config();
    Json(json!({
        "name": config.server.name,
        "version": env!("CARGO_PKG_VERSION"),
        "auth_enabled": config.auth.enabled,
        "rate_limit": {
            "max_requests": config.rate_limit.max_requests,
            "window_secs": config.rate_limit.window_secs,
        },
        "max_request_size": config.validation.max_request_size,
        "max_json_depth": config.validation.max_json_depth,
    }))
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    /// Always `ok` while the process serves
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Threat pattern library version
    pub pattern_version: &'static str,
    /// Seconds since startup
    pub uptime_secs: u64,
    /// Clients with a live rate-limit window
    pub tracked_clients: usize,
    /// Registered API keys
    pub api_keys: usize,
    /// Audit events emitted so far
    pub audit_events: u64,
    /// Audit events per type, sorted by type
    pub audit_counts: Vec<(String, u64)>,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gateway = &state.gateway;
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        pattern_version: SECURITY_VERSION,
        uptime_secs: state.uptime().as_secs(),
        tracked_clients: gateway.rate_limiter().client_count(),
        api_keys: gateway.auth().key_count(),
        audit_events: gateway.audit().total(),
        audit_counts: gateway.audit().counts(),
    })
}

async fn list_resources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let items: Vec<Value> = state
        .resources
        .list()
        .into_iter()
        .map(|(id, item)| json!({ "id": id, "item": item }))
        .collect();
    Json(json!({ "items": items }))
}

async fn create_resource(
    State(state): State<Arc<AppState>>,
    Json(item): Json<Value>,
) -> impl IntoResponse {
    let id = state.resources.insert(item.clone());
    (StatusCode::CREATED, Json(json!({ "id": id, "item": item })))
}

async fn get_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.resources.get(id) {
        Some(item) => (StatusCode::OK, Json(json!({ "id": id, "item": item }))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Resource not found"})),
        ),
    }
}

async fn replace_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(item): Json<Value>,
) -> impl IntoResponse {
    if state.resources.replace(id, item.clone()) {
        (StatusCode::OK, Json(json!({ "id": id, "item": item })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Resource not found"})),
        )
    }
}

async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    if state.resources.remove(id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
