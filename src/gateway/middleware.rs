//! Axum adapter for [`SecurityGateway`].
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/api/resource", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(gateway.clone(), security_middleware));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use serde_json::json;
use tokio::time::timeout;

use super::{GatewayRequest, GatewayResponse, SecurityGateway};
use crate::audit::AuditSeverity;
use crate::error::{GatewayError, Result};

/// Admit the client, buffer the body under the request deadline, run the
/// rest of the pipeline, and convert back.
///
/// Blocklist and rate-limit decisions happen before any body byte is read.
pub async fn security_middleware(
    State(gateway): State<Arc<SecurityGateway>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let peer_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (parts, body) = request.into_parts();
    let mut gateway_request = GatewayRequest {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        headers: parts.headers.clone(),
        body: Bytes::new(),
        peer_addr,
    };
    let client = gateway_request.client_identity();

    if let Err(err) = gateway.admit(&client, &gateway_request.method, &gateway_request.path) {
        return into_response(gateway.rejection(&client, &err));
    }

    let limit = gateway.config().validation.max_request_size;
    let deadline = Duration::from_secs(gateway.config().server.request_timeout_secs);

    gateway_request.body = match timeout(deadline, to_bytes(body, limit)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => {
            let err = GatewayError::PayloadTooLarge {
                size: limit as u64 + 1,
                limit: limit as u64,
            };
            gateway.audit().log_event(
                "payload_too_large",
                &client,
                json!({ "path": gateway_request.path, "streamed": true }),
                AuditSeverity::Warning,
            );
            return into_response(gateway.rejection(&client, &err));
        },
        Err(_) => {
            return into_response(gateway.rejection(&client, &GatewayError::Timeout(deadline)));
        },
    };

    let remaining = deadline.saturating_sub(started.elapsed());
    let response = gateway
        .handle_admitted(gateway_request, Some(remaining), move |req| async move {
            let request = Request::from_parts(parts, Body::from(req.body));
            let response = next.run(request).await;
            from_response(response).await
        })
        .await;

    into_response(response)
}

async fn from_response(response: Response) -> Result<GatewayResponse> {
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| GatewayError::Internal(format!("failed to read response body: {e}")))?;

    Ok(GatewayResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

fn into_response(response: GatewayResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
