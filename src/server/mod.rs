//! ShieldGate HTTP server.
//!
//! Demo API behind the security gateway:
//! - Public: `/health`, `/docs`, `/redoc`, `/openapi.json`, `/config/public`
//! - Protected: `/api/status`, `/api/resource`, `/api/resource/:id`
//!
//! Layering, outermost first: fixed security headers, CORS, request tracing,
//! gateway, routes. CORS answers preflights itself, so they never reach
//! authentication, but they still leave with the hardened header set.
//!
//! # Example
//!
//! ```rust,ignore
//! use shieldgate::{server::Server, Config};
//!
//! let server = Server::new(Config::load(None)?);
//! println!("master key: {}", server.master_key());
//! server.run().await?;
//! ```

mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, CorsConfig};
use crate::error::{GatewayError, Result};
use crate::gateway::middleware::security_middleware;
use crate::gateway::{SecurityGateway, SECURITY_HEADERS};

pub use handlers::{create_router, health_check};
pub use state::{AppState, ResourceStore};

/// Build the CORS layer from config. Unparseable origins are skipped.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
}

/// Full application: routes behind the gateway, tracing, CORS, and the fixed
/// header set outside everything.
pub fn build_app(state: Arc<AppState>) -> Router {
    let gateway = Arc::clone(&state.gateway);
    let cors = cors_layer(&state.config().cors);
    let server_header = gateway.server_header().clone();

    let mut app = create_router(state)
        .layer(axum::middleware::from_fn_with_state(
            gateway,
            security_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    for &(name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }
    app.layer(SetResponseHeaderLayer::overriding(
        header::SERVER,
        server_header,
    ))
}

/// HTTP server around one gateway
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Create a server and its gateway from config
    pub fn new(config: Config) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// The gateway
    pub fn gateway(&self) -> &Arc<SecurityGateway> {
        &self.state.gateway
    }

    /// The generated master key
    pub fn master_key(&self) -> &str {
        self.state.gateway.auth().master_key()
    }

    /// Router with all layers
    pub fn router(&self) -> Router {
        build_app(Arc::clone(&self.state))
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config().server.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        let config = self.state.config();
        tracing::info!(
            addr = %local,
            auth = config.auth.enabled,
            max_requests = config.rate_limit.max_requests,
            window_secs = config.rate_limit.window_secs,
            "ShieldGate listening"
        );

        let sweeper = self
            .state
            .gateway
            .spawn_cleanup(Duration::from_secs(config.server.cleanup_interval_secs.max(1)));

        let served = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        sweeper.abort();
        served?;
        Ok(())
    }
}
