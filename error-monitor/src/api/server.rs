//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::config::ServerSettings;
use crate::error::{Error, Result};
use crate::monitor::ExceptionMonitor;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Request body size limit in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ApiServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            bind_address: settings.bind_address.clone(),
            port: settings.port,
            body_limit: 1024 * 1024, // 1MB
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub monitor: Arc<ExceptionMonitor>,
    /// Bearer token guarding the admin routes
    pub admin_token: Option<Arc<str>>,
    /// Reports accepted but still being processed
    pub report_tasks: TaskTracker,
}

impl AppState {
    /// Build state around `monitor`, taking the admin token from its configuration.
    pub fn new(monitor: Arc<ExceptionMonitor>) -> Self {
        let admin_token = monitor
            .config()
            .server
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Arc::from);
        Self {
            start_time: Instant::now(),
            monitor,
            admin_token,
            report_tasks: TaskTracker::new(),
        }
    }

    /// Stop tracking new reports and wait for the accepted ones to finish.
    ///
    /// Call after the server stopped and before terminating the monitor.
    pub async fn drain_reports(&self) {
        self.report_tasks.close();
        if !self.report_tasks.is_empty() {
            tracing::info!(
                pending = self.report_tasks.len(),
                "Waiting for accepted reports to finish"
            );
        }
        self.report_tasks.wait().await;
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request| {
                        if req.uri().path().starts_with("/health") {
                            Span::none()
                        } else {
                            use tower_http::trace::MakeSpan;
                            tower_http::trace::DefaultMakeSpan::new()
                                .level(tracing::Level::INFO)
                                .make_span(req)
                        }
                    })
                    .on_response(
                        |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                            if span.is_disabled() {
                                return;
                            }
                            use tower_http::trace::OnResponse;
                            tower_http::trace::DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .on_response(res, latency, span);
                        },
                    ),
            )
    }

    /// Start the server and serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| Error::ApiError(format!("Invalid address: {}", e)))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await
            .map_err(|e| Error::ApiError(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
