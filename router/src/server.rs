//! axum server wiring.
//!
//! The proxy exposes:
//! - `GET /health`
//! - a catch-all POST handler that classifies the body and dispatches single calls or batches

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Method, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use http::{header, HeaderValue};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{
    batching::{dispatch_batch, encode_merged},
    classify::{classify, Classified},
    config::{BatchFailurePolicy, ProxyConfig},
    dispatch::{dispatch_single, DispatchError, ProxyResponse},
    forward::{Forwarder, HttpForwarder},
    routes::RouteTable,
};

#[derive(Clone)]
pub struct AppState {
    routes: Arc<RouteTable>,
    forwarder: Arc<dyn Forwarder>,
    max_body_bytes: usize,
    batch_failure_policy: BatchFailurePolicy,
}

impl AppState {
    pub fn new(routes: RouteTable, forwarder: Arc<dyn Forwarder>, cfg: &ProxyConfig) -> Self {
        Self {
            routes: Arc::new(routes),
            forwarder,
            max_body_bytes: cfg.max_body_bytes,
            batch_failure_policy: cfg.batch_failure_policy,
        }
    }

    /// Route table plus a `reqwest` forwarder configured from `cfg`.
    pub fn from_config(cfg: &ProxyConfig) -> anyhow::Result<Self> {
        let routes = RouteTable::from_config(cfg)?;
        let forwarder = Arc::new(HttpForwarder::new(cfg.upstream_timeout())?);
        Ok(Self::new(routes, forwarder, cfg))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(handle_rpc)
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn run(cfg: ProxyConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState::from_config(&cfg)?;
    tracing::info!(
        event = "startup",
        listen_addr = %addr,
        default_url = %state.routes().default_destination(),
        routes = state.routes().len(),
        batch_failure_policy = ?cfg.batch_failure_policy,
        "starting rpc router"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(event = "shutdown", "ctrl-c received");
    })
    .await
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_rpc(State(state): State<AppState>, req: Request<Body>) -> axum::response::Response {
    let span = tracing::info_span!("rpc_request", request_id = %Uuid::new_v4());
    route_request(state, req).instrument(span).await.into_response()
}

async fn route_request(state: AppState, req: Request<Body>) -> ProxyResponse {
    let (parts, body) = req.into_parts();

    if parts.method != Method::POST {
        tracing::debug!(
            event = "request_rejected",
            reason = "method_not_allowed",
            method = %parts.method,
            path = %parts.uri.path(),
            "request rejected"
        );
        let mut resp = ProxyResponse::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        resp.headers
            .insert(header::ALLOW, HeaderValue::from_static("POST"));
        return resp;
    }

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(_) => return ProxyResponse::text(StatusCode::PAYLOAD_TOO_LARGE, "body too large"),
    };

    match classify(&body) {
        Classified::Malformed(kind) => {
            tracing::debug!(
                event = "request_rejected",
                reason = ?kind,
                body_bytes = body.len(),
                "request rejected"
            );
            ProxyResponse::text(StatusCode::BAD_REQUEST, kind.message())
        }
        Classified::Single(call) => {
            match dispatch_single(&state.routes, state.forwarder.as_ref(), call).await {
                Ok(resp) => resp,
                Err(DispatchError::Forward(err)) => {
                    tracing::error!(event = "proxy_error", error = %err, "upstream forward failed");
                    ProxyResponse::text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("proxy error: {err}"),
                    )
                }
            }
        }
        Classified::Batch(calls) => {
            let merged = dispatch_batch(
                &state.routes,
                state.forwarder.as_ref(),
                &calls,
                state.batch_failure_policy,
            )
            .await;
            tracing::info!(
                event = "proxy_batch",
                calls = calls.len(),
                results = merged.len(),
                "batch merged"
            );
            match encode_merged(&merged) {
                Ok(body) => ProxyResponse::json(body),
                Err(err) => {
                    tracing::error!(event = "encode_error", error = %err, "merge encode failed");
                    ProxyResponse::text(StatusCode::INTERNAL_SERVER_ERROR, "error creating response")
                }
            }
        }
    }
}
