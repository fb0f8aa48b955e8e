//! HTTP front end: JSON-RPC over `POST /mcp`.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use uuid::Uuid;

use super::port::find_available_port;
use super::rpc::RpcHandler;

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct HttpState {
    pub handler: Arc<RpcHandler>,
}

pub fn router(handler: Arc<RpcHandler>) -> Router {
    Router::new()
        .route("/mcp", post(handle_post))
        .with_state(HttpState { handler })
}

/// Bind `host:port` (falling back to the next free port) and serve until
/// ctrl-c.
pub async fn serve_http(handler: Arc<RpcHandler>, host: &str, port: u16, attempts: u16) -> anyhow::Result<()> {
    let port = find_available_port(host, port, attempts)
        .with_context(|| format!("no free port on {host} from {port}"))?;
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    let addr = listener.local_addr()?;

    tracing::info!(%addr, endpoint = %format!("http://{addr}/mcp"), "serving on http");

    axum::serve(listener, router(handler))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")
}

async fn handle_post(State(state): State<HttpState>, headers: HeaderMap, Json(message): Json<Value>) -> Response {
    let method = message.get("method").and_then(Value::as_str).unwrap_or_default().to_string();
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    tracing::debug!(method = %method, session_id = %session_id, "http request");

    match state.handler.handle_value(message).await {
        Some(response) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), "application/json"),
                (SESSION_HEADER, session_id.as_str()),
            ],
            Json(response),
        )
            .into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::testing::{FakeBackend, FakeFactory};
    use crate::backend::SessionFactory;
    use crate::config::{BackendConfig, GatewayConfig};
    use crate::gateway::{Dispatcher, GatewayContext};

    async fn app() -> Router {
        let mut config = GatewayConfig {
            health_check_enabled: false,
            ..GatewayConfig::default()
        };
        config
            .backends
            .insert("fs".into(), BackendConfig::stdio("fake", &[]));
        let factory: Arc<dyn SessionFactory> = Arc::new(
            FakeFactory::new().with_backend("fs", FakeBackend::default().with_tool("noop", json!({}))),
        );
        let context = GatewayContext::initialize(config, factory).await;
        router(Arc::new(RpcHandler::new(Arc::new(Dispatcher::new(context)))))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize_over_http() {
        let response = app()
            .await
            .oneshot(post_json(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_some());

        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["result"]["serverInfo"]["name"], "switchboard");
    }

    #[tokio::test]
    async fn test_session_header_echoed() {
        let request = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .header(SESSION_HEADER, "abc-123")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#))
            .unwrap();
        let response = app().await.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[SESSION_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn test_notification_accepted() {
        let response = app()
            .await
            .oneshot(post_json(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
