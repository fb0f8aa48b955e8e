//! Line-delimited JSON-RPC over stdin/stdout.
//!
//! Each request runs on its own task so a slow backend call never holds up
//! the next line; responses are written by a single writer task in
//! completion order.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::rpc::{failure, RpcHandler};
use crate::backend::types::error_codes;

/// Serve the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(handler: Arc<RpcHandler>) -> std::io::Result<()> {
    tracing::info!("serving on stdio");
    serve_lines(handler, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve any line-oriented reader/writer pair.
pub async fn serve_lines<R, W>(handler: Arc<RpcHandler>, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let mut line = message.to_string();
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                let _ = tx.send(failure(Value::Null, error_codes::PARSE_ERROR, &format!("Parse error: {e}")));
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handler.handle_value(message).await {
                let _ = tx.send(response);
            }
        });
    }

    tracing::info!("stdin closed, waiting for in-flight requests");
    drop(tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::testing::{FakeBackend, FakeFactory};
    use crate::backend::SessionFactory;
    use crate::config::{BackendConfig, GatewayConfig};
    use crate::gateway::{Dispatcher, GatewayContext};

    async fn handler() -> Arc<RpcHandler> {
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
        Arc::new(RpcHandler::new(Arc::new(Dispatcher::new(context))))
    }

    #[tokio::test]
    async fn test_stdio_round_trip() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            "not json\n",
            "\n",
        );
        let (client, server) = tokio::io::duplex(64 * 1024);

        serve_lines(handler().await, input.as_bytes(), server).await.unwrap();

        let mut lines = BufReader::new(client).lines();
        let mut responses = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            responses.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().any(|r| r["id"] == 1 && r["result"] == json!({})));
        assert!(responses
            .iter()
            .any(|r| r["error"]["code"] == error_codes::PARSE_ERROR));
    }
}
