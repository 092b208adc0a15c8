//! HTTP JSON-RPC Server
//!
//! Provides the peer-facing HTTP endpoint for JSON-RPC methods.

use crate::methods::{
    handle_get_block_height, handle_get_blocks, handle_get_health, handle_get_version,
    handle_sign_block, handle_submit_transaction, GetBlocksRequest, RpcContext, RpcError,
    SubmitTransactionRequest,
};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use ledger_core::Block;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

/// HTTP RPC Server
pub struct HttpRpcServer {
    context: Arc<RpcContext>,
}

impl HttpRpcServer {
    /// Create a new HTTP RPC server
    pub fn new(context: Arc<RpcContext>) -> Self {
        Self { context }
    }

    /// Create the Axum router
    pub fn router(self) -> Router {
        // CORS layer to allow browser clients
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

        Router::new()
            .route("/", post(handle_rpc))
            .layer(cors)
            .with_state(self.context)
    }

    /// Bind `addr` and serve until `shutdown` is canceled
    pub async fn run(self, addr: &str, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!("HTTP RPC server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        tracing::info!("HTTP RPC server stopped");
        Ok(())
    }
}

/// Handle JSON-RPC request
async fn handle_rpc(
    State(context): State<Arc<RpcContext>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let result = dispatch_method(&context, &request.method, request.params).await;

    let response = match result {
        Ok(value) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(value),
            error: None,
        },
        Err(e) => JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: None,
            error: Some(JsonRpcError {
                code: e.code(),
                message: e.to_string(),
            }),
        },
    };

    (StatusCode::OK, Json(response))
}

/// Dispatch to appropriate method handler
async fn dispatch_method(ctx: &RpcContext, method: &str, params: Value) -> Result<Value, RpcError> {
    tracing::debug!("RPC method called: {}", method);
    match method {
        "submitTransaction" => {
            let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();
            let transaction = params
                .first()
                .and_then(|v| v.as_str())
                .ok_or_else(|| RpcError::InvalidParams("Missing transaction".to_string()))?;

            let request = SubmitTransactionRequest {
                transaction: transaction.to_string(),
            };

            let id = handle_submit_transaction(ctx, request).await?;
            Ok(json!(id))
        }

        "getBlocks" => {
            let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();
            let after_height = params
                .first()
                .and_then(|v| v.as_u64())
                .ok_or_else(|| RpcError::InvalidParams("Missing afterHeight".to_string()))?;

            let blocks = handle_get_blocks(ctx, GetBlocksRequest { after_height }).await?;
            to_value(blocks)
        }

        "getBlockHeight" => {
            let height = handle_get_block_height(ctx).await?;
            Ok(json!(height))
        }

        "signBlock" => {
            let params: Vec<Value> = serde_json::from_value(params).unwrap_or_default();
            let block = params
                .into_iter()
                .next()
                .ok_or_else(|| RpcError::InvalidParams("Missing block".to_string()))?;
            let block: Block = serde_json::from_value(block)
                .map_err(|e| RpcError::InvalidParams(format!("Invalid block: {}", e)))?;

            let signature = handle_sign_block(ctx, block)?;
            Ok(json!(signature))
        }

        "getHealth" => {
            let health = handle_get_health(ctx)?;
            Ok(json!(health))
        }

        "getVersion" => to_value(handle_get_version(ctx)?),

        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InternalError(e.to_string()))
}
