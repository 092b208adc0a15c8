//! RPC Methods - JSON-RPC method handlers
//!
//! Handlers only reach the ledger through the gateway and the feed. The
//! leader's head is never visible here.

use crate::{
    feed::{BlockFeed, FeedError},
    gateway::SubmissionGateway,
    signing::SigningService,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ledger_core::{Block, Tx};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// RPC context shared across handlers
pub struct RpcContext {
    pub gateway: SubmissionGateway,
    pub feed: BlockFeed,
    /// Present when this node co-signs blocks for a leader
    pub block_signer: Option<SigningService>,
    /// Cancels long polls on shutdown
    pub shutdown: CancellationToken,
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
    pub transaction: String, // Base64 encoded
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBlocksRequest {
    #[serde(rename = "afterHeight")]
    pub after_height: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionInfo {
    #[serde(rename = "ledger-node")]
    pub node_version: String,
    #[serde(rename = "signer")]
    pub signer_enabled: bool,
}

// ============ RPC Handlers ============

/// Handle submitTransaction RPC method
pub async fn handle_submit_transaction(
    ctx: &RpcContext,
    params: SubmitTransactionRequest,
) -> Result<String, RpcError> {
    let payload = BASE64
        .decode(&params.transaction)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;

    let id = ctx
        .gateway
        .submit(Tx::new(payload))
        .await
        .map_err(|e| RpcError::Rejected(e.to_string()))?;

    Ok(id.to_string())
}

/// Handle getBlocks RPC method. Long-polls until the next height exists.
pub async fn handle_get_blocks(ctx: &RpcContext, params: GetBlocksRequest) -> Result<Vec<Block>, RpcError> {
    ctx.feed
        .get_blocks(params.after_height, &ctx.shutdown)
        .await
        .map_err(|e| match e {
            FeedError::Cancelled { .. } => RpcError::Unavailable(e.to_string()),
            _ => RpcError::InternalError(e.to_string()),
        })
}

/// Handle getBlockHeight RPC method
pub async fn handle_get_block_height(ctx: &RpcContext) -> Result<u64, RpcError> {
    ctx.feed
        .tip_height()
        .await
        .map_err(|e| RpcError::InternalError(e.to_string()))
}

/// Handle signBlock RPC method
pub fn handle_sign_block(ctx: &RpcContext, block: Block) -> Result<String, RpcError> {
    let service = ctx
        .block_signer
        .as_ref()
        .ok_or_else(|| RpcError::MethodNotFound("signBlock".to_string()))?;

    let signature = service
        .sign(&block)
        .map_err(|e| RpcError::Rejected(e.to_string()))?;
    Ok(bs58::encode(signature).into_string())
}

/// Handle getHealth RPC method
pub fn handle_get_health(ctx: &RpcContext) -> Result<String, RpcError> {
    if ctx.shutdown.is_cancelled() {
        return Err(RpcError::Unavailable("shutting down".to_string()));
    }
    Ok("ok".to_string())
}

/// Handle getVersion RPC method
pub fn handle_get_version(ctx: &RpcContext) -> Result<VersionInfo, RpcError> {
    Ok(VersionInfo {
        node_version: env!("CARGO_PKG_VERSION").to_string(),
        signer_enabled: ctx.block_signer.is_some(),
    })
}

// ============ Error Types ============

/// Error code for a long poll that ended without new blocks
pub const UNAVAILABLE_CODE: i32 = -32001;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl RpcError {
    /// JSON-RPC error code
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams(_) => -32602,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InternalError(_) => -32603,
            RpcError::Rejected(_) => -32000,
            RpcError::Unavailable(_) => UNAVAILABLE_CODE,
        }
    }
}
