//! RPC Server - peer-facing JSON-RPC for the ledger node
//!
//! Provides:
//! - HTTP JSON-RPC: submitTransaction, getBlocks, getBlockHeight, signBlock, etc.
//! - Follower replication from a leader's getBlocks

pub mod feed;
pub mod follower;
pub mod gateway;
pub mod http_server;
pub mod methods;
pub mod signing;

pub use feed::{BlockFeed, FeedError};
pub use follower::{Follower, FollowerError};
pub use gateway::{SubmissionGateway, SubmitError};
pub use http_server::HttpRpcServer;
pub use methods::{RpcContext, RpcError};
pub use signing::{SigningError, SigningService};
