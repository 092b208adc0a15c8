//! Core ledger types: hashes, transactions, blocks and snapshots

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// 32-byte blake3 digest, shown as base58
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "crate::encoding::base58")] [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|e| e.to_string())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        Ok(Self(bytes))
    }
}

/// An opaque transaction submitted by a peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    #[serde(with = "crate::encoding::base64")]
    pub payload: Vec<u8>,
}

impl Tx {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Transaction id (hash of the payload)
    pub fn id(&self) -> Hash {
        Hash::digest(&self.payload)
    }
}

/// A signer's signature over a block hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// ed25519 public key of the signer
    #[serde(with = "crate::encoding::base58")]
    pub public_key: [u8; 32],
    /// ed25519 signature over `Block::hash`
    #[serde(with = "crate::encoding::base58")]
    pub signature: Vec<u8>,
}

/// A block in the canonical chain
///
/// Heights start at 1; height 0 is the empty chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height
    pub height: u64,
    /// Hash of the block at `height - 1` (zero for the first block)
    pub previous_block_hash: Hash,
    /// Build time (unix millis)
    pub timestamp_ms: u64,
    /// Included transactions, in application order
    pub transactions: Vec<Tx>,
    /// Signatures collected for this block
    #[serde(default)]
    pub signatures: Vec<BlockSignature>,
}

impl Block {
    /// Build the unsigned block that extends `snapshot`
    pub fn next(snapshot: &Snapshot, transactions: Vec<Tx>, timestamp_ms: u64) -> Self {
        Self {
            height: snapshot.height + 1,
            previous_block_hash: snapshot.block_hash,
            timestamp_ms,
            transactions,
            signatures: Vec::new(),
        }
    }

    /// Hash of everything except the signatures
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.height.to_le_bytes());
        hasher.update(self.previous_block_hash.as_bytes());
        hasher.update(&self.timestamp_ms.to_le_bytes());
        hasher.update(&(self.transactions.len() as u64).to_le_bytes());
        for tx in &self.transactions {
            hasher.update(tx.id().as_bytes());
        }
        Hash(*hasher.finalize().as_bytes())
    }

    pub fn is_signed_by(&self, public_key: &[u8; 32]) -> bool {
        self.signatures.iter().any(|s| &s.public_key == public_key)
    }
}

/// Ledger state after applying a block and all of its ancestors
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Height of the last applied block (0 when empty)
    pub height: u64,
    /// Hash of the last applied block
    pub block_hash: Hash,
    /// Hash chain over every applied transaction id
    pub state_root: Hash,
    /// Number of applied transactions
    pub tx_count: u64,
}

impl Snapshot {
    /// State of the empty chain
    pub fn empty() -> Self {
        Self::default()
    }

    /// Apply `block` on top of this snapshot.
    ///
    /// Linkage is not checked here; see `LedgerEngine::apply_block`.
    pub fn apply(&self, block: &Block) -> Snapshot {
        let mut root = self.state_root;
        for tx in &block.transactions {
            let mut hasher = blake3::Hasher::new();
            hasher.update(root.as_bytes());
            hasher.update(tx.id().as_bytes());
            root = Hash(*hasher.finalize().as_bytes());
        }

        Snapshot {
            height: block.height,
            block_hash: block.hash(),
            state_root: root,
            tx_count: self.tx_count + block.transactions.len() as u64,
        }
    }

    /// True when this snapshot is the state produced by `block`
    pub fn reflects(&self, block: Option<&Block>) -> bool {
        match block {
            Some(block) => self.height == block.height && self.block_hash == block.hash(),
            None => *self == Snapshot::empty(),
        }
    }
}
