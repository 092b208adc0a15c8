//! Block building and signing
//!
//! The scheduler only sees `BlockSigner`. `QuorumSigner` is the concrete
//! signer: an optional local ed25519 key plus remote signers reached over
//! JSON-RPC, succeeding once `quorum` valid signatures are collected.
//!
//! Building and signing are separate steps so an unsigned candidate can be
//! stored first. Signing the same candidate again yields the same hash, which
//! remote signers accept.

use crate::error::SignerError;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use futures::future::join_all;
use jsonrpsee::{
    core::client::ClientT,
    http_client::HttpClient,
    rpc_params,
};
use ledger_core::{Block, BlockSignature, Hash, Snapshot, Tx};
use std::{sync::Arc, time::Duration};

/// Turns a snapshot and pending transactions into a signed block candidate
#[async_trait]
pub trait BlockSigner: Send + Sync {
    /// Unsigned candidate extending `snapshot`
    fn build(&self, snapshot: &Snapshot, transactions: Vec<Tx>) -> Block {
        let timestamp_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Block::next(snapshot, transactions, timestamp_ms)
    }

    /// Replace the signatures on `block` with a fresh set
    async fn sign(&self, block: Block) -> Result<Block, SignerError>;

    async fn build_and_sign(
        &self,
        snapshot: &Snapshot,
        transactions: Vec<Tx>,
    ) -> Result<Block, SignerError> {
        let block = self.build(snapshot, transactions);
        self.sign(block).await
    }
}

/// Signs blocks with a key held by this process
pub struct LocalSigner {
    key: SigningKey,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Signature over the block hash
    pub fn sign(&self, block: &Block) -> BlockSignature {
        let signature = self.key.sign(block.hash().as_bytes());
        BlockSignature {
            public_key: self.key.verifying_key().to_bytes(),
            signature: signature.to_bytes().to_vec(),
        }
    }
}

/// Another node authorized to co-sign blocks
#[derive(Clone, Debug)]
pub struct RemoteSigner {
    pub url: String,
    pub public_key: VerifyingKey,
}

/// Check `signature` over `block_hash` against `public_key`
pub fn verify_signature(public_key: &VerifyingKey, block_hash: &Hash, signature: &[u8]) -> bool {
    match Signature::from_slice(signature) {
        Ok(signature) => public_key.verify(block_hash.as_bytes(), &signature).is_ok(),
        Err(_) => false,
    }
}

/// Transport used to ask a remote signer for its signature
#[async_trait]
pub trait RemoteSignerClient: Send + Sync {
    /// Raw signature bytes from `signer` over `block`
    async fn sign_block(&self, signer: &RemoteSigner, block: &Block) -> Result<Vec<u8>, SignerError>;
}

/// JSON-RPC `signBlock` client
pub struct JsonRpcSignerClient {
    timeout: Duration,
}

impl JsonRpcSignerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for JsonRpcSignerClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RemoteSignerClient for JsonRpcSignerClient {
    async fn sign_block(&self, signer: &RemoteSigner, block: &Block) -> Result<Vec<u8>, SignerError> {
        let client = HttpClient::builder()
            .request_timeout(self.timeout)
            .build(&signer.url)
            .map_err(|e| SignerError::Remote {
                url: signer.url.clone(),
                reason: e.to_string(),
            })?;
        let encoded: String = client
            .request("signBlock", rpc_params![block])
            .await
            .map_err(|e| SignerError::Remote {
                url: signer.url.clone(),
                reason: e.to_string(),
            })?;

        bs58::decode(&encoded)
            .into_vec()
            .map_err(|_| SignerError::InvalidSignature {
                url: signer.url.clone(),
            })
    }
}

/// Local key plus remote signers with a signature threshold
pub struct QuorumSigner {
    local: Option<LocalSigner>,
    remotes: Vec<RemoteSigner>,
    quorum: usize,
    client: Arc<dyn RemoteSignerClient>,
}

impl QuorumSigner {
    pub fn new(
        local: Option<LocalSigner>,
        remotes: Vec<RemoteSigner>,
        quorum: usize,
        client: Arc<dyn RemoteSignerClient>,
    ) -> Self {
        Self {
            local,
            remotes,
            quorum,
            client,
        }
    }

    /// Number of configured signers (local included)
    pub fn signer_count(&self) -> usize {
        self.remotes.len() + usize::from(self.local.is_some())
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    async fn collect_remote(&self, block: &Block) -> Vec<BlockSignature> {
        let hash = block.hash();
        let requests = self.remotes.iter().map(|remote| async move {
            let result = self.client.sign_block(remote, block).await;
            (remote, result)
        });

        let mut signatures = Vec::new();
        for (remote, result) in join_all(requests).await {
            let outcome = result.and_then(|signature| {
                if verify_signature(&remote.public_key, &hash, &signature) {
                    Ok(signature)
                } else {
                    Err(SignerError::InvalidSignature {
                        url: remote.url.clone(),
                    })
                }
            });

            match outcome {
                Ok(signature) => signatures.push(BlockSignature {
                    public_key: remote.public_key.to_bytes(),
                    signature,
                }),
                Err(e) => tracing::warn!(
                    height = block.height,
                    signer = %remote.url,
                    error = %e,
                    "Remote signer did not sign"
                ),
            }
        }
        signatures
    }
}

#[async_trait]
impl BlockSigner for QuorumSigner {
    async fn sign(&self, mut block: Block) -> Result<Block, SignerError> {
        block.signatures.clear();
        if let Some(local) = &self.local {
            block.signatures.push(local.sign(&block));
        }
        if block.signatures.len() < self.quorum && !self.remotes.is_empty() {
            let remote = self.collect_remote(&block).await;
            block.signatures.extend(remote);
        }

        if block.signatures.len() < self.quorum {
            return Err(SignerError::Quorum {
                collected: block.signatures.len(),
                required: self.quorum,
            });
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Remote signers simulated in-process, keyed by url
    struct InProcessClient {
        keys: HashMap<String, LocalSigner>,
    }

    #[async_trait]
    impl RemoteSignerClient for InProcessClient {
        async fn sign_block(&self, signer: &RemoteSigner, block: &Block) -> Result<Vec<u8>, SignerError> {
            match self.keys.get(&signer.url) {
                Some(key) => Ok(key.sign(block).signature),
                None => Err(SignerError::Remote {
                    url: signer.url.clone(),
                    reason: "connection refused".to_string(),
                }),
            }
        }
    }

    fn remote(url: &str, seed: u8) -> (RemoteSigner, LocalSigner) {
        let key = LocalSigner::from_seed(&[seed; 32]);
        let signer = RemoteSigner {
            url: url.to_string(),
            public_key: key.verifying_key(),
        };
        (signer, key)
    }

    fn quorum_signer(reachable: &[(RemoteSigner, LocalSigner)], unreachable: &[RemoteSigner], quorum: usize) -> QuorumSigner {
        let mut keys = HashMap::new();
        let mut remotes = Vec::new();
        for (signer, key) in reachable {
            keys.insert(signer.url.clone(), LocalSigner::from_seed(&key.key.to_bytes()));
            remotes.push(signer.clone());
        }
        remotes.extend(unreachable.iter().cloned());
        QuorumSigner::new(
            Some(LocalSigner::from_seed(&[1u8; 32])),
            remotes,
            quorum,
            Arc::new(InProcessClient { keys }),
        )
    }

    #[tokio::test]
    async fn test_local_and_remote_signatures_verify() {
        let a = remote("http://a", 2);
        let b = remote("http://b", 3);
        let signer = quorum_signer(&[a, b], &[], 3);
        assert_eq!(signer.signer_count(), 3);

        let txs = vec![Tx::new(b"t".to_vec())];
        let block = signer.build_and_sign(&Snapshot::empty(), txs.clone()).await.unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.transactions, txs);
        assert_eq!(block.signatures.len(), 3);

        let hash = block.hash();
        for sig in &block.signatures {
            let key = VerifyingKey::from_bytes(&sig.public_key).unwrap();
            assert!(verify_signature(&key, &hash, &sig.signature));
        }
    }

    #[tokio::test]
    async fn test_quorum_tolerates_unreachable_signer() {
        let a = remote("http://a", 2);
        let (down, _) = remote("http://down", 4);
        let signer = quorum_signer(&[a], &[down], 2);

        let block = signer.build_and_sign(&Snapshot::empty(), vec![]).await.unwrap();
        assert_eq!(block.signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_quorum_not_reached() {
        let (down, _) = remote("http://down", 4);
        let signer = quorum_signer(&[], &[down], 2);

        let err = signer.build_and_sign(&Snapshot::empty(), vec![]).await.unwrap_err();
        assert!(matches!(err, SignerError::Quorum { collected: 1, required: 2 }));
    }

    #[tokio::test]
    async fn test_wrong_key_signature_is_dropped() {
        // The url answers with a key other than the configured one.
        let (mut impostor, key) = remote("http://impostor", 5);
        impostor.public_key = LocalSigner::from_seed(&[6u8; 32]).verifying_key();
        let signer = quorum_signer(&[(impostor, key)], &[], 2);

        let err = signer.build_and_sign(&Snapshot::empty(), vec![]).await.unwrap_err();
        assert!(matches!(err, SignerError::Quorum { collected: 1, required: 2 }));
    }

    #[tokio::test]
    async fn test_resigning_keeps_block_hash() {
        let a = remote("http://a", 2);
        let signer = quorum_signer(&[a], &[], 2);

        let candidate = signer.build(&Snapshot::empty(), vec![Tx::new(b"t".to_vec())]);
        let first = signer.sign(candidate.clone()).await.unwrap();
        let second = signer.sign(first.clone()).await.unwrap();
        assert_eq!(first.hash(), candidate.hash());
        assert_eq!(second.hash(), candidate.hash());
        // Old signatures are replaced, not appended
        assert_eq!(second.signatures, first.signatures);
    }
}
