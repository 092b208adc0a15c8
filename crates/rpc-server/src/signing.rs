//! Block signing service for nodes acting as remote signers
//!
//! A signer never signs two different blocks at the same height, and never
//! signs below a height it has already signed.

use generator::LocalSigner;
use ledger_core::{Block, Hash};
use parking_lot::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("already signed block {hash} at height {height}")]
    Conflict { height: u64, hash: Hash },

    #[error("height {height} is below last signed height {last}")]
    Regressed { height: u64, last: u64 },
}

/// Signs blocks on behalf of this node
pub struct SigningService {
    signer: LocalSigner,
    /// Height and hash of the last block signed
    last_signed: Mutex<Option<(u64, Hash)>>,
}

impl SigningService {
    pub fn new(signer: LocalSigner) -> Self {
        Self {
            signer,
            last_signed: Mutex::new(None),
        }
    }

    /// Signature bytes over the block hash
    pub fn sign(&self, block: &Block) -> Result<Vec<u8>, SigningError> {
        let hash = block.hash();
        let mut last_signed = self.last_signed.lock();

        if let Some((last_height, last_hash)) = *last_signed {
            if block.height < last_height {
                return Err(SigningError::Regressed {
                    height: block.height,
                    last: last_height,
                });
            }
            if block.height == last_height && hash != last_hash {
                return Err(SigningError::Conflict {
                    height: last_height,
                    hash: last_hash,
                });
            }
        }

        *last_signed = Some((block.height, hash));
        tracing::debug!(height = block.height, block_hash = %hash, "Signed block");
        Ok(self.signer.sign(block).signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use generator::{
        verify_signature, CycleOutcome, GeneratorConfig, LeaderScheduler, ProductionError,
        QuorumSigner, RemoteSigner, RemoteSignerClient, SignerError,
    };
    use ledger_core::{LedgerEngine, PersistentLedger, Snapshot, Tx};
    use std::{collections::HashMap, sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;

    /// Routes signBlock to in-process services, refusing the first
    /// `outages[url]` requests to each url
    struct ServiceClient {
        services: HashMap<String, SigningService>,
        outages: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl RemoteSignerClient for ServiceClient {
        async fn sign_block(&self, signer: &RemoteSigner, block: &Block) -> Result<Vec<u8>, SignerError> {
            let failed = |reason: String| SignerError::Remote {
                url: signer.url.clone(),
                reason,
            };
            if let Some(left) = self.outages.lock().get_mut(&signer.url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(failed("connection refused".to_string()));
                }
            }
            let service = self
                .services
                .get(&signer.url)
                .ok_or_else(|| failed("unknown signer".to_string()))?;
            service.sign(block).map_err(|e| failed(e.to_string()))
        }
    }

    fn service() -> SigningService {
        SigningService::new(LocalSigner::from_seed(&[8u8; 32]))
    }

    #[test]
    fn test_signs_and_verifies() {
        let service = service();
        let block = Block::next(&Snapshot::empty(), vec![Tx::new(b"a".to_vec())], 1);
        let signature = service.sign(&block).unwrap();

        let key = LocalSigner::from_seed(&[8u8; 32]).verifying_key();
        assert!(verify_signature(&key, &block.hash(), &signature));
        // Re-signing the same block is allowed
        assert_eq!(service.sign(&block).unwrap(), signature);
    }

    #[test]
    fn test_refuses_conflicting_block() {
        let service = service();
        let first = Block::next(&Snapshot::empty(), vec![Tx::new(b"a".to_vec())], 1);
        let other = Block::next(&Snapshot::empty(), vec![Tx::new(b"b".to_vec())], 1);
        service.sign(&first).unwrap();

        assert!(matches!(
            service.sign(&other),
            Err(SigningError::Conflict { height: 1, .. })
        ));
    }

    #[test]
    fn test_refuses_lower_height() {
        let service = service();
        let first = Block::next(&Snapshot::empty(), vec![], 1);
        let snapshot = Snapshot::empty().apply(&first);
        let second = Block::next(&snapshot, vec![], 2);
        service.sign(&second).unwrap();

        assert!(matches!(
            service.sign(&first),
            Err(SigningError::Regressed { height: 1, last: 2 })
        ));
    }

    #[tokio::test]
    async fn test_leader_recovers_after_signer_outage() {
        let ledger = Arc::new(PersistentLedger::temporary(10).unwrap());
        let mut services = HashMap::new();
        let mut remotes = Vec::new();
        for (url, seed) in [("http://a", 11u8), ("http://b", 12u8)] {
            let key = LocalSigner::from_seed(&[seed; 32]);
            remotes.push(RemoteSigner {
                url: url.to_string(),
                public_key: key.verifying_key(),
            });
            services.insert(url.to_string(), SigningService::new(key));
        }
        let client = ServiceClient {
            services,
            outages: Mutex::new(HashMap::from([("http://b".to_string(), 1)])),
        };
        let signer = QuorumSigner::new(None, remotes, 2, Arc::new(client));

        let cancel = CancellationToken::new();
        let mut scheduler =
            LeaderScheduler::promote(GeneratorConfig::default(), ledger.clone(), Arc::new(signer), &cancel)
                .await
                .unwrap()
                .unwrap();

        // "a" signs height 1, "b" is down
        let first = scheduler.make_block(&cancel).await;
        assert!(matches!(
            first,
            Err(ProductionError::Sign(SignerError::Quorum { collected: 1, required: 2 }))
        ));

        // A block rebuilt now would carry a different timestamp
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(scheduler.make_block(&cancel).await.unwrap(), CycleOutcome::Committed(1));
        assert_eq!(scheduler.make_block(&cancel).await.unwrap(), CycleOutcome::Committed(2));

        let blocks = ledger.blocks_after(0).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.signatures.len() == 2));
    }
}
