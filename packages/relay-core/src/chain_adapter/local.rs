use async_trait::async_trait;
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{ChainReader, ChainWriter};
use crate::{
    keyring::ChainKeyring,
    types::{ChainId, PartialSignature, ReportContext, TransactionResult},
    Error,
};

#[derive(Debug, Clone)]
pub struct LocalSubmission {
    pub transaction_id: String,
    pub context: ReportContext,
    pub signatures: Vec<PartialSignature>,
    pub report: Vec<u8>,
}

#[derive(Default)]
struct LocalChainState {
    next_nonce: u64,
    submissions: Vec<LocalSubmission>,
    polls: HashMap<String, usize>,
}

/// In-process destination chain.
///
/// Every accepted submission reports `Pending` for `pending_polls` polls
/// and `Success` afterwards. With a verifier attached, submissions that
/// carry fewer than `threshold` valid signatures are refused.
pub struct LocalChain {
    chain_id: ChainId,
    pending_polls: usize,
    verifier: Option<(Arc<dyn ChainKeyring>, usize)>,
    state: Mutex<LocalChainState>,
}

impl LocalChain {
    pub fn new(chain_id: ChainId, pending_polls: usize) -> Self {
        Self {
            chain_id,
            pending_polls,
            verifier: None,
            state: Mutex::new(LocalChainState::default()),
        }
    }

    pub fn with_verifier(mut self, keyring: Arc<dyn ChainKeyring>, threshold: usize) -> Self {
        self.verifier = Some((keyring, threshold));
        self
    }

    pub fn submissions(&self) -> Vec<LocalSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn submissions_for(&self, message_id: &str) -> Vec<LocalSubmission> {
        self.state
            .lock()
            .submissions
            .iter()
            .filter(|s| s.context.message_id == message_id)
            .cloned()
            .collect()
    }

    fn valid_signatures(&self, ctx: &ReportContext, signatures: &[PartialSignature], report: &[u8]) -> bool {
        let Some((keyring, threshold)) = &self.verifier else {
            return true;
        };
        let valid = signatures
            .iter()
            .filter(|s| keyring.off_chain_verify(ctx, s.index, report, &s.signature))
            .count();
        valid >= *threshold
    }
}

#[async_trait]
impl ChainWriter for LocalChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn send_commit_transaction(
        &self,
        ctx: &ReportContext,
        signatures: &[PartialSignature],
        report: &[u8],
    ) -> Result<Option<String>, Error> {
        if !self.valid_signatures(ctx, signatures, report) {
            warn!("[{}] Local chain rejected report: not enough valid signatures", ctx);
            return Ok(None);
        }
        let mut state = self.state.lock();
        state.next_nonce += 1;
        let transaction_id = format!("local-{}-{}", self.chain_id, state.next_nonce);
        state.submissions.push(LocalSubmission {
            transaction_id: transaction_id.clone(),
            context: ctx.clone(),
            signatures: signatures.to_vec(),
            report: report.to_vec(),
        });
        info!("[{}] Local chain accepted {}", ctx, transaction_id);
        Ok(Some(transaction_id))
    }
}

#[async_trait]
impl ChainReader for LocalChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_transaction_result(&self, transaction_id: &str) -> Result<TransactionResult, Error> {
        let mut state = self.state.lock();
        if !state.submissions.iter().any(|s| s.transaction_id == transaction_id) {
            return Ok(TransactionResult::NotExist);
        }
        let polls = state.polls.entry(transaction_id.to_string()).or_insert(0);
        *polls += 1;
        if *polls <= self.pending_polls {
            Ok(TransactionResult::Pending)
        } else {
            Ok(TransactionResult::Success)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainFamily;
    use crate::keyring::{create_keyring, test_keys};

    #[tokio::test]
    async fn test_pending_then_success() {
        let chain = LocalChain::new(2, 2);
        let ctx = test_keys::context();
        let tx = chain.send_commit_transaction(&ctx, &[], b"r").await.unwrap().unwrap();
        assert_eq!(chain.get_transaction_result(&tx).await.unwrap(), TransactionResult::Pending);
        assert_eq!(chain.get_transaction_result(&tx).await.unwrap(), TransactionResult::Pending);
        assert_eq!(chain.get_transaction_result(&tx).await.unwrap(), TransactionResult::Success);
        assert_eq!(chain.get_transaction_result("unknown").await.unwrap(), TransactionResult::NotExist);
    }

    #[tokio::test]
    async fn test_verifier_rejects_short_signature_set() {
        let verifier = create_keyring(&test_keys::chain_config(ChainFamily::Evm, 0, 3)).unwrap();
        let signer = create_keyring(&test_keys::chain_config(ChainFamily::Evm, 1, 3)).unwrap();
        let chain = LocalChain::new(2, 0).with_verifier(verifier, 2);
        let ctx = test_keys::context();
        let sig = PartialSignature {
            index: 1,
            signature: signer.off_chain_sign(&ctx, b"r").unwrap(),
        };
        assert_eq!(chain.send_commit_transaction(&ctx, &[sig], b"r").await.unwrap(), None);
        assert!(chain.submissions().is_empty());
    }
}
