use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    config::ChainConfig,
    registry::ChainRegistry,
    types::{ChainId, PartialSignature, ReportContext, TransactionResult},
    Error,
};

/// Submits aggregated reports to a destination chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainWriter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// Single attempt. `Ok(None)` means the chain refused the transaction;
    /// the caller owns the retry decision either way.
    async fn send_commit_transaction(
        &self,
        ctx: &ReportContext,
        signatures: &[PartialSignature],
        report: &[u8],
    ) -> Result<Option<String>, Error>;
}

/// Polls a destination chain for the outcome of a submitted transaction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn get_transaction_result(&self, transaction_id: &str) -> Result<TransactionResult, Error>;
}

pub type WriterRegistry = ChainRegistry<dyn ChainWriter>;
pub type ReaderRegistry = ChainRegistry<dyn ChainReader>;

// supported handlers
pub mod json_rpc;
pub mod local;

pub use json_rpc::JsonRpcHandler;
pub use local::{LocalChain, LocalSubmission};

/// Builds reader and writer maps backed by one JSON-RPC handler per chain.
pub fn build_json_rpc_handlers(chains: &[ChainConfig]) -> Result<(ReaderRegistry, WriterRegistry), Error> {
    let mut readers: Vec<(ChainId, Arc<dyn ChainReader>)> = Vec::new();
    let mut writers: Vec<(ChainId, Arc<dyn ChainWriter>)> = Vec::new();
    for chain in chains {
        let handler = Arc::new(JsonRpcHandler::new(chain)?);
        readers.push((chain.chain_id, handler.clone()));
        writers.push((chain.chain_id, handler));
    }
    Ok((ChainRegistry::from_entries(readers), ChainRegistry::from_entries(writers)))
}
