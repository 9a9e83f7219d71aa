pub mod config;
pub mod types;
pub mod registry;
pub mod report;
pub mod keyring;
pub mod chain_adapter;
pub mod signature;
pub mod peer;
pub mod scheduler;
pub mod queue;
pub mod retry;
pub mod store;
pub mod relayer;
pub mod simulation;

pub use config::Config;
pub use types::{
    ChainEvent, ChainEventKind, ChainId, CrossChainRequestRecord, CrossChainState, PartialSignature,
    ReportContext, TransactionResult,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(ChainId),
}

pub type Result<T> = std::result::Result<T, Error>;
