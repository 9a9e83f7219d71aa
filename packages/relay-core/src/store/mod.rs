use async_trait::async_trait;

use crate::{signature::MultiSignatureSession, types::CrossChainRequestRecord, Result};

pub mod mem;

pub use mem::InMemoryStore;

/// Durable home of request records and signing sessions.
///
/// Plain get/set by string key. Writes are not transactional; callers
/// re-read before mutating and tolerate lost updates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, key: &str) -> Result<Option<CrossChainRequestRecord>>;

    async fn set_record(&self, key: &str, record: &CrossChainRequestRecord) -> Result<()>;

    async fn list_records(&self) -> Result<Vec<CrossChainRequestRecord>>;

    async fn get_session(&self, key: &str) -> Result<Option<MultiSignatureSession>>;

    async fn set_session(&self, key: &str, session: &MultiSignatureSession) -> Result<()>;
}
