use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

use super::RecordStore;
use crate::{signature::MultiSignatureSession, types::CrossChainRequestRecord, Error, Result};

/// Process-local store. Values are kept JSON-encoded so every read hands
/// out a fresh copy, the same as a remote store would.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, String>>,
    sessions: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Store(format!("Failed to encode {}: {}", key, e)))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::Store(format!("Failed to decode {}: {}", key, e)))
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, key: &str) -> Result<Option<CrossChainRequestRecord>> {
        let records = self.records.read();
        records.get(key).map(|raw| decode(key, raw)).transpose()
    }

    async fn set_record(&self, key: &str, record: &CrossChainRequestRecord) -> Result<()> {
        let raw = encode(key, record)?;
        self.records.write().insert(key.to_string(), raw);
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<CrossChainRequestRecord>> {
        let records = self.records.read();
        records.iter().map(|(key, raw)| decode(key, raw)).collect()
    }

    async fn get_session(&self, key: &str) -> Result<Option<MultiSignatureSession>> {
        let sessions = self.sessions.read();
        sessions.get(key).map(|raw| decode(key, raw)).transpose()
    }

    async fn set_session(&self, key: &str, session: &MultiSignatureSession) -> Result<()> {
        let raw = encode(key, session)?;
        self.sessions.write().insert(key.to_string(), raw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrossChainState, ReportContext, SessionId};
    use tokio_test::assert_ok;

    fn record() -> CrossChainRequestRecord {
        let ctx = ReportContext {
            message_id: "M1".to_string(),
            sender: "a".to_string(),
            receiver: "b".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 0,
            round_id: 0,
        };
        CrossChainRequestRecord::new(ctx, vec![1, 2, 3], None, 10, 1_000)
    }

    #[tokio::test]
    async fn test_records_are_copies() {
        let store = InMemoryStore::new();
        assert_eq!(assert_ok!(store.get_record("M1").await), None);

        let mut record = record();
        assert_ok!(store.set_record("M1", &record).await);
        record.state = CrossChainState::Committed;
        let stored = assert_ok!(store.get_record("M1").await).unwrap();
        assert_eq!(stored.state, CrossChainState::RequestStart);

        assert_ok!(store.set_record("M1", &record).await);
        let all = assert_ok!(store.list_records().await);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, CrossChainState::Committed);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = InMemoryStore::new();
        let ctx = record().report_context;
        let session = MultiSignatureSession {
            session_id: SessionId::new(&ctx, None),
            report_context: ctx,
            report: vec![9],
            threshold: 2,
            signatures: vec![],
            finished: true,
        };
        let key = session.session_id.to_string();
        assert_ok!(store.set_session(&key, &session).await);
        assert_eq!(assert_ok!(store.get_session(&key).await), Some(session));
        assert_eq!(assert_ok!(store.get_session("missing").await), None);
    }
}
