use serde::Serialize;

use crate::{
    types::{CrossChainRequestRecord, TokenTransferMetadata},
    Error, Result,
};

/// Round-independent part of a record that every node signs.
#[derive(Serialize)]
struct ReportPayload<'a> {
    message_id: &'a str,
    sender: &'a str,
    receiver: &'a str,
    source_chain_id: i64,
    target_chain_id: i64,
    message: &'a [u8],
    token_transfer_metadata: &'a Option<TokenTransferMetadata>,
}

/// Recomputes the report from the local record. Epoch and round are left
/// out: they travel in the `ReportContext` that is hashed alongside.
pub fn generate_report(record: &CrossChainRequestRecord) -> Result<Vec<u8>> {
    let ctx = &record.report_context;
    let payload = ReportPayload {
        message_id: &ctx.message_id,
        sender: &ctx.sender,
        receiver: &ctx.receiver,
        source_chain_id: ctx.source_chain_id,
        target_chain_id: ctx.target_chain_id,
        message: &record.message,
        token_transfer_metadata: &record.token_transfer_metadata,
    };
    bcs::to_bytes(&payload).map_err(|e| Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReportContext;

    fn record(message: Vec<u8>) -> CrossChainRequestRecord {
        let ctx = ReportContext {
            message_id: "M1".to_string(),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 0,
            round_id: 0,
        };
        CrossChainRequestRecord::new(ctx, message, None, 0, 1000)
    }

    #[test]
    fn test_report_ignores_round() {
        let mut a = record(vec![1, 2, 3]);
        let first = generate_report(&a).unwrap();
        a.restart_round(5);
        assert_eq!(first, generate_report(&a).unwrap());
    }

    #[test]
    fn test_report_tracks_message() {
        let a = generate_report(&record(vec![1, 2, 3])).unwrap();
        let b = generate_report(&record(vec![1, 2, 4])).unwrap();
        assert_ne!(a, b);
    }
}
