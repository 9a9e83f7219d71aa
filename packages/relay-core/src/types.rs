use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

pub type ChainId = i64;

/// Identity of one relay attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportContext {
    pub message_id: String,
    pub sender: String,
    pub receiver: String,
    pub source_chain_id: ChainId,
    pub target_chain_id: ChainId,
    pub epoch: u64,
    pub round_id: u32,
}

impl ReportContext {
    pub fn with_round(&self, round_id: u32) -> Self {
        Self {
            round_id,
            ..self.clone()
        }
    }

    /// Canonical byte encoding shared by every keyring that has no
    /// chain-specific layout of its own.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bcs::to_bytes(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl fmt::Display for ReportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chain={} message={} epoch={} round={}",
            self.target_chain_id, self.message_id, self.epoch, self.round_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferMetadata {
    pub target_chain_id: ChainId,
    pub target_contract_address: String,
    pub symbol: String,
    /// Decimal string, wide enough for any chain's native amount type.
    pub amount: String,
    pub extra_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossChainState {
    RequestStart,
    PartialSignature,
    MultiSignature,
    Committing,
    Committed,
    PendingResend,
    Confirmed,
    RequestCanceled,
}

impl CrossChainState {
    /// Nothing moves a record out of these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::RequestCanceled)
    }

    /// The report has landed (or the request is over); pipeline stages stop here.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Committed | Self::Confirmed | Self::RequestCanceled)
    }

    fn pipeline_rank(self) -> u8 {
        match self {
            Self::RequestStart => 0,
            Self::PartialSignature => 1,
            Self::MultiSignature => 2,
            Self::Committing => 3,
            Self::Committed => 4,
            Self::PendingResend => 5,
            Self::Confirmed => 6,
            Self::RequestCanceled => 7,
        }
    }
}

impl fmt::Display for CrossChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One record per message id, mutated in place through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainRequestRecord {
    pub report_context: ReportContext,
    pub message: Vec<u8>,
    pub token_transfer_metadata: Option<TokenTransferMetadata>,
    /// Unix millis of the triggering event; round boundaries are derived from it.
    pub request_receive_time: u64,
    pub state: CrossChainState,
    pub commit_transaction_id: Option<String>,
    pub resend_transaction_id: Option<String>,
    pub resend_transaction_block_height: u64,
    pub resend_transaction_block_time: u64,
    pub next_commit_delay_time: u64,
    pub request_end_timeout_window: u64,
}

impl CrossChainRequestRecord {
    pub fn new(
        report_context: ReportContext,
        message: Vec<u8>,
        token_transfer_metadata: Option<TokenTransferMetadata>,
        request_receive_time: u64,
        request_end_timeout_window: u64,
    ) -> Self {
        Self {
            report_context,
            message,
            token_transfer_metadata,
            request_receive_time,
            state: CrossChainState::RequestStart,
            commit_transaction_id: None,
            resend_transaction_id: None,
            resend_transaction_block_height: 0,
            resend_transaction_block_time: 0,
            next_commit_delay_time: 0,
            request_end_timeout_window,
        }
    }

    pub fn key(&self) -> &str {
        &self.report_context.message_id
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::new(&self.report_context, self.resend_transaction_id.as_deref())
    }

    /// Moves forward within the current round. Returns false when the
    /// record is already at or past `state`.
    pub fn advance(&mut self, state: CrossChainState) -> bool {
        if self.state.is_terminal() || state.pipeline_rank() <= self.state.pipeline_rank() {
            return false;
        }
        self.state = state;
        true
    }

    /// Starts a fresh round. Refused once the record is terminal.
    pub fn restart_round(&mut self, round_id: u32) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.report_context.round_id = round_id;
        self.state = CrossChainState::RequestStart;
        self.commit_transaction_id = None;
        true
    }
}

/// Key of one multi-signature bucket. A resend gets its own bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub message_id: String,
    pub epoch: u64,
    pub round_id: u32,
    pub resend_transaction_id: Option<String>,
}

impl SessionId {
    pub fn new(context: &ReportContext, resend_transaction_id: Option<&str>) -> Self {
        Self {
            message_id: context.message_id.clone(),
            epoch: context.epoch,
            round_id: context.round_id,
            resend_transaction_id: resend_transaction_id.map(str::to_string),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.message_id, self.epoch, self.round_id)?;
        if let Some(resend) = &self.resend_transaction_id {
            write!(f, "-{}", resend)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub index: usize,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionResult {
    Success,
    Pending,
    NotExist,
    Fail,
}

/// An observation handed over by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub chain_id: ChainId,
    pub message_id: String,
    pub transaction_id: String,
    pub block_height: u64,
    pub block_hash: String,
    /// Unix millis of the block carrying the event.
    pub start_time: u64,
    pub kind: ChainEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEventKind {
    RequestStarted {
        context: ReportContext,
        message: Vec<u8>,
        token_transfer_metadata: Option<TokenTransferMetadata>,
    },
    ReportTransmitted {
        epoch: u64,
    },
    RequestCanceled,
    RampCommitAccepted,
    ResendRequested {
        resend_transaction_id: String,
        next_commit_delay_ms: u64,
    },
    ManuallyExecute,
}

impl ChainEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "RequestStarted",
            Self::ReportTransmitted { .. } => "ReportTransmitted",
            Self::RequestCanceled => "RequestCanceled",
            Self::RampCommitAccepted => "RampCommitAccepted",
            Self::ResendRequested { .. } => "ResendRequested",
            Self::ManuallyExecute => "ManuallyExecute",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ReportContext {
        ReportContext {
            message_id: "M1".to_string(),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 3,
            round_id: 0,
        }
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut record = CrossChainRequestRecord::new(context(), vec![1], None, 0, 1000);
        assert!(record.advance(CrossChainState::MultiSignature));
        assert!(!record.advance(CrossChainState::PartialSignature));
        assert!(!record.advance(CrossChainState::MultiSignature));
        assert_eq!(record.state, CrossChainState::MultiSignature);
    }

    #[test]
    fn test_terminal_record_cannot_restart() {
        let mut record = CrossChainRequestRecord::new(context(), vec![1], None, 0, 1000);
        record.state = CrossChainState::RequestCanceled;
        assert!(!record.restart_round(4));
        assert!(!record.advance(CrossChainState::Committed));
        assert_eq!(record.report_context.round_id, 0);
    }

    #[test]
    fn test_session_id_separates_resend_bucket() {
        let plain = SessionId::new(&context(), None);
        let resend = SessionId::new(&context(), Some("0xabc"));
        assert_ne!(plain, resend);
        assert_eq!(plain.to_string(), "M1-3-0");
        assert_eq!(resend.to_string(), "M1-3-0-0xabc");
    }
}
