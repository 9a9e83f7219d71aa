use log::{debug, info, warn};

use super::{RelayJob, Relayer};
use crate::{
    queue::Priority,
    scheduler::SchedulerType,
    types::{ChainEvent, ChainEventKind, CrossChainRequestRecord, CrossChainState, ReportContext, TokenTransferMetadata},
    Error, Result,
};

impl Relayer {
    pub(super) async fn handle_event(&self, event: &ChainEvent) -> Result<()> {
        if event.start_time > 0 {
            self.scheduler.update_block_time(event.start_time);
        }
        match &event.kind {
            ChainEventKind::RequestStarted {
                context,
                message,
                token_transfer_metadata,
            } => {
                self.on_request_started(event, context, message, token_transfer_metadata)
                    .await
            }
            ChainEventKind::ReportTransmitted { epoch } => self.on_report_transmitted(event, *epoch).await,
            ChainEventKind::RequestCanceled => self.cancel(&event.message_id).await,
            ChainEventKind::RampCommitAccepted => self.on_commit_accepted(event).await,
            ChainEventKind::ResendRequested {
                resend_transaction_id,
                next_commit_delay_ms,
            } => {
                self.on_resend_requested(event, resend_transaction_id, *next_commit_delay_ms)
                    .await
            }
            ChainEventKind::ManuallyExecute => self.on_manually_execute(event).await,
        }
    }

    async fn on_request_started(
        &self,
        event: &ChainEvent,
        context: &ReportContext,
        message: &[u8],
        token_transfer_metadata: &Option<TokenTransferMetadata>,
    ) -> Result<()> {
        if !self.writers.contains(context.target_chain_id) || !self.readers.contains(context.target_chain_id) {
            return Err(Error::UnsupportedChain(context.target_chain_id));
        }
        if self.load(&context.message_id).await?.is_some() {
            debug!("[{}] Request already known", context);
            return Ok(());
        }

        let window = self.config.request_end_timeout_window_ms;
        let round_id = self.peers.current_round_id(event.start_time, window);
        let record = CrossChainRequestRecord::new(
            context.with_round(round_id),
            message.to_vec(),
            token_transfer_metadata.clone(),
            event.start_time,
            window,
        );
        self.save(&record).await?;
        info!(
            "[{}] Request started on chain {} in {}",
            record.report_context, event.chain_id, event.transaction_id
        );
        self.queue.enqueue(RelayJob::RequestStart {
            message_id: context.message_id.clone(),
        });
        Ok(())
    }

    async fn on_report_transmitted(&self, event: &ChainEvent, epoch: u64) -> Result<()> {
        let Some(mut record) = self.load(&event.message_id).await? else {
            debug!("Report transmitted for unknown message {}", event.message_id);
            return Ok(());
        };
        if !record.advance(CrossChainState::Committed) {
            debug!("[{}] Request already {}", record.report_context, record.state);
            return Ok(());
        }
        record.report_context.epoch = record.report_context.epoch.max(epoch);
        if record.commit_transaction_id.is_none() {
            record.commit_transaction_id = Some(event.transaction_id.clone());
        }
        if !self.save_settled(&record).await? {
            debug!("[{}] Already marked committed", record.report_context);
            return Ok(());
        }
        self.scheduler.cancel_scheduler(&record, SchedulerType::CheckCommitted);
        self.clear_message(record.key());
        info!("[{}] Report transmitted in {}", record.report_context, event.transaction_id);
        Ok(())
    }

    async fn on_commit_accepted(&self, event: &ChainEvent) -> Result<()> {
        let Some(mut record) = self.load(&event.message_id).await? else {
            debug!("Commit accepted for unknown message {}", event.message_id);
            return Ok(());
        };
        if !record.advance(CrossChainState::Confirmed) {
            debug!("[{}] Request already {}", record.report_context, record.state);
            return Ok(());
        }
        self.save(&record).await?;
        self.scheduler.cancel_all_schedule(&record);
        self.clear_message(record.key());
        self.forget_settled(record.key());
        info!("[{}] Request confirmed", record.report_context);
        Ok(())
    }

    async fn on_resend_requested(
        &self,
        event: &ChainEvent,
        resend_transaction_id: &str,
        next_commit_delay_ms: u64,
    ) -> Result<()> {
        let Some(mut record) = self.load(&event.message_id).await? else {
            warn!("Resend requested for unknown message {}", event.message_id);
            return Ok(());
        };
        if record.state.is_terminal() {
            debug!("[{}] Request already {}, ignoring resend", record.report_context, record.state);
            return Ok(());
        }
        record.resend_transaction_id = Some(resend_transaction_id.to_string());
        record.resend_transaction_block_height = event.block_height;
        record.resend_transaction_block_time = event.start_time;
        record.next_commit_delay_time = next_commit_delay_ms;
        record.state = CrossChainState::PendingResend;
        self.save(&record).await?;

        self.scheduler.cancel_scheduler(&record, SchedulerType::CheckCommitted);
        self.scheduler.start_scheduler(&record, SchedulerType::ResendPending);
        info!(
            "[{}] Resend {} requested, next commit in {}ms",
            record.report_context, resend_transaction_id, next_commit_delay_ms
        );
        Ok(())
    }

    async fn on_manually_execute(&self, event: &ChainEvent) -> Result<()> {
        let Some(mut record) = self.load(&event.message_id).await? else {
            warn!("Manual execution of unknown message {}", event.message_id);
            return Ok(());
        };
        if !record.restart_round(0) {
            warn!(
                "[{}] Request already {}, not re-executing",
                record.report_context, record.state
            );
            return Ok(());
        }
        record.request_receive_time = event.start_time;
        self.save(&record).await?;
        self.scheduler.cancel_all_schedule(&record);
        self.clear_message(record.key());
        self.forget_settled(record.key());
        info!("[{}] Manually re-executing", record.report_context);
        self.queue.enqueue_with(
            RelayJob::RequestStart {
                message_id: event.message_id.clone(),
            },
            Priority::High,
            None,
        );
        Ok(())
    }
}
