use log::{debug, info, warn};
use std::cmp::Ordering;

use super::{partial_retry_key, RelayJob, Relayer};
use crate::{
    peer::PeerMessage,
    queue::Priority,
    report::generate_report,
    retry::RetryDecision,
    scheduler::SchedulerType,
    types::{CrossChainRequestRecord, CrossChainState, PartialSignature, ReportContext, SessionId, TransactionResult},
    Result,
};

enum RoundCheck {
    Current,
    /// The sender is in a later round; the record catches up.
    Ahead,
    Stale,
    EpochMismatch,
}

fn check_round(record: &CrossChainRequestRecord, context: &ReportContext) -> RoundCheck {
    if record.report_context.epoch != context.epoch {
        return RoundCheck::EpochMismatch;
    }
    match context.round_id.cmp(&record.report_context.round_id) {
        Ordering::Less => RoundCheck::Stale,
        Ordering::Equal => RoundCheck::Current,
        Ordering::Greater => RoundCheck::Ahead,
    }
}

impl Relayer {
    pub(super) async fn request_start(&self, message_id: &str) -> Result<()> {
        let Some(record) = self.load(message_id).await? else {
            warn!("RequestStart for unknown message {}", message_id);
            return Ok(());
        };
        if record.state.is_settled() {
            debug!("[{}] Request already {}", record.report_context, record.state);
            return Ok(());
        }

        let ctx = record.report_context.clone();
        self.scheduler.start_scheduler(&record, SchedulerType::CheckCommitted);
        if !self.peers.is_leader(ctx.epoch, ctx.round_id) {
            debug!(
                "[{}] Waiting for leader {}",
                ctx,
                self.peers.leader_index(ctx.epoch, ctx.round_id)
            );
            return Ok(());
        }

        info!("[{}] Leading round, requesting partial signatures", ctx);
        self.queue
            .enqueue_with(RelayJob::PartialSignature { context: ctx.clone() }, Priority::High, None);
        self.peers
            .broadcast(PeerMessage::QueryPartialSignature { context: ctx })
            .await;
        Ok(())
    }

    pub(super) async fn partial_signature(&self, context: &ReportContext) -> Result<()> {
        let retry_key = partial_retry_key(context);
        let Some(mut record) = self.load(&context.message_id).await? else {
            self.retry_partial_signature(context, &retry_key);
            return Ok(());
        };
        self.retries.succeed(&retry_key);
        if record.state.is_settled() {
            debug!("[{}] Request already {}, not signing", context, record.state);
            return Ok(());
        }

        let mut changed = false;
        match check_round(&record, context) {
            RoundCheck::Current => {}
            RoundCheck::Ahead => {
                changed = record.restart_round(context.round_id);
                self.forget_settled(record.key());
            }
            RoundCheck::Stale => {
                warn!(
                    "[{}] Stale signature request, record is at round {}",
                    context, record.report_context.round_id
                );
                return Ok(());
            }
            RoundCheck::EpochMismatch => {
                warn!(
                    "[{}] Signature request for another epoch, record is at epoch {}",
                    context, record.report_context.epoch
                );
                return Ok(());
            }
        }
        changed |= record.advance(CrossChainState::PartialSignature);
        if changed {
            self.save(&record).await?;
        }

        let report = generate_report(&record)?;
        let ctx = record.report_context.clone();
        if self.peers.is_leader(ctx.epoch, ctx.round_id) {
            let session_id = record.session_id();
            if !self.signatures.has_session(&session_id) {
                self.signatures.leader_init_multi_sign(&session_id, &ctx, &report)?;
            }
            return self.release_if_ready(&record, &session_id).await;
        }

        let signature = self.signatures.generate_partial_sign(&ctx, &report)?;
        let leader = self.peers.leader_index(ctx.epoch, ctx.round_id);
        let message = PeerMessage::CommitPartialSignature {
            context: ctx.clone(),
            signature,
        };
        match self.peers.commit_to_leader(message, ctx.epoch, ctx.round_id).await {
            Ok(()) => debug!("[{}] Partial signature sent to leader {}", ctx, leader),
            Err(e) => warn!("[{}] Failed to send partial signature to leader {}: {}", ctx, leader, e),
        }
        Ok(())
    }

    fn retry_partial_signature(&self, context: &ReportContext, retry_key: &str) {
        match self.retries.schedule(retry_key) {
            RetryDecision::Scheduled(delay) => {
                debug!("[{}] Record not ready, retrying in {:?}", context, delay);
                self.queue.enqueue_with(
                    RelayJob::PartialSignature {
                        context: context.clone(),
                    },
                    Priority::Normal,
                    Some(delay),
                );
            }
            RetryDecision::Collapsed => debug!("[{}] Record not ready, retry already pending", context),
            RetryDecision::GaveUp => warn!("[{}] Record never arrived, dropping signature request", context),
        }
    }

    pub(super) async fn multi_signature(&self, context: &ReportContext, signature: &PartialSignature) -> Result<()> {
        let Some(mut record) = self.load(&context.message_id).await? else {
            warn!("[{}] Share from {} for unknown request", context, signature.index);
            return Ok(());
        };
        if record.state.is_settled() {
            debug!("[{}] Request already {}, ignoring share", context, record.state);
            return Ok(());
        }
        if !self.peers.is_leader(context.epoch, context.round_id) {
            warn!("[{}] Not the leader, dropping share from {}", context, signature.index);
            return Ok(());
        }

        let mut changed = false;
        match check_round(&record, context) {
            RoundCheck::Current => {}
            RoundCheck::Ahead => {
                changed = record.restart_round(context.round_id);
                self.forget_settled(record.key());
            }
            RoundCheck::Stale | RoundCheck::EpochMismatch => {
                warn!(
                    "[{}] Share from {} does not match local epoch {} round {}",
                    context, signature.index, record.report_context.epoch, record.report_context.round_id
                );
                return Ok(());
            }
        }

        let session_id = record.session_id();
        if !self.signatures.has_session(&session_id) {
            // a follower's share can beat our own PartialSignature stage
            let report = generate_report(&record)?;
            self.signatures
                .leader_init_multi_sign(&session_id, &record.report_context, &report)?;
        }
        if !self.signatures.process_multi_sign(&session_id, signature) {
            if changed {
                self.save(&record).await?;
            }
            return Ok(());
        }

        changed |= record.advance(CrossChainState::MultiSignature);
        if changed {
            self.save(&record).await?;
        }
        self.release_if_ready(&record, &session_id).await
    }

    /// Enqueues Commit the one time the session's signatures are handed out.
    async fn release_if_ready(&self, record: &CrossChainRequestRecord, session_id: &SessionId) -> Result<()> {
        let Some(signatures) = self.signatures.try_get_signatures(session_id) else {
            return Ok(());
        };
        let ctx = &record.report_context;
        info!("[{}] Threshold reached with {} signatures", ctx, signatures.len());
        if let Some(session) = self.signatures.session_snapshot(session_id) {
            if let Err(e) = self.store.set_session(&session_id.to_string(), &session).await {
                warn!("[{}] Failed to persist session {}: {}", ctx, session_id, e);
            }
        }
        self.queue.enqueue_with(
            RelayJob::Commit {
                context: ctx.clone(),
                signatures,
            },
            Priority::High,
            None,
        );
        Ok(())
    }

    pub(super) async fn commit(&self, context: &ReportContext, signatures: &[PartialSignature]) -> Result<()> {
        let Some(mut record) = self.load(&context.message_id).await? else {
            warn!("[{}] Commit for unknown request", context);
            return Ok(());
        };
        if record.state.is_settled() {
            debug!("[{}] Request already {}, skipping commit", context, record.state);
            return Ok(());
        }
        if !matches!(check_round(&record, context), RoundCheck::Current) {
            warn!(
                "[{}] Round moved on to {}, dropping commit",
                context, record.report_context.round_id
            );
            return Ok(());
        }
        if !self.peers.is_leader(context.epoch, context.round_id) {
            warn!("[{}] Not the leader, dropping commit", context);
            return Ok(());
        }

        let writer = self.writers.resolve(context.target_chain_id)?;
        let report = generate_report(&record)?;
        let Some(transaction_id) = writer.send_commit_transaction(context, signatures, &report).await? else {
            warn!("[{}] Commit transaction refused, waiting for round rotation", context);
            return Ok(());
        };

        info!("[{}] Commit transaction submitted: {}", context, transaction_id);
        record.commit_transaction_id = Some(transaction_id.clone());
        record.advance(CrossChainState::Committing);
        self.save(&record).await?;

        self.peers
            .broadcast(PeerMessage::BroadcastCommitResult {
                context: context.clone(),
                transaction_id: transaction_id.clone(),
            })
            .await;
        self.queue.enqueue(RelayJob::ReceivedResultCheck {
            context: context.clone(),
            transaction_id,
        });
        Ok(())
    }

    pub(super) async fn received_result_check(&self, context: &ReportContext, transaction_id: &str) -> Result<()> {
        let Some(record) = self.load(&context.message_id).await? else {
            warn!("[{}] Result check for unknown request", context);
            return Ok(());
        };
        if record.state.is_settled() {
            debug!("[{}] Request already {}, result check done", context, record.state);
            return Ok(());
        }

        let reader = self.readers.resolve(context.target_chain_id)?;
        match reader.get_transaction_result(transaction_id).await {
            Ok(TransactionResult::Success) => self.mark_committed(record, transaction_id).await,
            Ok(TransactionResult::Pending) => {
                debug!("[{}] Transaction {} pending", context, transaction_id);
                self.queue.enqueue_with(
                    RelayJob::ReceivedResultCheck {
                        context: context.clone(),
                        transaction_id: transaction_id.to_string(),
                    },
                    Priority::Normal,
                    Some(self.config.result_check_interval()),
                );
                Ok(())
            }
            Ok(result) => {
                warn!(
                    "[{}] Transaction {} ended as {:?}, waiting for round rotation",
                    context, transaction_id, result
                );
                Ok(())
            }
            Err(e) => {
                warn!("[{}] Failed to query transaction {}: {}", context, transaction_id, e);
                Ok(())
            }
        }
    }

    async fn mark_committed(&self, mut record: CrossChainRequestRecord, transaction_id: &str) -> Result<()> {
        if !record.advance(CrossChainState::Committed) {
            debug!("[{}] Not moving {} to Committed", record.report_context, record.state);
            return Ok(());
        }
        record.commit_transaction_id = Some(transaction_id.to_string());
        if !self.save_settled(&record).await? {
            debug!("[{}] Already marked committed", record.report_context);
            return Ok(());
        }
        self.scheduler.cancel_scheduler(&record, SchedulerType::CheckCommitted);
        self.clear_message(record.key());
        info!("[{}] Report committed in {}", record.report_context, transaction_id);
        Ok(())
    }

    pub(super) async fn cancel(&self, message_id: &str) -> Result<()> {
        let Some(mut record) = self.load(message_id).await? else {
            debug!("Cancel for unknown message {}", message_id);
            return Ok(());
        };
        if record.state.is_terminal() {
            debug!("[{}] Request already {}", record.report_context, record.state);
            return Ok(());
        }
        record.state = CrossChainState::RequestCanceled;
        self.save(&record).await?;
        self.scheduler.cancel_all_schedule(&record);
        self.clear_message(message_id);
        self.forget_settled(message_id);
        info!("[{}] Request canceled", record.report_context);
        Ok(())
    }

    pub(super) async fn scheduler_expired(&self, message_id: &str, kind: SchedulerType) -> Result<()> {
        let Some(mut record) = self.load(message_id).await? else {
            debug!("{} timer for unknown message {}", kind, message_id);
            return Ok(());
        };
        match kind {
            SchedulerType::CheckCommitted => {
                if record.state.is_settled() || record.state == CrossChainState::PendingResend {
                    debug!("[{}] Request already {}", record.report_context, record.state);
                    return Ok(());
                }
                let elapsed_round = self
                    .peers
                    .current_round_id(record.request_receive_time, record.request_end_timeout_window);
                if elapsed_round <= record.report_context.round_id {
                    // armed for an earlier round; the record has caught up since
                    debug!("[{}] Round still open, re-arming", record.report_context);
                    self.scheduler.start_scheduler(&record, SchedulerType::CheckCommitted);
                    return Ok(());
                }
                let next_round = record.report_context.round_id.saturating_add(1).max(elapsed_round);
                info!(
                    "[{}] No commit observed, rotating to round {} (leader {})",
                    record.report_context,
                    next_round,
                    self.peers.leader_index(record.report_context.epoch, next_round)
                );
                record.restart_round(next_round);
            }
            SchedulerType::ResendPending => {
                if record.state != CrossChainState::PendingResend {
                    debug!("[{}] No resend pending in {}", record.report_context, record.state);
                    return Ok(());
                }
                // rounds of the resend count from its due time
                record.request_receive_time = kind.deadline(&record);
                record.restart_round(0);
                info!(
                    "[{}] Resending as {}",
                    record.report_context,
                    record.resend_transaction_id.as_deref().unwrap_or_default()
                );
            }
        }
        self.save(&record).await?;
        self.clear_message(message_id);
        self.forget_settled(message_id);
        self.queue.enqueue_with(
            RelayJob::RequestStart {
                message_id: message_id.to_string(),
            },
            Priority::High,
            None,
        );
        Ok(())
    }
}
