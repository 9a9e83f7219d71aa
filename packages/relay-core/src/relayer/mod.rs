use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    chain_adapter::{build_json_rpc_handlers, ReaderRegistry, WriterRegistry},
    config::{Config, RelayerConfig},
    keyring::build_keyrings,
    peer::{PeerManager, PeerMessage, PeerTransport},
    queue::{job_queue, JobQueue, JobReceiver, Priority},
    retry::RetryTable,
    scheduler::{BlockClock, SchedulerService, SchedulerType, TokioScheduler},
    signature::SignatureProvider,
    store::RecordStore,
    types::{ChainEvent, CrossChainRequestRecord, PartialSignature, ReportContext},
    Result,
};

mod events;
mod stages;

/// One unit of pipeline work. Every job is executed in its own task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayJob {
    Event(ChainEvent),
    RequestStart {
        message_id: String,
    },
    PartialSignature {
        context: ReportContext,
    },
    MultiSignature {
        context: ReportContext,
        signature: PartialSignature,
    },
    Commit {
        context: ReportContext,
        signatures: Vec<PartialSignature>,
    },
    ReceivedResultCheck {
        context: ReportContext,
        transaction_id: String,
    },
    Cancel {
        message_id: String,
    },
    SchedulerExpired {
        message_id: String,
        kind: SchedulerType,
    },
}

impl RelayJob {
    pub fn name(&self) -> &'static str {
        match self {
            RelayJob::Event(event) => event.kind.name(),
            RelayJob::RequestStart { .. } => "RequestStart",
            RelayJob::PartialSignature { .. } => "PartialSignature",
            RelayJob::MultiSignature { .. } => "MultiSignature",
            RelayJob::Commit { .. } => "Commit",
            RelayJob::ReceivedResultCheck { .. } => "ReceivedResultCheck",
            RelayJob::Cancel { .. } => "Cancel",
            RelayJob::SchedulerExpired { .. } => "SchedulerExpired",
        }
    }

    fn correlation(&self) -> String {
        match self {
            RelayJob::Event(event) => format!("chain={} message={}", event.chain_id, event.message_id),
            RelayJob::PartialSignature { context }
            | RelayJob::MultiSignature { context, .. }
            | RelayJob::Commit { context, .. }
            | RelayJob::ReceivedResultCheck { context, .. } => context.to_string(),
            RelayJob::RequestStart { message_id }
            | RelayJob::Cancel { message_id }
            | RelayJob::SchedulerExpired { message_id, .. } => format!("message={}", message_id),
        }
    }
}

/// Everything a relayer drives, handed over at construction.
pub struct RelayerParts {
    pub peers: PeerManager,
    pub signatures: SignatureProvider,
    pub readers: ReaderRegistry,
    pub writers: WriterRegistry,
    pub scheduler: Arc<dyn SchedulerService>,
    pub store: Arc<dyn RecordStore>,
    pub queue: JobQueue<RelayJob>,
}

/// Cross-chain relay state machine of one node.
pub struct Relayer {
    config: RelayerConfig,
    peers: PeerManager,
    signatures: SignatureProvider,
    readers: ReaderRegistry,
    writers: WriterRegistry,
    scheduler: Arc<dyn SchedulerService>,
    store: Arc<dyn RecordStore>,
    queue: JobQueue<RelayJob>,
    retries: RetryTable,
    /// `(message, resend)` pairs already marked committed.
    settled: Mutex<HashSet<(String, String)>>,
}

impl Relayer {
    pub fn new(config: RelayerConfig, parts: RelayerParts) -> Self {
        Self {
            retries: RetryTable::from_config(&config),
            config,
            peers: parts.peers,
            signatures: parts.signatures,
            readers: parts.readers,
            writers: parts.writers,
            scheduler: parts.scheduler,
            store: parts.store,
            queue: parts.queue,
            settled: Mutex::new(HashSet::new()),
        }
    }

    /// Wires a node from its config: keyrings and JSON-RPC handlers for
    /// every configured chain, tokio timers on a fresh block clock.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn PeerTransport>,
        store: Arc<dyn RecordStore>,
    ) -> Result<(Self, JobReceiver<RelayJob>)> {
        config.validate()?;
        let clock = Arc::new(BlockClock::new());
        let (queue, jobs) = job_queue();
        let keyrings = Arc::new(build_keyrings(&config.chains)?);
        let (readers, writers) = build_json_rpc_handlers(&config.chains)?;
        let peers = PeerManager::new(config.node.index, config.node.peers.clone(), transport, clock.clone())?;
        let signatures = SignatureProvider::new(
            config.node.index,
            config.peer_count(),
            config.relayer.signature_threshold,
            keyrings,
        );
        let scheduler = Arc::new(TokioScheduler::new(clock, queue.clone()));
        let parts = RelayerParts {
            peers,
            signatures,
            readers,
            writers,
            scheduler,
            store,
            queue,
        };
        Ok((Self::new(config.relayer.clone(), parts), jobs))
    }

    pub fn own_index(&self) -> usize {
        self.peers.own_index()
    }

    pub fn submit_event(&self, event: ChainEvent) -> bool {
        self.queue.enqueue(RelayJob::Event(event))
    }

    /// Inbound side of the peer RPC surface.
    pub fn handle_peer_message(&self, message: PeerMessage) -> bool {
        let (job, priority) = match message {
            PeerMessage::QueryPartialSignature { context } => {
                (RelayJob::PartialSignature { context }, Priority::Normal)
            }
            PeerMessage::CommitPartialSignature { context, signature } => {
                (RelayJob::MultiSignature { context, signature }, Priority::High)
            }
            PeerMessage::BroadcastCommitResult {
                context,
                transaction_id,
            } => (
                RelayJob::ReceivedResultCheck {
                    context,
                    transaction_id,
                },
                Priority::Normal,
            ),
        };
        self.queue.enqueue_with(job, priority, None)
    }

    pub async fn record(&self, message_id: &str) -> Result<Option<CrossChainRequestRecord>> {
        self.store.get_record(message_id).await
    }

    pub async fn records(&self) -> Result<Vec<CrossChainRequestRecord>> {
        self.store.list_records().await
    }

    pub async fn run(self: Arc<Self>, mut jobs: JobReceiver<RelayJob>) {
        info!("Relayer {} started", self.own_index());
        while let Some(job) = jobs.next().await {
            let relayer = self.clone();
            tokio::spawn(async move { relayer.execute(job).await });
        }
        info!("Relayer {} stopped", self.own_index());
    }

    /// Runs one job to completion. Stage errors end the stage and are
    /// logged with the job's correlation id; nothing is re-enqueued.
    pub async fn execute(&self, job: RelayJob) {
        let name = job.name();
        let correlation = job.correlation();
        debug!("[{}] Executing {}", correlation, name);
        let result = match job {
            RelayJob::Event(event) => self.handle_event(&event).await,
            RelayJob::RequestStart { message_id } => self.request_start(&message_id).await,
            RelayJob::PartialSignature { context } => self.partial_signature(&context).await,
            RelayJob::MultiSignature { context, signature } => self.multi_signature(&context, &signature).await,
            RelayJob::Commit { context, signatures } => self.commit(&context, &signatures).await,
            RelayJob::ReceivedResultCheck {
                context,
                transaction_id,
            } => self.received_result_check(&context, &transaction_id).await,
            RelayJob::Cancel { message_id } => self.cancel(&message_id).await,
            RelayJob::SchedulerExpired { message_id, kind } => self.scheduler_expired(&message_id, kind).await,
        };
        if let Err(e) = result {
            error!("[{}] {} failed: {}", correlation, name, e);
        }
    }

    async fn load(&self, message_id: &str) -> Result<Option<CrossChainRequestRecord>> {
        self.store.get_record(message_id).await
    }

    async fn save(&self, record: &CrossChainRequestRecord) -> Result<()> {
        self.store.set_record(record.key(), record).await
    }

    /// Drops in-memory signing state and pending retries of a message.
    fn clear_message(&self, message_id: &str) {
        self.signatures.remove_sessions(message_id);
        self.retries.clear_prefix(&partial_retry_prefix(message_id));
    }

    fn forget_settled(&self, message_id: &str) {
        self.settled.lock().retain(|(settled, _)| settled != message_id);
    }

    /// Saves a settled record, then claims its settle key. Returns `false`
    /// when the key was already claimed; a failed save claims nothing.
    async fn save_settled(&self, record: &CrossChainRequestRecord) -> Result<bool> {
        let key = settle_key(record);
        if self.settled.lock().contains(&key) {
            return Ok(false);
        }
        self.save(record).await?;
        Ok(self.settled.lock().insert(key))
    }
}

fn settle_key(record: &CrossChainRequestRecord) -> (String, String) {
    (
        record.key().to_string(),
        record.resend_transaction_id.clone().unwrap_or_default(),
    )
}

/// Retry keys carry the id length so no id is a prefix of another's keys.
fn partial_retry_prefix(message_id: &str) -> String {
    format!("partial:{}:{}:", message_id.len(), message_id)
}

fn partial_retry_key(context: &ReportContext) -> String {
    format!(
        "{}{}:{}",
        partial_retry_prefix(&context.message_id),
        context.epoch,
        context.round_id
    )
}
