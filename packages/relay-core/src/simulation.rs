use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use crate::{
    chain_adapter::{ChainReader, ChainWriter, LocalChain},
    config::{ChainConfig, ChainFamily, KeyringConfig, PeerConfig, RelayerConfig},
    keyring::{build_keyrings, create_keyring, public_identity},
    peer::{InMemoryNetwork, PeerManager},
    queue::job_queue,
    registry::ChainRegistry,
    relayer::{Relayer, RelayerParts},
    scheduler::{BlockClock, TokioScheduler},
    signature::SignatureProvider,
    store::InMemoryStore,
    types::{ChainEvent, ChainEventKind, ChainId, CrossChainRequestRecord, CrossChainState, ReportContext},
    Error, Result,
};

pub const SOURCE_CHAIN_ID: ChainId = 1;
pub const TARGET_CHAIN_ID: ChainId = 2;
pub const MAX_SIMULATED_PEERS: usize = 64;

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub peers: usize,
    pub threshold: usize,
    pub family: ChainFamily,
    /// Polls a submitted transaction stays `Pending` on the local chain.
    pub pending_polls: usize,
    pub request_end_timeout_window_ms: u64,
    pub result_check_interval_ms: u64,
}

impl ClusterOptions {
    pub fn new(peers: usize, threshold: usize) -> Self {
        Self {
            peers,
            threshold,
            family: ChainFamily::Evm,
            pending_polls: 0,
            request_end_timeout_window_ms: 2_000,
            result_check_interval_ms: 100,
        }
    }
}

/// Deterministic key material for simulated node `index`.
pub fn simulated_secret(index: usize) -> String {
    hex::encode([index as u8 + 1; 32])
}

fn chain_config(options: &ClusterOptions, own_index: usize) -> Result<ChainConfig> {
    let peer_public_keys = (0..options.peers)
        .map(|i| public_identity(options.family, &simulated_secret(i)))
        .collect::<Result<Vec<_>>>()?;
    Ok(ChainConfig {
        chain_id: TARGET_CHAIN_ID,
        name: format!("local-{}", options.family),
        family: options.family,
        rpc_url: "memory://local".to_string(),
        contract_address: "0x0".to_string(),
        keyring: KeyringConfig {
            secret_key: simulated_secret(own_index),
            peer_public_keys,
        },
    })
}

/// N relayers in one process, wired to an in-memory peer network and one
/// shared local destination chain.
pub struct LocalCluster {
    relayers: Vec<Arc<Relayer>>,
    network: InMemoryNetwork,
    chain: Arc<LocalChain>,
    clock: Arc<BlockClock>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Must be called inside a tokio runtime.
    pub fn start(options: &ClusterOptions) -> Result<Self> {
        if options.peers == 0 || options.peers > MAX_SIMULATED_PEERS {
            return Err(Error::Config(format!("Unsupported peer count {}", options.peers)));
        }
        if options.threshold == 0 || options.threshold > options.peers {
            return Err(Error::Config(format!(
                "Signature threshold must be between 1 and {}",
                options.peers
            )));
        }

        let clock = Arc::new(BlockClock::new());
        let (network, inboxes) = InMemoryNetwork::new(options.peers);
        let verifier = create_keyring(&chain_config(options, 0)?)?;
        let chain = Arc::new(LocalChain::new(TARGET_CHAIN_ID, options.pending_polls).with_verifier(verifier, options.threshold));
        let peers: Vec<PeerConfig> = (0..options.peers)
            .map(|i| PeerConfig {
                name: format!("node-{}", i),
                endpoint: format!("memory://{}", i),
            })
            .collect();

        let mut relayer_config = RelayerConfig::new(options.threshold);
        relayer_config.request_end_timeout_window_ms = options.request_end_timeout_window_ms;
        relayer_config.result_check_interval_ms = options.result_check_interval_ms;

        let mut relayers = Vec::with_capacity(options.peers);
        let mut tasks = Vec::with_capacity(options.peers * 2);
        for (index, mut inbox) in inboxes.into_iter().enumerate() {
            let keyrings = build_keyrings(&[chain_config(options, index)?])?;
            let (queue, jobs) = job_queue();
            let reader: Arc<dyn ChainReader> = chain.clone();
            let writer: Arc<dyn ChainWriter> = chain.clone();
            let parts = RelayerParts {
                peers: PeerManager::new(index, peers.clone(), Arc::new(network.clone()), clock.clone())?,
                signatures: SignatureProvider::new(index, options.peers, options.threshold, Arc::new(keyrings)),
                readers: ChainRegistry::from_entries([(TARGET_CHAIN_ID, reader)]),
                writers: ChainRegistry::from_entries([(TARGET_CHAIN_ID, writer)]),
                scheduler: Arc::new(TokioScheduler::new(clock.clone(), queue.clone())),
                store: Arc::new(InMemoryStore::new()),
                queue,
            };
            let relayer = Arc::new(Relayer::new(relayer_config.clone(), parts));

            tasks.push(tokio::spawn(relayer.clone().run(jobs)));
            let receiver = relayer.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = inbox.recv().await {
                    receiver.handle_peer_message(message);
                }
            }));
            relayers.push(relayer);
        }

        info!(
            "Local cluster started: {} peers, threshold {}, {} keys",
            options.peers, options.threshold, options.family
        );
        Ok(Self {
            relayers,
            network,
            chain,
            clock,
            tasks,
        })
    }

    pub fn relayers(&self) -> &[Arc<Relayer>] {
        &self.relayers
    }

    pub fn chain(&self) -> &LocalChain {
        &self.chain
    }

    pub fn clock(&self) -> &BlockClock {
        &self.clock
    }

    /// Crashed peers stop receiving peer messages and chain events.
    pub fn set_reachable(&self, peer_index: usize, reachable: bool) {
        self.network.set_reachable(peer_index, reachable);
    }

    /// A source-chain event announcing `message_id`, stamped with the
    /// cluster clock.
    pub fn request_started(&self, message_id: &str, message: &[u8]) -> ChainEvent {
        let context = ReportContext {
            message_id: message_id.to_string(),
            sender: "0xsender".to_string(),
            receiver: "0xreceiver".to_string(),
            source_chain_id: SOURCE_CHAIN_ID,
            target_chain_id: TARGET_CHAIN_ID,
            epoch: 0,
            round_id: 0,
        };
        ChainEvent {
            chain_id: SOURCE_CHAIN_ID,
            message_id: message_id.to_string(),
            transaction_id: format!("source-{}", message_id),
            block_height: 0,
            block_hash: String::new(),
            start_time: self.clock.now_millis(),
            kind: ChainEventKind::RequestStarted {
                context,
                message: message.to_vec(),
                token_transfer_metadata: None,
            },
        }
    }

    /// Delivers `event` to every reachable relayer, as each would observe
    /// it on its own chain connection.
    pub fn publish(&self, event: &ChainEvent) {
        for (index, relayer) in self.relayers.iter().enumerate() {
            if self.network.is_reachable(index) {
                relayer.submit_event(event.clone());
            }
        }
    }

    pub async fn record(&self, peer_index: usize, message_id: &str) -> Result<Option<CrossChainRequestRecord>> {
        match self.relayers.get(peer_index) {
            Some(relayer) => relayer.record(message_id).await,
            None => Err(Error::Config(format!("No peer {}", peer_index))),
        }
    }

    /// Waits until every reachable peer holds `message_id` in `state`.
    pub async fn wait_for_state(&self, message_id: &str, state: CrossChainState, limit: Duration) -> Result<bool> {
        let deadline = Instant::now() + limit;
        loop {
            let mut done = true;
            for (index, relayer) in self.relayers.iter().enumerate() {
                if !self.network.is_reachable(index) {
                    continue;
                }
                let current = relayer.record(message_id).await?.map(|r| r.state);
                if current != Some(state) {
                    done = false;
                    break;
                }
            }
            if done {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
