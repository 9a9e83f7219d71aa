use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::{
    config::PeerConfig,
    scheduler::BlockClock,
    types::{PartialSignature, ReportContext},
    Error, Result,
};

pub mod memory;

pub use memory::InMemoryNetwork;

/// Peer RPC surface. Every call is fire-and-forget for the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Leader → followers: sign the request identified by `context`.
    QueryPartialSignature { context: ReportContext },
    /// Follower → leader: one signature share.
    CommitPartialSignature {
        context: ReportContext,
        signature: PartialSignature,
    },
    /// Leader → followers: the report was submitted as `transaction_id`.
    BroadcastCommitResult {
        context: ReportContext,
        transaction_id: String,
    },
}

impl PeerMessage {
    pub fn context(&self) -> &ReportContext {
        match self {
            PeerMessage::QueryPartialSignature { context }
            | PeerMessage::CommitPartialSignature { context, .. }
            | PeerMessage::BroadcastCommitResult { context, .. } => context,
        }
    }
}

/// Wire-level delivery to one peer, addressed by its configured index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, peer_index: usize, message: PeerMessage) -> Result<()>;
}

/// `floor((now - receive_time) / window)`, saturating at both ends.
pub fn round_id_at(request_receive_time: u64, window: u64, now: u64) -> u32 {
    if window == 0 {
        return 0;
    }
    let rounds = now.saturating_sub(request_receive_time) / window;
    u32::try_from(rounds).unwrap_or(u32::MAX)
}

/// Leader election and delivery to the static peer set.
pub struct PeerManager {
    own_index: usize,
    peers: Vec<PeerConfig>,
    transport: Arc<dyn PeerTransport>,
    clock: Arc<BlockClock>,
}

impl PeerManager {
    pub fn new(
        own_index: usize,
        peers: Vec<PeerConfig>,
        transport: Arc<dyn PeerTransport>,
        clock: Arc<BlockClock>,
    ) -> Result<Self> {
        if own_index >= peers.len() {
            return Err(Error::Config(format!(
                "Node index {} out of range for {} peers",
                own_index,
                peers.len()
            )));
        }
        Ok(Self {
            own_index,
            peers,
            transport,
            clock,
        })
    }

    pub fn own_index(&self) -> usize {
        self.own_index
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn leader_index(&self, epoch: u64, round_id: u32) -> usize {
        let count = self.peers.len() as u64;
        (epoch.wrapping_add(u64::from(round_id)) % count) as usize
    }

    pub fn is_leader(&self, epoch: u64, round_id: u32) -> bool {
        self.leader_index(epoch, round_id) == self.own_index
    }

    /// Round of a request given its receive time, on the shared block clock.
    pub fn current_round_id(&self, request_receive_time: u64, window: u64) -> u32 {
        round_id_at(request_receive_time, window, self.clock.now_millis())
    }

    /// Best-effort fan-out to every other peer. Failures are logged and not retried.
    pub async fn broadcast(&self, message: PeerMessage) {
        let mut deliveries = JoinSet::new();
        for index in (0..self.peers.len()).filter(|i| *i != self.own_index) {
            let transport = self.transport.clone();
            let message = message.clone();
            deliveries.spawn(async move { (index, transport.send(index, message).await) });
        }
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((index, Err(e))) => {
                    warn!(
                        "[{}] Broadcast to peer {} ({}) failed: {}",
                        message.context(),
                        index,
                        self.peers[index].name,
                        e
                    );
                }
                Ok((index, Ok(()))) => debug!("[{}] Delivered to peer {}", message.context(), index),
                Err(e) => warn!("[{}] Broadcast task failed: {}", message.context(), e),
            }
        }
    }

    /// Unicast to the leader of `(epoch, round_id)`.
    pub async fn commit_to_leader(&self, message: PeerMessage, epoch: u64, round_id: u32) -> Result<()> {
        let leader = self.leader_index(epoch, round_id);
        self.transport.send(leader, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn peers(n: usize) -> Vec<PeerConfig> {
        (0..n)
            .map(|i| PeerConfig {
                name: format!("peer-{}", i),
                endpoint: format!("http://peer-{}", i),
            })
            .collect()
    }

    fn manager(own_index: usize, n: usize, transport: MockPeerTransport) -> PeerManager {
        PeerManager::new(own_index, peers(n), Arc::new(transport), Arc::new(BlockClock::new())).unwrap()
    }

    fn query() -> PeerMessage {
        PeerMessage::QueryPartialSignature {
            context: ReportContext {
                message_id: "M1".to_string(),
                sender: "a".to_string(),
                receiver: "b".to_string(),
                source_chain_id: 1,
                target_chain_id: 2,
                epoch: 0,
                round_id: 0,
            },
        }
    }

    #[test]
    fn test_exactly_one_leader() {
        for n in 1..6 {
            let managers: Vec<_> = (0..n).map(|i| manager(i, n, MockPeerTransport::new())).collect();
            for epoch in 0..7u64 {
                for round in 0..7u32 {
                    let leaders: Vec<_> = managers.iter().filter(|m| m.is_leader(epoch, round)).map(|m| m.own_index()).collect();
                    assert_eq!(leaders, vec![((epoch + u64::from(round)) % n as u64) as usize]);
                }
            }
        }
    }

    #[test]
    fn test_leader_handles_extreme_inputs() {
        let m = manager(0, 3, MockPeerTransport::new());
        assert!(m.leader_index(u64::MAX, u32::MAX) < 3);
    }

    #[test]
    fn test_rejects_index_out_of_range() {
        let result = PeerManager::new(3, peers(3), Arc::new(MockPeerTransport::new()), Arc::new(BlockClock::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_round_id_is_monotonic() {
        let mut last = 0;
        for now in (1_000..20_000).step_by(7) {
            let round = round_id_at(1_000, 3_000, now);
            assert!(round >= last);
            last = round;
        }
        assert_eq!(round_id_at(1_000, 3_000, 999), 0);
        assert_eq!(round_id_at(1_000, 3_000, 3_999), 0);
        assert_eq!(round_id_at(1_000, 3_000, 4_000), 1);
        assert_eq!(round_id_at(0, 0, 10), 0);
        assert_eq!(round_id_at(0, 1, u64::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_broadcast_skips_self_and_tolerates_failures() {
        let mut transport = MockPeerTransport::new();
        transport.expect_send().with(eq(0), eq(query())).times(1).returning(|_, _| Ok(()));
        transport
            .expect_send()
            .with(eq(2), eq(query()))
            .times(1)
            .returning(|_, _| Err(Error::Network("down".to_string())));
        let m = manager(1, 3, transport);
        m.broadcast(query()).await;
    }

    #[tokio::test]
    async fn test_commit_to_leader_targets_leader() {
        let mut transport = MockPeerTransport::new();
        transport.expect_send().with(eq(2), eq(query())).times(1).returning(|_, _| Ok(()));
        let m = manager(0, 3, transport);
        m.commit_to_leader(query(), 1, 1).await.unwrap();
    }
}
