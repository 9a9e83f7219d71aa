use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{PeerMessage, PeerTransport};
use crate::{Error, Result};

struct NetworkInner {
    inboxes: Vec<mpsc::UnboundedSender<PeerMessage>>,
    reachable: Vec<AtomicBool>,
}

/// Peer transport for relayers living in one process.
///
/// Each peer index owns an inbox; marking a peer unreachable makes every
/// send to it fail, which is how a crashed node looks to the others.
#[derive(Clone)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new(peer_count: usize) -> (Self, Vec<mpsc::UnboundedReceiver<PeerMessage>>) {
        let mut inboxes = Vec::with_capacity(peer_count);
        let mut receivers = Vec::with_capacity(peer_count);
        for _ in 0..peer_count {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.push(tx);
            receivers.push(rx);
        }
        let reachable = (0..peer_count).map(|_| AtomicBool::new(true)).collect();
        (
            Self {
                inner: Arc::new(NetworkInner { inboxes, reachable }),
            },
            receivers,
        )
    }

    pub fn set_reachable(&self, peer_index: usize, reachable: bool) {
        if let Some(flag) = self.inner.reachable.get(peer_index) {
            flag.store(reachable, Ordering::SeqCst);
        }
    }

    pub fn is_reachable(&self, peer_index: usize) -> bool {
        self.inner
            .reachable
            .get(peer_index)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PeerTransport for InMemoryNetwork {
    async fn send(&self, peer_index: usize, message: PeerMessage) -> Result<()> {
        if !self.is_reachable(peer_index) {
            return Err(Error::Network(format!("Peer {} is unreachable", peer_index)));
        }
        self.inner.inboxes[peer_index]
            .send(message)
            .map_err(|_| Error::Network(format!("Peer {} inbox closed", peer_index)))
    }
}
