use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    keyring::KeyringRegistry,
    types::{PartialSignature, ReportContext, SessionId},
    Result,
};

/// One threshold-signing bucket, owned by the leader of its round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSignatureSession {
    pub session_id: SessionId,
    pub report_context: ReportContext,
    /// The leader's own commitment; incoming shares are verified against it.
    pub report: Vec<u8>,
    pub threshold: usize,
    /// Accepted shares in arrival order.
    pub signatures: Vec<PartialSignature>,
    pub finished: bool,
}

impl MultiSignatureSession {
    fn has_index(&self, index: usize) -> bool {
        self.signatures.iter().any(|s| s.index == index)
    }
}

/// Produces this node's signature shares and, on the leader, collects
/// everyone's shares until the threshold is met.
///
/// `sessions` guards the session map. `finished` is a separate lock that
/// makes handing out a session's signatures a one-shot operation even when
/// several shares cross the threshold at the same time.
pub struct SignatureProvider {
    own_index: usize,
    peer_count: usize,
    threshold: usize,
    keyrings: Arc<KeyringRegistry>,
    sessions: Mutex<HashMap<SessionId, MultiSignatureSession>>,
    finished: Mutex<HashSet<SessionId>>,
}

impl SignatureProvider {
    pub fn new(own_index: usize, peer_count: usize, threshold: usize, keyrings: Arc<KeyringRegistry>) -> Self {
        Self {
            own_index,
            peer_count,
            threshold,
            keyrings,
            sessions: Mutex::new(HashMap::new()),
            finished: Mutex::new(HashSet::new()),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Signs `report` for the context's destination chain with this node's key.
    pub fn generate_partial_sign(&self, ctx: &ReportContext, report: &[u8]) -> Result<PartialSignature> {
        let keyring = self.keyrings.resolve(ctx.target_chain_id)?;
        let signature = keyring.off_chain_sign(ctx, report)?;
        Ok(PartialSignature {
            index: self.own_index,
            signature,
        })
    }

    /// Creates the session with the leader's own share. An existing session
    /// is left untouched; returns whether a new one was created.
    pub fn leader_init_multi_sign(&self, session_id: &SessionId, ctx: &ReportContext, report: &[u8]) -> Result<bool> {
        if self.has_session(session_id) {
            warn!("[{}] Multi-signature session {} already initialized", ctx, session_id);
            return Ok(false);
        }
        let own = self.generate_partial_sign(ctx, report)?;

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session_id) {
            warn!("[{}] Multi-signature session {} already initialized", ctx, session_id);
            return Ok(false);
        }
        sessions.insert(
            session_id.clone(),
            MultiSignatureSession {
                session_id: session_id.clone(),
                report_context: ctx.clone(),
                report: report.to_vec(),
                threshold: self.threshold,
                signatures: vec![own],
                finished: false,
            },
        );
        info!("[{}] Multi-signature session {} initialized", ctx, session_id);
        Ok(true)
    }

    pub fn has_session(&self, session_id: &SessionId) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Accepts a peer's share. Unknown sessions, out-of-range or duplicate
    /// indices and shares that fail verification are rejected with `false`.
    pub fn process_multi_sign(&self, session_id: &SessionId, signature: &PartialSignature) -> bool {
        if signature.index >= self.peer_count {
            warn!("Session {}: signer index {} out of range", session_id, signature.index);
            return false;
        }

        let (ctx, report) = {
            let sessions = self.sessions.lock();
            let Some(session) = sessions.get(session_id) else {
                warn!("Session {} not found, dropping share from {}", session_id, signature.index);
                return false;
            };
            if session.has_index(signature.index) {
                debug!("Session {}: duplicate share from {}", session_id, signature.index);
                return false;
            }
            (session.report_context.clone(), session.report.clone())
        };

        let keyring = match self.keyrings.resolve(ctx.target_chain_id) {
            Ok(keyring) => keyring,
            Err(e) => {
                warn!("[{}] {}", ctx, e);
                return false;
            }
        };
        if !keyring.off_chain_verify(&ctx, signature.index, &report, &signature.signature) {
            warn!("[{}] Invalid share from {}", ctx, signature.index);
            return false;
        }

        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        if session.has_index(signature.index) {
            return false;
        }
        session.signatures.push(signature.clone());
        debug!(
            "[{}] Accepted share from {} ({}/{})",
            ctx,
            signature.index,
            session.signatures.len(),
            session.threshold
        );
        true
    }

    pub fn signature_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.signatures.len())
            .unwrap_or(0)
    }

    pub fn is_enough_partial_sig(&self, session_id: &SessionId) -> bool {
        self.signature_count(session_id) >= self.threshold
    }

    /// Hands out the accepted shares once per session, and only after the
    /// threshold is reached.
    pub fn try_get_signatures(&self, session_id: &SessionId) -> Option<Vec<PartialSignature>> {
        let mut finished = self.finished.lock();
        if finished.contains(session_id) {
            return None;
        }
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(session_id)?;
        if session.signatures.len() < session.threshold {
            return None;
        }
        session.finished = true;
        finished.insert(session_id.clone());
        Some(session.signatures.clone())
    }

    pub fn session_snapshot(&self, session_id: &SessionId) -> Option<MultiSignatureSession> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Drops every session of a message once it no longer needs signing.
    pub fn remove_sessions(&self, message_id: &str) {
        let mut finished = self.finished.lock();
        finished.retain(|id| id.message_id != message_id);
        let mut sessions = self.sessions.lock();
        sessions.retain(|id, _| id.message_id != message_id);
    }
}
