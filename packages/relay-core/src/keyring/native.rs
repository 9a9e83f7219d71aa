use log::warn;
use secp256k1::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};

use super::{decode_hex, ecdsa, ChainKeyring};
use crate::{
    config::{ChainConfig, ChainFamily},
    types::{ChainId, ReportContext},
    Error, Result,
};

/// Keyring of the native ledger: recoverable secp256k1 over
/// `sha256(report ∥ bcs(context))`, recovery id stored raw in byte 64.
pub struct NativeKeyring {
    chain_id: ChainId,
    secret: SecretKey,
    peer_keys: Vec<PublicKey>,
}

impl NativeKeyring {
    pub fn new(chain_id: ChainId, secret_key: &str, peer_public_keys: &[String]) -> Result<Self> {
        let secret = ecdsa::parse_secret_key(secret_key)?;
        let peer_keys = peer_public_keys
            .iter()
            .map(|key| {
                let bytes = decode_hex(key)?;
                PublicKey::from_slice(&bytes)
                    .map_err(|e| Error::Keyring(format!("Invalid native public key {}: {}", key, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chain_id,
            secret,
            peer_keys,
        })
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        Self::new(config.chain_id, &config.keyring.secret_key, &config.keyring.peer_public_keys)
    }

    /// Compressed public key, hex.
    pub fn public_identity(secret_key: &str) -> Result<String> {
        let secret = ecdsa::parse_secret_key(secret_key)?;
        Ok(hex::encode(ecdsa::public_key_of(&secret).serialize()))
    }

    fn digest(ctx: &ReportContext, report: &[u8]) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(report);
        hasher.update(ctx.to_bytes()?);
        Ok(hasher.finalize().into())
    }
}

impl ChainKeyring for NativeKeyring {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Native
    }

    fn off_chain_sign(&self, ctx: &ReportContext, report: &[u8]) -> Result<Vec<u8>> {
        let digest = Self::digest(ctx, report)?;
        Ok(ecdsa::sign_recoverable(&self.secret, digest, 0))
    }

    fn off_chain_verify(&self, ctx: &ReportContext, index: usize, report: &[u8], sign: &[u8]) -> bool {
        let Some(expected) = self.peer_keys.get(index) else {
            warn!("[{}] No native key for peer index {}", ctx, index);
            return false;
        };
        let digest = match Self::digest(ctx, report) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("[{}] Failed to hash report: {}", ctx, e);
                return false;
            }
        };
        matches!(ecdsa::recover(digest, sign, 0), Some(recovered) if recovered == *expected)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_keys::*;
    use super::*;

    #[test]
    fn test_sign_verify_contract() {
        assert_sign_verify_contract(ChainFamily::Native);
    }

    #[test]
    fn test_signature_layout() {
        let keyring = NativeKeyring::from_config(&chain_config(ChainFamily::Native, 0, 1)).unwrap();
        let sig = keyring.off_chain_sign(&context(), b"r").unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] <= 3);
    }
}
