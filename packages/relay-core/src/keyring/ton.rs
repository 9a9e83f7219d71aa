use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::warn;
use sha2::{Digest, Sha256};

use super::{decode_hex, ChainKeyring};
use crate::{
    config::{ChainConfig, ChainFamily},
    types::{ChainId, ReportContext},
    Error, Result,
};

/// Keyring of TON: ed25519 over `sha256(report ∥ context)`, where the
/// context is laid out as the contract's cell reader expects it:
/// big-endian integers and u16-length-prefixed strings.
pub struct TonKeyring {
    chain_id: ChainId,
    signing_key: SigningKey,
    peer_keys: Vec<VerifyingKey>,
}

fn parse_signing_key(value: &str) -> Result<SigningKey> {
    let bytes = decode_hex(value)?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Keyring("TON secret key must be 32 bytes".to_string()))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn push_string(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| Error::Keyring(format!("Context field of {} bytes does not fit a TON cell", value.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn encode_context(ctx: &ReportContext) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    push_string(&mut out, &ctx.message_id)?;
    push_string(&mut out, &ctx.sender)?;
    push_string(&mut out, &ctx.receiver)?;
    out.extend_from_slice(&ctx.source_chain_id.to_be_bytes());
    out.extend_from_slice(&ctx.target_chain_id.to_be_bytes());
    out.extend_from_slice(&ctx.epoch.to_be_bytes());
    out.extend_from_slice(&ctx.round_id.to_be_bytes());
    Ok(out)
}

impl TonKeyring {
    pub fn new(chain_id: ChainId, secret_key: &str, peer_public_keys: &[String]) -> Result<Self> {
        let signing_key = parse_signing_key(secret_key)?;
        let peer_keys = peer_public_keys
            .iter()
            .map(|key| {
                let bytes = decode_hex(key)?;
                let raw: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Keyring(format!("Invalid TON public key: {}", key)))?;
                VerifyingKey::from_bytes(&raw)
                    .map_err(|e| Error::Keyring(format!("Invalid TON public key {}: {}", key, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chain_id,
            signing_key,
            peer_keys,
        })
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        Self::new(config.chain_id, &config.keyring.secret_key, &config.keyring.peer_public_keys)
    }

    pub fn public_identity(secret_key: &str) -> Result<String> {
        let signing_key = parse_signing_key(secret_key)?;
        Ok(hex::encode(signing_key.verifying_key().to_bytes()))
    }

    fn digest(ctx: &ReportContext, report: &[u8]) -> Result<[u8; 32]> {
        let mut hasher = Sha256::new();
        hasher.update(report);
        hasher.update(encode_context(ctx)?);
        Ok(hasher.finalize().into())
    }
}

impl ChainKeyring for TonKeyring {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Ton
    }

    fn off_chain_sign(&self, ctx: &ReportContext, report: &[u8]) -> Result<Vec<u8>> {
        let signature = self.signing_key.sign(&Self::digest(ctx, report)?);
        Ok(signature.to_bytes().to_vec())
    }

    fn off_chain_verify(&self, ctx: &ReportContext, index: usize, report: &[u8], sign: &[u8]) -> bool {
        let Some(key) = self.peer_keys.get(index) else {
            warn!("[{}] No TON key for peer index {}", ctx, index);
            return false;
        };
        let Ok(signature) = Signature::from_slice(sign) else {
            return false;
        };
        let digest = match Self::digest(ctx, report) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("[{}] {}", ctx, e);
                return false;
            }
        };
        key.verify(&digest, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_keys::*;
    use super::*;

    #[test]
    fn test_sign_verify_contract() {
        assert_sign_verify_contract(ChainFamily::Ton);
    }

    #[test]
    fn test_signature_is_64_bytes() {
        let keyring = TonKeyring::from_config(&chain_config(ChainFamily::Ton, 0, 1)).unwrap();
        assert_eq!(keyring.off_chain_sign(&context(), b"r").unwrap().len(), 64);
    }

    #[test]
    fn test_oversized_context_field_is_rejected() {
        let keyring = TonKeyring::from_config(&chain_config(ChainFamily::Ton, 0, 1)).unwrap();
        let mut ctx = context();
        ctx.sender = "a".repeat(u16::MAX as usize);
        let sig = keyring.off_chain_sign(&ctx, b"r").unwrap();
        assert!(keyring.off_chain_verify(&ctx, 0, b"r", &sig));

        ctx.sender.push('a');
        assert!(matches!(keyring.off_chain_sign(&ctx, b"r"), Err(Error::Keyring(_))));
        assert!(!keyring.off_chain_verify(&ctx, 0, b"r", &sig));
    }
}
