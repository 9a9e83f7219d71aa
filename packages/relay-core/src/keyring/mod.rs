use std::sync::Arc;

use crate::{
    config::{strip_hex_prefix, ChainConfig, ChainFamily},
    registry::ChainRegistry,
    types::{ChainId, ReportContext},
    Error, Result,
};

/// Off-chain signing strategy of one destination chain.
///
/// Each family hashes `report ∥ context` with its own canonical encoding
/// and signs with the node's key for that chain. Verification checks a
/// peer's signature against the key configured for that peer's index.
#[cfg_attr(test, mockall::automock)]
pub trait ChainKeyring: Send + Sync {
    fn chain_id(&self) -> ChainId;

    fn family(&self) -> ChainFamily;

    fn off_chain_sign(&self, ctx: &ReportContext, report: &[u8]) -> Result<Vec<u8>>;

    fn off_chain_verify(&self, ctx: &ReportContext, index: usize, report: &[u8], sign: &[u8]) -> bool;
}

pub type KeyringRegistry = ChainRegistry<dyn ChainKeyring>;

mod ecdsa;
pub mod evm;
pub mod native;
pub mod ton;

pub use evm::EvmKeyring;
pub use native::NativeKeyring;
pub use ton::TonKeyring;

pub fn create_keyring(config: &ChainConfig) -> Result<Arc<dyn ChainKeyring>> {
    let keyring: Arc<dyn ChainKeyring> = match config.family {
        ChainFamily::Native => Arc::new(NativeKeyring::from_config(config)?),
        ChainFamily::Evm => Arc::new(EvmKeyring::from_config(config)?),
        ChainFamily::Ton => Arc::new(TonKeyring::from_config(config)?),
    };
    Ok(keyring)
}

/// Builds the chain id → keyring map. Later entries for an already
/// registered chain id are dropped.
pub fn build_keyrings(chains: &[ChainConfig]) -> Result<KeyringRegistry> {
    let mut entries = Vec::with_capacity(chains.len());
    for chain in chains {
        entries.push((chain.chain_id, create_keyring(chain)?));
    }
    Ok(ChainRegistry::from_entries(entries))
}

/// The value other peers must list for a node holding `secret_key`.
pub fn public_identity(family: ChainFamily, secret_key: &str) -> Result<String> {
    match family {
        ChainFamily::Native => NativeKeyring::public_identity(secret_key),
        ChainFamily::Evm => EvmKeyring::public_identity(secret_key),
        ChainFamily::Ton => TonKeyring::public_identity(secret_key),
    }
}

pub(crate) fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(strip_hex_prefix(value)).map_err(|e| Error::Keyring(format!("Invalid hex {}: {}", value, e)))
}

#[cfg(test)]
pub(crate) mod test_keys {
    use super::*;
    use crate::config::KeyringConfig;

    pub fn secret(index: usize) -> String {
        hex::encode([index as u8 + 1; 32])
    }

    pub fn chain_config(family: ChainFamily, own_index: usize, peers: usize) -> ChainConfig {
        let peer_public_keys = (0..peers)
            .map(|i| public_identity(family, &secret(i)).unwrap())
            .collect();
        ChainConfig {
            chain_id: 2,
            name: format!("{}-chain", family),
            family,
            rpc_url: "http://localhost".to_string(),
            contract_address: "0x00".to_string(),
            keyring: KeyringConfig {
                secret_key: secret(own_index),
                peer_public_keys,
            },
        }
    }

    pub fn context() -> ReportContext {
        ReportContext {
            message_id: "M1".to_string(),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 0,
            round_id: 0,
        }
    }

    /// Sign with node 1 and check every mutation a verifier must reject.
    pub fn assert_sign_verify_contract(family: ChainFamily) {
        let signer = create_keyring(&chain_config(family, 1, 3)).unwrap();
        let verifier = create_keyring(&chain_config(family, 0, 3)).unwrap();
        let ctx = context();
        let report = b"report-bytes".to_vec();

        let sig = signer.off_chain_sign(&ctx, &report).unwrap();
        assert!(verifier.off_chain_verify(&ctx, 1, &report, &sig));

        // wrong signer index
        assert!(!verifier.off_chain_verify(&ctx, 0, &report, &sig));
        assert!(!verifier.off_chain_verify(&ctx, 2, &report, &sig));
        assert!(!verifier.off_chain_verify(&ctx, 3, &report, &sig));

        for i in 0..report.len() {
            let mut mutated = report.clone();
            mutated[i] ^= 0x01;
            assert!(!verifier.off_chain_verify(&ctx, 1, &mutated, &sig));
        }
        for i in 0..sig.len() {
            let mut mutated = sig.clone();
            mutated[i] ^= 0x01;
            assert!(!verifier.off_chain_verify(&ctx, 1, &report, &mutated));
        }

        assert!(!verifier.off_chain_verify(&ctx.with_round(1), 1, &report, &sig));
        let mutations: [fn(&mut ReportContext); 6] = [
            |c| c.message_id = "M2".to_string(),
            |c| c.sender = "mallory".to_string(),
            |c| c.receiver = "eve".to_string(),
            |c| c.source_chain_id = 9,
            |c| c.target_chain_id = 9,
            |c| c.epoch = 1,
        ];
        for mutate in mutations {
            let mut other = ctx.clone();
            mutate(&mut other);
            assert!(!verifier.off_chain_verify(&other, 1, &report, &sig));
        }

        assert!(!verifier.off_chain_verify(&ctx, 1, &report, &sig[..sig.len() - 1]));
    }
}

#[cfg(test)]
mod tests {
    use super::test_keys::*;
    use super::*;

    #[test]
    fn test_build_keyrings_first_wins() {
        let first = chain_config(ChainFamily::Evm, 0, 2);
        let mut second = chain_config(ChainFamily::Ton, 0, 2);
        second.chain_id = first.chain_id;
        let registry = build_keyrings(&[first, second]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(2).map(|k| k.family()), Some(ChainFamily::Evm));
    }

    #[test]
    fn test_create_keyring_rejects_bad_secret() {
        let mut config = chain_config(ChainFamily::Native, 0, 2);
        config.keyring.secret_key = "zz".to_string();
        assert!(create_keyring(&config).is_err());
    }
}
