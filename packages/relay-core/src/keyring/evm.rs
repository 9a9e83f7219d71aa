use log::warn;
use secp256k1::{PublicKey, SecretKey};
use sha3::{Digest, Keccak256};

use super::{decode_hex, ecdsa, ChainKeyring};
use crate::{
    config::{ChainConfig, ChainFamily},
    types::{ChainId, ReportContext},
    Error, Result,
};

const ADDRESS_LEN: usize = 20;
const V_OFFSET: u8 = 27;

type Address = [u8; ADDRESS_LEN];

/// Keyring of EVM-compatible chains.
///
/// The context is packed as 32-byte words the way the on-chain verifier
/// rebuilds it: `keccak(messageId), keccak(sender), keccak(receiver)`,
/// then source chain, target chain, epoch and round as big-endian
/// uint256. Signatures are `r ∥ s ∥ v` with `v = 27 + recid`, checked by
/// recovering the signer address.
pub struct EvmKeyring {
    chain_id: ChainId,
    secret: SecretKey,
    peer_addresses: Vec<Address>,
}

impl EvmKeyring {
    pub fn new(chain_id: ChainId, secret_key: &str, peer_addresses: &[String]) -> Result<Self> {
        let secret = ecdsa::parse_secret_key(secret_key)?;
        let peer_addresses = peer_addresses
            .iter()
            .map(|address| {
                let bytes = decode_hex(address)?;
                Address::try_from(bytes.as_slice())
                    .map_err(|_| Error::Keyring(format!("Invalid EVM address: {}", address)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            chain_id,
            secret,
            peer_addresses,
        })
    }

    pub fn from_config(config: &ChainConfig) -> Result<Self> {
        Self::new(config.chain_id, &config.keyring.secret_key, &config.keyring.peer_public_keys)
    }

    /// Checksum-free `0x` address.
    pub fn public_identity(secret_key: &str) -> Result<String> {
        let secret = ecdsa::parse_secret_key(secret_key)?;
        Ok(format!("0x{}", hex::encode(address_of(&ecdsa::public_key_of(&secret)))))
    }

    fn digest(ctx: &ReportContext, report: &[u8]) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(report);
        hasher.update(encode_context(ctx));
        hasher.finalize().into()
    }
}

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn word(value: u128) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[16..].copy_from_slice(&value.to_be_bytes());
    out
}

fn signed_word(value: i64) -> [u8; 32] {
    // two's complement sign extension, as abi.encode(int256)
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut out = [fill; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

fn encode_context(ctx: &ReportContext) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 * 7);
    out.extend_from_slice(&keccak(ctx.message_id.as_bytes()));
    out.extend_from_slice(&keccak(ctx.sender.as_bytes()));
    out.extend_from_slice(&keccak(ctx.receiver.as_bytes()));
    out.extend_from_slice(&signed_word(ctx.source_chain_id));
    out.extend_from_slice(&signed_word(ctx.target_chain_id));
    out.extend_from_slice(&word(u128::from(ctx.epoch)));
    out.extend_from_slice(&word(u128::from(ctx.round_id)));
    out
}

fn address_of(key: &PublicKey) -> Address {
    let uncompressed = key.serialize_uncompressed();
    let hash = keccak(&uncompressed[1..]);
    let mut address = [0u8; ADDRESS_LEN];
    address.copy_from_slice(&hash[12..]);
    address
}

impl ChainKeyring for EvmKeyring {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn off_chain_sign(&self, ctx: &ReportContext, report: &[u8]) -> Result<Vec<u8>> {
        Ok(ecdsa::sign_recoverable(&self.secret, Self::digest(ctx, report), V_OFFSET))
    }

    fn off_chain_verify(&self, ctx: &ReportContext, index: usize, report: &[u8], sign: &[u8]) -> bool {
        let Some(expected) = self.peer_addresses.get(index) else {
            warn!("[{}] No EVM address for peer index {}", ctx, index);
            return false;
        };
        match ecdsa::recover(Self::digest(ctx, report), sign, V_OFFSET) {
            Some(recovered) => address_of(&recovered) == *expected,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_keys::*;
    use super::*;

    #[test]
    fn test_sign_verify_contract() {
        assert_sign_verify_contract(ChainFamily::Evm);
    }

    #[test]
    fn test_v_is_offset() {
        let keyring = EvmKeyring::from_config(&chain_config(ChainFamily::Evm, 0, 1)).unwrap();
        let sig = keyring.off_chain_sign(&context(), b"r").unwrap();
        assert!(sig[64] == 27 || sig[64] == 28);
    }

    #[test]
    fn test_known_address() {
        // secret key 0x...01 is the generator point
        let secret = format!("{:0>64}", "1");
        assert_eq!(
            EvmKeyring::public_identity(&secret).unwrap(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_rejects_short_address() {
        let secret = secret(0);
        assert!(EvmKeyring::new(2, &secret, &["0x1234".to_string()]).is_err());
    }
}
