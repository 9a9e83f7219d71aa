use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1, SecretKey,
};

use super::decode_hex;
use crate::{Error, Result};

pub(crate) const SIGNATURE_LEN: usize = 65;

pub(crate) fn parse_secret_key(value: &str) -> Result<SecretKey> {
    let bytes = decode_hex(value)?;
    SecretKey::from_slice(&bytes).map_err(|e| Error::Keyring(format!("Invalid secp256k1 secret key: {}", e)))
}

pub(crate) fn public_key_of(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::signing_only(), secret)
}

/// `r ∥ s ∥ (recid + v_offset)`
pub(crate) fn sign_recoverable(secret: &SecretKey, digest: [u8; 32], v_offset: u8) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let signature = secp.sign_ecdsa_recoverable(&Message::from_digest(digest), secret);
    let (recovery_id, compact) = signature.serialize_compact();
    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&compact);
    out.push(recovery_id.to_i32() as u8 + v_offset);
    out
}

pub(crate) fn recover(digest: [u8; 32], sign: &[u8], v_offset: u8) -> Option<PublicKey> {
    if sign.len() != SIGNATURE_LEN {
        return None;
    }
    let v = sign[64].checked_sub(v_offset)?;
    let recovery_id = RecoveryId::from_i32(i32::from(v)).ok()?;
    let signature = RecoverableSignature::from_compact(&sign[..64], recovery_id).ok()?;
    Secp256k1::verification_only()
        .recover_ecdsa(&Message::from_digest(digest), &signature)
        .ok()
}
