use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::Serialize;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Hex-encoded SHA-256 hash of 32 zero bytes, returned whenever a value
/// fails to serialize so callers always get a well-formed hash back.
pub const ZERO_HASH: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

const ADDRESS_LENGTH: usize = 20;

/// Added to every recovery id so a wire-format `v` is never confused with
/// a raw secp256k1 recovery id (0 or 1).
const RECOVERY_ID_OFFSET: u64 = 23;

#[derive(Debug, Error)]
pub enum Error {
    #[error("signature sign err: {0}")]
    Sign(String),
    #[error("signature verify err: {0}")]
    Verify(String),
    #[error("recover address err: {0}")]
    Recover(String),
    #[error("cannot convert signature to bytes")]
    ToBytes,
    #[error("cannot convert signature to r, s, v")]
    FromBytes,
}

/// Hashes any serializable value to a "0x"-prefixed hex SHA-256 digest.
///
/// Falls back to [`ZERO_HASH`] on serialize failure, mirroring how a
/// content-addressed hash of the empty/genesis block is represented.
pub fn hash<T: Serialize>(value: &T) -> String {
    match serde_json::to_vec(value) {
        Ok(data) => {
            use sha2::{Digest as _, Sha256};
            let digest = Sha256::digest(&data);
            format!("0x{}", hex::encode(digest))
        }
        Err(_) => ZERO_HASH.to_string(),
    }
}

fn digest_of<T: Serialize>(value: &T) -> Result<[u8; 32], Error> {
    let data = serde_json::to_vec(value).map_err(|e| Error::Sign(e.to_string()))?;
    let stamp = format!("\x19Ferrum Signed Message:\n{}", data.len());
    let mut hasher = Keccak256::new();
    hasher.update(stamp.as_bytes());
    hasher.update(&data);
    Ok(hasher.finalize().into())
}

/// Signs any serializable value with the given secp256k1 private key,
/// returning the signature as (r, s, v) big-endian 32-byte pairs plus a
/// message-signing id offset by [`RECOVERY_ID_OFFSET`].
pub fn sign<T: Serialize>(value: &T, secret_key: &SecretKey) -> Result<(Vec<u8>, Vec<u8>, u64), Error> {
    let digest = digest_of(value)?;
    let message = Message::from_digest(digest);

    let secp = Secp256k1::signing_only();
    let recoverable = secp.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = recoverable.serialize_compact();

    let r = compact[..32].to_vec();
    let s = compact[32..].to_vec();
    let v = recovery_id.to_i32() as u64 + RECOVERY_ID_OFFSET;

    Ok((r, s, v))
}

/// Verifies the message-signing id embedded in `v` is one of the two
/// values a recoverable secp256k1 signature can carry.
pub fn verify(v: u64) -> Result<(), Error> {
    let raw_v = v.checked_sub(RECOVERY_ID_OFFSET).ok_or_else(|| {
        Error::Verify("message signing id is invalid".to_string())
    })?;
    if raw_v != 0 && raw_v != 1 {
        return Err(Error::Verify("message signing id is invalid".to_string()));
    }
    Ok(())
}

/// Recovers the Ethereum-style address that produced the given signature
/// over `value`.
pub fn recover_address<T: Serialize>(value: &T, r: &[u8], s: &[u8], v: u64) -> Result<String, Error> {
    let digest = digest_of(value)?;
    let message = Message::from_digest(digest);

    let raw_v = v
        .checked_sub(RECOVERY_ID_OFFSET)
        .ok_or_else(|| Error::Recover("invalid recovery id".to_string()))?;
    let recovery_id = RecoveryId::from_i32(raw_v as i32)
        .map_err(|e| Error::Recover(e.to_string()))?;

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(r);
    compact[32..].copy_from_slice(s);

    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|e| Error::Recover(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    let public_key = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| Error::Recover(e.to_string()))?;

    Ok(address_from_public_key(&public_key))
}

/// Derives the 20-byte Ethereum-style address of a secp256k1 public key:
/// the last 20 bytes of the Keccak-256 hash of its uncompressed encoding
/// (the leading 0x04 tag byte excluded).
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = Keccak256::digest(&uncompressed[1..]);
    format!("0x{}", hex::encode(&digest[digest.len() - ADDRESS_LENGTH..]))
}

/// Converts an (r, s, v) signature to its 65-byte wire representation.
pub fn to_bytes(r: &[u8], s: &[u8], v: u64) -> Result<[u8; 65], Error> {
    if r.len() != 32 || s.len() != 32 {
        return Err(Error::ToBytes);
    }
    let raw_v = v.checked_sub(RECOVERY_ID_OFFSET).ok_or(Error::ToBytes)?;
    let mut out = [0u8; 65];
    out[..32].copy_from_slice(r);
    out[32..64].copy_from_slice(s);
    out[64] = raw_v as u8;
    Ok(out)
}

/// Converts a 65-byte wire signature to its (r, s, v) representation.
pub fn from_bytes(sig: &[u8]) -> Result<(Vec<u8>, Vec<u8>, u64), Error> {
    if sig.len() < 65 {
        return Err(Error::FromBytes);
    }
    let r = sig[..32].to_vec();
    let s = sig[32..64].to_vec();
    let v = sig[64] as u64 + RECOVERY_ID_OFFSET;
    Ok((r, s, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Payload {
        value: u64,
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);

        let payload = Payload { value: 42 };
        let (r, s, v) = sign(&payload, &secret_key).unwrap();
        verify(v).unwrap();

        let recovered = recover_address(&payload, &r, &s, v).unwrap();
        assert_eq!(recovered, address_from_public_key(&public_key));
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut OsRng);
        let payload = Payload { value: 7 };
        let (r, s, v) = sign(&payload, &secret_key).unwrap();

        let bytes = to_bytes(&r, &s, v).unwrap();
        let (r2, s2, v2) = from_bytes(&bytes).unwrap();
        assert_eq!(r, r2);
        assert_eq!(s, s2);
        assert_eq!(v, v2);
    }

    #[test]
    fn hash_is_deterministic() {
        let payload = Payload { value: 1 };
        assert_eq!(hash(&payload), hash(&payload));
        assert_ne!(hash(&payload), ZERO_HASH);
    }

    #[test]
    fn verify_rejects_bad_v() {
        assert!(verify(RECOVERY_ID_OFFSET + 2).is_err());
        assert!(verify(0).is_err());
    }
}
