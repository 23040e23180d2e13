use serde::{Deserialize, Serialize};

use crate::{AccountId, Error};

/// An unsigned transactional change between two accounts. Field order
/// matches the canonical JSON tags: this is what gets hashed/signed, so
/// declaration order here is load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub chain_id: u16,
    pub nonce: u64,
    pub from: AccountId,
    pub to: AccountId,
    pub value: u64,
    pub tip: u64,
    #[serde(with = "serde_bytes", default)]
    pub data: Vec<u8>,
}

impl Tx {
    /// Signs the transaction with the given secp256k1 private key.
    pub fn sign(self, secret_key: &secp256k1::SecretKey) -> Result<SignedTx, Error> {
        let (r, s, v) = ferrum_crypto::sign(&self, secret_key)?;
        Ok(SignedTx { tx: self, r, s, v })
    }
}

/// A signed transaction: `Tx` plus the `(R, S, V)` signature. This is how
/// a client (a wallet) submits a transaction into the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTx {
    #[serde(flatten)]
    pub tx: Tx,
    #[serde(with = "hex_bytes")]
    pub r: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub s: Vec<u8>,
    pub v: u64,
}

impl std::ops::Deref for SignedTx {
    type Target = Tx;
    fn deref(&self) -> &Tx {
        &self.tx
    }
}

impl SignedTx {
    /// Validates the transaction's signature, in order:
    /// chain ID match, from/to format, from != to, recovered address == from.
    pub fn verify(&self, chain_id: u16) -> Result<(), Error> {
        if self.tx.chain_id != chain_id {
            return Err(Error::ChainIdMismatch { expected: chain_id, got: self.tx.chain_id });
        }

        self.tx.from.verify()?;
        self.tx.to.verify()?;

        if self.tx.from == self.tx.to {
            return Err(Error::SelfTransfer(self.tx.from.to_string()));
        }

        let recovered = ferrum_crypto::recover_address(&self.tx, &self.r, &self.s, self.v)
            .map_err(|_| Error::SignatureInvalid("cannot recover address from signature".to_string()))?;

        let from = AccountId::new(recovered)?;
        if self.tx.from != from {
            return Err(Error::SignatureInvalid(format!(
                "tx from: {} does not match signature address: {}",
                self.tx.from, from
            )));
        }

        Ok(())
    }
}

/// A signed transaction stamped with miner-applied gas and timing
/// metadata — the form actually stored in a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTx {
    #[serde(flatten)]
    pub signed_tx: SignedTx,
    pub timestamp: u64,
    pub gas_price: u64,
    pub gas_units: u64,
}

impl std::ops::Deref for BlockTx {
    type Target = SignedTx;
    fn deref(&self) -> &SignedTx {
        &self.signed_tx
    }
}

impl BlockTx {
    /// Stamps a `SignedTx` with the current time and the miner-chosen gas
    /// parameters.
    pub fn new(signed_tx: SignedTx, gas_price: u64, gas_units: u64) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self { signed_tx, timestamp, gas_price, gas_units }
    }

    pub fn hash(&self) -> String {
        ferrum_crypto::hash(self)
    }

    /// Two `BlockTx` values are equal when their nonce matches and their
    /// canonical 65-byte signatures match.
    pub fn equals(&self, other: &BlockTx) -> bool {
        if self.tx.nonce != other.tx.nonce {
            return false;
        }
        let a = ferrum_crypto::to_bytes(&self.r, &self.s, self.v);
        let b = ferrum_crypto::to_bytes(&other.r, &other.s, other.v);
        matches!((a, b), (Ok(a), Ok(b)) if a == b)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::Secp256k1;

    fn make_tx(chain_id: u16, from: &AccountId, to: &AccountId) -> Tx {
        Tx {
            chain_id,
            nonce: 1,
            from: from.clone(),
            to: to.clone(),
            value: 100,
            tip: 10,
            data: Vec::new(),
        }
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        let from = AccountId::new(ferrum_crypto::address_from_public_key(&public_key)).unwrap();
        let to = AccountId::new("0x0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c").unwrap();

        let tx = make_tx(1, &from, &to);
        let signed = tx.sign(&secret_key).unwrap();

        signed.verify(1).unwrap();
        assert!(matches!(signed.verify(2), Err(Error::ChainIdMismatch { .. })));
    }

    #[test]
    fn self_send_rejected() {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        let from = AccountId::new(ferrum_crypto::address_from_public_key(&public_key)).unwrap();

        let tx = make_tx(1, &from, &from);
        let signed = tx.sign(&secret_key).unwrap();

        assert!(matches!(signed.verify(1), Err(Error::SelfTransfer(_))));
    }
}
