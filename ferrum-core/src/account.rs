use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::Error;

const ADDRESS_HEX_LEN: usize = 40;

/// A `0x`-prefixed, 40-hex-char address derived from a secp256k1 public
/// key. Construction always goes through format verification so every
/// `AccountId` in circulation is well-formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Validates a hex address string and wraps it as an `AccountId`.
    pub fn new(hex_id: impl Into<String>) -> Result<Self, Error> {
        let hex_id = hex_id.into();
        verify(&hex_id)?;
        Ok(Self(hex_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-checks the format of an already-constructed `AccountId`.
    pub fn verify(&self) -> Result<(), Error> {
        verify(&self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn verify(hex_id: &str) -> Result<(), Error> {
    if hex_id.is_empty() {
        return Err(Error::FormatInvalid("value is empty".to_string()));
    }
    if !has_0x_prefix(hex_id) {
        return Err(Error::FormatInvalid("0x prefix not found".to_string()));
    }
    let body = &hex_id[2..];
    if body.len() != ADDRESS_HEX_LEN {
        return Err(Error::FormatInvalid("length is too small".to_string()));
    }
    if !body.bytes().all(is_hex_char) {
        return Err(Error::FormatInvalid("invalid char found".to_string()));
    }
    Ok(())
}

fn has_0x_prefix(hex_id: &str) -> bool {
    let bytes = hex_id.as_bytes();
    bytes.len() >= 2 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X')
}

fn is_hex_char(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b) || (b'A'..=b'F').contains(&b)
}

/// A `{id, nonce, balance}` record in the state. Seeded from the genesis
/// balances at database construction; created on first receipt for any
/// previously unseen `AccountId`; never deleted during normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub nonce: u64,
    pub balance: u64,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self { id, nonce: 0, balance: 0 }
    }
}

pub type Accounts = HashMap<AccountId, Account>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_accepts_valid_address() {
        assert!(AccountId::new("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").is_ok());
    }

    #[test]
    fn format_rejects_empty() {
        let err = AccountId::new("").unwrap_err();
        assert!(matches!(err, Error::FormatInvalid(m) if m == "value is empty"));
    }

    #[test]
    fn format_rejects_missing_prefix() {
        let err = AccountId::new("0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").unwrap_err();
        assert!(matches!(err, Error::FormatInvalid(m) if m == "0x prefix not found"));
    }

    #[test]
    fn format_rejects_short_body() {
        let err = AccountId::new("0x0").unwrap_err();
        assert!(matches!(err, Error::FormatInvalid(m) if m == "length is too small"));
    }

    #[test]
    fn format_rejects_bad_chars() {
        let err = AccountId::new(format!("0xH{}", "0".repeat(39))).unwrap_err();
        assert!(matches!(err, Error::FormatInvalid(m) if m == "invalid char found"));
    }
}
