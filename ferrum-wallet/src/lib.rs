use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use secp256k1::{Secp256k1, SecretKey};
use tracing::info;

use ferrum_core::AccountId;

const KEY_FILE_EXTENSION: &str = "ecdsa";

/// A named key loaded from (or about to be written to) a `.ecdsa` file: the
/// filename stem is the human-readable name, the file body a hex-encoded
/// secp256k1 private key. No encryption — this mirrors the original node's
/// plaintext key-file format exactly, it is not a design choice made here.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub name: String,
    pub secret_key: SecretKey,
    pub account_id: AccountId,
}

/// Scans a directory of `*.ecdsa` key files.
pub struct WalletStore {
    root: PathBuf,
}

impl WalletStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_context(|| format!("creating wallet directory {root:?}"))?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{KEY_FILE_EXTENSION}"))
    }

    /// Generates a new secp256k1 key, derives its address, and writes it to
    /// `<name>.ecdsa` as hex.
    pub fn create(&self, name: &str) -> Result<Wallet> {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());
        let account_id = AccountId::new(ferrum_crypto::address_from_public_key(&public_key))?;

        let path = self.path_for(name);
        fs::write(&path, hex::encode(secret_key.secret_bytes()))
            .with_context(|| format!("writing key file {path:?}"))?;
        info!(name, %account_id, "wrote new key file");

        Ok(Wallet { name: name.to_string(), secret_key, account_id })
    }

    /// Loads the named key file.
    pub fn load(&self, name: &str) -> Result<Wallet> {
        let path = self.path_for(name);
        let raw = fs::read_to_string(&path).with_context(|| format!("reading key file {path:?}"))?;
        let secret_key = parse_secret_key(raw.trim())?;

        let secp = Secp256k1::new();
        let public_key = secret_key.public_key(&secp);
        let account_id = AccountId::new(ferrum_crypto::address_from_public_key(&public_key))?;

        Ok(Wallet { name: name.to_string(), secret_key, account_id })
    }

    /// Lists every `*.ecdsa` file in the directory, keyed by filename stem.
    pub fn list(&self) -> Result<Vec<Wallet>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).with_context(|| format!("reading {:?}", self.root))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_FILE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            out.push(self.load(stem)?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn parse_secret_key(hex_key: &str) -> Result<SecretKey> {
    let bytes = hex::decode(hex_key).map_err(|e| anyhow!("invalid key file hex: {e}"))?;
    SecretKey::from_slice(&bytes).map_err(|e| anyhow!("invalid secp256k1 private key: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ferrum-wallet-test-{tag}-{:?}", std::thread::current().id()))
    }

    #[test]
    fn create_then_load_roundtrips() {
        let dir = temp_dir("roundtrip");
        let store = WalletStore::new(&dir).unwrap();
        let created = store.create("alice").unwrap();
        let loaded = store.load("alice").unwrap();

        assert_eq!(created.account_id, loaded.account_id);
        assert_eq!(created.secret_key, loaded.secret_key);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn list_returns_every_key_file_sorted_by_name() {
        let dir = temp_dir("list");
        let store = WalletStore::new(&dir).unwrap();
        store.create("bob").unwrap();
        store.create("alice").unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn key_file_is_plain_hex() {
        let dir = temp_dir("plaintext");
        let store = WalletStore::new(&dir).unwrap();
        store.create("carol").unwrap();
        let raw = std::fs::read_to_string(dir.join("carol.ecdsa")).unwrap();
        assert!(hex::decode(raw.trim()).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }
}
