use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

/// The chain's starting parameters, loaded once from a JSON file at node
/// startup. `balances` is a `BTreeMap` (keyed by lowercase hex address)
/// so genesis account seeding is deterministic regardless of map
/// iteration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub date: String,
    pub chain_id: u16,
    pub transactions_per_block: u16,
    pub difficulty: u16,
    pub mining_reward: u64,
    pub gas_price: u64,
    pub balances: BTreeMap<String, u64>,
}

impl Genesis {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::StorageIo(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| Error::StorageIo(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_json_file() {
        let dir = std::env::temp_dir().join(format!("ferrum-genesis-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("genesis.json");
        std::fs::write(
            &path,
            r#"{
                "date": "2026-01-01",
                "chain_id": 1,
                "transactions_per_block": 100,
                "difficulty": 4,
                "mining_reward": 100,
                "gas_price": 1,
                "balances": {"0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0": 1000000}
            }"#,
        )
        .unwrap();

        let genesis = Genesis::load(&path).unwrap();
        assert_eq!(genesis.chain_id, 1);
        assert_eq!(genesis.balances.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
