use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use ferrum_core::{BlockData, BlockStore, Error};

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Height-indexed, append-only block log backed by one JSON file per block
/// under `root`. `Read(0)` is always an error — there is no height-0
/// persisted block, only the in-memory genesis. Out-of-order writes are not
/// checked here; the caller (the account database) is the one that knows
/// the expected next height.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::StorageIo(e.to_string()))?;
        set_dir_permissions(&root).map_err(|e| Error::StorageIo(e.to_string()))?;
        info!(root = %root.display(), "disk block store ready");
        Ok(Self { root })
    }

    fn path_for(&self, height: u64) -> PathBuf {
        self.root.join(format!("{height}.json"))
    }
}

impl BlockStore for DiskStore {
    fn write(&self, height: u64, data: &BlockData) -> Result<(), Error> {
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| Error::StorageIo(e.to_string()))?;
        std::fs::write(self.path_for(height), bytes).map_err(|e| Error::StorageIo(e.to_string()))?;
        debug!(height, "wrote block to disk");
        Ok(())
    }

    fn read(&self, height: u64) -> Result<BlockData, Error> {
        if height == 0 {
            return Err(Error::StorageIo("no block stored at height 0".to_string()));
        }
        let bytes = std::fs::read(self.path_for(height)).map_err(|e| Error::StorageIo(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::StorageIo(e.to_string()))
    }

    fn reset(&self) -> Result<(), Error> {
        std::fs::remove_dir_all(&self.root).map_err(|e| Error::StorageIo(e.to_string()))?;
        std::fs::create_dir_all(&self.root).map_err(|e| Error::StorageIo(e.to_string()))?;
        set_dir_permissions(&self.root).map_err(|e| Error::StorageIo(e.to_string()))?;
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// The same contract as [`DiskStore`] kept in-process, for tests and
/// throwaway nodes. Unlike the disk backend, writes are checked: a height
/// that isn't exactly "current chain length + 1" is rejected up front.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, BlockData>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryStore {
    fn write(&self, height: u64, data: &BlockData) -> Result<(), Error> {
        let mut blocks = self.blocks.write();
        let expected = blocks.len() as u64 + 1;
        if height != expected {
            return Err(Error::StorageIo(format!(
                "out of order write: got height {height}, expected {expected}"
            )));
        }
        blocks.insert(height, data.clone());
        Ok(())
    }

    fn read(&self, height: u64) -> Result<BlockData, Error> {
        if height == 0 {
            return Err(Error::StorageIo("no block stored at height 0".to_string()));
        }
        self.blocks
            .read()
            .get(&height)
            .cloned()
            .ok_or_else(|| Error::StorageIo(format!("no block stored at height {height}")))
    }

    fn reset(&self) -> Result<(), Error> {
        self.blocks.write().clear();
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrum_core::{AccountId, BlockHeader};

    fn sample_block_data(height: u64) -> BlockData {
        BlockData {
            hash: format!("0x{:064x}", height),
            header: BlockHeader {
                height,
                prev_hash: "0x".to_string(),
                timestamp: 0,
                beneficiary: AccountId::new("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").unwrap(),
                difficulty: 1,
                reward: 100,
                state_root: "0xroot".to_string(),
                tx_root: "0xtx".to_string(),
                nonce: 0,
            },
            txs: Vec::new(),
        }
    }

    #[test]
    fn memory_read_zero_is_error() {
        let store = MemoryStore::new();
        assert!(store.read(0).is_err());
    }

    #[test]
    fn memory_write_then_read_roundtrips() {
        let store = MemoryStore::new();
        let data = sample_block_data(1);
        store.write(1, &data).unwrap();
        let read_back = store.read(1).unwrap();
        assert_eq!(read_back.hash, data.hash);
        assert_eq!(store.blocks.read().len(), 1);
    }

    #[test]
    fn memory_rejects_out_of_order_write() {
        let store = MemoryStore::new();
        assert!(store.write(2, &sample_block_data(2)).is_err());
    }

    #[test]
    fn memory_reset_clears_everything() {
        let store = MemoryStore::new();
        store.write(1, &sample_block_data(1)).unwrap();
        store.reset().unwrap();
        assert!(store.blocks.read().is_empty());
    }

    #[test]
    fn disk_write_then_read_roundtrips() {
        let dir = std::env::temp_dir().join(format!("ferrum-storage-test-{:?}", std::thread::current().id()));
        let store = DiskStore::new(&dir).unwrap();
        let data = sample_block_data(1);
        store.write(1, &data).unwrap();
        let read_back = store.read(1).unwrap();
        assert_eq!(read_back.header.height, 1);
        assert!(dir.join("1.json").is_file());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn disk_read_zero_is_error() {
        let dir = std::env::temp_dir().join(format!("ferrum-storage-test-zero-{:?}", std::thread::current().id()));
        let store = DiskStore::new(&dir).unwrap();
        assert!(store.read(0).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
