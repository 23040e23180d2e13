use parking_lot::RwLock;

use crate::{Account, AccountId, Accounts, Block, BlockData, BlockHeader, BlockTx, Error, Genesis, MerkleTree, SignedTx, Tx};

const ZERO_ACCOUNT: &str = "0x0000000000000000000000000000000000000000";

/// Persists mined blocks by height. Implementations live in a downstream
/// crate (disk-backed, in-memory); `Database` only depends on the trait so
/// it never has to know which one it's talking to.
pub trait BlockStore: Send + Sync {
    fn write(&self, height: u64, data: &BlockData) -> Result<(), Error>;
    fn read(&self, height: u64) -> Result<BlockData, Error>;
    fn reset(&self) -> Result<(), Error>;
    fn close(&self) -> Result<(), Error>;
}

/// The in-memory account ledger plus the chain tip, backed by a
/// [`BlockStore`] for durability. Bootstraps by replaying every block
/// already on disk so a restarted node resumes exactly where it left off.
pub struct Database {
    store: Box<dyn BlockStore>,
    accounts: RwLock<Accounts>,
    last_block: RwLock<Block>,
}

impl Database {
    /// Seeds accounts from the genesis balances, then replays any blocks
    /// already present in `store` to catch the ledger up to the chain
    /// tip.
    pub fn new(genesis: &Genesis, store: Box<dyn BlockStore>) -> Result<Self, Error> {
        let mut accounts = Accounts::new();
        for (addr, balance) in &genesis.balances {
            let id = AccountId::new(addr.clone())?;
            accounts.insert(id.clone(), Account { id, nonce: 0, balance: *balance });
        }

        let zero_beneficiary = AccountId::new(ZERO_ACCOUNT)?;
        let genesis_header = BlockHeader {
            height: 0,
            prev_hash: String::new(),
            timestamp: 0,
            beneficiary: zero_beneficiary,
            difficulty: genesis.difficulty,
            reward: genesis.mining_reward,
            state_root: state_root_of(&accounts),
            tx_root: MerkleTree::<BlockTx>::new(vec![]).root_hex(),
            nonce: 0,
        };
        let genesis_block = Block { header: genesis_header, tree: MerkleTree::new(vec![]) };

        let db = Self { store, accounts: RwLock::new(accounts), last_block: RwLock::new(genesis_block) };

        let mut height = 1u64;
        loop {
            let block = match db.store.read(height) {
                Ok(data) => data.to_block(),
                Err(_) => break,
            };

            let prev_state_root = db.state_root();
            let prev_block = db.last_block();
            block.validate(&prev_block, &prev_state_root)?;

            for tx in block.txs() {
                let _ = db.apply_transaction(&tx, &block.header.beneficiary);
            }
            db.apply_mining_reward(&block)?;
            db.update_last_block(block);

            height += 1;
        }

        Ok(db)
    }

    pub fn accounts(&self) -> Accounts {
        self.accounts.read().clone()
    }

    pub fn account(&self, id: &AccountId) -> Result<Account, Error> {
        self.accounts.read().get(id).cloned().ok_or_else(|| Error::AccountNotFound(id.to_string()))
    }

    pub fn remove_account(&self, id: &AccountId) {
        self.accounts.write().remove(id);
    }

    pub fn last_block(&self) -> Block {
        self.last_block.read().clone()
    }

    pub fn update_last_block(&self, block: Block) {
        *self.last_block.write() = block;
    }

    pub fn write_block(&self, block: &Block) -> Result<(), Error> {
        self.store.write(block.height(), &block.to_block_data())
    }

    pub fn read_block(&self, height: u64) -> Result<Block, Error> {
        Ok(self.store.read(height)?.to_block())
    }

    pub fn reset(&self) -> Result<(), Error> {
        self.accounts.write().clear();
        self.store.reset()
    }

    pub fn close(&self) -> Result<(), Error> {
        self.store.close()
    }

    /// Credits the block's beneficiary with its mining reward. Applied
    /// once per block, before any of its transactions.
    pub fn apply_mining_reward(&self, block: &Block) -> Result<(), Error> {
        let mut accounts = self.accounts.write();
        let beneficiary = block.header.beneficiary.clone();
        let account = accounts.entry(beneficiary.clone()).or_insert_with(|| Account::new(beneficiary));
        account.balance += block.header.reward;
        Ok(())
    }

    /// Applies a single transaction to the ledger. The gas fee is debited
    /// from the sender and credited to `beneficiary` before the nonce and
    /// balance checks run, and that debit is never rolled back — an
    /// invalid transaction still burns gas, exactly like a real chain.
    pub fn apply_transaction(&self, tx: &BlockTx, beneficiary: &AccountId) -> Result<(), Error> {
        let mut accounts = self.accounts.write();

        let from_id = tx.tx.from.clone();
        let to_id = tx.tx.to.clone();

        accounts.entry(from_id.clone()).or_insert_with(|| Account::new(from_id.clone()));
        accounts.entry(to_id.clone()).or_insert_with(|| Account::new(to_id.clone()));
        accounts.entry(beneficiary.clone()).or_insert_with(|| Account::new(beneficiary.clone()));

        let from_balance = accounts.get(&from_id).map(|a| a.balance).unwrap_or(0);
        let gas_fee = tx.gas_price.saturating_mul(tx.gas_units).min(from_balance);

        if let Some(from) = accounts.get_mut(&from_id) {
            from.balance -= gas_fee;
        }
        if let Some(ben) = accounts.get_mut(beneficiary) {
            ben.balance += gas_fee;
        }

        let from_nonce = accounts.get(&from_id).map(|a| a.nonce).unwrap_or(0);
        let expected_nonce = from_nonce + 1;
        if tx.tx.nonce != expected_nonce {
            return Err(Error::NonceInvalid { got: tx.tx.nonce, expected: expected_nonce });
        }

        let from_balance = accounts.get(&from_id).map(|a| a.balance).unwrap_or(0);
        let required = tx.tx.value.saturating_add(tx.tx.tip);
        if from_balance < required {
            return Err(Error::InsufficientFunds { got: from_balance, expected: required });
        }

        if let Some(from) = accounts.get_mut(&from_id) {
            from.balance -= required;
            from.nonce = expected_nonce;
        }
        if let Some(to) = accounts.get_mut(&to_id) {
            to.balance += tx.tx.value;
        }
        if let Some(ben) = accounts.get_mut(beneficiary) {
            ben.balance += tx.tx.tip;
        }

        Ok(())
    }

    /// The account set's content hash: deterministic regardless of the
    /// underlying map's iteration order because accounts are sorted by ID
    /// first.
    pub fn state_root(&self) -> String {
        state_root_of(&self.accounts.read())
    }
}

fn state_root_of(accounts: &Accounts) -> String {
    let mut sorted: Vec<&Account> = accounts.values().collect();
    sorted.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    ferrum_crypto::hash(&sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct MemStore(Mutex<Vec<BlockData>>);

    impl MemStore {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
    }

    impl BlockStore for MemStore {
        fn write(&self, height: u64, data: &BlockData) -> Result<(), Error> {
            let mut blocks = self.0.lock().unwrap();
            if height as usize != blocks.len() + 1 {
                return Err(Error::StorageIo("out of order write".to_string()));
            }
            blocks.push(data.clone());
            Ok(())
        }

        fn read(&self, height: u64) -> Result<BlockData, Error> {
            self.0
                .lock()
                .unwrap()
                .get(height as usize - 1)
                .cloned()
                .ok_or_else(|| Error::StorageIo("not found".to_string()))
        }

        fn reset(&self) -> Result<(), Error> {
            self.0.lock().unwrap().clear();
            Ok(())
        }

        fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    fn genesis_with(balance: u64) -> Genesis {
        let mut balances = BTreeMap::new();
        balances.insert("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0".to_string(), balance);
        Genesis {
            date: "2026-01-01".to_string(),
            chain_id: 1,
            transactions_per_block: 100,
            difficulty: 1,
            mining_reward: 100,
            gas_price: 1,
            balances,
        }
    }

    #[test]
    fn seeds_accounts_from_genesis_balances() {
        let genesis = genesis_with(1_000);
        let db = Database::new(&genesis, Box::new(MemStore::new())).unwrap();
        let id = AccountId::new("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").unwrap();
        assert_eq!(db.account(&id).unwrap().balance, 1_000);
    }

    #[derive(Clone)]
    struct SharedMemStore(std::sync::Arc<Mutex<Vec<BlockData>>>);

    impl SharedMemStore {
        fn new() -> Self {
            Self(std::sync::Arc::new(Mutex::new(Vec::new())))
        }
    }

    impl BlockStore for SharedMemStore {
        fn write(&self, height: u64, data: &BlockData) -> Result<(), Error> {
            let mut blocks = self.0.lock().unwrap();
            if height as usize != blocks.len() + 1 {
                return Err(Error::StorageIo("out of order write".to_string()));
            }
            blocks.push(data.clone());
            Ok(())
        }

        fn read(&self, height: u64) -> Result<BlockData, Error> {
            self.0
                .lock()
                .unwrap()
                .get(height as usize - 1)
                .cloned()
                .ok_or_else(|| Error::StorageIo("not found".to_string()))
        }

        fn reset(&self) -> Result<(), Error> {
            self.0.lock().unwrap().clear();
            Ok(())
        }

        fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    /// S5: a fresh database replaying a persisted chain reaches the same
    /// state root as the database that mined it.
    #[test]
    fn bootstrap_replay_reproduces_state_root() {
        let genesis = genesis_with(1_000);
        let shared = SharedMemStore::new();
        let beneficiary = AccountId::new("0x2222222222222222222222222222222222222222").unwrap();

        let db = Database::new(&genesis, Box::new(shared.clone())).unwrap();
        for _ in 0..3 {
            let prev_block = db.last_block();
            let prev_state_root = db.state_root();
            let args = crate::PowArgs {
                beneficiary: beneficiary.clone(),
                difficulty: 1,
                reward: 50,
                state_root: prev_state_root,
                txs: vec![],
            };
            let block = crate::solve(&prev_block, args, &crate::CancelToken::new()).unwrap();
            db.write_block(&block).unwrap();
            db.update_last_block(block.clone());
            db.apply_mining_reward(&block).unwrap();
        }

        let expected_root = db.state_root();
        let expected_height = db.last_block().height();

        let replay = Database::new(&genesis, Box::new(shared)).unwrap();
        assert_eq!(replay.state_root(), expected_root);
        assert_eq!(replay.last_block().height(), expected_height);
    }

    #[test]
    fn gas_is_burned_even_on_invalid_nonce() {
        let genesis = genesis_with(1_000);
        let db = Database::new(&genesis, Box::new(MemStore::new())).unwrap();

        let from = AccountId::new("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").unwrap();
        let to = AccountId::new("0x1111111111111111111111111111111111111111").unwrap();
        let beneficiary = AccountId::new("0x2222222222222222222222222222222222222222").unwrap();

        let tx = Tx {
            chain_id: 1,
            nonce: 99,
            from: from.clone(),
            to,
            value: 10,
            tip: 1,
            data: Vec::new(),
        };
        let signed = SignedTx { tx, r: vec![0; 32], s: vec![0; 32], v: 27 };
        let block_tx = BlockTx { signed_tx: signed, timestamp: 0, gas_price: 5, gas_units: 2 };

        let err = db.apply_transaction(&block_tx, &beneficiary).unwrap_err();
        assert!(matches!(err, Error::NonceInvalid { .. }));

        assert_eq!(db.account(&from).unwrap().balance, 990);
        assert_eq!(db.account(&beneficiary).unwrap().balance, 10);
    }
}
