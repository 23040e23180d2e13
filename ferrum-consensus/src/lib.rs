use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use ferrum_core::{AccountId, BlockTx};

fn mempool_key(from: &AccountId, nonce: u64) -> String {
    format!("{from}:{nonce}")
}

/// Selection predicate applied by [`Mempool::select`].
pub enum Selector<'a> {
    /// Every pending transaction.
    All,
    /// Every pending transaction touching `id`, either as sender or
    /// recipient.
    ByAccount(&'a AccountId),
}

/// Pending transactions, keyed by `"{from}:{nonce}"` so a resubmission with
/// the same sender/nonce replaces the earlier entry instead of stacking.
/// Readers never block readers; writers are exclusive.
#[derive(Default)]
pub struct Mempool {
    pool: RwLock<HashMap<String, BlockTx>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tx`, replacing any existing entry for the same
    /// `(from, nonce)` key.
    pub fn upsert(&self, tx: BlockTx) {
        let key = mempool_key(&tx.tx.from, tx.tx.nonce);
        self.pool.write().insert(key, tx);
    }

    pub fn remove(&self, tx: &BlockTx) {
        let key = mempool_key(&tx.tx.from, tx.tx.nonce);
        self.pool.write().remove(&key);
    }

    pub fn size(&self) -> usize {
        self.pool.read().len()
    }

    pub fn truncate(&self) {
        self.pool.write().clear();
    }

    /// Returns a nonce-ascending snapshot of the entries matching
    /// `selector`.
    pub fn select(&self, selector: Selector<'_>) -> Vec<BlockTx> {
        let pool = self.pool.read();
        let mut out: Vec<BlockTx> = match selector {
            Selector::All => pool.values().cloned().collect(),
            Selector::ByAccount(id) => pool
                .values()
                .filter(|tx| &tx.tx.from == id || &tx.tx.to == id)
                .cloned()
                .collect(),
        };
        out.sort_by_key(|tx| tx.tx.nonce);
        debug!(count = out.len(), "mempool selection");
        out
    }

    pub fn select_all(&self) -> Vec<BlockTx> {
        self.select(Selector::All)
    }

    pub fn select_by_account(&self, id: &AccountId) -> Vec<BlockTx> {
        self.select(Selector::ByAccount(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrum_core::{SignedTx, Tx};

    fn tx_with(from: &str, to: &str, nonce: u64) -> BlockTx {
        let tx = Tx {
            chain_id: 1,
            nonce,
            from: AccountId::new(from).unwrap(),
            to: AccountId::new(to).unwrap(),
            value: 1,
            tip: 0,
            data: Vec::new(),
        };
        let signed = SignedTx { tx, r: vec![0; 32], s: vec![0; 32], v: 23 };
        BlockTx { signed_tx: signed, timestamp: 0, gas_price: 1, gas_units: 1 }
    }

    const A: &str = "0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0";
    const B: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn upsert_same_key_replaces() {
        let mempool = Mempool::new();
        mempool.upsert(tx_with(A, B, 5));
        let mut second = tx_with(A, B, 5);
        second.gas_price = 99;
        mempool.upsert(second);

        assert_eq!(mempool.size(), 1);
        let selected = mempool.select_all();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].gas_price, 99);
    }

    #[test]
    fn select_is_nonce_ascending() {
        let mempool = Mempool::new();
        mempool.upsert(tx_with(A, B, 3));
        mempool.upsert(tx_with(B, A, 1));
        mempool.upsert(tx_with(A, B, 2));

        let nonces: Vec<u64> = mempool.select_all().iter().map(|t| t.tx.nonce).collect();
        assert_eq!(nonces, vec![1, 2, 3]);
    }

    #[test]
    fn select_by_account_matches_sender_or_recipient() {
        let mempool = Mempool::new();
        mempool.upsert(tx_with(A, B, 1));
        mempool.upsert(tx_with(B, A, 2));

        let id = AccountId::new(A).unwrap();
        let selected = mempool.select_by_account(&id);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn remove_drops_entry() {
        let mempool = Mempool::new();
        let tx = tx_with(A, B, 1);
        mempool.upsert(tx.clone());
        mempool.remove(&tx);
        assert_eq!(mempool.size(), 0);
    }
}
