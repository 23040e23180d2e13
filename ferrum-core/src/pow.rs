use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::{AccountId, Block, BlockHeader, BlockTx, Error, MerkleTree};

/// Cancellation handle shared between a miner and whoever wants to stop it
/// early (a newly received block, a shutdown). Cloning shares the same
/// underlying flag; there is no async runtime dependency here so this type
/// is usable from a plain synchronous mining loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The inputs a miner needs to assemble a candidate block on top of the
/// current chain tip.
#[derive(Debug, Clone)]
pub struct PowArgs {
    pub beneficiary: AccountId,
    pub difficulty: u16,
    pub reward: u64,
    pub state_root: String,
    pub txs: Vec<BlockTx>,
}

const MAX_DIFFICULTY: u16 = 64;
const TRACE_EVERY: u64 = 1_000_000;

/// Searches for a nonce that solves the proof-of-work puzzle for a
/// candidate block built on top of `prev_block`. Polls `cancel` on every
/// attempt and once more right before declaring success, so a
/// late-arriving cancellation can never race a block into existence.
pub fn solve(prev_block: &Block, args: PowArgs, cancel: &CancelToken) -> Result<Block, Error> {
    let tree = MerkleTree::new(args.txs);
    let header = BlockHeader {
        height: prev_block.height() + 1,
        prev_hash: prev_block.hash(),
        timestamp: now_seconds(),
        beneficiary: args.beneficiary,
        difficulty: args.difficulty,
        reward: args.reward,
        state_root: args.state_root,
        tx_root: tree.root_hex(),
        nonce: 0,
    };

    let reference = reference_prefix(args.difficulty);
    let mut nonce: u64 = rand::thread_rng().gen_range(0..(1u64 << 63));
    let mut attempts: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let candidate = Block { header: BlockHeader { nonce, ..header.clone() }, tree: tree.clone() };
        let hash = candidate.hash();

        attempts += 1;
        if attempts % TRACE_EVERY == 0 {
            debug!(attempts, nonce, %hash, "mining in progress");
        }

        if is_solved(&reference, &hash) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            return Ok(candidate);
        }

        nonce = nonce.wrapping_add(1);
    }
}

fn reference_prefix(difficulty: u16) -> String {
    let len = (difficulty as usize).min(MAX_DIFFICULTY as usize);
    "0".repeat(len)
}

fn is_solved(reference: &str, hash: &str) -> bool {
    let body = hash.strip_prefix("0x").unwrap_or(hash);
    match body.get(..reference.len()) {
        Some(prefix) => prefix == reference,
        None => false,
    }
}

fn now_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
