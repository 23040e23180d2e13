mod account;
mod block;
mod database;
mod genesis;
mod merkle;
mod pow;
mod tx;

pub use account::{Account, AccountId, Accounts};
pub use block::{Block, BlockData, BlockHeader};
pub use database::{BlockStore, Database};
pub use genesis::Genesis;
pub use merkle::MerkleTree;
pub use pow::{solve, CancelToken, PowArgs};
pub use tx::{BlockTx, SignedTx, Tx};

use thiserror::Error;

/// Error kinds surfaced by the blockchain engine. Every failure mode named
/// in the account/signature/block/mempool/storage/peer layers maps to one
/// of these variants so callers (HTTP handlers, the worker) can translate
/// them into the right status code or trace event without string-matching.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid account ID format: {0}")]
    FormatInvalid(String),
    #[error("signature is invalid: {0}")]
    SignatureInvalid(String),
    #[error("chain ID: {expected} is not valid, got: {got}")]
    ChainIdMismatch { expected: u16, got: u16 },
    #[error("cannot send from: {0} to: {0}")]
    SelfTransfer(String),
    #[error("tx invalid, wrong nonce, got: {got}, expected: {expected}")]
    NonceInvalid { got: u64, expected: u64 },
    #[error("tx invalid, insufficient funds, got: {got}, expected: {expected}")]
    InsufficientFunds { got: u64, expected: u64 },
    #[error("fork check failed: height: {height} | prev height: {prev_height}")]
    ForkDetected { height: u64, prev_height: u64 },
    #[error("difficulty check failed: difficulty: {difficulty} | prev difficulty: {prev_difficulty}")]
    DifficultyRegression { difficulty: u16, prev_difficulty: u16 },
    #[error("hash solved check failed: hash: {hash} | ref hash: {reference}")]
    HashUnsolved { hash: String, reference: String },
    #[error("prev hash check failed: prev hash: {prev_hash} | prev block hash: {prev_block_hash}")]
    PrevHashMismatch { prev_hash: String, prev_block_hash: String },
    #[error("state root check failed: state root: {state_root} | prev state root: {prev_state_root}")]
    StateRootMismatch { state_root: String, prev_state_root: String },
    #[error("tx root check failed: tx root: {tx_root} | tx tree root: {tree_root}")]
    TxRootMismatch { tx_root: String, tree_root: String },
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("storage io err: {0}")]
    StorageIo(String),
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("mining cancelled")]
    Cancelled,
    #[error("crypto err: {0}")]
    Crypto(#[from] ferrum_crypto::Error),
}
