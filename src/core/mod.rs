//! Core ledger functionality
//!
//! Blocks, transactions, the chain and its proof-of-work seal, plus the
//! Merkle commitment over a block's transactions.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::MerkleTree;
pub use proof_of_work::{ProofOfWork, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
pub use transaction::{TXInput, TXOutput, Transaction, COINBASE_OUTPUT_INDEX, SUBSIDY};
