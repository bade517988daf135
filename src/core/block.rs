use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    // empty for the genesis block
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: u64,
}

impl Block {
    /// Builds a block on `pre_block_hash` and seals it by proof-of-work.
    pub fn new_block(
        pre_block_hash: String,
        transactions: &[Transaction],
        difficulty: u32,
    ) -> Result<Block> {
        Self::new_block_with_cancel(pre_block_hash, transactions, difficulty, None)
    }

    pub fn new_block_with_cancel(
        pre_block_hash: String,
        transactions: &[Transaction],
        difficulty: u32,
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
        };

        let pow = ProofOfWork::new_proof_of_work(&block, difficulty)?;
        let (nonce, hash) = pow.run_with_cancel(cancel)?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Sealed block {} with {} transaction(s) (nonce {nonce})",
            block.hash,
            block.transactions.len()
        );

        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(String::new(), std::slice::from_ref(coinbase), difficulty)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &str {
        self.pre_block_hash.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Merkle root over the content digest of every transaction, in block order.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let leaves = self
            .transactions
            .iter()
            .map(Transaction::content_digest)
            .collect::<Result<Vec<Vec<u8>>>>()?;
        MerkleTree::calculate_merkle_root(&leaves)
    }

    #[cfg(test)]
    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    #[cfg(test)]
    pub(crate) fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    #[cfg(test)]
    pub(crate) fn set_pre_block_hash(&mut self, pre_block_hash: &str) {
        self.pre_block_hash = pre_block_hash.to_string();
    }

    #[cfg(test)]
    pub(crate) fn set_transactions(&mut self, transactions: Vec<Transaction>) {
        self.transactions = transactions;
    }
}
