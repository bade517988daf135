use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::BigInt;
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_DIFFICULTY: u32 = 20;
pub const MAX_DIFFICULTY: u32 = 255;

// How many nonces are tried between looks at the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

const HASH_LEN: usize = 32;

/// Hash puzzle for one block: find a nonce whose sealing digest, read as a
/// big-endian integer, is below `2^(256 - difficulty)`.
pub struct ProofOfWork {
    // pre_block_hash ‖ merkle root ‖ timestamp ‖ difficulty, nonce excluded
    prefix: Vec<u8>,
    target: BigInt,
    target_bytes: [u8; HASH_LEN],
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: &Block, difficulty: u32) -> Result<ProofOfWork> {
        if difficulty == 0 || difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::Mining(format!(
                "Difficulty must be between 1 and {MAX_DIFFICULTY}, got {difficulty}"
            )));
        }

        let mut target = BigInt::from(1);
        target.shl_assign(256 - difficulty);

        let (_, magnitude) = target.to_bytes_be();
        let mut target_bytes = [0u8; HASH_LEN];
        target_bytes[HASH_LEN - magnitude.len()..].copy_from_slice(&magnitude);

        let merkle_root = block.hash_transactions()?;
        let mut prefix = vec![];
        prefix.extend(block.get_pre_block_hash().as_bytes());
        prefix.extend(merkle_root);
        prefix.extend(block.get_timestamp().to_be_bytes());
        prefix.extend(difficulty.to_be_bytes());

        Ok(ProofOfWork {
            prefix,
            target,
            target_bytes,
            difficulty,
        })
    }

    /// Checks the stored nonce against the stored hash at `difficulty`.
    pub fn validate(block: &Block, difficulty: u32) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block, difficulty) {
            Ok(pow) => pow,
            Err(e) => {
                debug!("Cannot rebuild proof-of-work for {}: {e}", block.get_hash());
                return false;
            }
        };
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        pow.meets_target(&hash) && HEXLOWER.encode(hash.as_slice()) == block.get_hash()
    }

    pub fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes = Vec::with_capacity(self.prefix.len() + 8);
        data_bytes.extend(self.prefix.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    pub fn get_target(&self) -> &BigInt {
        &self.target
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn run(&self) -> Result<(u64, String)> {
        self.run_with_cancel(None)
    }

    /// Searches nonces from 0 upward. Stops with a `Mining` error when `cancel`
    /// is raised or every nonce has been tried.
    pub fn run_with_cancel(&self, cancel: Option<&AtomicBool>) -> Result<(u64, String)> {
        info!("Mining the block at difficulty {}", self.difficulty);
        let mut data = self.prepare_data(0);
        let nonce_offset = self.prefix.len();
        let mut nonce: u64 = 0;

        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0
                && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                return Err(BlockchainError::Mining(format!(
                    "Proof-of-work cancelled after {nonce} attempts"
                )));
            }

            data[nonce_offset..].copy_from_slice(&nonce.to_be_bytes());
            let hash = sha256_digest(data.as_slice());
            if self.meets_target(&hash) {
                let hash_hex = HEXLOWER.encode(hash.as_slice());
                debug!("Found nonce {nonce} for {hash_hex}");
                return Ok((nonce, hash_hex));
            }

            nonce = nonce.checked_add(1).ok_or_else(|| {
                BlockchainError::Mining("Nonce space exhausted".to_string())
            })?;
        }
    }

    // Equal-length big-endian byte strings compare like the integers they encode
    fn meets_target(&self, hash: &[u8]) -> bool {
        hash.len() == HASH_LEN && hash < self.target_bytes.as_slice()
    }

    #[cfg(test)]
    fn meets_target_bigint(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(num_bigint::Sign::Plus, hash) < self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    const ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn create_test_block(difficulty: u32) -> Block {
        let coinbase_tx = Transaction::new_coinbase_tx(ADDRESS, "").unwrap();
        Block::new_block(String::new(), &[coinbase_tx], difficulty).unwrap()
    }

    #[test]
    fn test_mined_block_validates() {
        let block = create_test_block(8);
        assert!(ProofOfWork::validate(&block, 8));
        assert!(block.get_hash().starts_with("00"));
    }

    #[test]
    fn test_tampered_fields_fail_validation() {
        let block = create_test_block(8);

        let mut other_nonce = block.clone();
        other_nonce.set_nonce(block.get_nonce().wrapping_add(1));
        assert!(!ProofOfWork::validate(&other_nonce, 8));

        let mut other_time = block.clone();
        other_time.set_timestamp(block.get_timestamp() + 1);
        assert!(!ProofOfWork::validate(&other_time, 8));

        let mut other_parent = block.clone();
        other_parent.set_pre_block_hash("00ff");
        assert!(!ProofOfWork::validate(&other_parent, 8));

        let coinbase = Transaction::new_coinbase_tx(ADDRESS, "").unwrap();
        let mut other_txs = block.clone();
        other_txs.set_transactions(vec![coinbase]);
        assert!(!ProofOfWork::validate(&other_txs, 8));
    }

    #[test]
    fn test_validation_is_bound_to_difficulty() {
        let block = create_test_block(6);
        assert!(ProofOfWork::validate(&block, 6));
        assert!(!ProofOfWork::validate(&block, 7));
        assert!(!ProofOfWork::validate(&block, 0));
    }

    #[test]
    fn test_target_shrinks_with_difficulty() {
        let block = create_test_block(1);
        let easy = ProofOfWork::new_proof_of_work(&block, 1).unwrap();
        let hard = ProofOfWork::new_proof_of_work(&block, 20).unwrap();

        assert!(hard.get_target() < easy.get_target());
        assert_eq!(easy.get_target(), &(BigInt::from(1) << 255u32));
    }

    #[test]
    fn test_out_of_range_difficulty_is_rejected() {
        let block = create_test_block(1);
        assert!(matches!(
            ProofOfWork::new_proof_of_work(&block, 0),
            Err(BlockchainError::Mining(_))
        ));
        assert!(ProofOfWork::new_proof_of_work(&block, 256).is_err());
        assert!(ProofOfWork::new_proof_of_work(&block, MAX_DIFFICULTY).is_ok());
    }

    #[test]
    fn test_byte_comparison_matches_integer_comparison() {
        let block = create_test_block(1);
        let pow = ProofOfWork::new_proof_of_work(&block, 4).unwrap();

        for nonce in 0..64u64 {
            let hash = sha256_digest(pow.prepare_data(nonce).as_slice());
            assert_eq!(pow.meets_target(&hash), pow.meets_target_bigint(&hash));
        }
        let mut boundary = [0u8; HASH_LEN];
        boundary[0] = 0x10;
        assert!(!pow.meets_target(&boundary));
        boundary[0] = 0x0f;
        assert!(pow.meets_target(&boundary));
    }

    #[test]
    fn test_prepare_data_only_varies_in_nonce() {
        let block = create_test_block(2);
        let pow = ProofOfWork::new_proof_of_work(&block, 2).unwrap();

        let data1 = pow.prepare_data(12345);
        let data2 = pow.prepare_data(54321);
        assert_eq!(data1, pow.prepare_data(12345));
        assert_eq!(data1.len(), data2.len());
        let prefix_len = data1.len() - 8;
        assert_eq!(data1[..prefix_len], data2[..prefix_len]);
        assert_eq!(data1[prefix_len..], 12345u64.to_be_bytes());
    }

    #[test]
    fn test_cancelled_search_reports_mining_error() {
        let block = create_test_block(1);
        let pow = ProofOfWork::new_proof_of_work(&block, MAX_DIFFICULTY).unwrap();
        let cancel = AtomicBool::new(true);

        assert!(matches!(
            pow.run_with_cancel(Some(&cancel)),
            Err(BlockchainError::Mining(_))
        ));
    }
}
