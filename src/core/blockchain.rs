// The chain is a backward-linked list of sealed blocks kept in a ChainStore.
// Only the tip hash is held in memory; everything else is read on demand.

use crate::core::transaction::referenced_output;
use crate::core::{Block, ProofOfWork, Transaction, SUBSIDY};
use crate::error::{BlockchainError, Result};
use crate::storage::{ChainStore, UnspentOutput};
use crate::wallet::validate_address;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    store: Arc<dyn ChainStore>,
    difficulty: u32,
    // held from reading the tip until the new block is appended
    mining_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Opens the chain in `store`, first sealing a genesis block paying
    /// `genesis_address` if the store holds none.
    pub fn create_blockchain(
        store: Arc<dyn ChainStore>,
        genesis_address: &str,
        difficulty: u32,
    ) -> Result<Blockchain> {
        let tip_hash = store.get_last_block_hash()?;
        if !tip_hash.is_empty() {
            info!("Blockchain already exists, tip {tip_hash}");
            return Ok(Blockchain {
                tip_hash: Arc::new(RwLock::new(tip_hash)),
                store,
                difficulty,
                mining_lock: Arc::new(Mutex::new(())),
            });
        }

        if !validate_address(genesis_address) {
            return Err(BlockchainError::InvalidAddress(genesis_address.to_string()));
        }
        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, "")?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, difficulty)?;
        store.append_block(&genesis)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_string())),
            store,
            difficulty,
            mining_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn open(store: Arc<dyn ChainStore>, difficulty: u32) -> Result<Blockchain> {
        let tip_hash = store.get_last_block_hash()?;
        if tip_hash.is_empty() {
            return Err(BlockchainError::ChainNotInitialized);
        }
        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            store,
            difficulty,
            mining_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *tip_hash = String::from(new_tip_hash)
    }

    fn lock_mining(&self) -> MutexGuard<'_, ()> {
        self.mining_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persists `block` as the new tip. The store refuses it unless it
    /// extends the stored tip; the in-memory tip moves only after that.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let _guard = self.lock_mining();
        self.append(block)
    }

    fn append(&self, block: &Block) -> Result<()> {
        self.store.append_block(block)?;
        self.set_tip_hash(block.get_hash());
        Ok(())
    }

    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.mine_block_with_cancel(transactions, None)
    }

    /// Validates `transactions`, seals them into a block on the current tip
    /// and appends it. Nothing is written unless every transaction passes.
    /// Concurrent callers mine one after another, each on the previous block.
    pub fn mine_block_with_cancel(
        &self,
        transactions: &[Transaction],
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        let _guard = self.lock_mining();
        let tip_hash = self.get_tip_hash();
        if tip_hash.is_empty() {
            return Err(BlockchainError::ChainNotInitialized);
        }

        self.validate_transactions(transactions)?;

        info!(
            "Mining block on {tip_hash} with {} transaction(s) (difficulty: {})",
            transactions.len(),
            self.difficulty
        );
        let block = Block::new_block_with_cancel(tip_hash, transactions, self.difficulty, cancel)?;
        self.append(&block)?;
        info!("Successfully mined block: {}", block.get_hash());

        Ok(block)
    }

    fn validate_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let spent_on_chain = self.find_spent_outputs();
        let mut spent_in_block: HashSet<(String, i32)> = HashSet::new();
        let mut seen_coinbase = false;

        for transaction in transactions {
            let txid_hex = transaction.get_id_hex();
            if transaction.is_coinbase() {
                if seen_coinbase {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "{txid_hex}: block already has a coinbase"
                    )));
                }
                seen_coinbase = true;
                let reward = transaction
                    .get_output_value()
                    .map_err(|e| BlockchainError::InvalidTransaction(format!("{txid_hex}: {e}")))?;
                if reward != SUBSIDY {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "{txid_hex}: coinbase pays {reward}, subsidy is {SUBSIDY}"
                    )));
                }
                continue;
            }
            let prev_txs = self.find_prev_transactions(transaction)?;

            if !transaction.verify(&prev_txs)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "{txid_hex}: signature verification failed"
                )));
            }

            let mut input_value: u64 = 0;
            for input in transaction.get_vin() {
                let prev_txid = input.get_txid_hex();
                let output = referenced_output(&prev_txs, input)?.ok_or_else(|| {
                    BlockchainError::InvalidTransaction(format!(
                        "{txid_hex}: output {prev_txid}:{} does not exist",
                        input.get_vout()
                    ))
                })?;

                if spent_on_chain
                    .get(&prev_txid)
                    .is_some_and(|spent| spent.contains(&input.get_vout()))
                {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "{txid_hex}: output {prev_txid}:{} is already spent",
                        input.get_vout()
                    )));
                }
                if !spent_in_block.insert((prev_txid.clone(), input.get_vout())) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "{txid_hex}: output {prev_txid}:{} is spent twice in this block",
                        input.get_vout()
                    )));
                }

                input_value = input_value.checked_add(output.get_value()).ok_or_else(|| {
                    BlockchainError::InvalidTransaction(format!("{txid_hex}: input value overflow"))
                })?;
            }

            let output_value = transaction
                .get_output_value()
                .map_err(|e| BlockchainError::InvalidTransaction(format!("{txid_hex}: {e}")))?;
            if output_value > input_value {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "{txid_hex}: outputs ({output_value}) exceed inputs ({input_value})"
                )));
            }
        }
        Ok(())
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), Arc::clone(&self.store))
    }

    // ( K -> txid_hex, V -> indices spent by some input on the chain )
    fn find_spent_outputs(&self) -> HashMap<String, HashSet<i32>> {
        let mut spent_txos: HashMap<String, HashSet<i32>> = HashMap::new();
        for block in self.iterator() {
            for tx in block.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(txin.get_txid_hex())
                        .or_default()
                        .insert(txin.get_vout());
                }
            }
        }
        spent_txos
    }

    /// Every unspent output on the chain, grouped by the hex id of the
    /// transaction that created it.
    pub fn find_utxo(&self) -> HashMap<String, Vec<UnspentOutput>> {
        let spent_txos = self.find_spent_outputs();
        let mut utxo: HashMap<String, Vec<UnspentOutput>> = HashMap::new();

        for block in self.iterator() {
            for tx in block.get_transactions() {
                let txid_hex = tx.get_id_hex();
                let spent = spent_txos.get(&txid_hex);
                let unspent: Vec<UnspentOutput> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, out)| {
                        let idx = i32::try_from(idx).ok()?;
                        match spent {
                            Some(spent) if spent.contains(&idx) => None,
                            _ => Some(UnspentOutput::new(idx, out.clone())),
                        }
                    })
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(txid_hex, unspent);
                }
            }
        }
        utxo
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Option<Transaction> {
        for block in self.iterator() {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Some(transaction.clone());
                }
            }
        }
        None
    }

    /// The transactions `tx`'s inputs spend from, keyed by hex id. Fails with
    /// `MissingPrevTx` naming the first one not on the chain.
    pub fn find_prev_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        if tx.is_coinbase() {
            return Ok(prev_txs);
        }

        let mut wanted: HashSet<String> = tx.get_vin().iter().map(|v| v.get_txid_hex()).collect();
        for block in self.iterator() {
            if wanted.is_empty() {
                break;
            }
            for transaction in block.get_transactions() {
                let txid_hex = transaction.get_id_hex();
                if wanted.remove(&txid_hex) {
                    prev_txs.insert(txid_hex, transaction.clone());
                }
            }
        }

        if let Some(input) = tx
            .get_vin()
            .iter()
            .find(|input| !prev_txs.contains_key(&input.get_txid_hex()))
        {
            return Err(BlockchainError::MissingPrevTx(input.get_txid_hex()));
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.find_prev_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.find_prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        self.store.get_block(block_hash)
    }

    /// Block hashes from tip to genesis.
    pub fn get_block_hashes(&self) -> Vec<String> {
        self.iterator()
            .map(|block| block.get_hash().to_string())
            .collect()
    }

    /// Walks tip to genesis checking that every block is present, linked to
    /// its parent and carries a valid proof-of-work.
    pub fn validate_chain(&self) -> Result<bool> {
        let mut current_hash = self.get_tip_hash();
        let mut checked = 0usize;

        while !current_hash.is_empty() {
            let Some(block) = self.store.get_block(&current_hash)? else {
                warn!("Block {current_hash} is missing from the store");
                return Ok(false);
            };
            if block.get_hash() != current_hash {
                warn!(
                    "Block stored under {current_hash} claims hash {}",
                    block.get_hash()
                );
                return Ok(false);
            }
            if !ProofOfWork::validate(&block, self.difficulty) {
                warn!("Block {current_hash} has an invalid proof-of-work");
                return Ok(false);
            }
            checked += 1;
            current_hash = block.get_pre_block_hash().to_string();
        }

        info!("Validated {checked} block(s)");
        Ok(true)
    }
}

/// Walks the chain backward from the tip it was created with. Ends after the
/// genesis block, or early when a block cannot be read.
pub struct BlockchainIterator {
    store: Arc<dyn ChainStore>,
    current_hash: String,
}

impl BlockchainIterator {
    fn new(tip_hash: String, store: Arc<dyn ChainStore>) -> BlockchainIterator {
        BlockchainIterator {
            store,
            current_hash: tip_hash,
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.current_hash.is_empty() {
            return None;
        }
        match self.store.get_block(&self.current_hash) {
            Ok(Some(block)) => {
                self.current_hash = block.get_pre_block_hash().to_string();
                Some(block)
            }
            Ok(None) => {
                warn!(
                    "Block {} not found, chain iteration stopped early",
                    self.current_hash
                );
                self.current_hash.clear();
                None
            }
            Err(e) => {
                error!("Failed to read block {}: {e}", self.current_hash);
                self.current_hash.clear();
                None
            }
        }
    }
}
