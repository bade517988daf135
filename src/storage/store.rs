// Persistent key-value storage for blocks, the chain tip and the UTXO index.

use crate::core::{Block, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use log::debug;
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, TransactionError};
use sled::{Batch, Db, Tree};
use std::path::Path;

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";
const UTXO_TREE: &str = "chainstate";

/// An output still unspent, remembered together with its position in the
/// transaction that created it.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct UnspentOutput {
    index: i32,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(index: i32, output: TXOutput) -> UnspentOutput {
        UnspentOutput { index, output }
    }

    pub fn get_index(&self) -> i32 {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

/// One write against the UTXO index, keyed by hex transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoChange {
    Put(String, Vec<UnspentOutput>),
    Delete(String),
}

/// Storage the chain and its UTXO index are built on. Every mutating call is
/// durable once it returns.
pub trait ChainStore: Send + Sync {
    /// Hash of the newest block, empty when no chain has been created.
    fn get_last_block_hash(&self) -> Result<String>;

    fn put_last_block_hash(&self, hash: &str) -> Result<()>;

    fn put_block(&self, block: &Block) -> Result<()>;

    fn get_block(&self, hash: &str) -> Result<Option<Block>>;

    /// Stores `block` and makes it the tip in one atomic step. Fails with
    /// `InvalidBlock`, writing nothing, unless `block` extends the stored tip.
    fn append_block(&self, block: &Block) -> Result<()>;

    fn get_all_utxo_entries(&self) -> Result<Vec<(String, Vec<UnspentOutput>)>>;

    fn get_utxo_entry(&self, txid_hex: &str) -> Result<Option<Vec<UnspentOutput>>>;

    fn put_utxo_entry(&self, txid_hex: &str, outputs: &[UnspentOutput]) -> Result<()>;

    fn delete_utxo_entry(&self, txid_hex: &str) -> Result<()>;

    fn clear_utxo_entries(&self) -> Result<()>;

    /// Applies all changes or none of them.
    fn apply_utxo_changes(&self, changes: &[UtxoChange]) -> Result<()>;
}

/// `ChainStore` on an embedded sled database: blocks and the tip key live in
/// the `blocks` tree, UTXO entries in `chainstate`.
pub struct SledStore {
    db: Db,
    blocks: Tree,
    chainstate: Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<SledStore> {
        let db = sled::open(path).map_err(|e| {
            BlockchainError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;
        debug!("Opened chain store at {}", path.display());
        Self::from_db(db)
    }

    /// Store that is deleted when dropped.
    pub fn temporary() -> Result<SledStore> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<SledStore> {
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let chainstate = db
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))?;
        Ok(SledStore {
            db,
            blocks,
            chainstate,
        })
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn remove_block(&self, hash: &str) -> Result<()> {
        self.blocks.remove(hash.as_bytes())?;
        self.flush()
    }
}

impl ChainStore for SledStore {
    fn get_last_block_hash(&self) -> Result<String> {
        match self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?
        {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| BlockchainError::Database(format!("Invalid tip hash format: {e}"))),
            None => Ok(String::new()),
        }
    }

    fn put_last_block_hash(&self, hash: &str) -> Result<()> {
        self.blocks
            .insert(TIP_BLOCK_HASH_KEY, hash.as_bytes())
            .map_err(|e| BlockchainError::Database(format!("Failed to update tip: {e}")))?;
        self.flush()
    }

    fn put_block(&self, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        self.blocks
            .insert(block.get_hash().as_bytes(), block_data)
            .map_err(|e| BlockchainError::Database(format!("Failed to store block: {e}")))?;
        self.flush()
    }

    fn get_block(&self, hash: &str) -> Result<Option<Block>> {
        if let Some(block_bytes) = self
            .blocks
            .get(hash.as_bytes())
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
        {
            let block = Block::deserialize(block_bytes.as_ref())?;
            return Ok(Some(block));
        }
        Ok(None)
    }

    fn append_block(&self, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let parent_hash = block.get_pre_block_hash();
        let block_data = block.serialize()?;

        self.blocks
            .transaction(|tx_db| {
                let tip = tx_db.get(TIP_BLOCK_HASH_KEY)?;
                let tip: &[u8] = tip.as_deref().unwrap_or_default();
                if tip != parent_hash.as_bytes() {
                    return abort(BlockchainError::InvalidBlock(format!(
                        "{block_hash} does not extend tip '{}'",
                        String::from_utf8_lossy(tip)
                    )));
                }
                tx_db.insert(block_hash.as_bytes(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash.as_bytes())?;
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => {
                    BlockchainError::Database(format!("Failed to append block: {e}"))
                }
            })?;
        self.flush()
    }

    fn get_all_utxo_entries(&self) -> Result<Vec<(String, Vec<UnspentOutput>)>> {
        let mut entries = vec![];
        for item in self.chainstate.iter() {
            let (key, value) = item
                .map_err(|e| BlockchainError::Database(format!("Failed to read UTXO: {e}")))?;
            let txid_hex = String::from_utf8(key.to_vec())
                .map_err(|e| BlockchainError::Database(format!("Invalid UTXO key: {e}")))?;
            let outputs: Vec<UnspentOutput> = deserialize(value.as_ref())?;
            entries.push((txid_hex, outputs));
        }
        Ok(entries)
    }

    fn get_utxo_entry(&self, txid_hex: &str) -> Result<Option<Vec<UnspentOutput>>> {
        match self
            .chainstate
            .get(txid_hex.as_bytes())
            .map_err(|e| BlockchainError::Database(format!("Failed to get UTXO: {e}")))?
        {
            Some(value) => Ok(Some(deserialize(value.as_ref())?)),
            None => Ok(None),
        }
    }

    fn put_utxo_entry(&self, txid_hex: &str, outputs: &[UnspentOutput]) -> Result<()> {
        let value = serialize(&outputs.to_vec())?;
        self.chainstate
            .insert(txid_hex.as_bytes(), value)
            .map_err(|e| BlockchainError::Database(format!("Failed to insert UTXO: {e}")))?;
        self.flush()
    }

    fn delete_utxo_entry(&self, txid_hex: &str) -> Result<()> {
        self.chainstate
            .remove(txid_hex.as_bytes())
            .map_err(|e| BlockchainError::Database(format!("Failed to remove UTXO: {e}")))?;
        self.flush()
    }

    fn clear_utxo_entries(&self) -> Result<()> {
        self.chainstate
            .clear()
            .map_err(|e| BlockchainError::Database(format!("Failed to clear UTXO set: {e}")))?;
        self.flush()
    }

    fn apply_utxo_changes(&self, changes: &[UtxoChange]) -> Result<()> {
        let mut batch = Batch::default();
        for change in changes {
            match change {
                UtxoChange::Put(txid_hex, outputs) => {
                    batch.insert(txid_hex.as_bytes(), serialize(outputs)?);
                }
                UtxoChange::Delete(txid_hex) => batch.remove(txid_hex.as_bytes()),
            }
        }
        self.chainstate
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to update UTXO set: {e}")))?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    const ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn sample_block() -> Block {
        let coinbase = Transaction::new_coinbase_tx(ADDRESS, "").unwrap();
        Block::generate_genesis_block(&coinbase, 4).unwrap()
    }

    fn entry(index: i32, value: u64) -> UnspentOutput {
        UnspentOutput::new(index, TXOutput::new(value, ADDRESS).unwrap())
    }

    #[test]
    fn test_fresh_store_has_no_tip() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.get_last_block_hash().unwrap(), "");
        assert!(store.get_block("missing").unwrap().is_none());
        assert!(store.get_all_utxo_entries().unwrap().is_empty());
    }

    #[test]
    fn test_append_block_moves_tip() {
        let store = SledStore::temporary().unwrap();
        let block = sample_block();
        store.append_block(&block).unwrap();

        assert_eq!(store.get_last_block_hash().unwrap(), block.get_hash());
        let stored = store.get_block(block.get_hash()).unwrap().unwrap();
        assert_eq!(stored.get_hash(), block.get_hash());
        assert_eq!(stored.get_nonce(), block.get_nonce());
    }

    #[test]
    fn test_append_block_requires_current_tip_as_parent() {
        let store = SledStore::temporary().unwrap();
        let genesis = sample_block();
        store.append_block(&genesis).unwrap();

        // a second block on the empty parent lost the race to `genesis`
        let stale = sample_block();
        assert!(matches!(
            store.append_block(&stale),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert_eq!(store.get_last_block_hash().unwrap(), genesis.get_hash());
        assert!(store.get_block(stale.get_hash()).unwrap().is_none());

        let coinbase = Transaction::new_coinbase_tx(ADDRESS, "").unwrap();
        let next = Block::new_block(genesis.get_hash().to_string(), &[coinbase], 4).unwrap();
        store.append_block(&next).unwrap();
        assert_eq!(store.get_last_block_hash().unwrap(), next.get_hash());
    }

    #[test]
    fn test_put_block_leaves_tip_alone() {
        let store = SledStore::temporary().unwrap();
        let block = sample_block();
        store.put_block(&block).unwrap();
        assert_eq!(store.get_last_block_hash().unwrap(), "");

        store.put_last_block_hash(block.get_hash()).unwrap();
        assert_eq!(store.get_last_block_hash().unwrap(), block.get_hash());
    }

    #[test]
    fn test_utxo_entry_lifecycle() {
        let store = SledStore::temporary().unwrap();
        store.put_utxo_entry("aa", &[entry(0, 4), entry(1, 6)]).unwrap();

        let outputs = store.get_utxo_entry("aa").unwrap().unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].get_index(), 1);
        assert_eq!(outputs[1].get_output().get_value(), 6);

        store.delete_utxo_entry("aa").unwrap();
        assert!(store.get_utxo_entry("aa").unwrap().is_none());
    }

    #[test]
    fn test_batch_and_clear() {
        let store = SledStore::temporary().unwrap();
        store.put_utxo_entry("aa", &[entry(0, 10)]).unwrap();

        store
            .apply_utxo_changes(&[
                UtxoChange::Delete("aa".to_string()),
                UtxoChange::Put("bb".to_string(), vec![entry(1, 6)]),
                UtxoChange::Put("cc".to_string(), vec![entry(0, 4)]),
            ])
            .unwrap();

        let mut keys: Vec<String> = store
            .get_all_utxo_entries()
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["bb".to_string(), "cc".to_string()]);

        store.clear_utxo_entries().unwrap();
        assert!(store.get_all_utxo_entries().unwrap().is_empty());
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let block = sample_block();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.append_block(&block).unwrap();
            store.put_utxo_entry("aa", &[entry(0, 10)]).unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get_last_block_hash().unwrap(), block.get_hash());
        assert!(store.get_block(block.get_hash()).unwrap().is_some());
        assert_eq!(store.get_utxo_entry("aa").unwrap().unwrap().len(), 1);
    }
}
