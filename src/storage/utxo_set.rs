use crate::core::{Block, Blockchain, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{UnspentOutput, UtxoChange};
use crate::wallet::address_to_pub_key_hash;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Index of unspent outputs keyed by transaction id, derived from the chain.
/// Queries share a read lock; `update` and `reindex` take the write lock.
pub struct UTXOSet {
    blockchain: Blockchain,
    lock: RwLock<()>,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet {
            blockchain,
            lock: RwLock::new(()),
        }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Throws the index away and rebuilds it from a full chain scan.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let store = self.blockchain.get_store();
        store.clear_utxo_entries()?;

        let changes: Vec<UtxoChange> = self
            .blockchain
            .find_utxo()
            .into_iter()
            .map(|(txid_hex, outs)| UtxoChange::Put(txid_hex, outs))
            .collect();
        store.apply_utxo_changes(&changes)?;
        info!("Reindexed UTXO set: {} transaction(s)", changes.len());
        Ok(())
    }

    /// Collects outputs locked to `pub_key_hash` until `amount` is covered.
    /// Returns whatever was found when the owner cannot cover it.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<i32>>)> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let mut unspent_outputs: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        let mut accumulated: u64 = 0;

        'entries: for (txid_hex, outs) in self.blockchain.get_store().get_all_utxo_entries()? {
            for out in outs {
                if accumulated >= amount {
                    break 'entries;
                }
                if out.get_output().is_locked_with_key(pub_key_hash) {
                    accumulated = accumulated.saturating_add(out.get_output().get_value());
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(out.get_index());
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let mut utxos = vec![];
        for (_, outs) in self.blockchain.get_store().get_all_utxo_entries()? {
            for out in outs {
                if out.get_output().is_locked_with_key(pub_key_hash) {
                    utxos.push(out.get_output().clone())
                }
            }
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, address: &str) -> Result<u64> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        sum_values(self.find_utxo(pub_key_hash.as_slice())?.iter())
    }

    pub fn count_transactions(&self) -> Result<usize> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.blockchain.get_store().get_all_utxo_entries()?.len())
    }

    /// Value held by every indexed output together.
    pub fn total_value(&self) -> Result<u64> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let entries = self.blockchain.get_store().get_all_utxo_entries()?;
        sum_values(
            entries
                .iter()
                .flat_map(|(_, outs)| outs.iter().map(UnspentOutput::get_output)),
        )
    }

    /// Folds an appended block into the index as a single batch: spent
    /// outputs leave their entries, every transaction gets a new entry.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        self.apply_block(block)
    }

    fn apply_block(&self, block: &Block) -> Result<()> {
        let store = self.blockchain.get_store();

        // txid_hex -> remaining outputs, None once the entry is emptied
        let mut pending: BTreeMap<String, Option<Vec<UnspentOutput>>> = BTreeMap::new();

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let txid_hex = vin.get_txid_hex();
                    let current = match pending.remove(&txid_hex) {
                        Some(entry) => entry,
                        None => store.get_utxo_entry(&txid_hex)?,
                    };
                    let mut outs = current.ok_or_else(|| {
                        BlockchainError::Database(format!(
                            "UTXO entry {txid_hex} not found, reindex required"
                        ))
                    })?;

                    outs.retain(|out| out.get_index() != vin.get_vout());
                    let remaining = if outs.is_empty() { None } else { Some(outs) };
                    pending.insert(txid_hex, remaining);
                }
            }

            pending.insert(tx.get_id_hex(), Some(unspent_outputs_of(tx)?));
        }

        let changes: Vec<UtxoChange> = pending
            .into_iter()
            .map(|(txid_hex, outs)| match outs {
                Some(outs) => UtxoChange::Put(txid_hex, outs),
                None => UtxoChange::Delete(txid_hex),
            })
            .collect();
        store.apply_utxo_changes(&changes)?;
        debug!(
            "Applied {} UTXO change(s) for block {}",
            changes.len(),
            block.get_hash()
        );
        Ok(())
    }

    /// Mines `transactions` onto the chain and folds the new block into the
    /// index. The write lock is held throughout, so blocks reach the index in
    /// chain order.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let block = self.blockchain.mine_block(transactions)?;
        self.apply_block(&block)?;
        Ok(block)
    }
}

fn unspent_outputs_of(tx: &Transaction) -> Result<Vec<UnspentOutput>> {
    tx.get_vout()
        .iter()
        .enumerate()
        .map(|(idx, out)| {
            let index = i32::try_from(idx).map_err(|_| {
                BlockchainError::Transaction(format!("Too many outputs in {}", tx.get_id_hex()))
            })?;
            Ok(UnspentOutput::new(index, out.clone()))
        })
        .collect()
}

fn sum_values<'a>(mut outputs: impl Iterator<Item = &'a TXOutput>) -> Result<u64> {
    outputs.try_fold(0u64, |total, out| {
        total
            .checked_add(out.get_value())
            .ok_or_else(|| BlockchainError::Transaction("Balance overflow".to_string()))
    })
}
