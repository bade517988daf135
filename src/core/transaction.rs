// Transactions follow the UTXO model: every input points at an output of an
// earlier transaction by (txid, index), every output locks value to a public-key hash.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallets};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Reward carried by every coinbase transaction
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single coinbase input
pub const COINBASE_OUTPUT_INDEX: i32 = -1;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i32,
    // None until signed; carries the free-form note on a coinbase input
    signature: Option<Vec<u8>>,
    // spender's uncompressed public key, None on a coinbase input
    pub_key: Option<Vec<u8>>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: i32) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: None,
            pub_key: None,
        }
    }

    /// Unsigned input spending output `vout` of `txid` with `pub_key`.
    pub fn spending(txid: &[u8], vout: i32, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: None,
            pub_key: Some(pub_key.to_vec()),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_txid_hex(&self) -> String {
        HEXLOWER.encode(self.txid.as_slice())
    }

    pub fn get_vout(&self) -> i32 {
        self.vout
    }

    pub fn get_signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn get_pub_key(&self) -> Option<&[u8]> {
        self.pub_key.as_deref()
    }

    /// Whether this input's public key hashes to `pub_key_hash`.
    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        match &self.pub_key {
            Some(pub_key) => hash_pub_key(pub_key).eq(pub_key_hash),
            None => false,
        }
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Locks `value` to the public-key hash encoded in `address`.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(TXOutput {
            value,
            pub_key_hash,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Unsigned transaction over the given inputs and outputs, id computed.
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Reward transaction paying [`SUBSIDY`] to `to`. An empty `note` is
    /// replaced by a unique one so two rewards to one address never share an id.
    pub fn new_coinbase_tx(to: &str, note: &str) -> Result<Transaction> {
        let note = if note.trim().is_empty() {
            format!("Reward to '{to}' ({})", Uuid::new_v4())
        } else {
            note.to_string()
        };

        let txout = TXOutput::new(SUBSIDY, to)?;
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_OUTPUT_INDEX,
            signature: Some(note.into_bytes()),
            pub_key: None,
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Builds and signs a transfer of `amount` from `from` to `to`, funded by
    /// the sender's outputs currently in the UTXO index.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        wallets: &Wallets,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if from == to {
            return Err(BlockchainError::SelfTransfer);
        }
        if amount == 0 {
            return Err(BlockchainError::ZeroAmount);
        }
        address_to_pub_key_hash(to)?;
        address_to_pub_key_hash(from)?;

        let wallet = wallets.get_wallet(from).ok_or_else(|| {
            BlockchainError::Wallet(format!("Wallet not found for address: {from}"))
        })?;
        let public_key_hash = hash_pub_key(wallet.get_public_key());

        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID {txid_hex}: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput::spending(&txid, out, wallet.get_public_key()));
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, from)?);
        }

        let mut tx = Transaction::new(inputs, outputs)?;
        let prev_txs = utxo_set.get_blockchain().find_prev_transactions(&tx)?;
        tx.sign(wallet.get_pkcs8(), &prev_txs)?;
        debug!(
            "Built transaction {} spending {} input(s) for {amount}",
            tx.get_id_hex(),
            tx.vin.len()
        );
        Ok(tx)
    }

    /// Copy with every input's signature and public key cleared; the base of
    /// every signing digest.
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Signs every input over its own digest of the trimmed copy. `prev_txs`
    /// maps hex txid to the transactions the inputs reference.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_output = referenced_output(prev_txs, vin)?.ok_or_else(|| {
                BlockchainError::Transaction(format!(
                    "Output index {} out of range in {}",
                    vin.vout,
                    vin.get_txid_hex()
                ))
            })?;

            let digest = tx_copy.signing_digest(idx, prev_output.get_pub_key_hash())?;
            vin.signature = Some(ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?);
        }
        Ok(())
    }

    /// Checks every input signature. Errors only when a referenced
    /// transaction is absent from `prev_txs`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for vin in &self.vin {
            if !prev_txs.contains_key(&vin.get_txid_hex()) {
                return Err(BlockchainError::MissingPrevTx(vin.get_txid_hex()));
            }
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let Some(prev_output) = referenced_output(prev_txs, vin)? else {
                warn!(
                    "Input {idx} of {} points past the outputs of {}",
                    self.get_id_hex(),
                    vin.get_txid_hex()
                );
                return Ok(false);
            };
            let (Some(pub_key), Some(signature)) = (vin.get_pub_key(), vin.get_signature()) else {
                warn!("Input {idx} of {} is unsigned", self.get_id_hex());
                return Ok(false);
            };
            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                warn!(
                    "Input {idx} of {} does not own the output it spends",
                    self.get_id_hex()
                );
                return Ok(false);
            }

            let digest = tx_copy.signing_digest(idx, prev_output.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_sign_verify(pub_key, signature, &digest) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // Temporarily places the locking hash on input `idx` of this trimmed copy,
    // recomputes the id, and clears the slot again.
    fn signing_digest(&mut self, idx: usize, locking_hash: &[u8]) -> Result<Vec<u8>> {
        self.vin[idx].signature = None;
        self.vin[idx].pub_key = Some(locking_hash.to_vec());
        self.id = self.hash()?;
        self.vin[idx].pub_key = None;
        Ok(self.id.clone())
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1
            && self.vin[0].txid.is_empty()
            && self.vin[0].vout == COINBASE_OUTPUT_INDEX
    }

    /// Identity hash: sha256 of the transaction with its id emptied.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    /// sha256 over the full encoding, signatures included. Used as the Merkle
    /// leaf so a sealed block commits to every byte of its transactions.
    pub fn content_digest(&self) -> Result<Vec<u8>> {
        Ok(sha256_digest(&self.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_hex(&self) -> String {
        HEXLOWER.encode(self.id.as_slice())
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    /// Sum of output values, failing on overflow.
    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.get_value())
                .ok_or_else(|| BlockchainError::Transaction("Output value overflow".to_string()))
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

/// Output an input points at; `None` when the index is out of range.
pub(crate) fn referenced_output<'a>(
    prev_txs: &'a HashMap<String, Transaction>,
    vin: &TXInput,
) -> Result<Option<&'a TXOutput>> {
    let prev_tx = prev_txs
        .get(&vin.get_txid_hex())
        .ok_or_else(|| BlockchainError::MissingPrevTx(vin.get_txid_hex()))?;
    Ok(usize::try_from(vin.vout)
        .ok()
        .and_then(|index| prev_tx.vout.get(index)))
}
