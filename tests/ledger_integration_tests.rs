//! Ledger integration tests
//!
//! Drives the public API end to end on an on-disk store: chain creation,
//! transfers through the UTXO index, persistence and double-spend rejection.

use pow_ledger::core::{Blockchain, ProofOfWork, TXInput, TXOutput, Transaction, SUBSIDY};
use pow_ledger::storage::{ChainStore, SledStore, UTXOSet};
use pow_ledger::wallet::{Wallets, WALLET_FILE};
use pow_ledger::BlockchainError;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const DIFFICULTY: u32 = 8;

struct Ledger {
    utxo_set: UTXOSet,
    wallets: Wallets,
    alice: String,
    bob: String,
}

fn open_store(dir: &Path) -> Arc<dyn ChainStore> {
    Arc::new(SledStore::open(&dir.join("chain")).unwrap())
}

fn new_ledger(dir: &Path) -> Ledger {
    let mut wallets = Wallets::open(&dir.join(WALLET_FILE)).unwrap();
    let alice = wallets.create_wallet().unwrap();
    let bob = wallets.create_wallet().unwrap();

    let blockchain = Blockchain::create_blockchain(open_store(dir), &alice, DIFFICULTY).unwrap();
    let utxo_set = UTXOSet::new(blockchain);
    utxo_set.reindex().unwrap();

    Ledger {
        utxo_set,
        wallets,
        alice,
        bob,
    }
}

fn send(ledger: &Ledger, from: &str, to: &str, amount: u64) -> pow_ledger::Result<()> {
    let tx =
        Transaction::new_utxo_transaction(from, to, amount, &ledger.wallets, &ledger.utxo_set)?;
    ledger.utxo_set.mine_block(&[tx])?;
    Ok(())
}

#[test]
fn test_transfer_between_two_addresses() {
    let dir = tempdir().unwrap();
    let ledger = new_ledger(dir.path());
    let (alice, bob) = (ledger.alice.as_str(), ledger.bob.as_str());

    assert_eq!(ledger.utxo_set.get_balance(alice).unwrap(), 10);
    assert_eq!(ledger.utxo_set.get_balance(bob).unwrap(), 0);

    send(&ledger, alice, bob, 4).unwrap();
    assert_eq!(ledger.utxo_set.get_balance(alice).unwrap(), 6);
    assert_eq!(ledger.utxo_set.get_balance(bob).unwrap(), 4);

    assert!(matches!(
        send(&ledger, bob, alice, 100),
        Err(BlockchainError::InsufficientFunds {
            required: 100,
            available: 4
        })
    ));
    assert!(matches!(
        send(&ledger, alice, alice, 1),
        Err(BlockchainError::SelfTransfer)
    ));

    // failed sends leave balances and the chain untouched
    assert_eq!(ledger.utxo_set.get_balance(alice).unwrap(), 6);
    assert_eq!(ledger.utxo_set.get_balance(bob).unwrap(), 4);
    assert_eq!(ledger.utxo_set.total_value().unwrap(), SUBSIDY);
    assert_eq!(ledger.utxo_set.get_blockchain().get_block_hashes().len(), 2);
    assert!(ledger.utxo_set.get_blockchain().validate_chain().unwrap());
}

#[test]
fn test_iteration_ends_at_genesis() {
    let dir = tempdir().unwrap();
    let ledger = new_ledger(dir.path());
    send(&ledger, &ledger.alice, &ledger.bob, 3).unwrap();
    send(&ledger, &ledger.bob, &ledger.alice, 1).unwrap();

    let blockchain = ledger.utxo_set.get_blockchain();
    let blocks: Vec<_> = blockchain.iterator().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].get_hash(), blockchain.get_tip_hash());
    for pair in blocks.windows(2) {
        assert_eq!(pair[0].get_pre_block_hash(), pair[1].get_hash());
    }
    let genesis = blocks.last().unwrap();
    assert!(genesis.is_genesis());
    assert!(genesis.get_transactions()[0].is_coinbase());
}

#[test]
fn test_every_stored_block_carries_valid_work() {
    let dir = tempdir().unwrap();
    let ledger = new_ledger(dir.path());
    send(&ledger, &ledger.alice, &ledger.bob, 5).unwrap();

    for block in ledger.utxo_set.get_blockchain().iterator() {
        assert!(ProofOfWork::validate(&block, DIFFICULTY));
        assert!(!ProofOfWork::validate(&block, DIFFICULTY + 1));
    }
}

#[test]
fn test_ledger_survives_reopen() {
    let dir = tempdir().unwrap();
    let (alice, bob, tip) = {
        let ledger = new_ledger(dir.path());
        send(&ledger, &ledger.alice, &ledger.bob, 4).unwrap();
        let tip = ledger.utxo_set.get_blockchain().get_tip_hash();
        (ledger.alice.clone(), ledger.bob.clone(), tip)
    };

    let blockchain = Blockchain::open(open_store(dir.path()), DIFFICULTY).unwrap();
    assert_eq!(blockchain.get_tip_hash(), tip);

    // the index was persisted along with the chain
    let utxo_set = UTXOSet::new(blockchain);
    assert_eq!(utxo_set.get_balance(&alice).unwrap(), 6);
    assert_eq!(utxo_set.get_balance(&bob).unwrap(), 4);

    let wallets = Wallets::open(&dir.path().join(WALLET_FILE)).unwrap();
    assert!(wallets.get_wallet(&alice).is_some());
    assert!(wallets.get_wallet(&bob).is_some());
}

#[test]
fn test_open_without_chain() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        Blockchain::open(open_store(dir.path()), DIFFICULTY),
        Err(BlockchainError::ChainNotInitialized)
    ));
}

#[test]
fn test_replayed_spend_is_rejected() {
    let dir = tempdir().unwrap();
    let ledger = new_ledger(dir.path());
    let blockchain = ledger.utxo_set.get_blockchain();
    let genesis_tx = blockchain.iterator().last().unwrap().get_transactions()[0].clone();

    send(&ledger, &ledger.alice, &ledger.bob, 4).unwrap();
    let tip = blockchain.get_tip_hash();

    // Alice signs a second spend of her already spent genesis reward
    let alice_wallet = ledger.wallets.get_wallet(&ledger.alice).unwrap();
    let input = TXInput::spending(genesis_tx.get_id(), 0, alice_wallet.get_public_key());
    let output = TXOutput::new(SUBSIDY, &ledger.alice).unwrap();
    let mut replay = Transaction::new(vec![input], vec![output]).unwrap();
    blockchain
        .sign_transaction(&mut replay, alice_wallet.get_pkcs8())
        .unwrap();
    assert!(blockchain.verify_transaction(&replay).unwrap());

    assert!(matches!(
        ledger.utxo_set.mine_block(&[replay]),
        Err(BlockchainError::InvalidTransaction(_))
    ));
    assert_eq!(blockchain.get_tip_hash(), tip);
    assert_eq!(ledger.utxo_set.get_balance(&ledger.alice).unwrap(), 6);
    assert_eq!(ledger.utxo_set.total_value().unwrap(), SUBSIDY);
}

#[test]
fn test_reindex_agrees_with_incremental_updates() {
    let dir = tempdir().unwrap();
    let ledger = new_ledger(dir.path());
    send(&ledger, &ledger.alice, &ledger.bob, 4).unwrap();
    send(&ledger, &ledger.bob, &ledger.alice, 2).unwrap();
    send(&ledger, &ledger.alice, &ledger.bob, 7).unwrap();

    let store = ledger.utxo_set.get_blockchain().get_store();
    let mut incremental = store.get_all_utxo_entries().unwrap();
    incremental.sort_by(|a, b| a.0.cmp(&b.0));

    ledger.utxo_set.reindex().unwrap();
    let mut rebuilt = store.get_all_utxo_entries().unwrap();
    rebuilt.sort_by(|a, b| a.0.cmp(&b.0));

    assert_eq!(rebuilt, incremental);
    assert_eq!(ledger.utxo_set.get_balance(&ledger.alice).unwrap(), 1);
    assert_eq!(ledger.utxo_set.get_balance(&ledger.bob).unwrap(), 9);
}
