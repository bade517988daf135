//! # pow-ledger
//!
//! A single-node proof-of-work ledger. Value moves between addresses as
//! UTXO-model transactions; blocks are sealed by a hash puzzle and linked by
//! hash, and every spend is authorized by an ECDSA P-256 signature.
//!
//! ## Layout
//! - `core/`: blocks, transactions, the chain, proof-of-work, Merkle roots
//! - `storage/`: the `ChainStore` trait, its sled implementation, the UTXO index
//! - `wallet/`: key pairs, address encoding, the wallet file
//! - `config/`: TOML and environment configuration
//! - `utils/`: hashing, signatures, base58, bincode helpers
//! - `cli/`: argument parsing for the binary
//!
//! ## Flow of a transfer
//! `Transaction::new_utxo_transaction` picks the sender's outputs from the
//! [`UTXOSet`], signs every input, and [`UTXOSet::mine_block`] validates the
//! transaction against the chain, seals a block on the tip and folds it into
//! the index.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleTree, ProofOfWork, TXInput, TXOutput,
    Transaction, DEFAULT_DIFFICULTY, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::{ChainStore, SledStore, UTXOSet, UnspentOutput, UtxoChange};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
