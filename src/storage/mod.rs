//! Data storage and persistence
//!
//! The `ChainStore` abstraction over the key-value database, its sled
//! implementation, and the UTXO index built on top of it.

pub mod store;
pub mod utxo_set;

pub use store::{ChainStore, SledStore, UnspentOutput, UtxoChange};
pub use utxo_set::UTXOSet;
