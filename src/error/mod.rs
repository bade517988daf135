//! Error handling for the ledger
//!
//! Every fallible operation returns [`Result`]. None of these errors leave
//! partial state behind: a block is only appended, and the UTXO index only
//! updated, once every contained transaction has verified.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Mining or opening attempted before a genesis block exists
    ChainNotInitialized,
    /// Sender and recipient are the same address
    SelfTransfer,
    /// A transfer of zero units was requested
    ZeroAmount,
    /// The sender's spendable outputs do not cover the amount
    InsufficientFunds { required: u64, available: u64 },
    /// Malformed base58 payload or checksum mismatch
    InvalidAddress(String),
    /// An input references a transaction that cannot be located
    MissingPrevTx(String),
    /// A transaction failed verification during block assembly
    InvalidTransaction(String),
    /// Underlying store failure
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Transaction construction errors
    Transaction(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Block construction errors
    InvalidBlock(String),
    /// Proof-of-work search interrupted or exhausted
    Mining(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::ChainNotInitialized => {
                write!(f, "Chain not initialized: create a blockchain first")
            }
            BlockchainError::SelfTransfer => {
                write!(f, "Sender and recipient must be different addresses")
            }
            BlockchainError::ZeroAmount => write!(f, "Amount must be positive"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::MissingPrevTx(txid) => {
                write!(f, "Previous transaction not found: {txid}")
            }
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
