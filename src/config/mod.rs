//! Configuration management
//!
//! Where the chain and wallet files live and how hard blocks are to seal.
//! Built once in `main` and handed to whatever needs it.

pub mod settings;

pub use settings::{
    Config, CONFIG_PATH_ENV, DATA_DIR_ENV, DEFAULT_DATA_DIR, DIFFICULTY_ENV, WALLET_FILE_ENV,
};
