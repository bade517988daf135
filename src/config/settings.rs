use crate::core::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use crate::error::{BlockchainError, Result};
use crate::wallet::WALLET_FILE;
use log::debug;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "POW_LEDGER_CONFIG";
pub const DATA_DIR_ENV: &str = "POW_LEDGER_DATA_DIR";
pub const WALLET_FILE_ENV: &str = "POW_LEDGER_WALLET_FILE";
pub const DIFFICULTY_ENV: &str = "POW_LEDGER_DIFFICULTY";

pub const DEFAULT_DATA_DIR: &str = "data";
const CHAIN_DIR: &str = "chain";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    data_dir: PathBuf,
    // relative paths resolve against data_dir
    wallet_file: PathBuf,
    difficulty_bits: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            wallet_file: PathBuf::from(WALLET_FILE),
            difficulty_bits: DEFAULT_DIFFICULTY,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (`path`, else `POW_LEDGER_CONFIG`),
    /// then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                let text = fs::read_to_string(&path).map_err(|e| {
                    BlockchainError::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                Config::from_toml_str(&text)?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Config> {
        Ok(toml::from_str(text)?)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup(WALLET_FILE_ENV) {
            self.wallet_file = PathBuf::from(file);
        }
        if let Some(bits) = lookup(DIFFICULTY_ENV) {
            self.difficulty_bits = bits.trim().parse().map_err(|e| {
                BlockchainError::Config(format!("{DIFFICULTY_ENV}={bits} is not a number: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty_bits == 0 || self.difficulty_bits > MAX_DIFFICULTY {
            return Err(BlockchainError::Config(format!(
                "difficulty_bits must be between 1 and {MAX_DIFFICULTY}, got {}",
                self.difficulty_bits
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(BlockchainError::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn with_difficulty_bits(mut self, difficulty_bits: u32) -> Config {
        self.difficulty_bits = difficulty_bits;
        self
    }

    pub fn get_data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn get_difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    /// Directory holding the chain database.
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join(CHAIN_DIR)
    }

    pub fn wallet_path(&self) -> PathBuf {
        if self.wallet_file.is_absolute() {
            self.wallet_file.clone()
        } else {
            self.data_dir.join(&self.wallet_file)
        }
    }
}
