use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::info;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Address-keyed key pairs, optionally backed by a wallet file.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: Option<PathBuf>,
}

impl Wallets {
    /// Loads the wallet file at `path`, starting empty if it does not exist yet.
    pub fn open(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            path: Some(path.to_path_buf()),
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    /// Wallets that live only as long as this value.
    pub fn in_memory() -> Wallets {
        Wallets {
            wallets: HashMap::new(),
            path: None,
        }
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf[..]).map_err(|e| {
            BlockchainError::Wallet(format!("Corrupt wallet file {}: {e}", path.display()))
        })?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}
