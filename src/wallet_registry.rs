use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::error::MinerError;
use crate::wallet::Wallet;

/// Thread-safe pool of wallets backed by a pair of sibling seed/key files.
/// Loads what exists, tops up to `max_wallets` with freshly generated
/// wallets, and persists atomically (write to `.tmp`, rename into place)
/// under a lock file so two processes never interleave writes.
pub struct WalletRegistry {
    wallets: Arc<RwLock<Vec<Wallet>>>,
    seeds_path: PathBuf,
    keys_path: PathBuf,
    use_mainnet: bool,
}

impl WalletRegistry {
    pub fn load_or_create<P: AsRef<Path>>(
        seeds_path: P,
        keys_path: P,
        use_mainnet: bool,
        max_wallets: usize,
    ) -> Result<Self, MinerError> {
        let seeds_path = seeds_path.as_ref().to_path_buf();
        let keys_path = keys_path.as_ref().to_path_buf();

        if let Some(parent) = seeds_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = keys_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut wallets: Vec<Wallet> = Vec::new();

        if seeds_path.exists() && keys_path.exists() {
            match Wallet::load_many_from_files(&seeds_path, &keys_path, use_mainnet) {
                Ok(list) => {
                    log::info!("wallet_registry: loaded {} existing wallets", list.len());
                    wallets = list;
                }
                Err(e) => log::warn!("wallet_registry: failed to load existing files: {}", e),
            }
        }

        let existing = wallets.len();
        if existing < max_wallets {
            let to_generate = max_wallets - existing;
            log::info!("wallet_registry: generating {} new wallets ({} already present)", to_generate, existing);
            for _ in 0..to_generate {
                wallets.push(Wallet::generate(use_mainnet));
            }
        } else if existing > max_wallets {
            log::warn!(
                "wallet_registry: {} wallets on disk exceed max_wallets={}, none removed",
                existing,
                max_wallets
            );
        }

        let registry = Self {
            wallets: Arc::new(RwLock::new(wallets)),
            seeds_path,
            keys_path,
            use_mainnet,
        };

        if existing < max_wallets {
            registry.save()?;
        }

        Ok(registry)
    }

    /// Saves all wallets under a lock file, retried for up to 5 seconds.
    pub fn save(&self) -> Result<(), MinerError> {
        let lock_path = self.seeds_path.with_extension("lock");

        let start = Instant::now();
        let mut got_lock = OpenOptions::new().write(true).create_new(true).open(&lock_path).is_ok();
        while !got_lock && start.elapsed() < Duration::from_secs(5) {
            got_lock = OpenOptions::new().write(true).create_new(true).open(&lock_path).is_ok();
            if !got_lock {
                sleep(Duration::from_millis(100));
            }
        }
        if !got_lock {
            return Err(MinerError::Wallet(format!(
                "could not acquire save lock at {:?}",
                lock_path
            )));
        }

        let result = self.write_locked();

        let _ = fs::remove_file(&lock_path);
        result
    }

    fn write_locked(&self) -> Result<(), MinerError> {
        let wallets = self.wallets.read();
        let seeds: Vec<String> = wallets.iter().map(|w| w.mnemonic.clone().unwrap_or_default()).collect();
        let keys: Vec<String> = wallets.iter().map(|w| w.signing_key_hex()).collect();

        let seeds_tmp = self.seeds_path.with_extension("tmp");
        let keys_tmp = self.keys_path.with_extension("tmp");

        fs::write(&seeds_tmp, seeds.join("\n"))?;
        fs::write(&keys_tmp, keys.join("\n"))?;
        fs::rename(&seeds_tmp, &self.seeds_path)?;
        fs::rename(&keys_tmp, &self.keys_path)?;

        Ok(())
    }

    pub fn get_random(&self) -> Option<Wallet> {
        self.wallets.read().choose(&mut thread_rng()).cloned()
    }

    pub fn get_by_index(&self, idx: usize) -> Option<Wallet> {
        self.wallets.read().get(idx).cloned()
    }

    pub fn len(&self) -> usize {
        self.wallets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_all(&self) -> Vec<Wallet> {
        self.wallets.read().clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.wallets.read().iter().map(|w| w.address.clone()).collect()
    }

    pub fn push_and_save(&self, wallet: Wallet) -> Result<(), MinerError> {
        {
            self.wallets.write().push(wallet);
        }
        self.save()
    }

    pub fn use_mainnet(&self) -> bool {
        self.use_mainnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_tops_up_to_max_wallets_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds.txt");
        let keys = dir.path().join("keys.hex");

        let registry = WalletRegistry::load_or_create(&seeds, &keys, true, 3).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(seeds.exists());
        assert!(keys.exists());

        let reloaded = WalletRegistry::load_or_create(&seeds, &keys, true, 3).unwrap();
        assert_eq!(reloaded.addresses(), registry.addresses());
    }

    #[test]
    fn load_or_create_never_shrinks_an_existing_pool() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds.txt");
        let keys = dir.path().join("keys.hex");

        WalletRegistry::load_or_create(&seeds, &keys, true, 5).unwrap();
        let shrunk = WalletRegistry::load_or_create(&seeds, &keys, true, 2).unwrap();
        assert_eq!(shrunk.len(), 5);
    }

    #[test]
    fn push_and_save_grows_the_pool_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds.txt");
        let keys = dir.path().join("keys.hex");

        let registry = WalletRegistry::load_or_create(&seeds, &keys, true, 1).unwrap();
        let new_wallet = Wallet::generate(true);
        let new_address = new_wallet.address.clone();
        registry.push_and_save(new_wallet).unwrap();

        let reloaded = WalletRegistry::load_or_create(&seeds, &keys, true, 1).unwrap();
        assert!(reloaded.addresses().contains(&new_address));
    }
}
