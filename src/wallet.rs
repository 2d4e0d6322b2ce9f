use std::fs;
use std::path::Path;

use bech32::{ToBase32, Variant};
use bip39::{Language, Mnemonic};
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use ciborium::value::{Integer, Value};
use ed25519_dalek::{Signer, SigningKey};
use log::info;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_cbor::to_vec;
use zeroize::Zeroize;

use crate::error::MinerError;

/// An Ed25519 keypair with its derived Shelley Bech32 address.
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    pub address: String,
    /// BIP-39 mnemonic, kept only for wallets that were generated or loaded
    /// from a seed phrase rather than a raw key file.
    pub mnemonic: Option<String>,
}

impl Wallet {
    pub fn signing_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Generates a fresh Ed25519 wallet backed by a random BIP-39 mnemonic.
    pub fn generate(use_mainnet: bool) -> Self {
        let (signing_key, phrase) = Self::random_signing_key();
        let pubkey_bytes = signing_key.verifying_key().to_bytes();
        let addr = Wallet::derive_bech32_address(&pubkey_bytes, use_mainnet);

        Self {
            signing_key,
            address: addr,
            mnemonic: Some(phrase),
        }
    }

    /// Generates a wallet and persists both its 24-word seed and hex key to
    /// disk.
    pub fn generate_from_bip39(
        seed_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        use_mainnet: bool,
    ) -> Result<Self, MinerError> {
        let (signing_key, phrase) = Self::random_signing_key();
        let pubkey_bytes = signing_key.verifying_key().to_bytes();
        let addr = Wallet::derive_bech32_address(&pubkey_bytes, use_mainnet);

        fs::write(&seed_path, &phrase)?;
        fs::write(&key_path, hex::encode(signing_key.to_bytes()))?;

        info!("wallet generated from bip39 seed: {}", addr);
        Ok(Self {
            signing_key,
            address: addr,
            mnemonic: Some(phrase),
        })
    }

    fn random_signing_key() -> (SigningKey, String) {
        let mut rng = ChaCha20Rng::from_entropy();
        let mut entropy = [0u8; 32];
        rng.fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .expect("32 bytes is always valid BIP-39 entropy");
        let phrase = mnemonic.to_string();
        let seed_full = mnemonic.to_seed("");

        let mut sk_bytes = [0u8; 32];
        sk_bytes.copy_from_slice(&seed_full[..32]);
        let signing_key = SigningKey::from_bytes(&sk_bytes);

        sk_bytes.zeroize();
        entropy.zeroize();

        (signing_key, phrase)
    }

    /// Loads a wallet from a file holding a 32-byte hex-encoded signing key.
    pub fn load_from_file(key_path: impl AsRef<Path>, use_mainnet: bool) -> Result<Self, MinerError> {
        let hex_str = fs::read_to_string(key_path)?;
        let bytes = hex::decode(hex_str.trim()).map_err(|e| MinerError::Wallet(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(MinerError::Wallet("signing key must be 32 bytes".to_string()));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let pubkey_bytes = signing_key.verifying_key().to_bytes();
        let addr = Wallet::derive_bech32_address(&pubkey_bytes, use_mainnet);
        key_bytes.zeroize();

        Ok(Self {
            signing_key,
            address: addr,
            mnemonic: None,
        })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &str) -> String {
        let sig = self.signing_key.sign(message.as_bytes());
        hex::encode(sig.to_bytes())
    }

    /// Signs `message` as a CIP-8/CIP-30 `COSE_Sign1` structure (EdDSA, alg
    /// -8), returning the hex-encoded CBOR envelope.
    pub fn sign_cip30(&self, message: &str) -> String {
        let protected = to_vec(&Value::Map(vec![(
            Value::Integer(Integer::from(1i64)),
            Value::Integer(Integer::from(-8i64)),
        )]))
        .expect("static CBOR map always encodes");

        let to_sign = to_vec(&Value::Array(vec![
            Value::Text("Signature1".into()),
            Value::Bytes(protected.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(message.as_bytes().to_vec()),
        ]))
        .expect("static CBOR array always encodes");

        let sig = self.signing_key.sign(&to_sign);
        let cose = to_vec(&Value::Array(vec![
            Value::Bytes(protected),
            Value::Map(vec![]),
            Value::Bytes(message.as_bytes().to_vec()),
            Value::Bytes(sig.to_bytes().to_vec()),
        ]))
        .expect("static CBOR array always encodes");

        hex::encode(cose)
    }

    pub fn address_bytes(&self) -> Result<Vec<u8>, MinerError> {
        let (_hrp, data, _variant) =
            bech32::decode(&self.address).map_err(|e| MinerError::Wallet(e.to_string()))?;
        bech32::FromBase32::from_base32(&data).map_err(|e: bech32::Error| MinerError::Wallet(e.to_string()))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), MinerError> {
        let hex_str = hex::encode(self.signing_key.to_bytes());
        fs::write(path, hex_str)?;
        Ok(())
    }

    fn derive_bech32_address(pubkey: &[u8], use_mainnet: bool) -> String {
        let mut hasher = Blake2bVar::new(28).expect("28 is a valid Blake2b output size");
        hasher.update(pubkey);
        let mut key_hash = vec![0u8; 28];
        hasher.finalize_variable(&mut key_hash).expect("output buffer is sized correctly");

        let header: u8 = if use_mainnet { 0b0110_0001 } else { 0b0110_0000 };
        let mut addr_bytes = Vec::with_capacity(1 + key_hash.len());
        addr_bytes.push(header);
        addr_bytes.extend_from_slice(&key_hash);

        let prefix = if use_mainnet { "addr" } else { "addr_test" };
        bech32::encode(prefix, addr_bytes.to_base32(), Variant::Bech32)
            .expect("header byte and hash are always valid bech32 data")
    }

    /// Writes a newline-delimited seed file and a matching newline-delimited
    /// hex-key file, one line per wallet, in the same order.
    pub fn save_many_to_files(wallets: &[Wallet], seed_path: &Path, key_path: &Path) -> Result<(), MinerError> {
        let mut seeds = Vec::with_capacity(wallets.len());
        let mut keys = Vec::with_capacity(wallets.len());

        for w in wallets {
            let mnemonic_str = match &w.mnemonic {
                Some(m) => m.clone(),
                None => {
                    let (_, phrase) = Self::random_signing_key();
                    phrase
                }
            };
            seeds.push(mnemonic_str);
            keys.push(hex::encode(w.signing_key.to_bytes()));
        }

        fs::write(seed_path, seeds.join("\n"))?;
        fs::write(key_path, keys.join("\n"))?;
        Ok(())
    }

    pub fn load_many_from_files(
        seed_path: &Path,
        key_path: &Path,
        use_mainnet: bool,
    ) -> Result<Vec<Wallet>, MinerError> {
        let seeds_str = fs::read_to_string(seed_path)?;
        let keys_str = fs::read_to_string(key_path)?;
        let seed_lines: Vec<_> = seeds_str.lines().collect();
        let key_lines: Vec<_> = keys_str.lines().collect();

        let mut wallets = Vec::with_capacity(seed_lines.len());
        for (seed_phrase, _key_hex) in seed_lines.iter().zip(key_lines.iter()) {
            let mnemonic = Mnemonic::parse_in_normalized(Language::English, seed_phrase)
                .map_err(|e| MinerError::Wallet(e.to_string()))?;
            let seed_full = mnemonic.to_seed("");
            let mut sk_bytes = [0u8; 32];
            sk_bytes.copy_from_slice(&seed_full[..32]);

            let signing_key = SigningKey::from_bytes(&sk_bytes);
            let pubkey_bytes = signing_key.verifying_key().to_bytes();
            let addr = Wallet::derive_bech32_address(&pubkey_bytes, use_mainnet);

            wallets.push(Wallet {
                signing_key,
                address: addr,
                mnemonic: Some(seed_phrase.to_string()),
            });
        }

        Ok(wallets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_address_has_the_expected_hrp() {
        let mainnet = Wallet::generate(true);
        assert!(mainnet.address.starts_with("addr1"));
        let testnet = Wallet::generate(false);
        assert!(testnet.address.starts_with("addr_test1"));
    }

    #[test]
    fn sign_and_public_key_are_stable_for_a_given_wallet() {
        let wallet = Wallet::generate(true);
        let sig1 = wallet.sign("hello");
        let sig2 = wallet.sign("hello");
        assert_eq!(sig1, sig2);
        assert_eq!(wallet.public_key_hex().len(), 64);
    }

    #[test]
    fn round_trips_through_a_saved_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.hex");
        let wallet = Wallet::generate(true);
        wallet.save_to_file(&key_path).unwrap();

        let loaded = Wallet::load_from_file(&key_path, true).unwrap();
        assert_eq!(loaded.address, wallet.address);
        assert_eq!(loaded.public_key_hex(), wallet.public_key_hex());
    }

    #[test]
    fn save_and_load_many_round_trips_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seeds.txt");
        let key_path = dir.path().join("keys.hex");

        let wallets = vec![Wallet::generate(true), Wallet::generate(true)];
        Wallet::save_many_to_files(&wallets, &seed_path, &key_path).unwrap();

        let loaded = Wallet::load_many_from_files(&seed_path, &key_path, true).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].address, wallets[0].address);
        assert_eq!(loaded[1].address, wallets[1].address);
    }
}
