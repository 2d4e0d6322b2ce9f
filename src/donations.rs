use std::{collections::HashSet, fs, path::Path};
use serde::{Serialize, Deserialize};
use log::{info, warn};

use crate::error::MinerError;
use crate::rpc_client::RpcClient;
use crate::wallet::Wallet;

/// Tracks which `(original, destination)` pairs have already had their
/// accumulated rights assigned, so re-running the donation flow is a no-op
/// for pairs already recorded as done.
#[derive(Serialize, Deserialize, Default)]
pub struct DonationRegistry {
    pub completed: HashSet<(String, String)>,
}

impl DonationRegistry {
    pub fn load(path: &Path) -> Self {
        if let Ok(text) = fs::read_to_string(path) {
            if let Ok(reg) = serde_json::from_str(&text) {
                return reg;
            }
        }
        Self::default()
    }

    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(text) => {
                if let Err(e) = fs::write(path, text) {
                    warn!("failed to write donation registry to {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("failed to serialize donation registry: {}", e),
        }
    }

    pub fn already_done(&self, orig: &str, dest: &str) -> bool {
        self.completed.contains(&(orig.to_string(), dest.to_string()))
    }

    pub fn mark_done(&mut self, orig: &str, dest: &str) {
        self.completed.insert((orig.to_string(), dest.to_string()));
    }
}

/// Signs and submits a single donation, recording success in `registry` and
/// persisting it to `registry_path`. A no-op if `(wallet.address,
/// destination)` was already marked done.
pub async fn donate_once(
    wallet: &Wallet,
    destination: &str,
    rpc: &RpcClient,
    registry: &mut DonationRegistry,
    registry_path: &Path,
) -> Result<bool, MinerError> {
    if registry.already_done(&wallet.address, destination) {
        info!("donation {} -> {} already recorded, skipping", wallet.address, destination);
        return Ok(false);
    }
    if destination == wallet.address {
        return Err(MinerError::Wallet("cannot donate a wallet's rights to itself".to_string()));
    }

    let message = format!("Assign accumulated Scavenger rights to: {}", destination);
    let signature = wallet.sign_cip30(&message);

    let resp = rpc.donate_to(destination, &wallet.address, &signature).await?;

    if resp.status.as_deref() != Some("success") {
        warn!(
            "donation {} -> {} not recorded: status={:?} message={:?}",
            wallet.address, destination, resp.status, resp.message
        );
        return Ok(false);
    }

    info!(
        "donation {} -> {}: status={:?} message={:?}",
        wallet.address, destination, resp.status, resp.message
    );

    registry.mark_done(&wallet.address, destination);
    registry.save(registry_path);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    #[tokio::test]
    async fn donate_once_skips_on_the_second_call_for_the_same_pair() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path_contains("/donate_to/");
            then.status(200).json_body(serde_json::json!({
                "status": "success",
                "message": "ok",
                "donation_id": "d1",
                "original_address": "orig",
                "destination_address": "dest"
            }));
        });

        let rpc = RpcClient::new(&server.base_url()).unwrap();
        let wallet = Wallet::generate(false);
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("donations.json");
        let mut registry = DonationRegistry::load(&registry_path);

        let first = donate_once(&wallet, "addr_dest", &rpc, &mut registry, &registry_path).await.unwrap();
        let second = donate_once(&wallet, "addr_dest", &rpc, &mut registry, &registry_path).await.unwrap();

        assert!(first);
        assert!(!second);
        mock.assert_hits(1);

        let reloaded = DonationRegistry::load(&registry_path);
        assert!(reloaded.already_done(&wallet.address, "addr_dest"));
    }

    #[tokio::test]
    async fn donate_once_does_not_record_a_non_success_reply() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::POST).path_contains("/donate_to/");
            then.status(200).json_body(serde_json::json!({
                "status": "error",
                "message": "destination address rejected"
            }));
        });

        let rpc = RpcClient::new(&server.base_url()).unwrap();
        let wallet = Wallet::generate(false);
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("donations.json");
        let mut registry = DonationRegistry::load(&registry_path);

        let result = donate_once(&wallet, "addr_dest", &rpc, &mut registry, &registry_path).await.unwrap();

        assert!(!result);
        mock.assert_hits(1);
        assert!(!registry.already_done(&wallet.address, "addr_dest"));
        assert!(!registry_path.exists());
    }

    #[tokio::test]
    async fn donate_once_rejects_self_donation() {
        let server = MockServer::start();
        let rpc = RpcClient::new(&server.base_url()).unwrap();
        let wallet = Wallet::generate(false);
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("donations.json");
        let mut registry = DonationRegistry::load(&registry_path);

        let address = wallet.address.clone();
        let err = donate_once(&wallet, &address, &rpc, &mut registry, &registry_path).await.unwrap_err();
        assert!(matches!(err, MinerError::Wallet(_)));
    }
}
