mod cli;
mod config;
mod difficulty;
mod donations;
mod error;
mod logging;
mod maintenance;
mod model;
mod nonce;
mod rom;
mod rpc_client;
mod scheduler;
mod solver;
mod system_metrics;
mod tracker;
pub mod wallet;
mod wallet_registry;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use cli::{Cli, Commands, WalletCommands};
use config::Config;
use donations::DonationRegistry;
use logging::EventLog;
use maintenance::{MaintenanceCadences, MaintenanceLoop};
use rom::RomCache;
use rpc_client::{RpcClient, ScavengerRpc};
use scheduler::Scheduler;
use solver::Solver;
use tracker::Tracker;
use wallet_registry::WalletRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.project.default_base_url())?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    env_logger::init();

    let rpc = Arc::new(RpcClient::new(&config.base_url)?);
    let event_log = Arc::new(EventLog::new(config.log_dir.clone()));
    let use_mainnet = true;

    let seeds_path = Path::new(&config.wallet_dir).join("seeds.txt");
    let keys_path = Path::new(&config.wallet_dir).join("keys.txt");

    match cli.command {
        Commands::Wallet { action } => run_wallet_command(action, &config, &rpc, use_mainnet, &seeds_path, &keys_path).await?,
        Commands::Mine { num_threads } => run_mine(&config, rpc, event_log, use_mainnet, &seeds_path, &keys_path, num_threads).await?,
    }

    Ok(())
}

async fn run_wallet_command(
    action: WalletCommands,
    config: &Config,
    rpc: &Arc<RpcClient>,
    use_mainnet: bool,
    seeds_path: &Path,
    keys_path: &Path,
) -> Result<(), Box<dyn Error>> {
    let registry = WalletRegistry::load_or_create(seeds_path, keys_path, use_mainnet, config.max_active_wallets)?;

    match action {
        WalletCommands::Register { address } => {
            let wallets = registry.read_all();
            let Some(wallet) = wallets.iter().find(|w| w.address == address) else {
                error!("no such wallet registered locally: {}", address);
                return Ok(());
            };
            let terms = rpc.get_terms(None).await?;
            let signature = wallet.sign_cip30(&terms.message);
            let pubkey = wallet.public_key_hex();
            match rpc.register_address(&wallet.address, &signature, &pubkey).await {
                Ok(resp) => {
                    info!("registered {}", wallet.address);
                    info!(
                        "receipt: preimage={} signature={} timestamp={}",
                        resp.registration_receipt.preimage, resp.registration_receipt.signature, resp.registration_receipt.timestamp
                    );
                }
                Err(e) => error!("registration failed (already registered?): {}", e),
            }
        }
        WalletCommands::List => {
            for wallet in registry.read_all() {
                println!("{}", wallet.address);
            }
        }
        WalletCommands::Donate { address, to } => {
            let wallets = registry.read_all();
            let Some(wallet) = wallets.iter().find(|w| w.address == address) else {
                error!("no such wallet registered locally: {}", address);
                return Ok(());
            };
            donate_one(wallet, &to, rpc, config).await;
        }
        WalletCommands::DonateAll { to } => {
            for wallet in registry.read_all() {
                donate_one(&wallet, &to, rpc, config).await;
            }
        }
    }
    Ok(())
}

async fn donate_one(wallet: &wallet::Wallet, to: &str, rpc: &RpcClient, config: &Config) {
    let registry_path = donation_registry_path(config);
    let mut registry = DonationRegistry::load(&registry_path);
    match donations::donate_once(wallet, to, rpc, &mut registry, &registry_path).await {
        Ok(true) => info!("donated {} -> {}", wallet.address, to),
        Ok(false) => info!("{} -> {} already donated, skipping", wallet.address, to),
        Err(e) => error!("donation {} -> {} failed: {}", wallet.address, to, e),
    }
}

fn donation_registry_path(config: &Config) -> PathBuf {
    match &config.donation_list_path {
        Some(p) => PathBuf::from(p),
        None => Path::new(&config.wallet_dir).join("donations.json"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_mine(
    config: &Config,
    rpc: Arc<RpcClient>,
    event_log: Arc<EventLog>,
    use_mainnet: bool,
    seeds_path: &Path,
    keys_path: &Path,
    num_threads: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let registry = WalletRegistry::load_or_create(seeds_path, keys_path, use_mainnet, config.max_active_wallets)?;
    let addresses = registry.addresses();
    if addresses.is_empty() {
        error!("no wallets available, nothing to mine with");
        return Ok(());
    }
    info!("mining with {} wallet(s)", addresses.len());

    let tracker = Arc::new(Tracker::open(Path::new(&config.db_path)).await?);
    let rom_cache = Arc::new(RomCache::with_default_builder());
    let solver = Arc::new(Solver::new(Arc::clone(&rom_cache)));
    let runtime = tokio::runtime::Handle::current();

    for address in &addresses {
        tracker.add_wallet(address).await?;
    }

    let rpc_dyn: Arc<dyn ScavengerRpc> = rpc.clone();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&tracker),
        Arc::clone(&solver),
        rpc_dyn,
        Arc::clone(&event_log),
        runtime.clone(),
        addresses.clone(),
        num_threads,
    ));

    event_log.log("=== Miner Started ===", logging::LogType::System, None);

    let stop = Arc::new(AtomicBool::new(false));
    let worker_handles = scheduler.spawn_workers(num_threads);

    let maintenance = MaintenanceLoop::new(
        rpc,
        Arc::clone(&tracker),
        Arc::clone(&rom_cache),
        Arc::clone(&solver),
        Arc::clone(&scheduler),
        event_log,
        runtime,
        addresses,
        MaintenanceCadences {
            challenge_poll: std::time::Duration::from_secs(config.challenge_poll_secs),
            status_display: std::time::Duration::from_secs(config.status_display_secs),
            rom_prune: std::time::Duration::from_secs(config.rom_prune_secs),
            memory_check: std::time::Duration::from_secs(config.memory_check_secs),
        },
    );

    let stop_for_maintenance = Arc::clone(&stop);
    tokio::task::spawn_blocking(move || maintenance.run(&stop_for_maintenance)).await?;

    scheduler.stop();
    for handle in worker_handles {
        let _ = handle.join();
    }

    Ok(())
}
