// src/config.rs
// Loads application configuration by layering defaults, an optional
// `config.toml`, and `APP_`-prefixed environment variables.

use serde::Deserialize;

use crate::error::MinerError;

/// Top-level configuration for the miner.
///
/// All fields can be overridden by environment variables using the `APP_`
/// prefix, e.g. `APP_BASE_URL`, `APP_MAX_ACTIVE_WALLETS`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Scavenger Mine API for the selected project.
    pub base_url: String,

    /// Directory holding one key file per wallet, loaded by `WalletRegistry`.
    #[serde(default = "default_wallet_dir")]
    pub wallet_dir: String,

    /// Path to the SQLite database file backing the `Tracker`.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Optional path to a newline-delimited list of donation destination
    /// addresses. When unset, donation commands require an explicit address.
    pub donation_list_path: Option<String>,

    /// Upper bound on concurrently active mining threads.
    #[serde(default = "default_max_active_wallets")]
    pub max_active_wallets: usize,

    /// How often the maintenance loop polls for a new challenge, in seconds.
    #[serde(default = "default_challenge_poll_secs")]
    pub challenge_poll_secs: u64,

    /// How often the maintenance loop prints the worklist/hashrate summary.
    #[serde(default = "default_status_display_secs")]
    pub status_display_secs: u64,

    /// How often unneeded ROMs are pruned from the cache.
    #[serde(default = "default_rom_prune_secs")]
    pub rom_prune_secs: u64,

    /// How often host memory pressure is checked.
    #[serde(default = "default_memory_check_secs")]
    pub memory_check_secs: u64,

    /// Logging level (e.g. "info", "debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory log files are written into.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_wallet_dir() -> String {
    "wallets".to_string()
}

fn default_db_path() -> String {
    "db/scavenger_miner.sqlite3".to_string()
}

fn default_max_active_wallets() -> usize {
    num_cpus::get()
}

fn default_challenge_poll_secs() -> u64 {
    90
}

fn default_status_display_secs() -> u64 {
    900
}

fn default_rom_prune_secs() -> u64 {
    1800
}

fn default_memory_check_secs() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Config {
    /// Loads configuration, layering `default_base_url` (typically resolved
    /// from the `--project` CLI flag) below `config.toml` (optional, working
    /// directory) below `APP_`-prefixed environment variables, which always
    /// win.
    pub fn load(default_base_url: &str) -> Result<Self, MinerError> {
        Self::load_from_file(default_base_url, "config")
    }

    /// Same layering as `load`, but with the config file path spelled out
    /// instead of implied by the working directory. Split out so tests can
    /// point at a fixture file without depending on process-wide state.
    fn load_from_file(default_base_url: &str, file_stem: &str) -> Result<Self, MinerError> {
        let builder = config::Config::builder()
            .set_default("base_url", default_base_url)?
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        let cfg = builder.build()?;
        let settings: Config = cfg.try_deserialize()?;
        Ok(settings)
    }
}
