use clap::{Parser, Subcommand, ValueEnum};

/// Known remote-service presets. `Config::base_url` can still override
/// these via `APP_BASE_URL` once the project's default has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Project {
    Midnight,
    Defensio,
}

impl Project {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Project::Midnight => "https://scavenger.prod.gd.midnighttge.io",
            Project::Defensio => "https://scavenger.defensio.example.com",
        }
    }
}

#[derive(Parser)]
#[command(name = "scavenger_miner")]
#[command(about = "Multi-wallet Scavenger Mine proof-of-work orchestrator", version)]
pub struct Cli {
    /// Remote service project preset.
    #[arg(short = 'p', long, value_enum, default_value = "midnight")]
    pub project: Project,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wallet key management.
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },
    /// Run the mining orchestrator.
    Mine {
        /// Cap on concurrently active wallets. Unset mines every wallet at once.
        #[arg(short = 't', long)]
        num_threads: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Register a wallet address with the remote service.
    Register {
        #[arg(short = 'a', long)]
        address: String,
    },
    /// List every wallet registered in this node's tracker.
    List,
    /// Assign one wallet's accumulated rights to another address.
    Donate {
        #[arg(short = 'a', long)]
        address: String,
        #[arg(long = "to")]
        to: String,
    },
    /// Assign every wallet's accumulated rights to one destination address.
    DonateAll {
        #[arg(long = "to")]
        to: String,
    },
}
