use thiserror::Error;

/// Unified error taxonomy for the orchestrator.
///
/// Each variant corresponds to one of the failure domains a running miner
/// has to reason about differently: some are retried, some end a single
/// challenge attempt, some are fatal at startup.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("rom build failed for key {key}: {source}")]
    RomBuild {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("solution rejected by server: code={status_code:?} message={message:?}")]
    SolutionInvalid {
        status_code: Option<u16>,
        message: Option<String>,
    },

    #[error("challenge {0} expired")]
    ChallengeExpired(String),

    #[error("tracker error: {0}")]
    Tracker(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("stop signal received")]
    StopSignal,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet error: {0}")]
    Wallet(String),
}

pub type MinerResult<T> = Result<T, MinerError>;
