use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;

use chrono::Utc;
use log::warn;
use parking_lot::Mutex;

/// Named log channels an operator can `tail -f` independently of the
/// ordinary leveled `log`/`env_logger` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    System,
    Worklist,
    Hashrate,
    Statistics,
    StartNewChallenge,
    SolutionFound,
    SolutionSubmission,
    SolutionSubmissionError,
    FetchNewChallenge,
    FetchNewChallengeError,
    ActiveAddresses,
    RomCacheStatus,
    RomCacheMaintenance,
    SystemMetrics,
}

impl LogType {
    fn shortname(self) -> &'static str {
        match self {
            LogType::System => "system",
            LogType::Worklist => "worklist",
            LogType::Hashrate => "hashrate",
            LogType::Statistics => "statistics",
            LogType::StartNewChallenge => "start_new_challenge",
            LogType::SolutionFound => "solution_found",
            LogType::SolutionSubmission => "solution_submission",
            LogType::SolutionSubmissionError => "solution_submission_error",
            LogType::FetchNewChallenge => "fetch_new_challenge",
            LogType::FetchNewChallengeError => "fetch_new_challenge_error",
            LogType::ActiveAddresses => "active_addresses",
            LogType::RomCacheStatus => "rom_cache_status",
            LogType::RomCacheMaintenance => "rom_cache_maintenance",
            LogType::SystemMetrics => "system_metrics",
        }
    }
}

/// Appends structured, named events to per-type files under `log_dir` and
/// echoes them to stdout, alongside the ordinary leveled `log` facade
/// installed separately via `env_logger`.
///
/// A failure to write a log file is itself logged at `warn` via the `log`
/// facade and otherwise swallowed: logging must never be the reason a
/// mining loop dies.
pub struct EventLog {
    log_dir: PathBuf,
    // Serializes file writes; per-type files are opened in append mode so
    // concurrent wallets writing the same log_type never interleave lines.
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Logs `msg` under `log_type`, optionally suffixing the filename with
    /// a per-wallet nickname (e.g. `solution_found_ADDR-#0.log`).
    pub fn log(&self, msg: &str, log_type: LogType, suffix: Option<&str>) {
        let stamped = format!("[{}] {}", Utc::now().to_rfc3339(), msg);
        println!("{}", stamped);

        let _guard = self.write_lock.lock();
        if let Err(e) = fs::create_dir_all(&self.log_dir) {
            warn!("failed to create log directory {:?}: {}", self.log_dir, e);
            return;
        }

        let filename = match suffix {
            Some(s) => format!("{}_{}.log", log_type.shortname(), s),
            None => format!("{}.log", log_type.shortname()),
        };
        let path = self.log_dir.join(filename);

        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{}", stamped) {
                    warn!("failed to append to log file {:?}: {}", path, e);
                }
            }
            Err(e) => warn!("failed to open log file {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_creates_a_file_per_type_under_the_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let events = EventLog::new(dir.path());

        events.log("hello worklist", LogType::Worklist, None);

        let contents = fs::read_to_string(dir.path().join("worklist.log")).unwrap();
        assert!(contents.contains("hello worklist"));
    }

    #[test]
    fn suffix_produces_a_distinct_file_per_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let events = EventLog::new(dir.path());

        events.log("found it", LogType::SolutionFound, Some("ADDR-#0"));

        assert!(dir.path().join("solution_found_ADDR-#0.log").exists());
    }
}
