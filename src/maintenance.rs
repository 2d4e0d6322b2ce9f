use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use crate::logging::{EventLog, LogType};
use crate::model::WorkStatus;
use crate::rom::RomCache;
use crate::rpc_client::RpcClient;
use crate::scheduler::Scheduler;
use crate::solver::Solver;
use crate::system_metrics::SystemMetrics;
use crate::tracker::Tracker;

pub struct MaintenanceCadences {
    pub challenge_poll: Duration,
    pub status_display: Duration,
    pub rom_prune: Duration,
    pub memory_check: Duration,
}

impl Default for MaintenanceCadences {
    fn default() -> Self {
        Self {
            challenge_poll: Duration::from_secs(90),
            status_display: Duration::from_secs(15 * 60),
            rom_prune: Duration::from_secs(30 * 60),
            memory_check: Duration::from_secs(10 * 60),
        }
    }
}

/// The single coordinator task driving the event-driven timer wheel: poll
/// for a new challenge, periodically print worklist/hashrate, prune the ROM
/// cache, and react to memory pressure. Also owns the interactive stdin
/// command loop (`w`/`h`/`s`/`m`/`r`/`q`).
pub struct MaintenanceLoop {
    rpc: Arc<RpcClient>,
    tracker: Arc<Tracker>,
    rom_cache: Arc<RomCache>,
    solver: Arc<Solver>,
    scheduler: Arc<Scheduler>,
    event_log: Arc<EventLog>,
    runtime: Handle,
    addresses: Vec<String>,
    cadences: MaintenanceCadences,
    system: std::sync::Mutex<sysinfo::System>,
}

impl MaintenanceLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rpc: Arc<RpcClient>,
        tracker: Arc<Tracker>,
        rom_cache: Arc<RomCache>,
        solver: Arc<Solver>,
        scheduler: Arc<Scheduler>,
        event_log: Arc<EventLog>,
        runtime: Handle,
        addresses: Vec<String>,
        cadences: MaintenanceCadences,
    ) -> Self {
        use sysinfo::SystemExt;
        Self {
            rpc,
            tracker,
            rom_cache,
            solver,
            scheduler,
            event_log,
            runtime,
            addresses,
            cadences,
            system: std::sync::Mutex::new(sysinfo::System::new_all()),
        }
    }

    /// Runs the timer wheel until `stop` is set or the interactive `q`
    /// command is received. Blocks the calling (main) thread.
    pub fn run(&self, stop: &AtomicBool) {
        let (tx, rx) = mpsc::channel::<String>();
        thread_spawn_stdin_reader(tx);

        let now = Instant::now();
        let mut last_poll = now - self.cadences.challenge_poll;
        let mut last_status = now;
        let mut last_prune = now;
        let mut last_memory_check = now;

        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();

            if now.duration_since(last_poll) >= self.cadences.challenge_poll {
                self.poll_challenge();
                last_poll = now;
            }
            if now.duration_since(last_status) >= self.cadences.status_display {
                self.show_worklist();
                self.show_hashrate();
                last_status = now;
            }
            if now.duration_since(last_prune) >= self.cadences.rom_prune {
                self.prune_rom_cache();
                last_prune = now;
            }
            if now.duration_since(last_memory_check) >= self.cadences.memory_check {
                self.check_memory_pressure();
                last_memory_check = now;
            }

            if let Ok(cmd) = rx.try_recv() {
                if self.handle_command(&cmd, stop) {
                    break;
                }
            }

            std::thread::sleep(Duration::from_millis(500));
        }

        self.event_log.log("=== Miner Stopped ===", LogType::System, None);
    }

    /// Returns `true` when the command requests shutdown.
    fn handle_command(&self, cmd: &str, stop: &AtomicBool) -> bool {
        match cmd.trim().to_lowercase().as_str() {
            "w" => self.show_worklist(),
            "h" => self.show_hashrate(),
            "s" => self.show_statistics(),
            "m" => self.show_system_metrics(),
            "r" => self.show_rom_cache_status(),
            "q" => {
                self.event_log.log("=== Stopping miner... ===", LogType::System, None);
                stop.store(true, Ordering::SeqCst);
                self.scheduler.stop();
                return true;
            }
            other => println!(
                "Invalid command: '{}'. Available: [W]orklist | [H]ashrate | [S]tatistics | System [M]etrics | [R]OM Cache | [Q]uit",
                other
            ),
        }
        false
    }

    fn poll_challenge(&self) {
        let resp = self.runtime.block_on(self.rpc.get_challenge());
        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                self.event_log.log(
                    &format!("=== Fetch a new Challenge: Error ===\nerror: {}", e),
                    LogType::FetchNewChallengeError,
                    None,
                );
                return;
            }
        };

        if resp.code != "active" {
            println!("/challenge code = {}", resp.code);
            return;
        }

        let Some(params) = resp.challenge else {
            return;
        };
        let challenge: crate::model::Challenge = params.into();

        match self.runtime.block_on(self.tracker.add_challenge(&challenge)) {
            Ok(true) => {
                self.event_log.log(
                    &format!("=== New Challenge ===\n{}", challenge.challenge_id),
                    LogType::FetchNewChallenge,
                    None,
                );
            }
            Ok(false) => {}
            Err(e) => log::error!("failed to persist new challenge: {}", e),
        }
    }

    fn show_worklist(&self) {
        let mut msg = vec!["=== [W]orklist ===".to_string()];

        let open_statuses = [WorkStatus::Open, WorkStatus::Solving, WorkStatus::Invalid];
        for address in &self.addresses {
            msg.push(format!("[{}] {}", self.scheduler.nickname(address), address));

            let challenges = self
                .runtime
                .block_on(self.tracker.get_challenges(address, &open_statuses))
                .unwrap_or_default();
            let profile = self.solver.worker_profile_snapshot(address);
            let solving_id = profile.job_stats.as_ref().map(|js| js.challenge.challenge_id.clone());

            if challenges.is_empty() {
                msg.push("- None".to_string());
            } else {
                for challenge in challenges {
                    let is_solving = solving_id.as_deref() == Some(challenge.challenge_id.as_str());
                    let mark = if is_solving { "*" } else { " " };
                    let mut info = vec![format!("challenge={}", challenge.challenge_id)];
                    if is_solving {
                        if let Some(js) = &profile.job_stats {
                            info.push(format!("hashrate={:.0} H/s", js.hashrate.unwrap_or(0.0)));
                            info.push(format!("tries={}", js.tries));
                        }
                    }
                    msg.push(format!("- [{}] {}", mark, info.join(" | ")));
                }
            }
        }

        self.event_log.log(&msg.join("\n"), LogType::Worklist, None);
    }

    fn show_hashrate(&self) {
        let mut msg = vec!["=== Hashrate ===".to_string()];
        let mut hashrates = Vec::new();

        for address in &self.addresses {
            let profile = self.solver.worker_profile_snapshot(address);
            if let Some(js) = &profile.job_stats {
                if let Some(hr) = js.hashrate {
                    hashrates.push(hr);
                }
                msg.push(format!(
                    "[{}] challenge={} | {:.0} H/s | {} tries",
                    self.scheduler.nickname(address),
                    js.challenge.challenge_id,
                    js.hashrate.unwrap_or(0.0),
                    js.tries
                ));
            }
        }

        if !hashrates.is_empty() {
            let sum: f64 = hashrates.iter().sum();
            let avg = sum / hashrates.len() as f64;
            let max = hashrates.iter().cloned().fold(f64::MIN, f64::max);
            let min = hashrates.iter().cloned().fold(f64::MAX, f64::min);
            msg.push("-".repeat(21));
            msg.push(format!("sum: {:.0} H/s", sum));
            msg.push(format!("avg: {:.0} H/s | max: {:.0} H/s | min: {:.0} H/s", avg, max, min));
        }

        self.event_log.log(&msg.join("\n"), LogType::Hashrate, None);
    }

    fn show_statistics(&self) {
        let mut msg = vec!["=== [S]tatistics ===".to_string()];
        for address in &self.addresses {
            match self.runtime.block_on(self.rpc.get_statistics(address)) {
                Ok(resp) => msg.push(format!(
                    "[{}] solved={:?} invalid={:?} pending={:?}",
                    self.scheduler.nickname(address),
                    resp.solved,
                    resp.invalid,
                    resp.pending
                )),
                Err(e) => msg.push(format!("[{}] Error: {}", self.scheduler.nickname(address), e)),
            }
        }
        self.event_log.log(&msg.join("\n"), LogType::Statistics, None);
    }

    fn show_system_metrics(&self) {
        let snapshot = {
            let mut system = self.system.lock().unwrap();
            SystemMetrics::from_system(&mut system)
        };

        self.event_log.log(
            &format!(
                "=== System [M]etrics ===\nmemory used: {:.1}% ({} / {} bytes)\ncpu: {:.1}%",
                snapshot.memory_percent, snapshot.memory_used_bytes, snapshot.memory_total_bytes, snapshot.cpu_percent
            ),
            LogType::SystemMetrics,
            None,
        );
    }

    fn show_rom_cache_status(&self) {
        let status = self.rom_cache.status();
        let total_gb = status.values().sum::<usize>() as f64 / (1024.0 * 1024.0 * 1024.0);
        self.event_log.log(
            &format!("=== [R]OM Cache Status ===\nnum: {}\nused: {:.2} GiB", status.len(), total_gb),
            LogType::RomCacheStatus,
            None,
        );
    }

    fn prune_rom_cache(&self) {
        let mut needed = std::collections::HashSet::new();
        for address in &self.addresses {
            let challenges = self
                .runtime
                .block_on(self.tracker.get_challenges(address, &[WorkStatus::Open, WorkStatus::Invalid]))
                .unwrap_or_default();
            needed.extend(challenges.into_iter().map(|c| c.no_pre_mine));
        }

        let dropped = self.rom_cache.maintain(&needed);
        self.event_log.log(
            &format!("=== ROM Cache Maintenance ===\n{} ROM caches have been cleared.", dropped.len()),
            LogType::RomCacheMaintenance,
            None,
        );
    }

    fn check_memory_pressure(&self) {
        let snapshot = {
            let mut system = self.system.lock().unwrap();
            SystemMetrics::from_system(&mut system)
        };

        let status = self.rom_cache.status();
        let avg_size = if status.is_empty() {
            0
        } else {
            status.values().sum::<usize>() as u64 / status.len() as u64
        };

        if snapshot.memory_pressure_high() || snapshot.memory_too_low_for_rom(avg_size) {
            self.rom_cache.clear_all();
            self.event_log.log(
                "=== ROM Cache Maintenance ===\nmemory pressure detected, all ROM caches cleared.",
                LogType::RomCacheMaintenance,
                None,
            );
        }
    }
}

fn thread_spawn_stdin_reader(tx: mpsc::Sender<String>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}
