use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tokio::runtime::Handle;

use crate::logging::{EventLog, LogType};
use crate::model::{Challenge, SolutionStatus};
use crate::rpc_client::ScavengerRpc;
use crate::solver::Solver;
use crate::tracker::Tracker;

/// A binary run/pause gate one per wallet. Workers block in `wait()` at the
/// top of each loop iteration; `Scheduler` flips it from the outside.
struct ActiveEvent {
    active: Mutex<bool>,
    condvar: Condvar,
}

impl ActiveEvent {
    fn new(initially_active: bool) -> Self {
        Self {
            active: Mutex::new(initially_active),
            condvar: Condvar::new(),
        }
    }

    fn set(&self) {
        let mut guard = self.active.lock();
        if !*guard {
            *guard = true;
            self.condvar.notify_all();
        }
    }

    fn clear(&self) {
        *self.active.lock() = false;
    }

    fn is_set(&self) -> bool {
        *self.active.lock()
    }

    /// Blocks until active, re-checking on every wake (guards against
    /// spurious wakeups and against being cleared again before we wake).
    fn wait(&self, stop: &AtomicBool) {
        let mut guard = self.active.lock();
        while !*guard && !stop.load(Ordering::SeqCst) {
            self.condvar.wait_for(&mut guard, Duration::from_millis(500));
        }
    }
}

/// Nickname used to suffix per-wallet log files, stable for the lifetime of
/// a `Scheduler` (index in registration order).
fn nickname_for(address: &str, index: usize) -> String {
    let short = &address[..address.len().min(10)];
    format!("{}-#{}", short, index)
}

/// Drives N per-wallet mining loops with a configurable concurrency cap K.
/// Owns no domain logic of its own beyond wallet selection and wiring the
/// per-wallet loop together; the actual PoW search lives in `Solver`.
pub struct Scheduler {
    tracker: Arc<Tracker>,
    solver: Arc<Solver>,
    rpc: Arc<dyn ScavengerRpc>,
    events: RwLock<HashMap<String, Arc<ActiveEvent>>>,
    nicknames: HashMap<String, String>,
    addresses: Vec<String>,
    event_log: Arc<EventLog>,
    runtime: Handle,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        tracker: Arc<Tracker>,
        solver: Arc<Solver>,
        rpc: Arc<dyn ScavengerRpc>,
        event_log: Arc<EventLog>,
        runtime: Handle,
        addresses: Vec<String>,
        num_threads: Option<usize>,
    ) -> Self {
        let mut events = HashMap::new();
        let mut nicknames = HashMap::new();
        // All wallets start active when K is unset; otherwise selection
        // happens explicitly via the first set_active_addresses call.
        let start_active = num_threads.is_none();
        for (idx, addr) in addresses.iter().enumerate() {
            events.insert(addr.clone(), Arc::new(ActiveEvent::new(start_active)));
            nicknames.insert(addr.clone(), nickname_for(addr, idx));
        }

        Self {
            tracker,
            solver,
            rpc,
            events: RwLock::new(events),
            nicknames,
            addresses,
            event_log,
            runtime,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.solver.stop();
        for event in self.events.read().values() {
            event.set();
        }
    }

    pub fn nickname(&self, address: &str) -> &str {
        self.nicknames.get(address).map(|s| s.as_str()).unwrap_or(address)
    }

    /// Recomputes which of `num_threads` wallets should be active, ranking
    /// by count of outstanding (`Found` or `Invalid`) work. A no-op when
    /// `num_threads` is `None`: every wallet stays active.
    pub fn set_active_addresses(&self, num_threads: Option<usize>) {
        let Some(num_threads) = num_threads else {
            return;
        };

        // "Pending" generalizes the source lineage's Found-or-Invalid count to
        // every not-yet-validated work item: accepted but unresolved opportunity.
        let mut counts: Vec<(String, usize)> = Vec::with_capacity(self.addresses.len());
        for addr in &self.addresses {
            let pending = self.runtime.block_on(self.tracker.get_challenges(
                addr,
                &[
                    crate::model::WorkStatus::Open,
                    crate::model::WorkStatus::Solving,
                    crate::model::WorkStatus::Invalid,
                ],
            ));
            counts.push((addr.clone(), pending.map(|v| v.len()).unwrap_or(0)));
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let active_set: std::collections::HashSet<&str> =
            counts.iter().take(num_threads).map(|(a, _)| a.as_str()).collect();

        let mut changed = false;
        let mut msg = vec![format!("=== Active Addresses (<= {}) ===", num_threads)];
        let events = self.events.read();
        for addr in &self.addresses {
            let event = &events[addr];
            let should_be_active = active_set.contains(addr.as_str());
            if should_be_active && !event.is_set() {
                event.set();
                changed = true;
            } else if !should_be_active && event.is_set() {
                event.clear();
                changed = true;
            }
            msg.push(format!(
                "[{}]: {}",
                self.nickname(addr),
                if should_be_active { "*active*" } else { "" }
            ));
        }
        drop(events);

        if changed {
            self.event_log.log(&msg.join("\n"), LogType::ActiveAddresses, None);
        }
    }

    /// Spawns one OS thread per wallet running `mine_loop`, plus returns
    /// their join handles so the caller (the maintenance loop) can wait on
    /// an orderly shutdown.
    pub fn spawn_workers(self: &Arc<Self>, num_threads: Option<usize>) -> Vec<thread::JoinHandle<()>> {
        self.addresses
            .iter()
            .cloned()
            .map(|address| {
                let scheduler = Arc::clone(self);
                thread::spawn(move || scheduler.mine_loop(&address, num_threads))
            })
            .collect()
    }

    fn mine_loop(&self, address: &str, num_threads: Option<usize>) {
        let event = Arc::clone(&self.events.read()[address]);

        while !self.stop.load(Ordering::SeqCst) {
            event.wait(&self.stop);
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            let challenge = self.runtime.block_on(self.tracker.oldest_unsolved_challenge(address));
            match challenge {
                Ok(Some(challenge)) => {
                    self.solve_challenge(address, &challenge);
                    self.set_active_addresses(num_threads);
                }
                Ok(None) => thread::sleep(Duration::from_secs(10)),
                Err(e) => {
                    log::error!("[{}] tracker error fetching worklist: {}", self.nickname(address), e);
                    thread::sleep(Duration::from_secs(10));
                }
            }

            thread::sleep(Duration::from_millis(500));
        }
    }

    fn solve_challenge(&self, address: &str, challenge: &Challenge) {
        let nickname = self.nickname(address).to_string();

        self.event_log.log(
            &format!(
                "=== [{}] Start this Challenge ===\naddress: {}\nchallenge: {}",
                nickname, address, challenge.challenge_id
            ),
            LogType::StartNewChallenge,
            Some(&nickname),
        );

        let cached = self
            .runtime
            .block_on(self.tracker.get_found_solution(address, &challenge.challenge_id))
            .unwrap_or(None);

        let (solution, was_cached) = match cached {
            Some(solution) => (solution, true),
            None => {
                if let Err(e) = self.runtime.block_on(self.tracker.add_work(
                    address,
                    &challenge.challenge_id,
                    crate::model::WorkStatus::Solving,
                )) {
                    log::error!("[{}] failed to record Solving work: {}", nickname, e);
                    return;
                }

                match self.solver.solve(address, challenge) {
                    Ok(Some(solution)) => {
                        if let Err(e) = self.runtime.block_on(self.tracker.add_solution_found(
                            address,
                            &challenge.challenge_id,
                            &solution,
                        )) {
                            log::error!("[{}] failed to record found solution: {}", nickname, e);
                            return;
                        }
                        (solution, false)
                    }
                    Ok(None) => {
                        self.event_log.log(
                            &format!(
                                "=== [{}] Challenge Expired or Cancelled ===\naddress: {}\nchallenge: {}",
                                nickname, address, challenge.challenge_id
                            ),
                            LogType::StartNewChallenge,
                            Some(&nickname),
                        );
                        return;
                    }
                    Err(e) => {
                        log::error!("[{}] solver error on challenge {}: {}", nickname, challenge.challenge_id, e);
                        return;
                    }
                }
            }
        };

        self.event_log.log(
            &format!(
                "=== [{}] {} Found ===\naddress: {}\nchallenge: {}\nnonce: {}\ntries: {}",
                nickname,
                if was_cached { "Cached Solution" } else { "Solution" },
                address,
                challenge.challenge_id,
                solution.nonce_hex,
                solution.tries
            ),
            LogType::SolutionFound,
            Some(&nickname),
        );

        if !self.solver.is_running() {
            return;
        }

        let reply = self
            .runtime
            .block_on(self.rpc.submit_solution(address, &challenge.challenge_id, &solution.nonce_hex));

        match reply {
            Ok(resp) => {
                let validated = resp.crypto_receipt.is_some();
                let update = self.runtime.block_on(self.tracker.update_solution_submission_result(
                    address,
                    &challenge.challenge_id,
                    &solution.nonce_hex,
                    validated,
                ));
                if let Err(e) = update {
                    log::error!("[{}] failed to persist submission result: {}", nickname, e);
                    return;
                }

                let outcome = if validated {
                    "Solution Validated".to_string()
                } else {
                    format!(
                        "Solution Invalid. code={:?} message={:?}",
                        resp.status_code, resp.message
                    )
                };
                self.event_log.log(
                    &format!("=== [{}] Solution Submission ===\n{}", nickname, outcome),
                    LogType::SolutionSubmission,
                    Some(&nickname),
                );
            }
            Err(e) => {
                self.event_log.log(
                    &format!(
                        "=== [{}] Solution Submission Error ===\naddress: {}\nchallenge: {}\nerror: {}",
                        nickname, address, challenge.challenge_id, e
                    ),
                    LogType::SolutionSubmissionError,
                    Some(&nickname),
                );
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.events.read().values().filter(|e| e.is_set()).count()
    }

    pub fn is_active(&self, address: &str) -> bool {
        self.events.read().get(address).map(|e| e.is_set()).unwrap_or(false)
    }
}

// Kept for symmetry with the worklist query's status filter; referenced so
// `SolutionStatus` stays imported where §4.5's "pending" definition
// (Found or Invalid) is read from the source lineage in DESIGN.md.
#[allow(dead_code)]
const _PENDING_STATUSES: [SolutionStatus; 2] = [SolutionStatus::Found, SolutionStatus::Invalid];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{HashBatch, RomBuilder};
    use crate::rpc_client::{BoxFuture, SubmitResponse};
    use std::sync::atomic::AtomicUsize;

    /// Difficulty `"ffffffff"` accepts every hash, so this fake reports a hit
    /// on the very first trial regardless of which (real, random) nonce the
    /// solver happens to draw.
    struct FakeRom;
    impl HashBatch for FakeRom {
        fn hash_batch(&self, preimages: &[String]) -> Vec<String> {
            preimages.iter().map(|_| format!("00000000{}", "ff".repeat(28))).collect()
        }
    }
    struct FakeRomBuilder;
    impl RomBuilder for FakeRomBuilder {
        fn build(&self, _key: &str) -> Result<Arc<dyn HashBatch>, crate::error::MinerError> {
            Ok(Arc::new(FakeRom))
        }
    }

    struct FakeRpc {
        submissions: AtomicUsize,
    }
    impl ScavengerRpc for FakeRpc {
        fn get_challenge(&self) -> BoxFuture<'_, Result<crate::rpc_client::ChallengeResponse, crate::error::MinerError>> {
            Box::pin(async { unimplemented!() })
        }
        fn submit_solution<'a>(
            &'a self,
            _address: &'a str,
            _challenge_id: &'a str,
            _nonce: &'a str,
        ) -> BoxFuture<'a, Result<SubmitResponse, crate::error::MinerError>> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Ok(SubmitResponse {
                    crypto_receipt: Some(crate::rpc_client::CryptoReceipt {
                        preimage: "p".into(),
                        timestamp: "t".into(),
                        signature: "s".into(),
                    }),
                    status_code: None,
                    message: None,
                })
            })
        }
    }

    fn open_challenge(id: &str) -> Challenge {
        Challenge {
            challenge_id: id.to_string(),
            day: 1,
            challenge_number: 1,
            difficulty: "ffffffff".to_string(),
            no_pre_mine: "seed".to_string(),
            no_pre_mine_hour: "1".to_string(),
            latest_submission: (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn solve_challenge_validates_on_crypto_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(Tracker::open(&dir.path().join("t.sqlite3")).await.unwrap());
        let rom_cache = Arc::new(crate::rom::RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Arc::new(Solver::new(rom_cache));
        let rpc = Arc::new(FakeRpc { submissions: AtomicUsize::new(0) });
        let event_log = Arc::new(EventLog::new(dir.path().join("logs")));

        let challenge = open_challenge("c1");
        tracker.add_challenge(&challenge).await.unwrap();

        let scheduler = Scheduler::new(
            Arc::clone(&tracker),
            Arc::clone(&solver),
            rpc.clone(),
            event_log,
            tokio::runtime::Handle::current(),
            vec!["addr1".to_string()],
            None,
        );

        scheduler.solve_challenge("addr1", &challenge);

        assert_eq!(rpc.submissions.load(Ordering::SeqCst), 1);
        let status = tracker.work_status("addr1", &challenge.challenge_id).await.unwrap();
        assert_eq!(status, Some(crate::model::WorkStatus::Validated));
    }

    #[tokio::test]
    async fn set_active_addresses_is_a_noop_without_a_cap() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(Tracker::open(&dir.path().join("t.sqlite3")).await.unwrap());
        let rom_cache = Arc::new(crate::rom::RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Arc::new(Solver::new(rom_cache));
        let rpc = Arc::new(FakeRpc { submissions: AtomicUsize::new(0) });
        let event_log = Arc::new(EventLog::new(dir.path().join("logs")));

        let scheduler = Scheduler::new(
            Arc::clone(&tracker),
            solver,
            rpc,
            event_log,
            tokio::runtime::Handle::current(),
            vec!["addr1".to_string(), "addr2".to_string()],
            None,
        );

        // num_threads=None starts every wallet active; set_active_addresses(None)
        // must leave that untouched.
        scheduler.set_active_addresses(None);
        assert!(scheduler.is_active("addr1"));
        assert!(scheduler.is_active("addr2"));
    }

    /// S4: four wallets with pending counts [5,3,2,1] and K=2 ⇒ only the
    /// two wallets with counts 5 and 3 end up active.
    #[tokio::test]
    async fn set_active_addresses_selects_the_top_k_by_pending_count() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(Tracker::open(&dir.path().join("t.sqlite3")).await.unwrap());
        let rom_cache = Arc::new(crate::rom::RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Arc::new(Solver::new(rom_cache));
        let rpc = Arc::new(FakeRpc { submissions: AtomicUsize::new(0) });
        let event_log = Arc::new(EventLog::new(dir.path().join("logs")));

        // Five live challenges shared by every wallet; a wallet's pending
        // count is 5 minus however many of them it has already Validated
        // (a challenge with no Work row at all still counts as pending).
        let challenges: Vec<Challenge> = (0..5).map(|i| open_challenge(&format!("c{}", i))).collect();
        for c in &challenges {
            tracker.add_challenge(c).await.unwrap();
        }

        let addresses = vec![
            "addr-5".to_string(),
            "addr-3".to_string(),
            "addr-2".to_string(),
            "addr-1".to_string(),
        ];
        let validated_counts = [0usize, 2, 3, 4]; // pending = 5 - validated = [5, 3, 2, 1]
        for (addr, &validated) in addresses.iter().zip(validated_counts.iter()) {
            for c in challenges.iter().take(validated) {
                tracker.add_work(addr, &c.challenge_id, crate::model::WorkStatus::Validated).await.unwrap();
            }
        }

        let scheduler = Scheduler::new(
            Arc::clone(&tracker),
            solver,
            rpc,
            event_log,
            tokio::runtime::Handle::current(),
            addresses.clone(),
            Some(2),
        );

        scheduler.set_active_addresses(Some(2));

        assert!(scheduler.is_active("addr-5"));
        assert!(scheduler.is_active("addr-3"));
        assert!(!scheduler.is_active("addr-2"));
        assert!(!scheduler.is_active("addr-1"));
        assert_eq!(scheduler.active_count(), 2);
    }
}
