use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::difficulty::{difficulty_value, meets_difficulty, preimage, preimage_base};
use crate::error::MinerError;
use crate::model::{Challenge, JobStats, Solution, WorkerProfile};
use crate::nonce::NonceSource;
use crate::rom::RomCache;

const BATCH_SIZE_CANDIDATES: [usize; 5] = [100, 500, 1_000, 5_000, 10_000];
const SEARCH_PASSES: usize = 3;

/// Per-wallet PoW search over a ROM-backed batched hash function, with
/// adaptive batch-size tuning and live stats exposed via `WorkerProfile`.
pub struct Solver {
    stop: AtomicBool,
    rom_cache: Arc<RomCache>,
    profiles: RwLock<HashMap<String, Arc<Mutex<WorkerProfile>>>>,
    preimage_base_cache: Mutex<HashMap<(String, String), String>>,
}

impl Solver {
    pub fn new(rom_cache: Arc<RomCache>) -> Self {
        Self {
            stop: AtomicBool::new(false),
            rom_cache,
            profiles: RwLock::new(HashMap::new()),
            preimage_base_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    fn profile_for(&self, address: &str) -> Arc<Mutex<WorkerProfile>> {
        if let Some(p) = self.profiles.read().get(address) {
            return Arc::clone(p);
        }
        let mut profiles = self.profiles.write();
        Arc::clone(
            profiles
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(WorkerProfile::default()))),
        )
    }

    pub fn job_stats_snapshot(&self, address: &str) -> Option<JobStats> {
        self.profiles
            .read()
            .get(address)
            .and_then(|p| p.lock().job_stats.clone())
    }

    pub fn worker_profile_snapshot(&self, address: &str) -> WorkerProfile {
        self.profiles
            .read()
            .get(address)
            .map(|p| p.lock().clone())
            .unwrap_or_default()
    }

    /// Searches for a nonce satisfying `challenge`'s difficulty, returning
    /// `Ok(None)` if the challenge expires or the solver is stopped before a
    /// solution is found.
    pub fn solve(&self, address: &str, challenge: &Challenge) -> Result<Option<Solution>, MinerError> {
        self.solve_with_nonces(address, challenge, NonceSource::new())
    }

    fn solve_with_nonces(
        &self,
        address: &str,
        challenge: &Challenge,
        mut nonces: NonceSource,
    ) -> Result<Option<Solution>, MinerError> {
        let profile = self.profile_for(address);
        {
            let mut p = profile.lock();
            p.job_stats = Some(JobStats {
                challenge: challenge.clone(),
                tries: 0,
                hashrate: None,
                started_at: Utc::now(),
                updated_at: Utc::now(),
            });
        }

        let cache_key = (address.to_string(), challenge.challenge_id.clone());
        let base = {
            let mut cache = self.preimage_base_cache.lock();
            cache
                .entry(cache_key)
                .or_insert_with(|| {
                    preimage_base(
                        address,
                        &challenge.challenge_id,
                        &challenge.difficulty,
                        &challenge.no_pre_mine,
                        &challenge.latest_submission,
                        &challenge.no_pre_mine_hour,
                    )
                })
                .clone()
        };

        let result = (|| -> Result<Option<Solution>, MinerError> {
            let rom = self.rom_cache.get(&challenge.no_pre_mine)?;
            let difficulty = difficulty_value(&challenge.difficulty).unwrap_or(0);

            // Search phase: sample every candidate batch size a few times to
            // find the throughput-maximizing one for this machine/ROM.
            'search: for _ in 0..SEARCH_PASSES {
                for &batch_size in &BATCH_SIZE_CANDIDATES {
                    if !challenge.is_valid() {
                        break 'search;
                    }
                    if let Some(solution) = self.try_once_with_batch(
                        &profile,
                        &base,
                        rom.as_ref(),
                        difficulty,
                        batch_size,
                        &mut nonces,
                        true,
                    ) {
                        return Ok(Some(solution));
                    }
                }
            }

            let best_batch_size = {
                let p = profile.lock();
                p.batch_size_search
                    .iter()
                    .filter(|(_, scores)| !scores.is_empty())
                    .map(|(bs, scores)| (*bs, scores.iter().sum::<f64>() / scores.len() as f64))
                    .max_by(|(bs_a, hr_a), (bs_b, hr_b)| {
                        hr_a.partial_cmp(hr_b)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(bs_a.cmp(bs_b))
                    })
                    .map(|(bs, _)| bs)
            };
            let best_batch_size = match best_batch_size {
                Some(bs) => bs,
                None => return Ok(None),
            };
            profile.lock().best_batch_size = Some(best_batch_size);

            // Steady phase: keep mining at the chosen batch size until a
            // solution appears, the challenge expires, or we're told to stop.
            while self.is_running() {
                if !challenge.is_valid() {
                    break;
                }
                if let Some(solution) = self.try_once_with_batch(
                    &profile,
                    &base,
                    rom.as_ref(),
                    difficulty,
                    best_batch_size,
                    &mut nonces,
                    false,
                ) {
                    return Ok(Some(solution));
                }
            }

            Ok(None)
        })();

        profile.lock().clear();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn try_once_with_batch(
        &self,
        profile: &Mutex<WorkerProfile>,
        base: &str,
        rom: &dyn crate::rom::HashBatch,
        difficulty: u32,
        batch_size: usize,
        nonces: &mut NonceSource,
        is_search: bool,
    ) -> Option<Solution> {
        let start = Instant::now();

        let preimages: Vec<String> = (0..batch_size)
            .map(|_| preimage(nonces.next_u64(), base))
            .collect();
        let hashes = rom.hash_batch(&preimages);

        for (idx, hash_hex) in hashes.iter().enumerate() {
            if meets_difficulty(hash_hex, difficulty) {
                let nonce_hex = preimages[idx][..16].to_string();
                let mut p = profile.lock();
                let tries = {
                    let job_stats = p.job_stats.as_mut().expect("job_stats set at solve() entry");
                    job_stats.tries += (idx + 1) as u64;
                    job_stats.updated_at = Utc::now();
                    job_stats.tries
                };
                return Some(Solution {
                    nonce_hex,
                    hash_hex: hash_hex.clone(),
                    tries,
                });
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        let hashrate = if elapsed > 0.0 {
            batch_size as f64 / elapsed
        } else {
            f64::INFINITY
        };

        let mut p = profile.lock();
        {
            let job_stats = p.job_stats.as_mut().expect("job_stats set at solve() entry");
            job_stats.tries += batch_size as u64;
            job_stats.updated_at = Utc::now();
            job_stats.hashrate = Some(hashrate);
        }
        if is_search {
            p.batch_size_search.entry(batch_size).or_default().push(hashrate);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::{HashBatch, RomBuilder};

    /// Deterministic fake: reports a hit iff the preimage's 16-char nonce
    /// prefix is exactly `"0000000000000007"`.
    struct FakeRom;
    impl HashBatch for FakeRom {
        fn hash_batch(&self, preimages: &[String]) -> Vec<String> {
            preimages
                .iter()
                .map(|p| {
                    if p.starts_with("0000000000000007") {
                        format!("00000000{}", "ff".repeat(28))
                    } else {
                        "ffffffff".to_string() + &"00".repeat(28)
                    }
                })
                .collect()
        }
    }

    struct FakeRomBuilder;
    impl RomBuilder for FakeRomBuilder {
        fn build(&self, _key: &str) -> Result<Arc<dyn HashBatch>, MinerError> {
            Ok(Arc::new(FakeRom))
        }
    }

    fn open_challenge() -> Challenge {
        Challenge {
            challenge_id: "**D21C10".to_string(),
            day: 21,
            challenge_number: 10,
            difficulty: "00000000".to_string(),
            no_pre_mine: "deadbeef".to_string(),
            no_pre_mine_hour: "1730000000".to_string(),
            latest_submission: (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        }
    }

    #[test]
    fn solve_finds_the_expected_nonce_deterministically() {
        let rom_cache = Arc::new(RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Solver::new(rom_cache);
        let challenge = open_challenge();

        // Sequential nonces 0,1,2,...; the fake ROM hits at nonce 7, which
        // is the 8th draw of the first search-phase batch (batch_size=100).
        let solution = solver
            .solve_with_nonces("addr1", &challenge, NonceSource::sequential_from(0))
            .unwrap()
            .expect("a solution should be found");

        assert_eq!(solution.nonce_hex, "0000000000000007");
        assert_eq!(solution.hash_hex, format!("00000000{}", "ff".repeat(28)));
        assert_eq!(solution.tries, 8);
    }

    #[test]
    fn solve_returns_none_when_challenge_already_expired() {
        let rom_cache = Arc::new(RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Solver::new(rom_cache);
        let mut challenge = open_challenge();
        challenge.latest_submission = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();

        let result = solver.solve("addr1", &challenge).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn worker_profile_is_cleared_after_solve_completes() {
        let rom_cache = Arc::new(RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Solver::new(rom_cache);
        let challenge = open_challenge();

        solver
            .solve_with_nonces("addr1", &challenge, NonceSource::sequential_from(0))
            .unwrap();

        let profile = solver.worker_profile_snapshot("addr1");
        assert!(profile.job_stats.is_none());
    }

    #[test]
    fn stop_prevents_the_steady_phase_from_ever_starting() {
        let rom_cache = Arc::new(RomCache::new(Arc::new(FakeRomBuilder)));
        let solver = Solver::new(rom_cache);
        solver.stop();
        assert!(!solver.is_running());

        // Nonces that never satisfy the fake ROM's hit condition, so the only
        // way this call can return is via the is_running() check up front.
        let challenge = open_challenge();
        let result = solver.solve_with_nonces("addr1", &challenge, NonceSource::sequential_from(1_000_000));
        assert!(matches!(result, Ok(None)));
    }
}
