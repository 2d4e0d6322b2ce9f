use std::collections::HashMap;
use std::sync::Arc;

use ashmaize::{hash, Rom, RomGenerationType};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::MinerError;

const ROM_SIZE: usize = 1024 * 1024 * 1024;
const ROM_PRE_SIZE: usize = 16 * 1024 * 1024;
const ROM_MIXING_NUMBERS: u32 = 4;
const NB_LOOPS: u32 = 8;
const NB_INSTRS: u32 = 256;

/// The batched-hash capability the solver needs. Implemented by the real
/// ROM-backed hasher and, in tests, by fakes that don't touch `ashmaize`.
pub trait HashBatch: Send + Sync {
    fn hash_batch(&self, preimages: &[String]) -> Vec<String>;
}

pub struct AshMaizeRom {
    inner: Rom,
}

impl HashBatch for AshMaizeRom {
    fn hash_batch(&self, preimages: &[String]) -> Vec<String> {
        preimages
            .iter()
            .map(|p| hex::encode(hash(p.as_bytes(), &self.inner, NB_LOOPS, NB_INSTRS)))
            .collect()
    }
}

/// Builds a `HashBatch` from a ROM key. Abstracted so tests can substitute a
/// cheap builder and count invocations without paying for a real ~1GiB ROM.
pub trait RomBuilder: Send + Sync {
    fn build(&self, key: &str) -> Result<Arc<dyn HashBatch>, MinerError>;
}

pub struct AshMaizeRomBuilder;

impl RomBuilder for AshMaizeRomBuilder {
    fn build(&self, key: &str) -> Result<Arc<dyn HashBatch>, MinerError> {
        let rom = Rom::new(
            key.as_bytes(),
            RomGenerationType::TwoStep {
                pre_size: ROM_PRE_SIZE,
                mixing_numbers: ROM_MIXING_NUMBERS,
            },
            ROM_SIZE,
        );
        Ok(Arc::new(AshMaizeRom { inner: rom }))
    }
}

/// Process-wide cache of built ROMs, keyed by `no_pre_mine`.
///
/// The map mutex only ever guards inserting a per-key `OnceCell` marker, not
/// the build itself: two concurrent `get` calls on a cold key race to insert
/// the marker, then both block on the *same* `OnceCell::get_or_try_init`, so
/// the build runs exactly once regardless of how many callers arrive while
/// it is in flight. Calls for other keys are never blocked by an in-flight
/// build.
pub struct RomCache {
    builder: Arc<dyn RomBuilder>,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn HashBatch>>>>>,
}

impl RomCache {
    pub fn new(builder: Arc<dyn RomBuilder>) -> Self {
        Self {
            builder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_builder() -> Self {
        Self::new(Arc::new(AshMaizeRomBuilder))
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn HashBatch>, MinerError> {
        let cell = {
            let mut entries = self.entries.lock();
            Arc::clone(
                entries
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        cell.get_or_try_init(|| self.builder.build(key)).cloned()
    }

    /// Drops the given keys from the cache, freeing memory once the last
    /// outstanding `Arc<dyn HashBatch>` handle for them is dropped.
    pub fn drop_keys(&self, keys: &[String]) {
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(key);
        }
    }

    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Snapshot of cached keys to their nominal ROM size, for diagnostics.
    pub fn status(&self) -> HashMap<String, usize> {
        self.entries
            .lock()
            .keys()
            .map(|k| (k.clone(), ROM_SIZE))
            .collect()
    }

    /// Drops every cached key not referenced by `needed_keys`.
    pub fn maintain(&self, needed_keys: &std::collections::HashSet<String>) -> Vec<String> {
        let to_drop: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| !needed_keys.contains(k))
            .collect();
        self.drop_keys(&to_drop);
        to_drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct CountingBuilder {
        calls: AtomicUsize,
    }

    struct DummyHasher;
    impl HashBatch for DummyHasher {
        fn hash_batch(&self, preimages: &[String]) -> Vec<String> {
            vec!["00".to_string(); preimages.len()]
        }
    }

    impl RomBuilder for CountingBuilder {
        fn build(&self, _key: &str) -> Result<Arc<dyn HashBatch>, MinerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(DummyHasher))
        }
    }

    #[test]
    fn concurrent_get_builds_exactly_once_per_key() {
        let builder = Arc::new(CountingBuilder {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(RomCache::new(builder.clone()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get("shared-key").unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(builder.calls.load(Ordering::SeqCst), 1);
        let status = cache.status();
        assert_eq!(status.len(), 1);
    }

    #[test]
    fn maintain_drops_unneeded_keys_only() {
        let builder = Arc::new(CountingBuilder {
            calls: AtomicUsize::new(0),
        });
        let cache = RomCache::new(builder);
        cache.get("keep").unwrap();
        cache.get("drop-me").unwrap();

        let needed: std::collections::HashSet<String> = ["keep".to_string()].into_iter().collect();
        let dropped = cache.maintain(&needed);

        assert_eq!(dropped, vec!["drop-me".to_string()]);
        assert_eq!(cache.keys(), vec!["keep".to_string()]);
    }
}
