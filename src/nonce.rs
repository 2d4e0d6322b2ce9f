use rand::RngCore;

enum Source {
    Buffered { buffer: Vec<u8>, pos: usize },
    /// Deterministic counting source used in tests, where reproducing an
    /// exact nonce/tries combination matters more than real entropy.
    #[cfg(test)]
    Sequential(u64),
}

/// Buffered-entropy 64-bit nonce generator.
///
/// Drawing raw OS entropy per nonce dominates CPU at high hash rates; this
/// refills a byte buffer in bulk and slices 8 bytes per call instead.
pub struct NonceSource {
    source: Source,
}

const BUFFER_SIZE: usize = 65_536;

impl NonceSource {
    pub fn new() -> Self {
        Self {
            source: Source::Buffered {
                buffer: Vec::new(),
                pos: 0,
            },
        }
    }

    #[cfg(test)]
    pub fn sequential_from(start: u64) -> Self {
        Self {
            source: Source::Sequential(start),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        match &mut self.source {
            Source::Buffered { buffer, pos } => {
                if *pos + 8 > buffer.len() {
                    buffer.resize(BUFFER_SIZE, 0);
                    rand::thread_rng().fill_bytes(buffer);
                    *pos = 0;
                }
                let bytes: [u8; 8] = buffer[*pos..*pos + 8].try_into().unwrap();
                *pos += 8;
                u64::from_be_bytes(bytes)
            }
            #[cfg(test)]
            Source::Sequential(next) => {
                let value = *next;
                *next += 1;
                value
            }
        }
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_distinct_values_across_a_refill_boundary() {
        let mut src = NonceSource::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            seen.insert(src.next_u64());
        }
        // Collisions are possible but should be vanishingly rare at this sample size.
        assert!(seen.len() > 9_900);
    }

    #[test]
    fn sequential_source_counts_up_from_start() {
        let mut src = NonceSource::sequential_from(5);
        assert_eq!(src.next_u64(), 5);
        assert_eq!(src.next_u64(), 6);
        assert_eq!(src.next_u64(), 7);
    }
}
