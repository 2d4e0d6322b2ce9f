use std::fmt::Write as _;

/// Parses a 4-byte hex difficulty mask into its `u32` value.
///
/// Only the first 8 hex characters are significant; the server always sends
/// exactly 8, but callers that received a longer string (e.g. the full
/// challenge hash prefix) are tolerated.
pub fn difficulty_value(difficulty_hex: &str) -> Option<u32> {
    let slice = &difficulty_hex[..difficulty_hex.len().min(8)];
    u32::from_str_radix(slice, 16).ok()
}

/// A hash meets the difficulty iff every zero bit of `difficulty_value` is
/// also zero in the hash's first 4 bytes (big-endian).
pub fn meets_difficulty(hash_hex: &str, difficulty_value: u32) -> bool {
    let slice = &hash_hex[..hash_hex.len().min(8)];
    match u32::from_str_radix(slice, 16) {
        Ok(hash_value) => (hash_value | difficulty_value) == difficulty_value,
        Err(_) => false,
    }
}

/// Builds the per-`(address, challenge_id)` preimage suffix shared by every
/// nonce trial, so callers only need to prepend the per-trial nonce hex.
pub fn preimage_base(
    address: &str,
    challenge_id: &str,
    difficulty: &str,
    no_pre_mine: &str,
    latest_submission: &str,
    no_pre_mine_hour: &str,
) -> String {
    let mut base = String::with_capacity(
        address.len()
            + challenge_id.len()
            + difficulty.len()
            + no_pre_mine.len()
            + latest_submission.len()
            + no_pre_mine_hour.len(),
    );
    base.push_str(address);
    base.push_str(challenge_id);
    base.push_str(difficulty);
    base.push_str(no_pre_mine);
    base.push_str(latest_submission);
    base.push_str(no_pre_mine_hour);
    base
}

/// Builds a full preimage by prefixing `hex16(nonce)` to a precomputed base.
pub fn preimage(nonce: u64, base: &str) -> String {
    let mut out = String::with_capacity(16 + base.len());
    write!(&mut out, "{:016x}", nonce).expect("writing to a String never fails");
    out.push_str(base);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meets_difficulty_rejects_extra_bits() {
        let d = difficulty_value("0fff0000").unwrap();
        assert!(!meets_difficulty("1234abcd00000000000000000000000000000000000000000000000000000000", d));
    }

    #[test]
    fn meets_difficulty_accepts_subset_bits() {
        let d = difficulty_value("0fff0000").unwrap();
        assert!(meets_difficulty("0abc0000000000000000000000000000000000000000000000000000000000000", d));
    }

    #[test]
    fn meets_difficulty_all_ones_mask_accepts_anything() {
        let d = difficulty_value("ffffffff").unwrap();
        assert!(meets_difficulty("ffffffff000000000000000000000000000000000000000000000000000000000", d));
        assert!(meets_difficulty("00000000000000000000000000000000000000000000000000000000000000000", d));
    }

    #[test]
    fn preimage_is_injective_in_nonce() {
        let base = preimage_base("addr1", "chal1", "0000ffff", "deadbeef", "2025-10-30T23:59:59Z", "1730000000");
        let a = preimage(7, &base);
        let b = preimage(8, &base);
        assert_ne!(a, b);
        assert_eq!(a.len(), 16 + base.len());
        assert!(a.starts_with("0000000000000007"));
    }
}
