//! Bucket functions mapping access counts onto histogram indices.
//!
//! Hotness buckets are exponentially sized (0, 1, 2-3, 4-7, ...) so hot and
//! cold units separate with O(1) classification regardless of magnitude.

use tierd_core::{MAX_BUCKET, MAX_SKEW_BUCKET};

/// Number of hotness buckets.
pub const HOTNESS_BUCKETS: usize = MAX_BUCKET as usize + 1;
/// Number of skew buckets.
pub const SKEW_BUCKETS: usize = MAX_SKEW_BUCKET as usize + 1;

const SKEW_LINEAR_LIMIT: u64 = 1024;
const SKEW_MAX_STEPS: u64 = 9;

/// Hotness bucket of a decayed total: `floor(log2(n + 1))`, saturating at 15.
#[must_use]
pub fn bucket(n: u64) -> u8 {
    let log = 63 - n.saturating_add(1).leading_zeros();
    log.min(u32::from(MAX_BUCKET)) as u8
}

/// Decayed total that lands a record in bucket `b` (`2^b`, or 0 for bucket 0).
#[must_use]
pub fn threshold_value(b: u8) -> u64 {
    if b == 0 {
        0
    } else {
        1u64 << b.min(MAX_BUCKET)
    }
}

/// Skew bucket of a squared-hotness value.
///
/// Values below 1024 map to their bit length (buckets 0-10); from 1024 on,
/// every additional 1024 moves one bucket up, saturating at 20.
#[must_use]
pub fn skew_bucket(value: u64) -> u8 {
    if value < SKEW_LINEAR_LIMIT {
        (64 - value.leading_zeros()) as u8
    } else {
        let steps = ((value - 1) / SKEW_LINEAR_LIMIT).min(SKEW_MAX_STEPS);
        11 + steps as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_small_values() {
        assert_eq!(bucket(0), 0);
        assert_eq!(bucket(1), 1);
        assert_eq!(bucket(2), 1);
        assert_eq!(bucket(3), 2);
        assert_eq!(bucket(6), 2);
        assert_eq!(bucket(7), 3);
    }

    #[test]
    fn test_bucket_powers() {
        for k in 1..=15u32 {
            assert_eq!(bucket((1u64 << k) - 1), k as u8, "k = {k}");
        }
    }

    #[test]
    fn test_bucket_saturates() {
        assert_eq!(bucket((1 << 16) - 1), 15);
        assert_eq!(bucket(1 << 20), 15);
        assert_eq!(bucket(u64::MAX), 15);
    }

    #[test]
    fn test_threshold_value_round_trip() {
        assert_eq!(threshold_value(0), 0);
        for b in 1..=15u8 {
            assert_eq!(bucket(threshold_value(b)), b, "b = {b}");
        }
    }

    #[test]
    fn test_skew_bucket_ranges() {
        assert_eq!(skew_bucket(0), 0);
        assert_eq!(skew_bucket(1), 1);
        assert_eq!(skew_bucket(3), 2);
        assert_eq!(skew_bucket(1023), 10);
        assert_eq!(skew_bucket(1024), 11);
        assert_eq!(skew_bucket(2048), 12);
        assert_eq!(skew_bucket(2049), 13);
        assert_eq!(skew_bucket(10 * 1024), 20);
        assert_eq!(skew_bucket(u64::MAX), 20);
    }

    #[test]
    fn test_skew_bucket_monotonic() {
        let mut prev = 0;
        for v in (0..20_000u64).step_by(7) {
            let b = skew_bucket(v);
            assert!(b >= prev);
            assert!(usize::from(b) < SKEW_BUCKETS);
            prev = b;
        }
    }
}
