// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Constant-time byte string operations.

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use super::PrimitiveError;

fn check_lengths(a: &[u8], b: &[u8]) -> Result<(), PrimitiveError> {
    if a.len() != b.len() {
        return Err(PrimitiveError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Compare two equal-length byte strings without early exit.
pub fn ct_equal(a: &[u8], b: &[u8]) -> Result<bool, PrimitiveError> {
    check_lengths(a, b)?;
    Ok(bool::from(a.ct_eq(b)))
}

/// Copy `src` into `dst` iff `condition`. Every byte of `dst` is written either way.
pub fn ct_copy_if(condition: bool, dst: &mut [u8], src: &[u8]) -> Result<(), PrimitiveError> {
    check_lengths(dst, src)?;
    let choice = Choice::from(condition as u8);
    for (d, s) in dst.iter_mut().zip(src) {
        d.conditional_assign(s, choice);
    }
    Ok(())
}

/// Return a copy of `a` when `condition`, else a copy of `b`.
pub fn ct_select(condition: bool, a: &[u8], b: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    check_lengths(a, b)?;
    let mut out = b.to_vec();
    ct_copy_if(condition, &mut out, a)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn equal_and_unequal() {
        assert!(ct_equal(b"abcd", b"abcd").unwrap());
        assert!(!ct_equal(b"abcd", b"abce").unwrap());
        assert!(ct_equal(b"", b"").unwrap());
    }

    #[test]
    fn length_mismatch_is_an_error_not_false() {
        assert_eq!(
            ct_equal(b"abc", b"abcd"),
            Err(PrimitiveError::LengthMismatch { left: 3, right: 4 })
        );
        assert!(matches!(
            ct_select(true, b"a", b"ab"),
            Err(PrimitiveError::LengthMismatch { .. })
        ));
        let mut dst = [0u8; 2];
        assert!(ct_copy_if(true, &mut dst, b"abc").is_err());
    }

    #[test]
    fn copy_if_respects_condition() {
        let mut dst = [1u8; 4];
        ct_copy_if(false, &mut dst, &[9u8; 4]).unwrap();
        assert_eq!(dst, [1u8; 4]);
        ct_copy_if(true, &mut dst, &[9u8; 4]).unwrap();
        assert_eq!(dst, [9u8; 4]);
    }

    #[test]
    fn select_picks_branch() {
        assert_eq!(ct_select(true, b"aa", b"bb").unwrap(), b"aa");
        assert_eq!(ct_select(false, b"aa", b"bb").unwrap(), b"bb");
    }

    fn mean_runtime(iterations: u32, mut f: impl FnMut()) -> Duration {
        // Warm up caches and branch predictors.
        for _ in 0..iterations / 10 {
            f();
        }
        let start = Instant::now();
        for _ in 0..iterations {
            f();
        }
        start.elapsed() / iterations
    }

    fn assert_within(a: Duration, b: Duration, tolerance: f64) {
        let (a, b) = (a.as_nanos() as f64, b.as_nanos() as f64);
        let hi = a.max(b);
        let lo = a.min(b).max(1.0);
        assert!(
            (hi - lo) / lo < tolerance,
            "runtime differs too much: {a}ns vs {b}ns"
        );
    }

    /// Timing parity between a matching input and one differing in the first byte.
    #[test]
    #[ignore = "timing-sensitive; run on an idle machine with --release"]
    fn equal_runtime_is_input_independent() {
        let secret = [0x5au8; 4096];
        let same = secret;
        let mut early_diff = secret;
        early_diff[0] ^= 0xff;

        let t_same = mean_runtime(10_000, || {
            std::hint::black_box(ct_equal(&secret, std::hint::black_box(&same)).unwrap());
        });
        let t_diff = mean_runtime(10_000, || {
            std::hint::black_box(ct_equal(&secret, std::hint::black_box(&early_diff)).unwrap());
        });
        assert_within(t_same, t_diff, 0.15);

        let a = [1u8; 4096];
        let b = [2u8; 4096];
        let t_a = mean_runtime(10_000, || {
            std::hint::black_box(ct_select(std::hint::black_box(true), &a, &b).unwrap());
        });
        let t_b = mean_runtime(10_000, || {
            std::hint::black_box(ct_select(std::hint::black_box(false), &a, &b).unwrap());
        });
        assert_within(t_a, t_b, 0.15);
    }
}
