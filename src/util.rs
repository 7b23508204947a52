//! Small helpers shared across the crate and its tests.

use std::fs::metadata;
use std::path::Path;

/// Deterministically derive 8 pseudo-random bytes from a counter, via
/// SplitMix64. Used by tests and benchmarks to generate reproducible
/// payloads without pulling `rand` into the library itself.
#[inline]
pub fn u64_to_rand_bytes(value: u64, buffer: &mut [u8; 8]) {
  let mut z = value.wrapping_add(0x9e3779b97f4a7c15);
  z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
  let z = z ^ (z >> 31);
  buffer.copy_from_slice(&z.to_le_bytes());
}

/// Size in bytes of the file at `path`, or 0 if it doesn't exist yet.
pub fn file_size<P: AsRef<Path>>(path: P) -> u64 {
  metadata(path).map(|m| m.len()).unwrap_or(0)
}
