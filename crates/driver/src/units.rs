//! Quotas are kept in gigabytes (2^30 bytes) by the realm while the CO
//! talks in bytes.

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

#[inline]
pub fn bytes_to_gb(bytes: i64) -> f64 {
  bytes as f64 / BYTES_PER_GB
}

/// Rounds to the nearest byte. Negative input yields zero.
#[inline]
pub fn gb_to_bytes(gb: f64) -> i64 {
  (gb * BYTES_PER_GB).round().max(0.0) as i64
}

/// Formats a gigabyte value for the realm CLI, without trailing zeros.
pub fn format_gb(gb: f64) -> String {
  format!("{}", gb)
}
