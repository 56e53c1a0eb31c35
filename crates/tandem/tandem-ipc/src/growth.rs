//! Capacity arithmetic for growing a data segment.

/// Returns the capacity a segment must grow to so that `needed` bytes fit.
///
/// The capacity is doubled until it holds `needed`, so every capacity a
/// segment ever has is `initial * 2^k`. A capacity that already fits is
/// returned unchanged: segments never shrink.
///
/// Returns `None` if doubling would overflow `u64`.
///
/// # Examples
///
/// ```
/// use tandem_ipc::grown_capacity;
/// assert_eq!(grown_capacity(4096, 100), Some(4096));
/// assert_eq!(grown_capacity(4096, 4097), Some(8192));
/// assert_eq!(grown_capacity(4096, 10 * 1024 * 1024), Some(16 * 1024 * 1024));
/// ```
pub fn grown_capacity(capacity: u64, needed: u64) -> Option<u64> {
    let mut cap = capacity.max(1);
    while cap < needed {
        cap = cap.checked_mul(2)?;
    }
    Some(cap)
}
