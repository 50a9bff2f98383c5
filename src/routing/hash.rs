/// Computes a stable 64-bit FNV-1a hash of `bytes`.
///
/// Shard placement must not change across processes or releases, so the
/// standard library's randomly-seeded hasher is not usable here.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hash = 14695981039346656037u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Maps a text shard key onto `[0, bucket_count)`.
pub fn stable_bucket_for(key: &str, bucket_count: u32) -> u32 {
    if bucket_count == 0 {
        return 0;
    }
    (stable_hash(key.as_bytes()) % bucket_count as u64) as u32
}
