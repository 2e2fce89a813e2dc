//! Canonical backend key encoding. Primary rows, secondary index entries,
//! and store metadata share one backend (spec §9), so each gets its own
//! byte prefix to keep them from colliding with an application key that
//! happens to look like `i/...`.

pub const PRIMARY_PREFIX: &[u8] = b"p/";
pub const META_PREFIX: &[u8] = b"m/";

pub fn encode_primary_key(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PRIMARY_PREFIX.len() + key.len());
    out.extend_from_slice(PRIMARY_PREFIX);
    out.extend_from_slice(key.as_bytes());
    out
}

pub fn decode_primary_key(encoded: &[u8]) -> Option<String> {
    let suffix = encoded.strip_prefix(PRIMARY_PREFIX)?;
    String::from_utf8(suffix.to_vec()).ok()
}

pub fn meta_key(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(META_PREFIX.len() + name.len());
    out.extend_from_slice(META_PREFIX);
    out.extend_from_slice(name.as_bytes());
    out
}
