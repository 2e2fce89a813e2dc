//! Secondary index definitions and key-space encoding (spec §3, §4.2).
//!
//! Index entries live in the same backend as primary rows, under a
//! distinct key-space (spec §9): `i/<name>/<secondary>\0<primary>`. The
//! NUL separator can't appear in either component since both are UTF-8
//! strings built from JSON string values and store keys, so it's a safe
//! unambiguous delimiter for splitting the composite key back apart.

use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub key_prefix: String,
    pub json_pointer: String,
}

const SEP: u8 = 0;

/// Byte-key prefix under which all entries of index `name` live.
pub fn index_key_prefix(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 3);
    out.extend_from_slice(b"i/");
    out.extend_from_slice(name.as_bytes());
    out.push(b'/');
    out
}

/// Encodes a full `(secondary, primary)` composite key for index `name`.
pub fn encode_index_key(name: &str, secondary: &str, primary: &str) -> Vec<u8> {
    let mut out = index_key_prefix(name);
    out.extend_from_slice(secondary.as_bytes());
    out.push(SEP);
    out.extend_from_slice(primary.as_bytes());
    out
}

/// Splits an encoded index key (with the `i/<name>/` prefix already
/// stripped) back into `(secondary, primary)`.
pub fn decode_index_key(suffix: &[u8]) -> Option<(String, String)> {
    let sep = suffix.iter().position(|&b| b == SEP)?;
    let secondary = String::from_utf8(suffix[..sep].to_vec()).ok()?;
    let primary = String::from_utf8(suffix[sep + 1..].to_vec()).ok()?;
    Some((secondary, primary))
}
