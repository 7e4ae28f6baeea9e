pub mod timestamps;

use sha2::{Digest, Sha256};

pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Deterministic chunk id for ingestion paths that do not assign their own.
///
/// `content_sha256` must be the hash of the normalized content.
pub fn derive_chunk_id(source_id: &str, ordinal: u32, content_sha256: &str) -> String {
    let id_input = format!("v1|{source_id}|{ordinal}|{content_sha256}");
    sha256_hex(id_input.as_bytes())
}
