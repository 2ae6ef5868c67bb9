use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of file contents as lowercase hex.
///
/// The digest depends only on the bytes, never on the file's name or
/// location, so equal digests can stand in for equal content during
/// change suppression and rename detection.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
