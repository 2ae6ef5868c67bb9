//! Codec data models and the on-wire framing

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::errors::{CodecError, CodecResult};

/// Magic bytes prefixed to every encrypted blob
pub const MAGIC: &[u8; 8] = b"SHELFENC";

/// Current wire format version
pub const FORMAT_VERSION: u8 = 1;

/// Nonce size in bytes for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// A blob as it exists on the remote: either raw plaintext or an
/// encrypted frame. Detected by magic-byte sniffing so that profiles with
/// a mixed encrypted/plaintext history keep working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBlob {
    Plain(Vec<u8>),
    Encrypted {
        nonce: [u8; NONCE_SIZE],
        ciphertext: Vec<u8>,
    },
}

impl RemoteBlob {
    /// Classify downloaded bytes. Bytes without the magic prefix are
    /// plaintext; bytes with the prefix must parse as a complete frame.
    pub fn sniff(bytes: &[u8]) -> CodecResult<Self> {
        if !bytes.starts_with(MAGIC) {
            return Ok(RemoteBlob::Plain(bytes.to_vec()));
        }
        if bytes.len() < MAGIC.len() + 1 + NONCE_SIZE {
            return Err(CodecError::Truncated);
        }
        let version = bytes[MAGIC.len()];
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let nonce_start = MAGIC.len() + 1;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[nonce_start..nonce_start + NONCE_SIZE]);
        Ok(RemoteBlob::Encrypted {
            nonce,
            ciphertext: bytes[nonce_start + NONCE_SIZE..].to_vec(),
        })
    }

    /// Whether the blob carries the encrypted frame
    pub fn is_encrypted(&self) -> bool {
        matches!(self, RemoteBlob::Encrypted { .. })
    }
}

/// Frame an encrypted payload: magic + version byte + nonce + ciphertext
pub fn frame(nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(nonce);
    out.extend_from_slice(ciphertext);
    out
}

/// Encryption key with secure memory handling
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CodecKey {
    key: [u8; 32],
}

impl CodecKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for CodecKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecKey").field("key", &"[REDACTED]").finish()
    }
}

/// Argon2id parameters for key derivation
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Number of iterations
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}
