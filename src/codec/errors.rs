use thiserror::Error;

/// Errors from the content codec
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("invalid salt encoding: {0}")]
    Salt(#[from] base64::DecodeError),
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    Decrypt,
    #[error("encrypted blob is truncated")]
    Truncated,
    #[error("unsupported encryption format version: {0}")]
    UnsupportedVersion(u8),
    #[error("content is encrypted but no encryption key is configured")]
    NotConfigured,
}

pub type CodecResult<T> = Result<T, CodecError>;
