//! Key derivation and authenticated encryption

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use super::errors::{CodecError, CodecResult};
use super::models::{frame, CodecKey, KdfParams, RemoteBlob, NONCE_SIZE};

/// Salt size in bytes
const SALT_SIZE: usize = 16;

/// Generate a random salt for key derivation
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    BASE64.encode(salt)
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Derive an encryption key from a passphrase using Argon2id
pub fn derive_key(passphrase: &str, salt_b64: &str, params: &KdfParams) -> CodecResult<CodecKey> {
    let salt_bytes = BASE64.decode(salt_b64)?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32), // Output 256-bit key
    )
    .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), &salt_bytes, &mut key)
        .map_err(|e| CodecError::KeyDerivation(e.to_string()))?;

    Ok(CodecKey::new(key))
}

/// Symmetric codec applied to content on its way to and from the remote
pub struct ContentCodec {
    key: CodecKey,
}

impl ContentCodec {
    /// Derive the codec key from a passphrase and a per-profile salt
    pub fn new(passphrase: &str, salt_b64: &str) -> CodecResult<Self> {
        let key = derive_key(passphrase, salt_b64, &KdfParams::default())?;
        Ok(Self { key })
    }

    pub fn from_key(key: CodecKey) -> Self {
        Self { key }
    }

    /// Encrypt plaintext into the framed wire format
    pub fn encrypt(&self, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
            .map_err(|e| CodecError::Encrypt(e.to_string()))?;

        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CodecError::Encrypt(e.to_string()))?;

        Ok(frame(&nonce_bytes, &ciphertext))
    }

    /// Decrypt a sniffed blob. Plaintext passes through unchanged; an
    /// encrypted frame that fails authentication is an error for that
    /// file, never silently treated as plaintext.
    pub fn decrypt(&self, blob: RemoteBlob) -> CodecResult<Vec<u8>> {
        match blob {
            RemoteBlob::Plain(bytes) => Ok(bytes),
            RemoteBlob::Encrypted { nonce, ciphertext } => {
                let cipher = ChaCha20Poly1305::new_from_slice(self.key.as_bytes())
                    .map_err(|_| CodecError::Decrypt)?;
                cipher
                    .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                    .map_err(|_| CodecError::Decrypt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::models::{FORMAT_VERSION, MAGIC};

    fn make_codec(passphrase: &str, salt: &str) -> ContentCodec {
        ContentCodec::new(passphrase, salt).unwrap()
    }

    #[test]
    fn test_salt_generation() {
        let salt1 = generate_salt();
        let salt2 = generate_salt();
        assert_ne!(salt1, salt2);
        assert!(BASE64.decode(&salt1).is_ok());
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let salt = generate_salt();
        let key1 = derive_key("passphrase", &salt, &KdfParams::default()).unwrap();
        let key2 = derive_key("passphrase", &salt, &KdfParams::default()).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());

        let other = derive_key("other", &salt, &KdfParams::default()).unwrap();
        assert_ne!(key1.as_bytes(), other.as_bytes());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let salt = generate_salt();
        let codec = make_codec("passphrase", &salt);

        let plaintext = b"# Notes\n\nHello, encrypted world.";
        let wire = codec.encrypt(plaintext).unwrap();
        assert!(wire.starts_with(MAGIC));
        assert_eq!(wire[MAGIC.len()], FORMAT_VERSION);

        let blob = RemoteBlob::sniff(&wire).unwrap();
        assert!(blob.is_encrypted());
        let decrypted = codec.decrypt(blob).unwrap();
        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_plaintext_passes_through() {
        let salt = generate_salt();
        let codec = make_codec("passphrase", &salt);

        let blob = RemoteBlob::sniff(b"just some markdown").unwrap();
        assert!(!blob.is_encrypted());
        assert_eq!(codec.decrypt(blob).unwrap(), b"just some markdown");
    }

    #[test]
    fn test_wrong_key_fails() {
        let salt = generate_salt();
        let codec = make_codec("passphrase", &salt);
        let wire = codec.encrypt(b"secret").unwrap();

        let other = make_codec("wrong-passphrase", &salt);
        let blob = RemoteBlob::sniff(&wire).unwrap();
        assert!(matches!(other.decrypt(blob), Err(CodecError::Decrypt)));
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&[0u8; 4]); // shorter than a nonce
        assert!(matches!(
            RemoteBlob::sniff(&bytes),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.push(99);
        bytes.extend_from_slice(&[0u8; NONCE_SIZE]);
        bytes.extend_from_slice(b"ciphertext");
        assert!(matches!(
            RemoteBlob::sniff(&bytes),
            Err(CodecError::UnsupportedVersion(99))
        ));
    }
}
