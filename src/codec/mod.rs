//! Transparent content encryption for remote transport.
//!
//! Bytes sent to the remote can optionally be encrypted with a key derived
//! from a user passphrase and a per-profile salt. Downloaded blobs are
//! sniffed for the magic marker, so a library can hold a mixed history of
//! encrypted and plaintext files.

pub mod crypto;
pub mod errors;
pub mod models;

pub use crypto::{derive_key, generate_salt, ContentCodec};
pub use errors::{CodecError, CodecResult};
pub use models::{CodecKey, KdfParams, RemoteBlob, FORMAT_VERSION, MAGIC, NONCE_SIZE};
