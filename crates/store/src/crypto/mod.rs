//! Cryptographic collaborator for the storage engine
//!
//! The engine treats cryptography as a set of opaque functions. This module
//! provides them:
//!
//! - **Encryption**: ChaCha20-Poly1305 [`Secret`] with a BLAKE3 plaintext
//!   hash sealed inside every blob
//! - **Sessions**: [`Session`] owns the master secret for the lifetime of an
//!   authenticated session and is consumed through the [`KeyProvider`]
//!   capability trait
//! - **Identifiers**: short random node ids ([`random_id`]) and microsecond
//!   [`Timestamp`]s, plus the scramble/unscramble pair used so blob names do
//!   not reveal creation times in the clear

mod random;
mod secret;
mod session;
mod timestamp;

pub use random::{random_id, random_string, BASE58_ALPHABET, ID_LENGTH};
pub use secret::{Secret, SecretError, BLAKE3_HASH_SIZE, SECRET_SIZE};
pub use session::{KeyProvider, Session, SessionError, SCRAMBLED_TS_LEN};
pub use timestamp::{Timestamp, TimestampError};
