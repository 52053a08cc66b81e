use std::fmt::Debug;

use parking_lot::{Mutex, RwLock};

use super::secret::{Secret, SecretError, BLAKE3_HASH_SIZE};
use super::timestamp::Timestamp;

const SCRAMBLE_CONTEXT: &str = "secrez-store 2024 timestamp scramble";

/// Width of a scrambled timestamp in a blob name
pub const SCRAMBLED_TS_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is signed out")]
    SignedOut,
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("invalid scrambled timestamp: {0}")]
    InvalidScrambledTimestamp(String),
}

/// Key material capability required by the tree and the orchestrator
///
/// Whatever authenticated the user hands an implementation of this trait
/// to the engine. The engine never sees raw keys.
pub trait KeyProvider: Send + Sync + Debug {
    /// Encrypt a blob name or blob content
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError>;

    /// Decrypt a blob name or blob content
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError>;

    /// Hash of the plaintext sealed in `data`
    fn plaintext_hash(&self, data: &[u8]) -> Result<[u8; BLAKE3_HASH_SIZE], SessionError>;

    /// Obfuscate a timestamp for use in a blob name
    fn scramble_timestamp(&self, ts: Timestamp) -> Result<String, SessionError>;

    /// Inverse of [`KeyProvider::scramble_timestamp`]
    fn unscramble_timestamp(&self, scrambled: &str) -> Result<Timestamp, SessionError>;

    /// A timestamp strictly greater than any previously returned by this provider
    fn now(&self) -> Timestamp;
}

/// An authenticated session holding the master secret
///
/// Key material lives here for the lifetime of the session and is wiped by
/// [`Session::sign_out`] (or on drop). After sign-out every operation that
/// needs the key fails with [`SessionError::SignedOut`].
#[derive(Debug)]
pub struct Session {
    master: RwLock<Option<Secret>>,
    clock: Mutex<Timestamp>,
}

impl Session {
    pub fn new(master: Secret) -> Self {
        Self {
            master: RwLock::new(Some(master)),
            clock: Mutex::new(Timestamp::default()),
        }
    }

    /// A session over a freshly generated master secret
    pub fn generate() -> Result<Self, SessionError> {
        Ok(Self::new(Secret::generate()?))
    }

    pub fn is_signed_in(&self) -> bool {
        self.master.read().is_some()
    }

    /// Drop the master secret; the memory is zeroed
    pub fn sign_out(&self) {
        let mut master = self.master.write();
        if master.take().is_some() {
            tracing::debug!("session signed out, key material wiped");
        }
    }

    fn with_master<T>(
        &self,
        f: impl FnOnce(&Secret) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let master = self.master.read();
        match master.as_ref() {
            Some(secret) => f(secret),
            None => Err(SessionError::SignedOut),
        }
    }

    fn scramble_mask(&self) -> Result<u64, SessionError> {
        self.with_master(|secret| {
            let derived = secret.derive(SCRAMBLE_CONTEXT);
            let mut mask = [0u8; 8];
            mask.copy_from_slice(&derived.bytes()[..8]);
            Ok(u64::from_be_bytes(mask))
        })
    }
}

impl KeyProvider for Session {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_master(|secret| Ok(secret.encrypt(data)?))
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_master(|secret| Ok(secret.decrypt(data)?))
    }

    fn plaintext_hash(&self, data: &[u8]) -> Result<[u8; BLAKE3_HASH_SIZE], SessionError> {
        self.with_master(|secret| Ok(secret.extract_plaintext_hash(data)?))
    }

    fn scramble_timestamp(&self, ts: Timestamp) -> Result<String, SessionError> {
        let mask = self.scramble_mask()?;
        Ok(format!("{:016x}", ts.as_micros() ^ mask))
    }

    fn unscramble_timestamp(&self, scrambled: &str) -> Result<Timestamp, SessionError> {
        if scrambled.len() != SCRAMBLED_TS_LEN {
            return Err(SessionError::InvalidScrambledTimestamp(
                scrambled.to_string(),
            ));
        }
        let value = u64::from_str_radix(scrambled, 16)
            .map_err(|_| SessionError::InvalidScrambledTimestamp(scrambled.to_string()))?;
        let mask = self.scramble_mask()?;
        Ok(Timestamp::from_micros(value ^ mask))
    }

    fn now(&self) -> Timestamp {
        let mut last = self.clock.lock();
        let now = Timestamp::now();
        let next = if now > *last { now } else { last.succ() };
        *last = next;
        next
    }
}
