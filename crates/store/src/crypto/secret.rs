//! Blob encryption using ChaCha20-Poly1305
//!
//! Every blob written by the store (names and contents alike) goes through a
//! [`Secret`]. The session's master secret is the only one the engine uses,
//! but the type itself knows nothing about sessions.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of BLAKE3 hash in bytes (256 bits)
pub const BLAKE3_HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("expected 32 key bytes, got {0}")]
    InvalidLength(usize),
    #[error("sealed data is truncated")]
    Truncated,
    #[error("authentication failed")]
    Unauthenticated,
    #[error("plaintext does not match its sealed hash")]
    HashMismatch,
}

/// A 256-bit symmetric key
///
/// Sealed layout: `nonce (12) || encrypt(blake3(plaintext) (32) || plaintext) || tag (16)`.
/// The plaintext hash rides inside the ciphertext, so two blobs sealed under
/// the same key can be compared for identical content with
/// [`Secret::extract_plaintext_hash`].
///
/// Key material is wiped when the secret is dropped.
///
/// ```ignore
/// let secret = Secret::generate()?;
/// let sealed = secret.encrypt(b"PIN: 1234")?;
/// assert_eq!(secret.decrypt(&sealed)?, b"PIN: 1234");
/// ```
#[derive(PartialEq, Eq, Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_SIZE]);

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl TryFrom<&[u8]> for Secret {
    type Error = SecretError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; SECRET_SIZE] = data
            .try_into()
            .map_err(|_| SecretError::InvalidLength(data.len()))?;
        Ok(Secret(bytes))
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N], SecretError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| anyhow::anyhow!("system rng unavailable: {}", e))?;
    Ok(bytes)
}

impl Secret {
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes()?))
    }

    /// Derive a purpose-bound subkey from this secret
    pub fn derive(&self, context: &str) -> Secret {
        Secret(blake3::derive_key(context, &self.0))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Seal `data` under a fresh random nonce; sealing the same plaintext
    /// twice yields different output.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let mut framed = Zeroizing::new(Vec::with_capacity(BLAKE3_HASH_SIZE + data.len()));
        framed.extend_from_slice(blake3::hash(data).as_bytes());
        framed.extend_from_slice(data);

        let nonce: [u8; NONCE_SIZE] = random_bytes()?;
        let sealed = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), framed.as_slice())
            .map_err(|_| anyhow::anyhow!("chacha20poly1305 refused to encrypt"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend(sealed);
        Ok(out)
    }

    /// Open sealed data and check the plaintext against its sealed hash
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, SecretError> {
        let framed = self.open(data)?;
        let (hash, plaintext) = framed.split_at(BLAKE3_HASH_SIZE);
        if blake3::hash(plaintext).as_bytes() != hash {
            return Err(SecretError::HashMismatch);
        }
        Ok(plaintext.to_vec())
    }

    /// The plaintext hash sealed with the data
    pub fn extract_plaintext_hash(
        &self,
        data: &[u8],
    ) -> Result<[u8; BLAKE3_HASH_SIZE], SecretError> {
        let framed = self.open(data)?;
        let mut hash = [0u8; BLAKE3_HASH_SIZE];
        hash.copy_from_slice(&framed[..BLAKE3_HASH_SIZE]);
        Ok(hash)
    }

    fn open(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, SecretError> {
        if data.len() < NONCE_SIZE {
            return Err(SecretError::Truncated);
        }
        let (nonce, sealed) = data.split_at(NONCE_SIZE);
        let framed = self
            .cipher()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| SecretError::Unauthenticated)?;
        if framed.len() < BLAKE3_HASH_SIZE {
            return Err(SecretError::Truncated);
        }
        Ok(Zeroizing::new(framed))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seal_and_open() {
        let secret = Secret::generate().unwrap();
        let sealed = secret.encrypt(b"bank pin 0000").unwrap();

        assert_eq!(sealed.len(), NONCE_SIZE + BLAKE3_HASH_SIZE + 13 + 16);
        assert_eq!(secret.decrypt(&sealed).unwrap(), b"bank pin 0000");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = Secret::generate().unwrap().encrypt(b"x").unwrap();
        let other = Secret::generate().unwrap();

        assert!(matches!(
            other.decrypt(&sealed),
            Err(SecretError::Unauthenticated)
        ));
    }

    #[test]
    fn test_key_length() {
        assert!(matches!(
            Secret::try_from(&[1u8; 16][..]),
            Err(SecretError::InvalidLength(16))
        ));
        assert!(Secret::try_from(&[1u8; SECRET_SIZE][..]).is_ok());
    }

    #[test]
    fn test_plaintext_hash_ignores_nonce() {
        let secret = Secret::generate().unwrap();
        let first = secret.encrypt(b"same words").unwrap();
        let second = secret.encrypt(b"same words").unwrap();
        assert_ne!(first, second);

        let hash = secret.extract_plaintext_hash(&first).unwrap();
        assert_eq!(hash, *blake3::hash(b"same words").as_bytes());
        assert_eq!(hash, secret.extract_plaintext_hash(&second).unwrap());
    }

    #[test]
    fn test_tampering_and_truncation() {
        let secret = Secret::generate().unwrap();
        let mut sealed = secret.encrypt(b"integrity").unwrap();

        assert!(matches!(
            secret.decrypt(&sealed[..4]),
            Err(SecretError::Truncated)
        ));
        sealed[NONCE_SIZE + 3] ^= 0x01;
        assert!(secret.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_derive_is_deterministic() {
        let secret = Secret::from([7u8; SECRET_SIZE]);
        assert_eq!(secret.derive("a"), secret.derive("a"));
        assert_ne!(secret.derive("a"), secret.derive("b"));
    }

    #[test]
    fn test_empty_plaintext() {
        let secret = Secret::generate().unwrap();
        let sealed = secret.encrypt(b"").unwrap();
        assert!(secret.decrypt(&sealed).unwrap().is_empty());
    }
}
