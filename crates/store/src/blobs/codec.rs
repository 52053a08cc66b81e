use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{KeyProvider, Timestamp, BLAKE3_HASH_SIZE, SCRAMBLED_TS_LEN};
use crate::entry::{Entry, NodeType};

use super::BlobError;

/// Longest file name written to the blob directory
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Marks a file name whose tail continues on the second line of the file.
/// `~` is outside the base64url alphabet so the suffix is unambiguous.
pub const OVERFLOW_SUFFIX: &str = "~O";

/// Encrypted part of a blob's file name
#[derive(Debug, Serialize, Deserialize)]
struct NamePayload {
    #[serde(rename = "i")]
    id: String,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "t")]
    ts: Timestamp,
}

/// Everything recoverable from a blob's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// The on-disk file name, possibly overflowed
    pub file_name: String,
    pub kind: NodeType,
    pub ts: Timestamp,
    pub id: String,
    pub parent: Option<String>,
    pub name: String,
}

impl BlobHeader {
    pub fn to_entry(&self) -> Entry {
        let mut entry = Entry::new(self.kind).with_name(self.name.clone());
        entry.set_id(self.id.clone());
        entry.set_parent(self.parent.clone());
        entry.set_ts(self.ts);
        entry.set_encrypted_name(self.file_name.clone());
        entry
    }
}

/// Contents of a blob file: encrypted content on the first line, the
/// overflowed tail of the file name on the optional second line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobBody {
    pub encrypted_content: Option<String>,
    pub extra_name: Option<String>,
}

impl BlobBody {
    pub fn parse(data: &[u8]) -> Result<Self, BlobError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| BlobError::Malformed(format!("blob body is not utf-8: {}", e)))?;
        let mut lines = text.split('\n');
        let encrypted_content = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(str::to_string);
        let extra_name = lines
            .next()
            .filter(|line| !line.is_empty())
            .map(str::to_string);
        Ok(Self {
            encrypted_content,
            extra_name,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.encrypted_content.clone().unwrap_or_default();
        if let Some(extra) = &self.extra_name {
            out.push('\n');
            out.push_str(extra);
        }
        out.into_bytes()
    }
}

/// Seal an entry for writing.
///
/// Requires `type`, `id` and `name`. Stamps the entry with a fresh timestamp
/// from the key provider, then fills in `scrambledTs`, `encryptedName`,
/// `extraName` (when the name overflows) and `encryptedContent` (when the
/// entry carries content).
pub fn encrypt_entry(entry: &Entry, keys: &dyn KeyProvider) -> Result<Entry, BlobError> {
    let kind = entry
        .kind()
        .ok_or(BlobError::IncompleteEntry("type"))?;
    let id = entry.id().ok_or(BlobError::IncompleteEntry("id"))?;
    let name = entry.name().ok_or(BlobError::IncompleteEntry("name"))?;

    let ts = keys.now();
    let scrambled = keys.scramble_timestamp(ts)?;
    let payload = NamePayload {
        id: id.to_string(),
        parent: entry.parent().map(str::to_string),
        name: name.to_string(),
        ts,
    };
    let sealed = keys.encrypt(&serde_json::to_vec(&payload)?)?;
    let full_name = format!(
        "{}{}{}",
        kind.digit(),
        scrambled,
        URL_SAFE_NO_PAD.encode(sealed)
    );

    let (file_name, extra_name) = split_overflow(full_name);

    let mut sealed_entry = entry.clone();
    sealed_entry.set_ts(ts);
    sealed_entry.set_scrambled_ts(scrambled);
    sealed_entry.set_encrypted_name(file_name);
    sealed_entry.set_extra_name(extra_name);
    sealed_entry.set_encrypted_content(match entry.content() {
        Some(content) => Some(encrypt_content(content, keys)?),
        None => None,
    });
    Ok(sealed_entry)
}

fn split_overflow(full_name: String) -> (String, Option<String>) {
    if full_name.len() <= MAX_FILE_NAME_LEN {
        return (full_name, None);
    }
    // base64url, hex and digits are all single-byte
    let cut = MAX_FILE_NAME_LEN - OVERFLOW_SUFFIX.len();
    let (head, tail) = full_name.split_at(cut);
    (format!("{}{}", head, OVERFLOW_SUFFIX), Some(tail.to_string()))
}

/// Recover the header encoded in a blob's file name.
///
/// Overflowed names need the second line of the blob file.
pub fn decrypt_name(
    file_name: &str,
    extra_name: Option<&str>,
    keys: &dyn KeyProvider,
) -> Result<BlobHeader, BlobError> {
    let full_name = match file_name.strip_suffix(OVERFLOW_SUFFIX) {
        Some(head) => {
            let tail =
                extra_name.ok_or_else(|| BlobError::MissingOverflow(file_name.to_string()))?;
            format!("{}{}", head, tail)
        }
        None => file_name.to_string(),
    };

    let invalid = || BlobError::InvalidName(file_name.to_string());
    if !full_name.is_ascii() || full_name.len() <= 1 + SCRAMBLED_TS_LEN {
        return Err(invalid());
    }
    let kind = full_name
        .chars()
        .next()
        .and_then(NodeType::from_digit)
        .ok_or_else(invalid)?;
    let scrambled = &full_name[1..1 + SCRAMBLED_TS_LEN];
    let ts = keys.unscramble_timestamp(scrambled)?;

    let sealed = URL_SAFE_NO_PAD.decode(&full_name[1 + SCRAMBLED_TS_LEN..])?;
    let payload: NamePayload = serde_json::from_slice(&keys.decrypt(&sealed)?)?;
    if payload.ts != ts {
        return Err(BlobError::TimestampMismatch(file_name.to_string()));
    }

    Ok(BlobHeader {
        file_name: file_name.to_string(),
        kind,
        ts,
        id: payload.id,
        parent: payload.parent,
        name: payload.name,
    })
}

pub fn encrypt_content(content: &str, keys: &dyn KeyProvider) -> Result<String, BlobError> {
    Ok(URL_SAFE_NO_PAD.encode(keys.encrypt(content.as_bytes())?))
}

pub fn decrypt_content(encrypted: &str, keys: &dyn KeyProvider) -> Result<String, BlobError> {
    let plain = keys.decrypt(&URL_SAFE_NO_PAD.decode(encrypted)?)?;
    Ok(String::from_utf8(plain)?)
}

/// Hash of the plaintext behind an encrypted content line
pub fn content_hash(
    encrypted: &str,
    keys: &dyn KeyProvider,
) -> Result<[u8; BLAKE3_HASH_SIZE], BlobError> {
    Ok(keys.plaintext_hash(&URL_SAFE_NO_PAD.decode(encrypted)?)?)
}

#[cfg(test)]
mod test {
    use crate::crypto::Session;

    use super::*;

    fn entry(kind: NodeType, name: &str) -> Entry {
        let mut entry = Entry::new(kind).with_name(name).with_parent("Root");
        entry.set_id("Ab3x");
        entry
    }

    #[test]
    fn test_name_round_trip() {
        let session = Session::generate().unwrap();
        let sealed = encrypt_entry(&entry(NodeType::Dir, "documents"), &session).unwrap();

        let file_name = sealed.encrypted_name().unwrap();
        assert!(file_name.starts_with('1'));
        assert!(!file_name.contains('.'));
        assert!(sealed.extra_name().is_none());
        assert!(sealed.encrypted_content().is_none());

        let header = decrypt_name(file_name, None, &session).unwrap();
        assert_eq!(header.kind, NodeType::Dir);
        assert_eq!(header.id, "Ab3x");
        assert_eq!(header.parent.as_deref(), Some("Root"));
        assert_eq!(header.name, "documents");
        assert_eq!(Some(header.ts), sealed.ts());
    }

    #[test]
    fn test_content_round_trip() {
        let session = Session::generate().unwrap();
        let sealed = encrypt_entry(
            &entry(NodeType::Text, "pin").with_content("PIN: 1234"),
            &session,
        )
        .unwrap();

        let encrypted = sealed.encrypted_content().unwrap();
        assert_eq!(decrypt_content(encrypted, &session).unwrap(), "PIN: 1234");
        assert_eq!(
            content_hash(encrypted, &session).unwrap(),
            *blake3::hash(b"PIN: 1234").as_bytes()
        );
    }

    #[test]
    fn test_long_name_overflows_into_body() {
        let session = Session::generate().unwrap();
        let long_name = "n".repeat(240);
        let sealed = encrypt_entry(
            &entry(NodeType::Text, &long_name).with_content("x"),
            &session,
        )
        .unwrap();

        let file_name = sealed.encrypted_name().unwrap();
        assert_eq!(file_name.len(), MAX_FILE_NAME_LEN);
        assert!(file_name.ends_with(OVERFLOW_SUFFIX));
        let extra = sealed.extra_name().unwrap();

        let body = BlobBody {
            encrypted_content: sealed.encrypted_content().map(str::to_string),
            extra_name: Some(extra.to_string()),
        };
        let parsed = BlobBody::parse(&body.to_bytes()).unwrap();
        assert_eq!(parsed, body);

        let header = decrypt_name(file_name, parsed.extra_name.as_deref(), &session).unwrap();
        assert_eq!(header.name, long_name);

        assert!(matches!(
            decrypt_name(file_name, None, &session),
            Err(BlobError::MissingOverflow(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = Session::generate().unwrap();
        let b = Session::generate().unwrap();
        let sealed = encrypt_entry(&entry(NodeType::Dir, "x"), &a).unwrap();
        assert!(decrypt_name(sealed.encrypted_name().unwrap(), None, &b).is_err());
    }

    #[test]
    fn test_rejects_garbage_names() {
        let session = Session::generate().unwrap();
        assert!(decrypt_name("", None, &session).is_err());
        assert!(decrypt_name("9aaaaaaaaaaaaaaaaZZZ", None, &session).is_err());
        assert!(decrypt_name("1notatimestamp!!AAAA", None, &session).is_err());
    }

    #[test]
    fn test_incomplete_entry() {
        let session = Session::generate().unwrap();
        let missing_id = Entry::new(NodeType::Dir).with_name("x");
        assert!(matches!(
            encrypt_entry(&missing_id, &session),
            Err(BlobError::IncompleteEntry("id"))
        ));
    }

    #[test]
    fn test_empty_body() {
        let body = BlobBody::parse(b"").unwrap();
        assert_eq!(body, BlobBody::default());
        assert!(body.to_bytes().is_empty());
    }
}
