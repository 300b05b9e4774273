//! Registered SSH public keys
//!
//! A key has two derived forms: the canonical `<algorithm> <base64-blob>`
//! string used for exact-match lookup during authentication, and a
//! colon-separated hex fingerprint shown to users.

use std::time::SystemTime;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Length of the comment derived from the key text when none is given
const DERIVED_COMMENT_LEN: usize = 18;

/// A public key bound to exactly one platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredKey {
    /// Canonical form, `<algorithm> <base64-blob>`
    pub public_key: String,

    /// Colon-separated hex digest of the key blob
    pub fingerprint: String,

    pub comment: String,

    /// Login of the owning user
    pub user: String,

    #[serde(with = "humantime_serde")]
    pub registered_at: SystemTime,

    /// Last successful authentication, if any
    #[serde(default, with = "humantime_serde")]
    pub last_used: Option<SystemTime>,
}

impl RegisteredKey {
    /// Build a key from an OpenSSH public key line (`<algorithm> <base64> [comment]`)
    ///
    /// An explicit non-empty `comment` wins over the one embedded in the line.
    pub fn parse(line: &str, comment: Option<&str>, user: impl Into<String>) -> Result<Self> {
        let line = line.trim();
        let (algorithm, rest) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| Error::Key("expected '<algorithm> <base64> [comment]'".to_string()))?;

        let rest = rest.trim_start();
        let (encoded, trailing) = match rest.split_once(char::is_whitespace) {
            Some((encoded, trailing)) => (encoded, Some(trailing.trim())),
            None => (rest, None),
        };

        russh_keys::parse_public_key_base64(encoded)
            .map_err(|e| Error::Key(format!("unsupported or corrupt key: {}", e)))?;

        let blob = decode_blob(encoded)?;
        let declared = blob_algorithm(&blob)?;
        if declared != algorithm {
            return Err(Error::Key(format!(
                "key type {} does not match declared algorithm {}",
                declared, algorithm
            )));
        }
        let canonical = canonical_key(&blob)?;

        let comment = comment
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or(trailing.filter(|c| !c.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| encoded.chars().take(DERIVED_COMMENT_LEN).collect());

        Ok(Self {
            public_key: canonical,
            fingerprint: fingerprint(&blob),
            comment,
            user: user.into(),
            registered_at: SystemTime::now(),
            last_used: None,
        })
    }

    /// Whether the key has ever been used to authenticate
    pub fn is_used(&self) -> bool {
        self.last_used.is_some()
    }

    /// Record a successful authentication
    pub fn touch(&mut self, at: SystemTime) {
        self.last_used = Some(at);
    }
}

/// Decode the base64 text of a key blob
pub fn decode_blob(encoded: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| Error::Key(format!("invalid base64: {}", e)))
}

/// Algorithm name stored at the start of an SSH wire-format key blob
pub fn blob_algorithm(blob: &[u8]) -> Result<&str> {
    let header: [u8; 4] = blob
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Key("key blob too short".to_string()))?;
    let len = u32::from_be_bytes(header) as usize;

    let name = blob
        .get(4..4 + len)
        .ok_or_else(|| Error::Key("truncated algorithm name".to_string()))?;

    std::str::from_utf8(name).map_err(|_| Error::Key("algorithm name is not UTF-8".to_string()))
}

/// Canonical lookup form of a key blob
pub fn canonical_key(blob: &[u8]) -> Result<String> {
    let algorithm = blob_algorithm(blob)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(blob);
    Ok(format!("{} {}", algorithm, encoded))
}

/// Colon-separated hex fingerprint of a key blob, for display
pub fn fingerprint(blob: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(blob));
    digest
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}
