//! CAS keys: `sha256(content)` joined with a parser version.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use crate::CasError;

/// Full lowercase hex SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A key into the store. Pure function of `(content, parser_version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CasKey {
    hash: String,
    parser_version: String,
}

impl CasKey {
    /// Derive the key for `content` under `parser_version`.
    pub fn derive(content: &[u8], parser_version: &str) -> Result<Self, CasError> {
        validate_version(parser_version)?;
        Ok(Self {
            hash: content_hash(content),
            parser_version: parser_version.to_string(),
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn parser_version(&self) -> &str {
        &self.parser_version
    }

    /// File-name stem used by the on-disk layout.
    pub(crate) fn file_stem(&self) -> String {
        format!("{}.{}", self.hash, self.parser_version)
    }
}

impl std::fmt::Display for CasKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hash, self.parser_version)
    }
}

impl FromStr for CasKey {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, version) = s
            .split_once(':')
            .ok_or_else(|| CasError::InvalidKey(s.to_string()))?;
        let hex_ok = hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !hex_ok {
            return Err(CasError::InvalidKey(s.to_string()));
        }
        validate_version(version)?;
        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            parser_version: version.to_string(),
        })
    }
}

/// Versions end up in file names, so only a conservative alphabet is allowed.
fn validate_version(version: &str) -> Result<(), CasError> {
    let ok = !version.is_empty()
        && version.len() <= 64
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CasError::InvalidVersion(version.to_string()))
    }
}
