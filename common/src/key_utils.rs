use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str};

use crate::constants::MAX_KEY_LEN;
use crate::error::KeyError;

/// Longest encoded name used verbatim as an on-disk file stem.
const MAX_STORAGE_NAME_LEN: usize = 200;

/// A validated filename in the global file namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    name: String,
    enc: String, // canonical, uppercase hex
}

impl Key {
    pub fn new(name: &str) -> Result<Self, KeyError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_KEY_LEN {
            return Err(KeyError::Length);
        }
        if bytes.iter().any(|&b| b < 0x20 || b == 0x7f || b == b'/') {
            return Err(KeyError::Forbidden);
        }

        let enc = percent_encoding::percent_encode(bytes, NON_ALPHANUMERIC).to_string();

        Ok(Key {
            name: name.to_string(),
            enc,
        })
    }

    pub fn from_percent_encoded(s: &str) -> Result<Self, KeyError> {
        let decoded = percent_decode_str(s)
            .decode_utf8()
            .map_err(|_| KeyError::BadEncoding)?;
        Self::new(&decoded)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enc(&self) -> &str {
        &self.enc
    }

    /// File stem used for per-file artifacts on disk. Long names fall back to a digest.
    pub fn storage_name(&self) -> String {
        if self.enc.len() <= MAX_STORAGE_NAME_LEN {
            self.enc.clone()
        } else {
            blake3::hash(self.enc.as_bytes()).to_hex().to_string()
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
