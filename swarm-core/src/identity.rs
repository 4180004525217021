//! Node and content identity: tracker-assigned node ids, peer addresses, SHA-1 file hashes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

/// Tracker-assigned node id. Monotonic, starts at 1, never reused.
pub type NodeId = u64;

/// Index of a piece within a file, `0..total_pieces`.
pub type PieceIndex = u32;

/// Where a node accepts peer connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub ip_address: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}

/// Content hash of a whole file: hex SHA-1 (40 lowercase hex chars).
///
/// Parsing only accepts that exact shape, so a `FileHash` is always safe to use as a
/// directory name in a piece store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHash(String);

const FILE_HASH_LEN: usize = 40;

impl FileHash {
    /// Hash file content.
    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        FileHash(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid file hash '{0}': expected 40 lowercase hex characters")]
pub struct ParseFileHashError(String);

impl FromStr for FileHash {
    type Err = ParseFileHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FILE_HASH_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(FileHash(s.to_owned()))
        } else {
            Err(ParseFileHashError(s.to_owned()))
        }
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for FileHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FileHash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Magnet-style locator for an uploaded file: content hash plus display name.
pub fn magnet_link(file_hash: &FileHash, file_name: &str) -> String {
    format!("magnet:?xt=urn:btih:{}&dn={}", file_hash, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_known_sha1() {
        assert_eq!(
            FileHash::of_bytes(b"").as_str(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            FileHash::of_bytes(b"abc").as_str(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn parse_rejects_bad_shapes() {
        assert!("a9993e364706816aba3e25717850c26c9cd0d89d"
            .parse::<FileHash>()
            .is_ok());
        assert!("A9993E364706816ABA3E25717850C26C9CD0D89D"
            .parse::<FileHash>()
            .is_err());
        assert!("../../etc/passwd".parse::<FileHash>().is_err());
        assert!("abc".parse::<FileHash>().is_err());
    }

    #[test]
    fn magnet_link_format() {
        let hash = FileHash::of_bytes(b"abc");
        assert_eq!(
            magnet_link(&hash, "f.bin"),
            "magnet:?xt=urn:btih:a9993e364706816aba3e25717850c26c9cd0d89d&dn=f.bin"
        );
    }
}
