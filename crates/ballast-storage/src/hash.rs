//! Content hashes and streaming hashers.

use crate::{Result, StorageError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Block size used when streaming content through a hasher.
pub const BLOCK_SIZE: usize = 128 * 1024;

/// A 20-byte SHA-1 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 20]);

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ContentHash {
    /// Length of the hex form.
    pub const HEX_LEN: usize = 40;

    /// Creates a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parses a 40-character hex string. Upper-case digits are accepted.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != Self::HEX_LEN {
            return Err(StorageError::InvalidHash(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                hex.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex, &mut bytes)
            .map_err(|e| StorageError::InvalidHash(format!("{}: {}", hex, e)))?;
        Ok(Self(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns the lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Hashes a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Incremental SHA-1 over streamed content.
#[derive(Clone, Default)]
pub struct ContentHasher(Sha1);

impl ContentHasher {
    /// Creates a fresh hasher.
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    /// Feeds a chunk of content.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Consumes the hasher and returns the hash.
    pub fn finalize(self) -> ContentHash {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&self.0.finalize());
        ContentHash(bytes)
    }
}

/// Hashes everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<ContentHash> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Hashes the file at `path`.
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    hash_reader(File::open(path)?)
}

/// Copies `reader` into `writer`, hashing as it goes.
///
/// Returns the hash and the number of bytes copied.
pub fn copy_and_hash<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
) -> Result<(ContentHash, u64)> {
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok((hasher.finalize(), total))
}

/// Async counterpart of [`copy_and_hash`].
pub async fn copy_and_hash_async<R, W>(
    reader: &mut R,
    writer: &mut W,
) -> Result<(ContentHash, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok((hasher.finalize(), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_known_hashes() {
        assert_eq!(
            ContentHash::compute(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            ContentHash::compute(b"hello\n").to_hex(),
            "f572d396fae9206628714fb2ce00f72e94f2258f"
        );
    }

    #[test]
    fn test_hex_roundtrip_and_case() {
        let hex = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";
        let hash = ContentHash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
        let upper = ContentHash::from_hex(&hex.to_uppercase()).unwrap();
        assert_eq!(upper, hash);
        assert_eq!(hex.parse::<ContentHash>().unwrap(), hash);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(ContentHash::from_hex("abc").is_err());
        assert!(ContentHash::from_hex(&"z".repeat(40)).is_err());
        assert!(ContentHash::from_hex(&"a".repeat(41)).is_err());
    }

    #[test]
    fn test_display_and_debug() {
        let hash = ContentHash::from_bytes([0u8; 20]);
        assert_eq!(hash.to_string(), "0".repeat(40));
        assert!(format!("{:?}", hash).contains("ContentHash"));
    }

    #[test]
    fn test_serialization() {
        let hash = ContentHash::from_bytes([0xab; 20]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));
        let parsed: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn test_copy_and_hash_spans_blocks() {
        let data: Vec<u8> = (0..(BLOCK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        let (hash, len) = copy_and_hash(Cursor::new(&data), &mut out).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(hash, ContentHash::compute(&data));
    }

    #[tokio::test]
    async fn test_copy_and_hash_async() {
        let data = b"streamed content".to_vec();
        let mut reader = Cursor::new(data.clone());
        let mut out = Vec::new();
        let (hash, len) = copy_and_hash_async(&mut reader, &mut out).await.unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(hash, ContentHash::compute(&data));
    }

    proptest! {
        #[test]
        fn prop_streaming_matches_oneshot(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let streamed = hash_reader(Cursor::new(&data)).unwrap();
            prop_assert_eq!(streamed, ContentHash::compute(&data));
        }

        #[test]
        fn prop_hex_roundtrip(bytes in any::<[u8; 20]>()) {
            let hash = ContentHash::from_bytes(bytes);
            prop_assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        }
    }
}
