//! Hashing utilities for checksums and fingerprinting.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digest algorithm of a declared download checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Md5,
    Sha1,
}

impl ChecksumKind {
    /// Select the algorithm from the digest length in bytes.
    pub fn for_digest_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(ChecksumKind::Md5),
            20 => Some(ChecksumKind::Sha1),
            _ => None,
        }
    }
}

/// A declared checksum: the expected digest and its algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    kind: ChecksumKind,
    digest: Vec<u8>,
}

impl Checksum {
    /// Parse a hex digest. MD5 and SHA-1 are told apart by length.
    pub fn parse(hex_digest: &str) -> Result<Self> {
        let digest = hex::decode(hex_digest.trim())
            .with_context(|| format!("checksum `{}` is not valid hex", hex_digest))?;
        let Some(kind) = ChecksumKind::for_digest_len(digest.len()) else {
            bail!(
                "unknown checksum type for `{}` ({} bytes); expected MD5 or SHA-1",
                hex_digest,
                digest.len()
            );
        };
        Ok(Checksum { kind, digest })
    }

    pub fn kind(&self) -> ChecksumKind {
        self.kind
    }

    /// Lowercase hex form of the expected digest.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Digest `data` with this checksum's algorithm.
    pub fn compute(&self, data: &[u8]) -> Vec<u8> {
        match self.kind {
            ChecksumKind::Md5 => Md5::digest(data).to_vec(),
            ChecksumKind::Sha1 => Sha1::digest(data).to_vec(),
        }
    }

    /// Digest the file at `path` with this checksum's algorithm.
    pub fn compute_file(&self, path: &Path) -> Result<Vec<u8>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 8192];

        match self.kind {
            ChecksumKind::Md5 => digest_reader::<Md5>(&mut reader, &mut buffer),
            ChecksumKind::Sha1 => digest_reader::<Sha1>(&mut reader, &mut buffer),
        }
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        self.compute(data) == self.digest
    }

    pub fn matches_file(&self, path: &Path) -> Result<bool> {
        Ok(self.compute_file(path)? == self.digest)
    }
}

fn digest_reader<D: Digest>(reader: &mut impl Read, buffer: &mut [u8]) -> Result<Vec<u8>> {
    let mut hasher = D::new();
    loop {
        let bytes_read = reader.read(buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hasher.finalize().to_vec())
}

/// A hasher for building fingerprints from multiple components.
#[derive(Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    /// Create a new fingerprint builder.
    pub fn new() -> Self {
        Fingerprint {
            hasher: Sha256::new(),
        }
    }

    /// Add a string component to the fingerprint.
    pub fn update_str(&mut self, s: &str) -> &mut Self {
        self.hasher.update(s.as_bytes());
        self.hasher.update(b"\0");
        self
    }

    /// Finalize and return the fingerprint as a hex string.
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";

    #[test]
    fn test_checksum_kind_from_length() {
        assert_eq!(Checksum::parse(HELLO_MD5).unwrap().kind(), ChecksumKind::Md5);
        assert_eq!(Checksum::parse(HELLO_SHA1).unwrap().kind(), ChecksumKind::Sha1);
        assert!(Checksum::parse("abcd").is_err());
        assert!(Checksum::parse("not-hex").is_err());
    }

    #[test]
    fn test_checksum_verifies_known_bytes() {
        assert!(Checksum::parse(HELLO_MD5).unwrap().matches(b"hello"));
        assert!(Checksum::parse(HELLO_SHA1).unwrap().matches(b"hello"));
    }

    #[test]
    fn test_any_mutated_byte_fails_verification() {
        for digest in [HELLO_MD5, HELLO_SHA1] {
            let checksum = Checksum::parse(digest).unwrap();
            for i in 0..5 {
                let mut data = b"hello".to_vec();
                data[i] ^= 0x01;
                assert!(!checksum.matches(&data), "{} byte {}", digest, i);
            }
        }
    }

    #[test]
    fn test_checksum_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("archive");
        std::fs::write(&path, "hello").unwrap();
        assert!(Checksum::parse(HELLO_SHA1).unwrap().matches_file(&path).unwrap());
        std::fs::write(&path, "hellp").unwrap();
        assert!(!Checksum::parse(HELLO_SHA1).unwrap().matches_file(&path).unwrap());
    }

    #[test]
    fn test_fingerprint() {
        let fp = |parts: &[&str]| {
            let mut fp = Fingerprint::new();
            for p in parts {
                fp.update_str(p);
            }
            fp.finish()
        };

        assert_eq!(fp(&["hello", "world"]), fp(&["hello", "world"]));
        assert_ne!(fp(&["hello", "world"]), fp(&["hello", "different"]));
        assert_ne!(fp(&["ab", "c"]), fp(&["a", "bc"]));
    }
}
