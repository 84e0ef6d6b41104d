//! Checksum computation and verification for artifacts.

use md5::Md5;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::Result;

/// Supported checksum types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumType {
    /// Detect checksum type from length of hex string
    pub fn from_hex_length(len: usize) -> Option<Self> {
        match len {
            32 => Some(ChecksumType::Md5),
            40 => Some(ChecksumType::Sha1),
            56 => Some(ChecksumType::Sha224),
            64 => Some(ChecksumType::Sha256),
            96 => Some(ChecksumType::Sha384),
            128 => Some(ChecksumType::Sha512),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "md5" => Some(ChecksumType::Md5),
            "sha1" => Some(ChecksumType::Sha1),
            "sha224" => Some(ChecksumType::Sha224),
            "sha256" => Some(ChecksumType::Sha256),
            "sha384" => Some(ChecksumType::Sha384),
            "sha512" => Some(ChecksumType::Sha512),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        }
    }
}

/// Split a `name:value` hash; a bare value is typed by its length
pub fn parse_hash(hash: &str) -> Option<(ChecksumType, &str)> {
    match hash.split_once(':') {
        Some((name, value)) => Some((ChecksumType::from_name(name)?, value)),
        None => Some((ChecksumType::from_hex_length(hash.len())?, hash)),
    }
}

fn digest_hex<D: Digest>(data: &[u8]) -> String {
    let mut hasher = D::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Hex digest of a file
pub async fn hash_file(path: &Path, checksum_type: ChecksumType) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).await?;

    let actual = match checksum_type {
        ChecksumType::Md5 => digest_hex::<Md5>(&buffer),
        ChecksumType::Sha1 => digest_hex::<sha1::Sha1>(&buffer),
        ChecksumType::Sha224 => digest_hex::<Sha224>(&buffer),
        ChecksumType::Sha256 => digest_hex::<Sha256>(&buffer),
        ChecksumType::Sha384 => digest_hex::<Sha384>(&buffer),
        ChecksumType::Sha512 => digest_hex::<Sha512>(&buffer),
    };

    Ok(actual)
}

/// Verify checksum of a file
pub async fn verify_checksum(path: &Path, expected: &str, checksum_type: ChecksumType) -> Result<bool> {
    let actual = hash_file(path, checksum_type).await?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

/// SHA-256 of a file in the `sha256:<hex>` form used by lock files
pub async fn sha256_string(path: &Path) -> Result<String> {
    Ok(format!("sha256:{}", hash_file(path, ChecksumType::Sha256).await?))
}
