//! Checksum and hashing utilities

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Available checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumType {
    #[serde(alias = "adler32")]
    Adler32,
    #[serde(alias = "md5")]
    Md5, // For compatibility
    #[serde(alias = "sha256")]
    Sha256,
    #[serde(alias = "blake3")]
    Blake3,
}

impl Default for ChecksumType {
    fn default() -> Self {
        Self::Adler32
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Adler32 => "ADLER32",
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA256",
            Self::Blake3 => "BLAKE3",
        };
        f.write_str(name)
    }
}

impl FromStr for ChecksumType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADLER32" => Ok(Self::Adler32),
            "MD5" => Ok(Self::Md5),
            "SHA256" => Ok(Self::Sha256),
            "BLAKE3" => Ok(Self::Blake3),
            other => Err(format!("unknown checksum algorithm: {other}")),
        }
    }
}

/// Largest prime below 2^16
const MOD_ADLER: u32 = 65_521;

/// Bytes that can be summed before `b` may overflow a u32 (same bound zlib uses)
const NMAX: usize = 5_552;

/// Streaming Adler-32, the checksum grid storage elements report by default.
///
/// Same two-sum family as rsync's weak checksum, but modulo 65521 and seeded
/// with `a = 1`, so digests match what the storage side computes.
#[derive(Debug, Clone)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Adler32 {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    /// Feed more data into the checksum
    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(NMAX) {
            let mut i = 0;
            let len = chunk.len();

            // Process 4 bytes at a time
            while i + 4 <= len {
                self.a += chunk[i] as u32;
                self.b += self.a;
                self.a += chunk[i + 1] as u32;
                self.b += self.a;
                self.a += chunk[i + 2] as u32;
                self.b += self.a;
                self.a += chunk[i + 3] as u32;
                self.b += self.a;
                i += 4;
            }

            // Process remaining bytes
            while i < len {
                self.a += chunk[i] as u32;
                self.b += self.a;
                i += 1;
            }

            self.a %= MOD_ADLER;
            self.b %= MOD_ADLER;
        }
    }

    /// Current checksum value (b in the upper 16 bits, a in the lower)
    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

impl Default for Adler32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Adler-32 of an in-memory buffer
pub fn adler32(data: &[u8]) -> u32 {
    let mut checksum = Adler32::new();
    checksum.update(data);
    checksum.value()
}

enum Hasher {
    Adler32(Adler32),
    Md5(md5::Context),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn new(checksum_type: ChecksumType) -> Self {
        match checksum_type {
            ChecksumType::Adler32 => Self::Adler32(Adler32::new()),
            ChecksumType::Md5 => Self::Md5(md5::Context::new()),
            ChecksumType::Sha256 => Self::Sha256(sha2::Sha256::new()),
            ChecksumType::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Adler32(h) => h.update(data),
            Self::Md5(h) => h.consume(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Adler32(h) => format!("{:08x}", h.value()),
            Self::Md5(h) => format!("{:x}", h.compute()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Digest of a byte slice as lowercase hex
pub fn checksum_bytes(data: &[u8], checksum_type: ChecksumType) -> String {
    let mut hasher = Hasher::new(checksum_type);
    hasher.update(data);
    hasher.finish()
}

/// Digest of a whole file as lowercase hex, read in 64KB chunks
pub fn file_checksum(path: &Path, checksum_type: ChecksumType) -> io::Result<String> {
    let mut hasher = Hasher::new(checksum_type);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut file = File::open(path)?;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish())
}
