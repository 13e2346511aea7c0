use crate::error::{RefError, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};

/// Length of an MD5 digest rendered as hex.
pub const MD5_HEX_LEN: usize = 32;

/// An MD5 digest stored as a 32 character lowercase hex string.
///
/// Parsing accepts either case; the stored form is always lowercase so cache
/// paths derived from it are stable.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Md5Checksum(String);

impl Md5Checksum {
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != MD5_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RefError::InvalidChecksum {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Compute the MD5 digest of an in-memory byte slice.
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Compute the MD5 digest of everything `reader` yields.
    pub fn of_reader(reader: impl Read) -> io::Result<Self> {
        let mut reader = Md5Reader::new(reader);
        io::copy(&mut reader, &mut io::sink())?;
        Ok(reader.finish().0)
    }

    /// Case-insensitive comparison against a hex string from an untrusted source.
    pub fn matches_hex(&self, hex: &str) -> bool {
        self.0.eq_ignore_ascii_case(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Md5Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Md5Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Md5Checksum {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Md5Checksum {
    type Error = RefError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Md5Checksum> for String {
    fn from(value: Md5Checksum) -> Self {
        value.0
    }
}

/// Reader adapter that digests bytes as they pass through.
///
/// Used so a fetched stream is hashed while it is copied, rather than being
/// buffered and then walked a second time.
pub struct Md5Reader<R> {
    inner: R,
    hasher: Md5,
    len: u64,
}

impl<R: Read> Md5Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            len: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Finish hashing, returning the digest and the total byte count.
    pub fn finish(self) -> (Md5Checksum, u64) {
        (Md5Checksum(hex::encode(self.hasher.finalize())), self.len)
    }
}

impl<R: Read> Read for Md5Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.len += read as u64;
        Ok(read)
    }
}

/// Compare a computed digest against the requested checksum.
pub fn verify(expected: &Md5Checksum, actual: &Md5Checksum, source: &str) -> Result<()> {
    if expected.matches_hex(actual.as_str()) {
        return Ok(());
    }
    Err(RefError::IntegrityMismatch {
        expected: expected.to_string(),
        found: actual.to_string(),
        source_desc: source.to_string(),
    })
}
