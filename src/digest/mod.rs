// Content digests in the `<algorithm>:<hex>` form used throughout the
// registry. A digest names a blob forever; everything above the storage
// driver is keyed by these values.

mod tarsum;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha384, Sha512};
use thiserror::Error;

pub use tarsum::TarSumV1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid digest format: {0}")]
    InvalidFormat(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid digest hex: {0}")]
    InvalidHex(String),
}

/// Hash algorithms recognized by the registry. `TarsumV1Sha256` hashes a
/// normalized tar stream rather than the raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
    TarsumV1Sha256,
}

impl Algorithm {
    /// Expected length of the lowercase hex half for this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 | Algorithm::TarsumV1Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
            Algorithm::TarsumV1Sha256 => "tarsum.v1+sha256",
        }
    }
}

impl FromStr for Algorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            "tarsum.v1+sha256" => Ok(Algorithm::TarsumV1Sha256),
            other => Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An `<algorithm>:<hex>` content digest. Immutable; the hex half is always
/// lowercase, so derived equality matches the normalized comparison the
/// protocol requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let (alg, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::InvalidFormat(s.to_string()))?;
        if hex.contains(':') {
            return Err(DigestError::InvalidFormat(s.to_string()));
        }
        let algorithm = alg.parse::<Algorithm>()?;
        if hex.len() != algorithm.hex_len()
            || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestError::InvalidHex(hex.to_string()));
        }
        Ok(Digest {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Digest of an in-memory byte slice. Not defined for tarsum, which is
    /// only produced by streaming a tar through a [`Verifier`].
    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> Self {
        let hex = match algorithm {
            Algorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(bytes)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
            Algorithm::TarsumV1Sha256 => {
                let mut ts = TarSumV1::new();
                ts.update(bytes);
                ts.finalize()
            }
        };
        Digest { algorithm, hex }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// First two hex characters, used for directory fan-out in the blob
    /// store layout.
    pub fn hex_prefix(&self) -> &str {
        &self.hex[..2]
    }

    pub fn verifier(&self) -> Verifier {
        Verifier {
            expected: self.clone(),
            hasher: Hasher::new(self.algorithm),
        }
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Tarsum(Box<TarSumV1>),
}

impl Hasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
            Algorithm::TarsumV1Sha256 => Hasher::Tarsum(Box::new(TarSumV1::new())),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha384(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
            Hasher::Tarsum(ts) => ts.update(chunk),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha384(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
            Hasher::Tarsum(ts) => ts.finalize(),
        }
    }
}

/// Streaming digest check: feed the bytes with [`update`], then consume the
/// verifier with [`verified`] once the input is exhausted.
///
/// [`update`]: Verifier::update
/// [`verified`]: Verifier::verified
pub struct Verifier {
    expected: Digest,
    hasher: Hasher,
}

impl Verifier {
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// True iff the streamed bytes hash to the expected digest.
    pub fn verified(self) -> bool {
        self.hasher.finalize() == self.expected.hex
    }
}
