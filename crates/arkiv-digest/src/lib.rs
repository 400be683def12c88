//! Digest engine: stream of bytes + algorithm -> hex digest string.
//!
//! The offer store computes digests while streaming object bytes to disk
//! ([`DigestingReader`]), caches them in sidecars, and recomputes them for
//! verification. All digests are lowercase hex.

use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::Digest as Sha2Digest;

use arkiv_types::{Error, Result};

/// Supported digest algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Blake3,
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Blake3 => "blake3",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blake3" => Ok(DigestAlgorithm::Blake3),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            other => Err(Error::illegal_argument(format!(
                "unknown digest algorithm '{other}'"
            ))),
        }
    }
}

enum Hasher {
    Blake3(blake3::Hasher),
    Sha256(sha2::Sha256),
}

/// Incremental digest computation.
pub struct Digest {
    algorithm: DigestAlgorithm,
    hasher: Hasher,
}

impl Digest {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let hasher = match algorithm {
            DigestAlgorithm::Blake3 => Hasher::Blake3(blake3::Hasher::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        };
        Self { algorithm, hasher }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Finish and render the digest as lowercase hex.
    pub fn finalize_hex(self) -> String {
        match self.hasher {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a byte slice in one call.
pub fn hash_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut digest = Digest::new(algorithm);
    digest.update(data);
    digest.finalize_hex()
}

/// Hash everything a reader yields, in fixed-size chunks.
pub fn hash_reader<R: Read>(algorithm: DigestAlgorithm, mut reader: R) -> Result<String> {
    let mut digest = Digest::new(algorithm);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize_hex())
}

/// A reader that hashes bytes as they flow through.
///
/// Wraps the source stream of a `put`: the store copies from this reader to
/// the staging file and gets the digest and byte count for free once the
/// copy completes.
pub struct DigestingReader<R: Read> {
    inner: R,
    digest: Digest,
    bytes_read: u64,
}

impl<R: Read> DigestingReader<R> {
    pub fn new(algorithm: DigestAlgorithm, inner: R) -> Self {
        Self {
            inner,
            digest: Digest::new(algorithm),
            bytes_read: 0,
        }
    }

    /// Bytes that have passed through so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish and return the hex digest of everything read.
    pub fn finalize_hex(self) -> String {
        self.digest.finalize_hex()
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digest.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn blake3_matches_reference() {
        let expected = blake3::hash(b"hello world").to_hex().to_string();
        assert_eq!(hash_hex(DigestAlgorithm::Blake3, b"hello world"), expected);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash_hex(DigestAlgorithm::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_equals_oneshot() {
        let mut digest = Digest::new(DigestAlgorithm::Blake3);
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(
            digest.finalize_hex(),
            hash_hex(DigestAlgorithm::Blake3, b"hello world")
        );
    }

    #[test]
    fn digesting_reader_counts_and_hashes() {
        let data = b"some object content".to_vec();
        let mut reader = DigestingReader::new(DigestAlgorithm::Sha256, data.as_slice());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(sink, data);
        assert_eq!(reader.bytes_read(), data.len() as u64);
        assert_eq!(
            reader.finalize_hex(),
            hash_hex(DigestAlgorithm::Sha256, &data)
        );
    }

    #[test]
    fn hash_reader_matches_hash_hex() {
        let data = vec![7u8; 200_000]; // spans several chunks
        let from_reader = hash_reader(DigestAlgorithm::Blake3, data.as_slice()).unwrap();
        assert_eq!(from_reader, hash_hex(DigestAlgorithm::Blake3, &data));
    }

    #[test]
    fn algorithm_parse_roundtrip() {
        for algo in [DigestAlgorithm::Blake3, DigestAlgorithm::Sha256] {
            assert_eq!(algo.name().parse::<DigestAlgorithm>().unwrap(), algo);
        }
        assert!("md5".parse::<DigestAlgorithm>().is_err());
    }
}
