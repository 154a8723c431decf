use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Length in bytes of every supported digest.
pub const DIGEST_LEN: usize = 20;

/// Hash algorithm a content hash was computed with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Rmd160,
    Shake128,
}

impl HashAlgorithm {
    /// Suffix appended to the hex digest in the textual form. SHA-1 has none.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Sha1 => "",
            Self::Rmd160 => "-rmd160",
            Self::Shake128 => "-shake128",
        }
    }
}

/// Identifies the immutable data behind a catalog or a file chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_LEN],
}

impl ContentHash {
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, digest: [u8; DIGEST_LEN]) -> Self {
        Self { algorithm, digest }
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// True for the all-zero digest, which never names real content.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.digest.iter().all(|b| *b == 0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.digest {
            write!(f, "{byte:02x}")?;
        }
        f.write_str(self.algorithm.suffix())
    }
}

/// Failure to parse the textual form of a [`ContentHash`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashParseError {
    #[error("expected {expected} hex digits, got {got}")]
    Length { expected: usize, got: usize },

    #[error("invalid hex digit {0:?}")]
    Digit(char),

    #[error("unknown hash suffix {0:?}")]
    Suffix(String),
}

impl FromStr for ContentHash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hex, algorithm) = match s.split_once('-') {
            None => (s, HashAlgorithm::Sha1),
            Some((hex, "rmd160")) => (hex, HashAlgorithm::Rmd160),
            Some((hex, "shake128")) => (hex, HashAlgorithm::Shake128),
            Some((_, other)) => return Err(HashParseError::Suffix(other.to_owned())),
        };

        if hex.len() != DIGEST_LEN * 2 {
            return Err(HashParseError::Length {
                expected: DIGEST_LEN * 2,
                got: hex.len(),
            });
        }

        let mut digest = [0_u8; DIGEST_LEN];
        let mut chars = hex.chars();
        for byte in &mut digest {
            let mut value = 0_u8;
            for _ in 0..2 {
                let c = chars.next().ok_or(HashParseError::Length {
                    expected: DIGEST_LEN * 2,
                    got: hex.len(),
                })?;
                let nibble = c.to_digit(16).ok_or(HashParseError::Digit(c))?;
                #[expect(clippy::cast_possible_truncation, reason = "hex digit is < 16")]
                let nibble = nibble as u8;
                value = (value << 4) | nibble;
            }
            *byte = value;
        }

        Ok(Self { algorithm, digest })
    }
}
