use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest '{0}' is missing the 'algorithm:hex' separator")]
    MissingSeparator(String),
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("digest hex is {got} characters, {algorithm} requires {expected}")]
    InvalidHexLength {
        algorithm: DigestAlgorithm,
        got: usize,
        expected: usize,
    },
    #[error("digest hex contains a non-hexadecimal character")]
    InvalidHexCharacter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry manifest digest in `algorithm:hex` form.
///
/// Equality is byte-equality of algorithm and hex, which is the only
/// comparison meaningful for cross-engine drift detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub hex: String,
}

impl Digest {
    /// Whether `s` is a well-formed `algorithm:hex` digest string.
    pub fn is_valid(s: &str) -> bool {
        s.parse::<Digest>().is_ok()
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingSeparator(s.to_string()))?;
        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        };
        if hex.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidHexLength {
                algorithm,
                got: hex.len(),
                expected: algorithm.hex_len(),
            });
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHexCharacter);
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn hex_of(len: usize) -> String {
        "a".repeat(len)
    }

    #[test]
    fn test_valid_sha256() {
        let digest: Digest = format!("sha256:{}", hex_of(64)).parse().unwrap();
        assert_eq!(digest.algorithm, DigestAlgorithm::Sha256);
        assert_eq!(digest.to_string(), format!("sha256:{}", hex_of(64)));
    }

    #[test]
    fn test_valid_sha512() {
        assert!(Digest::is_valid(&format!("sha512:{}", hex_of(128))));
    }

    #[rstest]
    #[case::short_hex("sha256:abcdef")]
    #[case::long_hex(&format!("sha256:{}", "a".repeat(65)))]
    #[case::md5(&format!("md5:{}", "a".repeat(64)))]
    #[case::no_separator("sha256deadbeef")]
    #[case::non_hex(&format!("sha256:{}g", "a".repeat(63)))]
    fn test_invalid(#[case] input: &str) {
        assert!(!Digest::is_valid(input));
    }

    #[test]
    fn test_equality_is_byte_equal() {
        let a: Digest = format!("sha256:{}", hex_of(64)).parse().unwrap();
        let b: Digest = format!("sha256:{}", hex_of(64)).parse().unwrap();
        let c: Digest = format!("sha256:{}", "b".repeat(64)).parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
