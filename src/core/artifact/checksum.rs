use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgo {
    Sha1,
    Sha256,
    Md5,
}

impl ChecksumAlgo {
    fn prefix(&self) -> &'static str {
        match self {
            ChecksumAlgo::Sha1 => "sha1",
            ChecksumAlgo::Sha256 => "sha256",
            ChecksumAlgo::Md5 => "md5",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgo::Sha1 => 40,
            ChecksumAlgo::Sha256 => 64,
            ChecksumAlgo::Md5 => 32,
        }
    }
}

/// `<algo>:<hex>` as declared in templates and recorded in the cache index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algo: ChecksumAlgo,
    /// Lowercase hex digest.
    pub hex: String,
}

impl Checksum {
    pub fn compute(algo: ChecksumAlgo, bytes: &[u8]) -> Self {
        let hex = match algo {
            ChecksumAlgo::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgo::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
            ChecksumAlgo::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(bytes);
                hex::encode(hasher.finalize())
            }
        };
        Self { algo, hex }
    }

    pub fn sha256(bytes: &[u8]) -> Self {
        Self::compute(ChecksumAlgo::Sha256, bytes)
    }

    pub fn verify(&self, bytes: &[u8]) -> bool {
        Self::compute(self.algo, bytes).hex == self.hex
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algo.prefix(), self.hex)
    }
}

impl FromStr for Checksum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| format!("'{}' is not of the form <algo>:<hex>", s))?;
        let algo = match algo.to_ascii_lowercase().as_str() {
            "sha1" => ChecksumAlgo::Sha1,
            "sha256" => ChecksumAlgo::Sha256,
            "md5" => ChecksumAlgo::Md5,
            other => return Err(format!("unsupported checksum algorithm '{}'", other)),
        };
        if hex.len() != algo.hex_len() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "{} digest must be {} hex characters",
                algo.prefix(),
                algo.hex_len()
            ));
        }
        Ok(Self {
            algo,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_verify() {
        let sum: Checksum = "sha1:A9993E364706816ABA3E25717850C26C9CD0D89D"
            .parse()
            .unwrap();
        assert_eq!(sum.algo, ChecksumAlgo::Sha1);
        assert!(sum.verify(b"abc"));
        assert!(!sum.verify(b"abd"));
        assert_eq!(sum.to_string(), "sha1:a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn md5_and_sha256_digests() {
        assert_eq!(
            Checksum::compute(ChecksumAlgo::Md5, b"abc").hex,
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            Checksum::sha256(b"abc").hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn rejects_malformed() {
        assert!("sha1".parse::<Checksum>().is_err());
        assert!("crc32:deadbeef".parse::<Checksum>().is_err());
        assert!("sha256:abc".parse::<Checksum>().is_err());
        assert!("md5:zz0150983cd24fb0d6963f7d28e17f72".parse::<Checksum>().is_err());
    }
}
