use std::fmt;

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Digest algorithms a remote host key can be fingerprinted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
}

impl HashType {
    pub fn digest_len(&self) -> usize {
        match self {
            HashType::Md5 => 16,
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
        }
    }
}

/// Fixed-length digest of the remote host key, for out-of-band verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyDigest {
    hash_type: HashType,
    bytes: Vec<u8>,
}

impl HostKeyDigest {
    pub fn new(hash_type: HashType, bytes: Vec<u8>) -> HostKeyDigest {
        HostKeyDigest { hash_type, bytes }
    }

    /// Hashes a wire-encoded public key blob.
    pub fn compute(hash_type: HashType, key_blob: &[u8]) -> HostKeyDigest {
        let bytes = match hash_type {
            HashType::Md5 => md5::compute(key_blob).0.to_vec(),
            HashType::Sha1 => Sha1::digest(key_blob).to_vec(),
            HashType::Sha256 => Sha256::digest(key_blob).to_vec(),
        };
        HostKeyDigest { hash_type, bytes }
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for HostKeyDigest {
    // aa:bb:cc, the format ssh-keygen -l -E md5 prints
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        let mut first = true;
        for pair in hex.as_bytes().chunks(2) {
            if !first {
                f.write_str(":")?;
            }
            first = false;
            f.write_str(std::str::from_utf8(pair).map_err(|_| fmt::Error)?)?;
        }
        Ok(())
    }
}
